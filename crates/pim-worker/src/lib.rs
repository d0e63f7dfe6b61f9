//! Player-import ingestion worker
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! A polling worker that claims uploaded CSV batches from PostgreSQL,
//! streams the files from S3-compatible storage, normalizes and validates
//! each row against the canonical `v1` contract, and stages the results for
//! the downstream execute step.
//!
//! Module boundaries:
//!
//! - [`repository`] is the only module that holds the database pool and
//!   issues SQL; every other module goes through its operations.
//! - [`pipeline`] owns the streaming parse/normalize/validate/flush path for
//!   one claimed batch.
//! - [`claim`] runs the stale-claim reaper and the atomic claim.
//! - [`worker`] is the poll loop wiring the pieces together.

pub mod batch;
pub mod claim;
pub mod config;
pub mod error;
pub mod health;
pub mod pipeline;
pub mod repository;
pub mod storage;
pub mod worker;

pub use error::{WorkerError, WorkerResult};
