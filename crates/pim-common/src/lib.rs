//! PIM Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types and utilities for the player-import platform:
//!
//! - **Error Handling**: custom error and result types
//! - **Logging**: tracing initialization for NDJSON output
//! - **Normalization**: CSV header and field normalization shared by the
//!   ingestion worker and any ingress that previews files
//! - **Contract**: the versioned canonical row payload and report summary

pub mod contract;
pub mod error;
pub mod logging;
pub mod normalize;

// Re-export commonly used types
pub use error::{ImportError, Result};
