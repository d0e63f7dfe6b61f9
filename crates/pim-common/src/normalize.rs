//! CSV header and field normalization
//!
//! Single shared implementation used by the ingestion worker and by any
//! ingress that previews uploaded files. Both sides must agree on the
//! normalized header names, since batch column mappings are resolved against
//! them.
//!
//! Normalization is idempotent: applying it to already-normalized headers is
//! a no-op.

/// Normalize a CSV header row.
///
/// For each header, in order:
/// - strip a leading UTF-8 BOM from the first header,
/// - trim surrounding whitespace,
/// - collapse any internal newline run into a single space,
/// - replace an empty header with the positional placeholder `_col_N`
///   (1-indexed),
/// - deduplicate repeated names by suffixing later occurrences with `_2`,
///   `_3`, ... (the first occurrence is unchanged).
pub fn normalize_headers<S: AsRef<str>>(headers: &[S]) -> Vec<String> {
    let mut seen: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut out = Vec::with_capacity(headers.len());

    for (idx, header) in headers.iter().enumerate() {
        let mut name = header.as_ref();
        if idx == 0 {
            name = name.strip_prefix('\u{feff}').unwrap_or(name);
        }

        let mut cleaned = collapse_newlines(name.trim());
        if cleaned.is_empty() {
            cleaned = format!("_col_{}", idx + 1);
        }

        let occurrence = seen.entry(cleaned.clone()).or_insert(0);
        *occurrence += 1;

        let unique = if *occurrence == 1 {
            cleaned
        } else {
            // Suffix collisions with pre-existing headers bump the counter
            // until the name is free.
            let mut n = *occurrence;
            loop {
                let candidate = format!("{}_{}", cleaned, n);
                if !seen.contains_key(&candidate) {
                    seen.insert(candidate.clone(), 1);
                    break candidate;
                }
                n += 1;
            }
        };

        out.push(unique);
    }

    out
}

/// Normalize a single field value: trim whitespace, map empty to absent.
pub fn normalize_value(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Replace every run of `\r` / `\n` characters with a single space.
fn collapse_newlines(s: &str) -> String {
    if !s.contains(['\r', '\n']) {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len());
    let mut in_newline = false;
    for c in s.chars() {
        if c == '\r' || c == '\n' {
            if !in_newline {
                out.push(' ');
                in_newline = true;
            }
        } else {
            out.push(c);
            in_newline = false;
        }
    }
    out
}
