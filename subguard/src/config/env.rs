use std::fmt::Display;
use std::str::FromStr;

use crate::{Error, Result};

/// Parse `key` via `lookup`, falling back to `default` when unset or blank.
pub fn parse_env<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| Error::config(format!("invalid value for {}: {:?} ({})", key, raw, e))),
        _ => Ok(default),
    }
}

/// Split a comma-separated stream list, trimming entries, dropping empties,
/// and removing duplicates while keeping first-seen order.
pub fn normalize_stream_list(raw: &str) -> Vec<String> {
    dedup_stream_names(raw.split(','))
}

/// Trim names, drop empties and duplicates, keep first-seen order.
pub fn dedup_stream_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for name in names {
        let name = name.as_ref().trim();
        if !name.is_empty() && !out.iter().any(|existing| existing == name) {
            out.push(name.to_string());
        }
    }
    out
}
