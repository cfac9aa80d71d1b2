//! Cache verdict parsing
//!
//! The tool reports its decision with a `<tool>-cache-hit: true|false` line,
//! possibly wrapped by its logger. This is the only place that output is
//! interpreted.

use std::fmt;

/// What the tool said about the last build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheVerdict {
    Hit,
    Miss,
    /// No sentinel, several sentinels, or an unreadable value
    Indeterminate,
}

impl fmt::Display for CacheVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheVerdict::Hit => write!(f, "cache hit"),
            CacheVerdict::Miss => write!(f, "cache miss"),
            CacheVerdict::Indeterminate => write!(f, "no clear cache verdict"),
        }
    }
}

/// Parse combined build output into a verdict.
///
/// Exactly one sentinel line must be present; anything else is
/// `Indeterminate`.
pub fn parse_cache_verdict(output: &str, tool_name: &str) -> CacheVerdict {
    let marker = format!("{}-cache-hit:", tool_name);

    let mut verdicts = output.lines().filter_map(|line| {
        let (_, rest) = line.split_once(&marker)?;
        let value: String = rest
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();
        Some(match value.as_str() {
            "true" => CacheVerdict::Hit,
            "false" => CacheVerdict::Miss,
            _ => CacheVerdict::Indeterminate,
        })
    });

    match (verdicts.next(), verdicts.next()) {
        (Some(verdict), None) => verdict,
        _ => CacheVerdict::Indeterminate,
    }
}
