//! TimeSpec Module
//!
//! Parses human readable durations such as `"5m"` or `"200ms"` into
//! milliseconds. Raw millisecond counts pass through unchanged.

use std::fmt;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static TIME_SPEC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s*([A-Za-z]*)\s*$").expect("valid time spec regex"));

// == TimeSpec Error ==
/// Reasons a duration string can be rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeSpecError {
    /// The input does not look like `<integer><unit>` at all
    #[error("invalid duration format: {0:?}")]
    InvalidFormat(String),

    /// The number parsed but the unit is not one of ms, s, m, h, d, w
    #[error("unknown duration unit {unit:?} in {input:?}")]
    UnknownUnit { input: String, unit: String },

    /// The duration does not fit in 64 bits of milliseconds
    #[error("duration overflows: {0:?}")]
    Overflow(String),
}

// == TimeSpec ==
/// A duration as supplied by a caller: either raw milliseconds or text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeSpec {
    /// Milliseconds, used as-is
    Millis(u64),
    /// Text of the form `<integer><unit>`
    Text(String),
}

impl TimeSpec {
    /// Resolves the spec to milliseconds.
    pub fn to_millis(&self) -> Result<u64, TimeSpecError> {
        match self {
            TimeSpec::Millis(ms) => Ok(*ms),
            TimeSpec::Text(text) => parse_text(text),
        }
    }
}

impl From<u64> for TimeSpec {
    fn from(ms: u64) -> Self {
        TimeSpec::Millis(ms)
    }
}

impl From<&str> for TimeSpec {
    fn from(text: &str) -> Self {
        TimeSpec::Text(text.to_string())
    }
}

impl From<String> for TimeSpec {
    fn from(text: String) -> Self {
        TimeSpec::Text(text)
    }
}

impl From<Duration> for TimeSpec {
    fn from(duration: Duration) -> Self {
        TimeSpec::Millis(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

impl From<&TimeSpec> for TimeSpec {
    fn from(spec: &TimeSpec) -> Self {
        spec.clone()
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeSpec::Millis(ms) => write!(f, "{}ms", ms),
            TimeSpec::Text(text) => f.write_str(text),
        }
    }
}

// == Parse ==
/// Converts a duration spec into milliseconds.
///
/// ```
/// use mini_swr::timespec::parse;
///
/// assert_eq!(parse("5m").unwrap(), 300_000);
/// assert_eq!(parse(1234u64).unwrap(), 1234);
/// ```
pub fn parse(spec: impl Into<TimeSpec>) -> Result<u64, TimeSpecError> {
    spec.into().to_millis()
}

fn parse_text(text: &str) -> Result<u64, TimeSpecError> {
    let caps = TIME_SPEC_RE
        .captures(text)
        .ok_or_else(|| TimeSpecError::InvalidFormat(text.to_string()))?;

    let amount: u64 = caps[1]
        .parse()
        .map_err(|_| TimeSpecError::Overflow(text.to_string()))?;

    let unit = caps[2].to_ascii_lowercase();
    let factor = match unit.as_str() {
        // bare integers are already milliseconds
        "" | "ms" => 1,
        "s" => 1_000,
        "m" => 60 * 1_000,
        "h" => 60 * 60 * 1_000,
        "d" => 24 * 60 * 60 * 1_000,
        "w" => 7 * 24 * 60 * 60 * 1_000,
        _ => {
            return Err(TimeSpecError::UnknownUnit {
                input: text.to_string(),
                unit: caps[2].to_string(),
            })
        }
    };

    amount
        .checked_mul(factor)
        .ok_or_else(|| TimeSpecError::Overflow(text.to_string()))
}
