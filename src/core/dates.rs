//! Email date header parsing

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use super::degraded::Degraded;

lazy_static! {
    // Trailing comment such as "(UTC)" or "(PST)"
    static ref TRAILING_COMMENT_RE: Regex = Regex::new(r"\s*\([^)]*\)\s*$").unwrap();
}

/// Accepted header layouts, tried in order
const DATE_FORMATS: &[&str] = &["%a, %d %b %Y %H:%M:%S %z", "%d %b %Y %H:%M:%S %z"];

/// Parse a `Date:` header.
///
/// On failure the current time is attached as the fallback; ingestion keeps going
/// with a skewed clock rather than rejecting the message.
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>, Degraded<DateTime<Utc>>> {
    let cleaned = TRAILING_COMMENT_RE.replace(raw.trim(), "");

    for fmt in DATE_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(&cleaned, fmt) {
            return Ok(parsed.with_timezone(&Utc));
        }
    }

    // chrono rejects a weekday that disagrees with the date; the date wins
    if let Some((_, rest)) = cleaned.split_once(',') {
        if let Ok(parsed) = DateTime::parse_from_str(rest.trim(), DATE_FORMATS[1]) {
            return Ok(parsed.with_timezone(&Utc));
        }
    }

    Err(Degraded::new(
        Utc::now(),
        format!("unrecognized date header: {:?}", raw),
    ))
}
