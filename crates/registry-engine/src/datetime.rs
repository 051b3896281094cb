//! Date canonicalization for raw registry extracts.
//!
//! Source systems deliver event dates in a handful of layouts: ISO
//! `YYYY-MM-DD` (optionally with a time tail), slash forms `YYYY/MM/DD`
//! and `DD/MM/YYYY` (also optionally with a time tail), and the compact
//! `YYYYMMDD`. Everything is canonicalized to a [`NaiveDate`]; values
//! that fit none of the layouts, or that name an impossible calendar
//! date, come back as `None` and the caller decides whether the row
//! survives.

use chrono::NaiveDate;

/// Parse one raw date cell into a calendar date.
///
/// A time component after the first ten characters is ignored, so
/// `2013-05-14T09:30:00` and `2013-05-14 09:30` both canonicalize to
/// `2013-05-14`. Returns `None` for empty cells, unknown layouts, and
/// out-of-range dates such as `2013-13-01`.
pub fn canonicalize_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Ten-character date layouts, possibly followed by a time tail.
    if let Some(prefix) = trimmed.get(..10) {
        let bytes = prefix.as_bytes();
        let format = if bytes[4] == b'-' && bytes[7] == b'-' {
            Some("%Y-%m-%d")
        } else if bytes[4] == b'/' && bytes[7] == b'/' {
            Some("%Y/%m/%d")
        } else if bytes[2] == b'/' && bytes[5] == b'/' {
            Some("%d/%m/%Y")
        } else {
            None
        };
        if let Some(format) = format {
            return NaiveDate::parse_from_str(prefix, format).ok();
        }
    }

    // Compact layout carries no separators and no time tail.
    if trimmed.len() == 8 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveDate::parse_from_str(trimmed, "%Y%m%d").ok();
    }

    None
}

/// Render a date back in the canonical `YYYY-MM-DD` layout used by
/// snapshot relations.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
