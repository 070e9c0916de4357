//! Trailing-timestamp marker codec.
//!
//! The upstream automation embeds the send time directly in message text,
//! after a degree-sign delimiter at the very end of the string:
//!
//! ```text
//! "Me encantaria saber como son los productos °1762290761"
//! "Dale, Lucas. Te cuento rápido:\n\nTenemos tres gimnasios. °1762290794949"
//! ```
//!
//! Digit-run length decides the unit: up to 10 digits is Unix seconds,
//! exactly 13 is milliseconds, anything else is taken as milliseconds
//! as-is. This is a reverse-engineered contract with the upstream encoder;
//! the thresholds must not be "improved".
//!
//! Role prefixes ("Cliente:" / "IA:") are stripped from the remaining text
//! whether or not a marker matched. Classification happens earlier, on the
//! raw body, so the prefix is still visible there (see messages.rs).

use crate::model::Stamp;
use chrono::{LocalResult, TimeZone, Utc};

/// Delimiter between message text and the encoded timestamp.
pub const MARKER: char = '°';

/// Customer role prefix, emitted by the newer feed version.
pub const CUSTOMER_PREFIX: &str = "Cliente:";
/// Automated-assistant role prefix.
pub const ASSISTANT_PREFIX: &str = "IA:";

/// Message text with its embedded metadata split off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub stamp: Stamp,
}

/// Scan `raw` for a trailing `°<digits>` marker and split it off.
///
/// This is an explicit tail scan rather than a regex: optional trailing
/// whitespace, then a run of ASCII digits, then the marker character,
/// anchored to the very end of the string. Newlines earlier in the text
/// never affect the match. Total over all inputs; never panics.
pub fn extract(raw: &str) -> Extracted {
    if let Some((head, digits)) = split_marker(raw) {
        Extracted {
            text: strip_role_prefix(head.trim()).to_string(),
            stamp: decode_digits(digits),
        }
    } else {
        // No marker: same prefix rule, timestamp left for the caller to
        // default at the boundary.
        Extracted {
            text: strip_role_prefix(raw).to_string(),
            stamp: Stamp::Missing,
        }
    }
}

/// Split `"text °12345 "` into `("text ", "12345")`.
///
/// The digits must immediately follow the marker; `"° 123"` does not match.
fn split_marker(raw: &str) -> Option<(&str, &str)> {
    let body = raw.trim_end();
    let digits_len = body
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .count();
    if digits_len == 0 {
        return None;
    }
    // ASCII digits are single-byte, so this slice boundary is safe.
    let digits_start = body.len() - digits_len;
    let head = body[..digits_start].strip_suffix(MARKER)?;
    Some((head, &body[digits_start..]))
}

/// Remove a leading role prefix plus any whitespace that follows it.
pub fn strip_role_prefix(text: &str) -> &str {
    for prefix in [CUSTOMER_PREFIX, ASSISTANT_PREFIX] {
        if let Some(rest) = text.strip_prefix(prefix) {
            return rest.trim_start();
        }
    }
    text
}

/// Decode a digit run into an instant using the length heuristic.
///
/// Runs that overflow `i64`, or values chrono cannot represent, yield
/// `Stamp::Invalid`; downstream code renders those as a placeholder and
/// orders them as "now".
fn decode_digits(digits: &str) -> Stamp {
    let Ok(value) = digits.parse::<i64>() else {
        return Stamp::Invalid;
    };
    let millis = if digits.len() <= 10 {
        // Unix seconds
        match value.checked_mul(1000) {
            Some(ms) => ms,
            None => return Stamp::Invalid,
        }
    } else {
        // 13 digits is the epoch-milliseconds form; other lengths are
        // best-effort taken as milliseconds too.
        value
    };
    match Utc.timestamp_millis_opt(millis) {
        LocalResult::Single(ts) => Stamp::Marked(ts),
        _ => Stamp::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marked_millis(ms: i64) -> Stamp {
        Stamp::Marked(Utc.timestamp_millis_opt(ms).unwrap())
    }

    #[test]
    fn test_extract_seconds_marker() {
        let out = extract("Hola °1762290761");
        assert_eq!(out.text, "Hola");
        assert_eq!(out.stamp, marked_millis(1_762_290_761_000));
    }

    #[test]
    fn test_extract_millis_marker_with_prefix() {
        let out = extract("IA: Hola °1762460721699");
        assert_eq!(out.text, "Hola");
        assert_eq!(out.stamp, marked_millis(1_762_460_721_699));
    }

    #[test]
    fn test_customer_prefix_stripped_without_marker() {
        let out = extract("Cliente: buenas tardes");
        assert_eq!(out.text, "buenas tardes");
        assert_eq!(out.stamp, Stamp::Missing);
    }

    #[test]
    fn test_no_marker_leaves_text_untouched() {
        let out = extract("sin marca alguna");
        assert_eq!(out.text, "sin marca alguna");
        assert_eq!(out.stamp, Stamp::Missing);
    }

    #[test]
    fn test_digits_must_follow_marker_immediately() {
        let out = extract("Hola ° 1762290761");
        assert_eq!(out.stamp, Stamp::Missing);
        assert_eq!(out.text, "Hola ° 1762290761");
    }

    #[test]
    fn test_marker_matches_across_newlines() {
        let out = extract("Dale, Lucas.\n\nTe cuento. °1762290794949");
        assert_eq!(out.text, "Dale, Lucas.\n\nTe cuento.");
        assert_eq!(out.stamp, marked_millis(1_762_290_794_949));
    }

    #[test]
    fn test_trailing_whitespace_after_digits() {
        let out = extract("Hola °1762290761  \n");
        assert_eq!(out.text, "Hola");
        assert_eq!(out.stamp, marked_millis(1_762_290_761_000));
    }

    #[test]
    fn test_marker_only_message() {
        let out = extract("°1762290761");
        assert_eq!(out.text, "");
        assert_eq!(out.stamp, marked_millis(1_762_290_761_000));
    }

    #[test]
    fn test_eleven_digit_run_taken_as_millis() {
        let out = extract("x °99999999999");
        assert_eq!(out.stamp, marked_millis(99_999_999_999));
    }

    #[test]
    fn test_overflowing_digit_run_is_invalid() {
        let out = extract("x °99999999999999999999");
        assert_eq!(out.text, "x");
        assert_eq!(out.stamp, Stamp::Invalid);
    }

    #[test]
    fn test_ten_digit_boundary_is_seconds() {
        // 9999999999 seconds is late 2286, still representable
        let out = extract("x °9999999999");
        assert_eq!(out.stamp, marked_millis(9_999_999_999_000));
    }
}
