//! Phone-number normalization and contact-key parsing.
//!
//! Contact feed keys come in two observed forms:
//! - a bare phone number: "59896243943"
//! - number plus name: "59896243943 | Lucas Perazzo"
//!
//! The pipe separator (with its surrounding spaces) only appears in the
//! newer feed version; older payloads always use the bare form.

/// Placeholder shown when an identifier has no digits at all.
pub const UNKNOWN_NUMBER: &str = "Desconocido";

/// Strip every non-digit character from a raw identifier.
pub fn normalize_number(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Human-readable rendering of a phone number.
///
/// Ten or more digits split into country / area / local groups
/// ("59896243943" → "+598 9624 3943"); shorter numbers render as
/// "+<digits>"; an identifier with no digits renders as the placeholder.
pub fn display_number(raw: &str) -> String {
    let digits = normalize_number(raw);
    if digits.is_empty() {
        return UNKNOWN_NUMBER.to_string();
    }
    if digits.len() >= 10 {
        let country = &digits[..digits.len() - 8];
        let area = &digits[digits.len() - 8..digits.len() - 4];
        let local = &digits[digits.len() - 4..];
        format!("+{} {} {}", country, area, local)
    } else {
        format!("+{}", digits)
    }
}

/// A contacts-feed key split into its number and optional display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactKey {
    pub number: String,
    pub name: Option<String>,
}

/// Split a raw feed key on the first `" | "` separator.
///
/// Keys without the separator are bare phone numbers. The number side is
/// normalized to digits; callers reject short results with a length check.
pub fn parse_contact_key(raw: &str) -> ContactKey {
    match raw.split_once(" | ") {
        Some((number, name)) => {
            let name = name.trim();
            ContactKey {
                number: normalize_number(number),
                name: (!name.is_empty()).then(|| name.to_string()),
            }
        }
        None => ContactKey {
            number: normalize_number(raw),
            name: None,
        },
    }
}
