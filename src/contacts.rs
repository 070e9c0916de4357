//! Contacts-feed normalization.
//!
//! The feed has shipped three shapes, tried in this order:
//!
//! 1. An array whose elements are either objects mapping contact-key →
//!    message list, or bare identifier scalars:
//!    `[{"59896243943 | Lucas Perazzo": ["Cliente: hola °100", ...]}]`
//! 2. An object with a `contacts` array of records carrying `number`,
//!    `wa_id` or `phone` fields.
//! 3. A plain object whose own keys are contact keys.
//!
//! Anything else yields an empty list, never an error. The caller decides
//! whether an empty result warrants the fallback contact set.

use crate::marker;
use crate::messages::body_of;
use crate::model::{Contact, Stamp};
use crate::phone;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Parsed numbers shorter than this are discarded as noise (header rows,
/// n8n metadata keys and the like).
pub const MIN_NUMBER_LEN: usize = 8;

/// Normalize a raw contacts payload into a sorted contact list.
///
/// `now` is the shared fetch instant for this pass: every entry without a
/// decodable last-activity marker sorts as `now`, which keeps the result
/// deterministic (and idempotent) for a fixed clock.
pub fn normalize_contacts(payload: &Value, now: DateTime<Utc>) -> Vec<Contact> {
    let mut contacts = match payload {
        Value::Array(items) => from_keyed_list(items),
        Value::Object(map) => match map.get("contacts").and_then(Value::as_array) {
            Some(records) => from_contact_records(records),
            None => from_key_map(map),
        },
        _ => {
            tracing::debug!("unrecognized contacts payload shape");
            Vec::new()
        }
    };

    // Stable sort: equal (or defaulted) timestamps keep payload order
    contacts.sort_by_key(|c| std::cmp::Reverse(c.last_activity.unwrap_or(now)));
    contacts
}

/// Shape 1: array of key→messages objects or bare identifiers.
fn from_keyed_list(items: &[Value]) -> Vec<Contact> {
    let mut contacts = Vec::new();
    for item in items {
        match item {
            Value::Object(map) => {
                for (key, value) in map {
                    if let Some(contact) = contact_from_key(key, Some(value)) {
                        contacts.push(contact);
                    }
                }
            }
            Value::String(s) => contacts.extend(contact_from_key(s, None)),
            Value::Number(n) => contacts.extend(contact_from_key(&n.to_string(), None)),
            _ => {}
        }
    }
    contacts
}

/// Shape 2: `{"contacts": [{"number": ...} | {"wa_id": ...} | {"phone": ...}]}`.
///
/// This older record form never carries a display name, and its
/// `lastActivity` field (when present) is already an ISO instant.
fn from_contact_records(records: &[Value]) -> Vec<Contact> {
    records
        .iter()
        .filter_map(|record| {
            let raw = ["number", "wa_id", "phone"]
                .iter()
                .find_map(|field| scalar_string(record.get(*field)?))?;
            let number = phone::normalize_number(&raw);
            let last_activity = record
                .get("lastActivity")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|ts| ts.with_timezone(&Utc));
            Some(Contact {
                display_name: phone::display_number(&number),
                number,
                has_name: false,
                original_key: raw,
                last_activity,
            })
        })
        .collect()
}

/// Shape 3: the payload object's own keys are contact keys. A key whose
/// value is an array is treated as that contact's message list.
fn from_key_map(map: &Map<String, Value>) -> Vec<Contact> {
    map.iter()
        .filter_map(|(key, value)| contact_from_key(key, Some(value)))
        .collect()
}

/// Build one contact from a raw feed key and its optional value.
fn contact_from_key(raw_key: &str, value: Option<&Value>) -> Option<Contact> {
    let key = phone::parse_contact_key(raw_key);
    if key.number.len() < MIN_NUMBER_LEN {
        tracing::debug!(key = raw_key, "discarding contact key with short number");
        return None;
    }
    let last_activity = value
        .and_then(Value::as_array)
        .and_then(|messages| last_activity_of(messages));
    let (display_name, has_name) = match key.name {
        Some(name) => (name, true),
        None => (phone::display_number(&key.number), false),
    };
    Some(Contact {
        number: key.number,
        display_name,
        has_name,
        original_key: raw_key.to_string(),
        last_activity,
    })
}

/// Identifier fields arrive as strings or bare numbers depending on the
/// feed version.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Most recent valid embedded timestamp in a raw message list.
///
/// Scans from the tail: feeds are expected chronological, but the newest
/// valid marker wins even when they are not. `None` when nothing decodes.
pub fn last_activity_of(messages: &[Value]) -> Option<DateTime<Utc>> {
    let mut latest: Option<DateTime<Utc>> = None;
    for entry in messages.iter().rev() {
        if let Stamp::Marked(ts) = marker::extract(&body_of(entry)).stamp {
            latest = Some(latest.map_or(ts, |cur| cur.max(ts)));
        }
    }
    latest
}

/// Placeholder contacts shown when the feed fails or yields nothing.
pub fn fallback_contacts() -> Vec<Contact> {
    ["59896243943", "59812345678", "59898765432"]
        .into_iter()
        .map(|number| Contact {
            number: number.to_string(),
            display_name: phone::display_number(number),
            has_name: false,
            original_key: number.to_string(),
            last_activity: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fixed_now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_762_500_000_000).unwrap()
    }

    #[test]
    fn test_keyed_list_orders_by_last_activity_desc() {
        let payload = json!([
            {"59896243943": ["hola °100"]},
            {"59812345678": ["buenas °300"]},
        ]);
        let contacts = normalize_contacts(&payload, fixed_now());
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].number, "59812345678");
        assert_eq!(contacts[1].number, "59896243943");
        assert_eq!(
            contacts[0].last_activity,
            Some(Utc.timestamp_millis_opt(300_000).unwrap())
        );
    }

    #[test]
    fn test_short_numbers_are_discarded() {
        let payload = json!([{"1234567": ["hola °100"]}, {"59896243943": []}]);
        let contacts = normalize_contacts(&payload, fixed_now());
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].number, "59896243943");
    }

    #[test]
    fn test_named_key_sets_display_name() {
        let payload = json!([{"59896243943 | Lucas Perazzo": ["hola °100"]}]);
        let contacts = normalize_contacts(&payload, fixed_now());
        assert_eq!(contacts[0].display_name, "Lucas Perazzo");
        assert!(contacts[0].has_name);
        assert_eq!(contacts[0].original_key, "59896243943 | Lucas Perazzo");
        assert_eq!(contacts[0].number, "59896243943");
    }

    #[test]
    fn test_bare_identifiers_in_array() {
        let payload = json!(["59896243943", 59812345678u64]);
        let contacts = normalize_contacts(&payload, fixed_now());
        assert_eq!(contacts.len(), 2);
        assert!(!contacts[0].has_name);
        assert_eq!(contacts[0].last_activity, None);
    }

    #[test]
    fn test_contacts_field_shape() {
        let payload = json!({"contacts": [
            {"wa_id": "59896243943", "lastActivity": "2025-11-04T10:00:00Z"},
            {"phone": "59812345678"},
        ]});
        let contacts = normalize_contacts(&payload, fixed_now());
        assert_eq!(contacts.len(), 2);
        // no lastActivity resolves to now, which sorts first here
        assert_eq!(contacts[0].number, "59812345678");
        assert_eq!(contacts[0].last_activity, None);
        assert!(!contacts[0].has_name);
        assert_eq!(
            contacts[1].last_activity,
            Some(Utc.with_ymd_and_hms(2025, 11, 4, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_plain_key_map_shape() {
        let payload = json!({
            "59896243943 | Lucas Perazzo": ["hola °100"],
            "59812345678": ["que tal °300"],
        });
        let contacts = normalize_contacts(&payload, fixed_now());
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].number, "59812345678");
    }

    #[test]
    fn test_unrecognized_shape_yields_empty() {
        assert!(normalize_contacts(&json!("nope"), fixed_now()).is_empty());
        assert!(normalize_contacts(&json!(42), fixed_now()).is_empty());
        assert!(normalize_contacts(&Value::Null, fixed_now()).is_empty());
        assert!(normalize_contacts(&json!([]), fixed_now()).is_empty());
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let payload = json!([
            {"59896243943 | Lucas Perazzo": ["hola °100"]},
            {"59812345678": []},
            {"59898765432": ["IA: hey °300"]},
        ]);
        let now = fixed_now();
        let first = normalize_contacts(&payload, now);
        let second = normalize_contacts(&payload, now);
        assert_eq!(first, second);
    }

    #[test]
    fn test_stable_tie_break_keeps_payload_order() {
        // Neither contact has a marker, so both default to now
        let payload = json!([
            {"59896243943": []},
            {"59812345678": []},
        ]);
        let contacts = normalize_contacts(&payload, fixed_now());
        assert_eq!(contacts[0].number, "59896243943");
        assert_eq!(contacts[1].number, "59812345678");
    }

    #[test]
    fn test_last_activity_of_takes_max_not_last() {
        let messages = vec![
            json!("viejo °400"),
            json!("nuevo °200"),
            json!("sin marca"),
        ];
        assert_eq!(
            last_activity_of(&messages),
            Some(Utc.timestamp_millis_opt(400_000).unwrap())
        );
    }

    #[test]
    fn test_last_activity_of_without_markers() {
        let messages = vec![json!("hola"), json!({"mensaje": "que tal"})];
        assert_eq!(last_activity_of(&messages), None);
    }

    #[test]
    fn test_fallback_contacts_are_formatted() {
        let contacts = fallback_contacts();
        assert_eq!(contacts.len(), 3);
        assert_eq!(contacts[0].number, "59896243943");
        assert_eq!(contacts[0].display_name, "+598 9624 3943");
        assert!(!contacts[0].has_name);
    }

    #[test]
    fn test_duplicate_numbers_are_kept() {
        // duplicated raw keys are not deduplicated; both survive
        let payload = json!([
            {"59896243943": ["a °100"]},
            {"59896243943 | Lucas": ["b °200"]},
        ]);
        let contacts = normalize_contacts(&payload, fixed_now());
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].display_name, "Lucas");
    }
}
