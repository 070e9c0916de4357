//! Messages-feed normalization.
//!
//! The feed returns one conversation as a JSON array, assumed chronological.
//! Each entry carries its body under `mensaje`, `message` or `text` (the two
//! feed versions disagree on the field name), or is itself a bare scalar.
//! Input order is preserved exactly; only the contacts list is ever
//! re-sorted.

use crate::marker::{self, ASSISTANT_PREFIX, CUSTOMER_PREFIX};
use crate::model::{Message, Role};
use serde_json::Value;

/// Assign a role from the raw, pre-extraction body.
///
/// Explicit prefixes win. Without one, messages alternate starting from the
/// customer: even index is received, odd is sent.
pub fn classify(raw_text: &str, index: usize) -> Role {
    if raw_text.starts_with(CUSTOMER_PREFIX) {
        Role::Received
    } else if raw_text.starts_with(ASSISTANT_PREFIX) {
        Role::Sent
    } else if index % 2 == 0 {
        Role::Received
    } else {
        Role::Sent
    }
}

/// Body text of one raw entry: the first present of `mensaje` / `message` /
/// `text`, or the entry itself when it is already a scalar.
pub(crate) fn body_of(entry: &Value) -> String {
    for field in ["mensaje", "message", "text"] {
        if let Some(text) = entry.get(field).and_then(Value::as_str) {
            return text.to_string();
        }
    }
    match entry {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Normalize a raw messages payload into an ordered conversation.
///
/// Non-array payloads yield an empty list, never an error.
pub fn normalize_messages(payload: &Value) -> Vec<Message> {
    let Some(entries) = payload.as_array() else {
        tracing::warn!("unexpected messages payload shape, expected an array");
        return Vec::new();
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let body = body_of(entry);
            // Classify before extraction so the role prefix is still visible
            let role = classify(&body, index);
            let extracted = marker::extract(&body);
            Message {
                id: index,
                text: extracted.text,
                stamp: extracted.stamp,
                role,
                original: entry.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Stamp;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn test_prefixed_messages_keep_order_and_roles() {
        let payload = json!([
            {"mensaje": "Cliente: hi °100"},
            {"mensaje": "IA: yo °200"},
        ]);
        let messages = normalize_messages(&payload);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, 0);
        assert_eq!(messages[0].role, Role::Received);
        assert_eq!(messages[0].text, "hi");
        assert_eq!(
            messages[0].stamp,
            Stamp::Marked(Utc.timestamp_millis_opt(100_000).unwrap())
        );
        assert_eq!(messages[1].id, 1);
        assert_eq!(messages[1].role, Role::Sent);
        assert_eq!(messages[1].text, "yo");
    }

    #[test]
    fn test_alternation_fallback_without_prefixes() {
        let payload = json!([
            {"mensaje": "uno"},
            {"mensaje": "dos"},
            {"mensaje": "tres"},
        ]);
        let roles: Vec<Role> = normalize_messages(&payload)
            .into_iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec![Role::Received, Role::Sent, Role::Received]);
    }

    #[test]
    fn test_prefix_wins_over_index() {
        assert_eq!(classify("IA: hola", 0), Role::Sent);
        assert_eq!(classify("Cliente: hola", 1), Role::Received);
    }

    #[test]
    fn test_body_field_priority() {
        let entry = json!({"mensaje": "a", "message": "b", "text": "c"});
        assert_eq!(body_of(&entry), "a");
        let entry = json!({"message": "b", "text": "c"});
        assert_eq!(body_of(&entry), "b");
        let entry = json!({"text": "c"});
        assert_eq!(body_of(&entry), "c");
    }

    #[test]
    fn test_scalar_entries() {
        let payload = json!(["Cliente: hola °100", "IA: buenas"]);
        let messages = normalize_messages(&payload);
        assert_eq!(messages[0].text, "hola");
        assert_eq!(messages[0].role, Role::Received);
        assert_eq!(messages[1].role, Role::Sent);
        assert_eq!(messages[1].stamp, Stamp::Missing);
    }

    #[test]
    fn test_non_array_payload_yields_empty() {
        assert!(normalize_messages(&json!({"mensajes": []})).is_empty());
        assert!(normalize_messages(&json!("nope")).is_empty());
        assert!(normalize_messages(&Value::Null).is_empty());
    }

    #[test]
    fn test_entry_without_body_still_counts() {
        // keeps positions aligned with the feed even for junk entries
        let payload = json!([{"foo": 1}, {"mensaje": "IA: ok °200"}]);
        let messages = normalize_messages(&payload);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "");
        assert_eq!(messages[0].role, Role::Received);
        assert_eq!(messages[1].id, 1);
    }

    #[test]
    fn test_original_record_is_preserved() {
        let payload = json!([{"mensaje": "IA: ok °200", "meta": 7}]);
        let messages = normalize_messages(&payload);
        assert_eq!(messages[0].original, payload[0]);
    }
}
