//! Shared domain records and the in-process conversation cache.
//!
//! Everything here is a plain value object: records are rebuilt wholesale on
//! every fetch and the previous generation is discarded. The only link
//! between a message list and its contact is the bare `number` string key.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

/// Message origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    /// Customer message (rendered as an incoming bubble).
    #[serde(rename = "received")]
    Received,
    /// Automated assistant message (outgoing bubble).
    #[serde(rename = "sent")]
    Sent,
}

/// Outcome of the trailing `°<digits>` marker scan.
///
/// The "default to now" rule is deliberately NOT baked in here: normalizers
/// keep the sentinel so tests can tell a real marker from a defaulted one,
/// and the substitution happens only at the sorting/serialization boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    /// Parsed from a trailing marker.
    Marked(DateTime<Utc>),
    /// A marker matched but its digits don't convert to a representable
    /// instant.
    Invalid,
    /// No marker at the end of the text.
    Missing,
}

impl Stamp {
    /// Resolved instant for ordering. Invalid and missing stamps count as
    /// "now": not earlier or later than anything else in the same pass.
    pub fn resolve(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Stamp::Marked(ts) => ts,
            Stamp::Invalid | Stamp::Missing => now,
        }
    }

    /// The instant to render, if there is one. A missing marker renders as
    /// the fetch instant; an invalid one renders as a placeholder instead.
    pub fn display(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Stamp::Marked(ts) => Some(ts),
            Stamp::Missing => Some(now),
            Stamp::Invalid => None,
        }
    }
}

/// A normalized contact from the contacts feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    /// Canonical digit-only identifier.
    pub number: String,
    /// Explicit name if the feed supplied one, else the formatted number.
    pub display_name: String,
    /// Whether an explicit name was present in the feed key.
    pub has_name: bool,
    /// The raw feed key, echoed verbatim when fetching this conversation.
    /// May differ from `number` when the feed uses composite keys.
    pub original_key: String,
    /// Most recent valid embedded timestamp among the contact's messages.
    /// `None` means no marker was decodable; resolves to "now" downstream.
    pub last_activity: Option<DateTime<Utc>>,
}

/// A normalized message within one conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// 0-based position within the conversation; stable only for one load.
    pub id: usize,
    /// Body with the trailing marker and any role prefix stripped.
    pub text: String,
    pub stamp: Stamp,
    pub role: Role,
    /// Untouched raw record, kept for diagnostics and export only.
    pub original: Value,
}

/// Latest normalized conversations, shared between HTTP handlers and the
/// poller. Each conversation is replaced wholesale on every fetch for its
/// contact; nothing is merged.
pub struct ConversationCache {
    conversations: DashMap<String, Vec<Message>>,
}

impl ConversationCache {
    pub fn new() -> Self {
        Self {
            conversations: DashMap::new(),
        }
    }

    /// Replace the cached conversation for a contact number.
    pub fn replace(&self, number: &str, messages: Vec<Message>) {
        self.conversations.insert(number.to_string(), messages);
    }

    /// Clone of the cached conversation, if any.
    pub fn get(&self, number: &str) -> Option<Vec<Message>> {
        self.conversations.get(number).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }
}
