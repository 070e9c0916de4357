//! # visor-rs
//!
//! Backend for a browser-based WhatsApp conversation viewer.
//!
//! The service polls two upstream JSON feeds (contacts and per-contact
//! messages), normalizes every payload through the parsing pipeline, and
//! serves display-ready records to the frontend.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────────┐
//! │  Frontend   │────▶│  Axum HTTP   │────▶│  Upstream feeds  │
//! │  (static/)  │     │  Server      │     │  (contacts,      │
//! └─────────────┘     └──────────────┘     │   messages JSON) │
//!                           │              └──────────────────┘
//!                           ▼
//!                     ┌──────────────┐
//!                     │  Normalizers │
//!                     │  + cache     │
//!                     └──────────────┘
//! ```
//!
//! ## API Endpoints
//!
//! - `GET /health` - Server health check
//! - `GET /api/contacts` - Latest normalized contact list
//! - `POST /api/contacts/refresh` - Manual refresh (dropped while busy)
//! - `GET /api/conversations/{wa_id}/messages` - Fetch + normalize one chat
//! - `POST /api/conversations/{wa_id}/select` - Pick the chat the poller follows
//! - `GET /api/conversations/{wa_id}/export` - Download a chat as JSON
//! - `GET /api/debug/state` - Session state snapshot
//! - `GET /api/debug/extract` - Run the timestamp codec on arbitrary text

mod contacts;
mod feed;
mod marker;
mod messages;
mod model;
mod phone;
mod timefmt;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Local, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::feed::FeedClient;
use crate::model::{Contact, ConversationCache, Message, Role, Stamp};

// ============================================================================
// Configuration
// ============================================================================

const DEFAULT_CONTACTS_ENDPOINT: &str =
    "https://n8n.uni.uy/webhook/3b5f9ce4-3482-4077-aa8c-cb0def78dd4a";
const DEFAULT_MESSAGES_ENDPOINT: &str =
    "https://n8n.uni.uy/webhook/a7e6d994-fe18-4b68-8d47-cba715c349c4";

const DEFAULT_POLL_SECS: u64 = 30;
const DEFAULT_PORT: u16 = 4870;

/// How often the watchdog verifies the poller is still running.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(60);

struct Config {
    contacts_url: String,
    messages_url: String,
    poll_interval: Duration,
    port: u16,
}

impl Config {
    fn from_env() -> Self {
        let contacts_url = std::env::var("VISOR_CONTACTS_URL")
            .unwrap_or_else(|_| DEFAULT_CONTACTS_ENDPOINT.to_string());
        let messages_url = std::env::var("VISOR_MESSAGES_URL")
            .unwrap_or_else(|_| DEFAULT_MESSAGES_ENDPOINT.to_string());
        let poll_secs: u64 = std::env::var("VISOR_POLL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_POLL_SECS)
            .max(1);
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        Self {
            contacts_url,
            messages_url,
            poll_interval: Duration::from_secs(poll_secs),
            port,
        }
    }
}

// ============================================================================
// App State - Shared state across all request handlers
// ============================================================================

/// The conversation the poller keeps fresh.
#[derive(Clone, Debug, Serialize)]
struct Selection {
    number: String,
    /// Raw feed key echoed verbatim on message fetches.
    #[serde(rename = "originalKey")]
    original_key: String,
}

/// Result of the most recent contacts refresh, replaced wholesale each pass.
struct ContactsState {
    contacts: Vec<Contact>,
    warning: Option<String>,
    category: Option<&'static str>,
    fallback: bool,
    /// The pass's shared "now": entries without a decodable marker resolve
    /// to this instant, keeping repeated reads of one pass identical.
    refreshed_at: DateTime<Utc>,
}

impl ContactsState {
    fn empty() -> Self {
        Self {
            contacts: Vec::new(),
            warning: None,
            category: None,
            fallback: false,
            refreshed_at: Utc::now(),
        }
    }
}

/// Global application state shared across handlers and background tasks.
struct AppState {
    start_time: Instant,
    feed: FeedClient,
    poll_interval: Duration,
    contacts: RwLock<ContactsState>,
    conversations: ConversationCache,
    selection: RwLock<Option<Selection>>,
    // Busy flags: a new fetch of the same kind is dropped (not queued)
    // while one is in flight. In-flight fetches are never cancelled.
    loading_contacts: AtomicBool,
    loading_messages: AtomicBool,
    poller: Mutex<Option<JoinHandle<()>>>,
}

/// Resolve a path `wa_id` to the key the feed expects. A known contact's
/// original key wins; otherwise the normalized digits of the given value,
/// or the value itself when it has no digits at all.
fn resolve_selection(contacts: &[Contact], wa_id: &str) -> Selection {
    if let Some(contact) = contacts
        .iter()
        .find(|c| c.original_key == wa_id || c.number == wa_id)
    {
        return Selection {
            number: contact.number.clone(),
            original_key: contact.original_key.clone(),
        };
    }
    let digits = phone::normalize_number(wa_id);
    Selection {
        number: if digits.is_empty() {
            wa_id.to_string()
        } else {
            digits
        },
        original_key: wa_id.to_string(),
    }
}

// ============================================================================
// Refresh operations (shared by handlers and the poller)
// ============================================================================

/// Fetch + normalize the contacts feed and swap in the new list.
///
/// Returns false when a contacts fetch was already in flight: the new
/// request is dropped, never queued.
async fn refresh_contacts(state: &Arc<AppState>) -> bool {
    if state.loading_contacts.swap(true, Ordering::SeqCst) {
        tracing::debug!("contacts fetch already in flight, dropping request");
        return false;
    }

    let result = state.feed.fetch_contacts().await;
    let now = Utc::now();
    let next = match result {
        Ok(payload) => {
            let normalized = contacts::normalize_contacts(&payload, now);
            if normalized.is_empty() {
                tracing::warn!("contacts payload yielded no contacts, serving fallback set");
                ContactsState {
                    contacts: contacts::fallback_contacts(),
                    warning: Some(
                        "No se encontraron contactos en el endpoint. \
                         Mostrando contactos de prueba."
                            .to_string(),
                    ),
                    category: Some("empty"),
                    fallback: true,
                    refreshed_at: now,
                }
            } else {
                tracing::info!(count = normalized.len(), "contacts refreshed");
                ContactsState {
                    contacts: normalized,
                    warning: None,
                    category: None,
                    fallback: false,
                    refreshed_at: now,
                }
            }
        }
        Err(err) => {
            tracing::warn!(
                category = err.category(),
                error = %err,
                "contacts fetch failed, serving fallback set"
            );
            ContactsState {
                contacts: contacts::fallback_contacts(),
                warning: Some(format!("{} Mostrando contactos de prueba.", err.warning())),
                category: Some(err.category()),
                fallback: true,
                refreshed_at: now,
            }
        }
    };

    *state.contacts.write().await = next;
    state.loading_contacts.store(false, Ordering::SeqCst);
    true
}

/// Fetch + normalize one conversation into the cache (poller path).
async fn refresh_conversation(state: &Arc<AppState>, selection: &Selection) -> bool {
    if state.loading_messages.swap(true, Ordering::SeqCst) {
        tracing::debug!("messages fetch already in flight, dropping request");
        return false;
    }

    match state.feed.fetch_messages(&selection.original_key).await {
        Ok(payload) => {
            let normalized = messages::normalize_messages(&payload);
            tracing::debug!(
                number = %selection.number,
                count = normalized.len(),
                "conversation refreshed"
            );
            state.conversations.replace(&selection.number, normalized);
        }
        Err(err) => {
            tracing::warn!(
                category = err.category(),
                error = %err,
                number = %selection.number,
                "messages fetch failed"
            );
        }
    }

    state.loading_messages.store(false, Ordering::SeqCst);
    true
}

// ============================================================================
// Background tasks: poller + watchdog
// ============================================================================

/// Recurring refresh of the contact list and the selected conversation.
/// The first tick fires immediately, which doubles as the initial load.
fn spawn_poller(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.poll_interval);
        loop {
            ticker.tick().await;
            refresh_contacts(&state).await;
            let selection = state.selection.read().await.clone();
            if let Some(selection) = selection {
                refresh_conversation(&state, &selection).await;
            }
        }
    })
}

/// Periodically verify the poller is still registered and re-arm it if not.
fn spawn_watchdog(state: Arc<AppState>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(WATCHDOG_INTERVAL).await;
            let mut poller = state.poller.lock().await;
            let alive = poller.as_ref().is_some_and(|handle| !handle.is_finished());
            if !alive {
                tracing::warn!("refresh poller is gone, re-arming");
                *poller = Some(spawn_poller(state.clone()));
            }
        }
    });
}

// ============================================================================
// Wire types - what the frontend receives
// ============================================================================

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Serialize)]
struct WireContact {
    number: String,
    #[serde(rename = "displayName")]
    display_name: String,
    #[serde(rename = "hasName")]
    has_name: bool,
    #[serde(rename = "originalKey")]
    original_key: String,
    #[serde(rename = "lastActivity")]
    last_activity: String,
    #[serde(rename = "lastActivityLabel")]
    last_activity_label: String,
}

#[derive(Serialize)]
struct ContactsResponse {
    contacts: Vec<WireContact>,
    fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<&'static str>,
    #[serde(rename = "refreshedAt")]
    refreshed_at: String,
}

fn build_wire_contacts(snapshot: &ContactsState, now: DateTime<Utc>) -> Vec<WireContact> {
    snapshot
        .contacts
        .iter()
        .map(|contact| {
            let last = contact.last_activity.unwrap_or(snapshot.refreshed_at);
            WireContact {
                number: contact.number.clone(),
                display_name: contact.display_name.clone(),
                has_name: contact.has_name,
                original_key: contact.original_key.clone(),
                last_activity: iso(last),
                last_activity_label: timefmt::format_last_message_time(last, now),
            }
        })
        .collect()
}

#[derive(Serialize)]
struct WireMessage {
    id: usize,
    text: String,
    /// ISO instant, or null when the embedded marker never decoded.
    timestamp: Option<String>,
    #[serde(rename = "type")]
    kind: Role,
    #[serde(rename = "timeLabel")]
    time_label: String,
    /// Present on the first message of each local calendar day.
    #[serde(rename = "dateSeparator", skip_serializing_if = "Option::is_none")]
    date_separator: Option<String>,
}

#[derive(Serialize)]
struct MessagesResponse {
    #[serde(rename = "waId")]
    wa_id: String,
    number: String,
    messages: Vec<WireMessage>,
    /// True when another fetch was in flight and this is the cached view.
    pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<&'static str>,
}

/// Attach display labels and day separators to a normalized conversation.
fn build_wire_messages(conversation: &[Message], now: DateTime<Utc>) -> Vec<WireMessage> {
    let now_local = now.with_timezone(&Local);
    let mut last_day: Option<NaiveDate> = None;

    conversation
        .iter()
        .map(|message| {
            let display = message.stamp.display(now);
            // Invalid stamps still need a day bucket; they group as "now",
            // same as the ordering rule.
            let grouping = message.stamp.resolve(now).with_timezone(&Local);
            let day = grouping.date_naive();
            let date_separator = if last_day != Some(day) {
                last_day = Some(day);
                Some(timefmt::format_date_separator(grouping, now_local))
            } else {
                None
            };
            WireMessage {
                id: message.id,
                text: message.text.clone(),
                timestamp: display.map(iso),
                kind: message.role,
                time_label: timefmt::format_message_time(
                    display.map(|ts| ts.with_timezone(&Local)),
                    now_local,
                ),
                date_separator,
            }
        })
        .collect()
}

// ============================================================================
// Health Endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    version: &'static str,
    contacts: usize,
    conversations: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
        contacts: state.contacts.read().await.contacts.len(),
        conversations: state.conversations.len(),
    })
}

// ============================================================================
// Contact Endpoints
// ============================================================================

async fn list_contacts(State(state): State<Arc<AppState>>) -> Json<ContactsResponse> {
    let snapshot = state.contacts.read().await;
    Json(ContactsResponse {
        contacts: build_wire_contacts(&snapshot, Utc::now()),
        fallback: snapshot.fallback,
        warning: snapshot.warning.clone(),
        category: snapshot.category,
        refreshed_at: iso(snapshot.refreshed_at),
    })
}

#[derive(Serialize)]
struct SimpleResponse {
    status: &'static str,
}

async fn refresh_contacts_handler(State(state): State<Arc<AppState>>) -> Json<SimpleResponse> {
    let refreshed = refresh_contacts(&state).await;
    Json(SimpleResponse {
        status: if refreshed { "refreshed" } else { "busy" },
    })
}

// ============================================================================
// Conversation Endpoints
// ============================================================================

async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(wa_id): Path<String>,
) -> Json<MessagesResponse> {
    let selection = {
        let snapshot = state.contacts.read().await;
        resolve_selection(&snapshot.contacts, &wa_id)
    };
    let now = Utc::now();

    if state.loading_messages.swap(true, Ordering::SeqCst) {
        // A fetch is already in flight and it wins; serve the cached view.
        let cached = state
            .conversations
            .get(&selection.number)
            .unwrap_or_default();
        return Json(MessagesResponse {
            wa_id: selection.original_key,
            number: selection.number,
            messages: build_wire_messages(&cached, now),
            pending: true,
            warning: None,
            category: None,
        });
    }

    let result = state.feed.fetch_messages(&selection.original_key).await;
    state.loading_messages.store(false, Ordering::SeqCst);

    match result {
        Ok(payload) => {
            let normalized = messages::normalize_messages(&payload);
            state
                .conversations
                .replace(&selection.number, normalized.clone());
            Json(MessagesResponse {
                wa_id: selection.original_key,
                number: selection.number,
                messages: build_wire_messages(&normalized, now),
                pending: false,
                warning: None,
                category: None,
            })
        }
        Err(err) => {
            tracing::warn!(
                category = err.category(),
                error = %err,
                number = %selection.number,
                "messages fetch failed"
            );
            Json(MessagesResponse {
                wa_id: selection.original_key,
                number: selection.number,
                messages: Vec::new(),
                pending: false,
                warning: Some(err.warning()),
                category: Some(err.category()),
            })
        }
    }
}

#[derive(Serialize)]
struct SelectResponse {
    status: &'static str,
    number: String,
    #[serde(rename = "originalKey")]
    original_key: String,
}

async fn select_contact(
    State(state): State<Arc<AppState>>,
    Path(wa_id): Path<String>,
) -> impl IntoResponse {
    if wa_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "número de contacto no válido"})),
        )
            .into_response();
    }

    let selection = {
        let snapshot = state.contacts.read().await;
        resolve_selection(&snapshot.contacts, &wa_id)
    };
    tracing::info!(number = %selection.number, "contact selected");
    *state.selection.write().await = Some(selection.clone());

    Json(SelectResponse {
        status: "selected",
        number: selection.number,
        original_key: selection.original_key,
    })
    .into_response()
}

// ============================================================================
// Export Endpoint
// ============================================================================

#[derive(Serialize)]
struct ExportMessage {
    id: usize,
    text: String,
    timestamp: Option<String>,
    #[serde(rename = "type")]
    kind: Role,
    original: Value,
}

#[derive(Serialize)]
struct ChatExport {
    contact: WireContact,
    messages: Vec<ExportMessage>,
    #[serde(rename = "exportDate")]
    export_date: String,
}

/// Download the cached conversation as a JSON attachment.
async fn export_conversation(
    State(state): State<Arc<AppState>>,
    Path(wa_id): Path<String>,
) -> impl IntoResponse {
    let now = Utc::now();
    let snapshot = state.contacts.read().await;
    let selection = resolve_selection(&snapshot.contacts, &wa_id);
    let contact = snapshot
        .contacts
        .iter()
        .find(|c| c.number == selection.number)
        .cloned();
    drop(snapshot);

    let conversation = state
        .conversations
        .get(&selection.number)
        .unwrap_or_default();
    if conversation.is_empty() {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "No hay mensajes para exportar"})),
        )
            .into_response();
    }

    let contact = contact.unwrap_or(Contact {
        number: selection.number.clone(),
        display_name: phone::display_number(&selection.number),
        has_name: false,
        original_key: selection.original_key.clone(),
        last_activity: None,
    });

    let export = ChatExport {
        contact: WireContact {
            number: contact.number.clone(),
            display_name: contact.display_name.clone(),
            has_name: contact.has_name,
            original_key: contact.original_key.clone(),
            last_activity: iso(contact.last_activity.unwrap_or(now)),
            last_activity_label: timefmt::format_last_message_time(
                contact.last_activity.unwrap_or(now),
                now,
            ),
        },
        messages: conversation
            .iter()
            .map(|message| ExportMessage {
                id: message.id,
                text: message.text.clone(),
                timestamp: message.stamp.display(now).map(iso),
                kind: message.role,
                original: message.original.clone(),
            })
            .collect(),
        export_date: iso(now),
    };

    let filename = format!("chat_{}_{}.json", contact.number, now.format("%Y-%m-%d"));
    (
        [(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )],
        Json(export),
    )
        .into_response()
}

// ============================================================================
// Diagnostic Endpoints
// ============================================================================

#[derive(Serialize)]
struct DebugStateResponse {
    #[serde(rename = "currentContact")]
    current_contact: Option<Selection>,
    #[serde(rename = "contactCount")]
    contact_count: usize,
    #[serde(rename = "conversationCount")]
    conversation_count: usize,
    fallback: bool,
    #[serde(rename = "loadingContacts")]
    loading_contacts: bool,
    #[serde(rename = "loadingMessages")]
    loading_messages: bool,
    #[serde(rename = "contactsEndpoint")]
    contacts_endpoint: String,
    #[serde(rename = "messagesEndpoint")]
    messages_endpoint: String,
    #[serde(rename = "pollSecs")]
    poll_secs: u64,
    #[serde(rename = "uptimeSecs")]
    uptime_secs: u64,
}

async fn debug_state(State(state): State<Arc<AppState>>) -> Json<DebugStateResponse> {
    let snapshot = state.contacts.read().await;
    Json(DebugStateResponse {
        current_contact: state.selection.read().await.clone(),
        contact_count: snapshot.contacts.len(),
        conversation_count: state.conversations.len(),
        fallback: snapshot.fallback,
        loading_contacts: state.loading_contacts.load(Ordering::SeqCst),
        loading_messages: state.loading_messages.load(Ordering::SeqCst),
        contacts_endpoint: state.feed.contacts_url().to_string(),
        messages_endpoint: state.feed.messages_url().to_string(),
        poll_secs: state.poll_interval.as_secs(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

#[derive(Deserialize)]
struct ExtractQuery {
    text: String,
}

#[derive(Serialize)]
struct ExtractResponse {
    input: String,
    text: String,
    stamp: &'static str,
    timestamp: Option<String>,
    #[serde(rename = "timeLabel")]
    time_label: String,
    #[serde(rename = "dateSeparator")]
    date_separator: String,
}

/// Run the timestamp codec and the formatters on arbitrary text. Purely an
/// operational convenience for inspecting what a feed message decodes to.
async fn debug_extract(Query(query): Query<ExtractQuery>) -> Json<ExtractResponse> {
    let now = Utc::now();
    let now_local = now.with_timezone(&Local);
    let extracted = marker::extract(&query.text);
    let display = extracted.stamp.display(now);
    Json(ExtractResponse {
        input: query.text,
        text: extracted.text,
        stamp: match extracted.stamp {
            Stamp::Marked(_) => "marked",
            Stamp::Invalid => "invalid",
            Stamp::Missing => "missing",
        },
        timestamp: display.map(iso),
        time_label: timefmt::format_message_time(
            display.map(|ts| ts.with_timezone(&Local)),
            now_local,
        ),
        date_separator: timefmt::format_date_separator(
            extracted.stamp.resolve(now).with_timezone(&Local),
            now_local,
        ),
    })
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("visor_rs=info".parse().unwrap())
                .add_directive("tower_http=info".parse().unwrap()),
        )
        .init();

    let Config {
        contacts_url,
        messages_url,
        poll_interval,
        port,
    } = Config::from_env();
    tracing::info!(contacts = %contacts_url, messages = %messages_url, "upstream endpoints");

    let state = Arc::new(AppState {
        start_time: Instant::now(),
        feed: FeedClient::new(contacts_url, messages_url),
        poll_interval,
        contacts: RwLock::new(ContactsState::empty()),
        conversations: ConversationCache::new(),
        selection: RwLock::new(None),
        loading_contacts: AtomicBool::new(false),
        loading_messages: AtomicBool::new(false),
        poller: Mutex::new(None),
    });

    // Initial load + periodic refresh; the watchdog re-arms the poller if
    // it ever goes away.
    *state.poller.lock().await = Some(spawn_poller(state.clone()));
    spawn_watchdog(state.clone());

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/contacts", get(list_contacts))
        .route("/api/contacts/refresh", post(refresh_contacts_handler))
        .route("/api/conversations/{wa_id}/messages", get(get_messages))
        .route("/api/conversations/{wa_id}/select", post(select_contact))
        .route("/api/conversations/{wa_id}/export", get(export_conversation))
        .route("/api/debug/state", get(debug_state))
        .route("/api/debug/extract", get(debug_extract))
        .layer(CorsLayer::permissive())
        // Static frontend
        .fallback_service(ServeDir::new("static").append_index_html_on_directories(true))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("visor-rs v{} listening on {}", env!("CARGO_PKG_VERSION"), addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
