//! Upstream feed collaborators.
//!
//! Both feeds are plain GET endpoints returning JSON. The contacts feed
//! takes no parameters; the messages feed selects one conversation with a
//! `wa_id` query parameter that must echo the contact's raw feed key
//! verbatim (URL-encoded). No request timeout is applied on purpose: the
//! viewer relies on the transport's own failure signaling.

use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;

/// Failure at the fetch boundary, categorized for the warning surface.
///
/// These never propagate past the handler that triggered the fetch: contacts
/// failures degrade to the fallback set, message failures to an error
/// payload with a retry affordance.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Transport-level failure before any HTTP status arrived. Browser
    /// deployments hit this category on CORS rejections too.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// The endpoint answered 404/410 — typical of a deactivated upstream
    /// workflow rather than a wrong URL.
    #[error("endpoint inactive: HTTP {0}")]
    Inactive(StatusCode),
    /// Any other non-success status.
    #[error("HTTP {0}")]
    Http(StatusCode),
    /// A non-empty body that failed to parse as JSON.
    #[error("malformed body: {0}")]
    MalformedBody(#[from] serde_json::Error),
}

impl FeedError {
    /// Stable category key, logged and mirrored in the warning banner.
    pub fn category(&self) -> &'static str {
        match self {
            FeedError::Network(err) if err.is_connect() => "network",
            FeedError::Network(_) => "generic-network",
            FeedError::Inactive(_) => "inactive-endpoint",
            FeedError::Http(_) => "generic-http",
            FeedError::MalformedBody(_) => "malformed-body",
        }
    }

    /// User-facing warning, in the viewer's locale.
    pub fn warning(&self) -> String {
        match self {
            FeedError::Network(err) if err.is_connect() => {
                "Error de red o CORS: no se pudo contactar el servidor.".to_string()
            }
            FeedError::Network(_) => "Error de red al consultar el servidor.".to_string(),
            FeedError::Inactive(status) => {
                format!("El endpoint no está activo (HTTP {}).", status.as_u16())
            }
            FeedError::Http(status) => format!("Error HTTP: {}", status.as_u16()),
            FeedError::MalformedBody(_) => {
                "Respuesta del servidor no es JSON válido.".to_string()
            }
        }
    }
}

/// HTTP client for the two upstream feeds.
pub struct FeedClient {
    http: Client,
    contacts_url: String,
    messages_url: String,
}

impl FeedClient {
    pub fn new(contacts_url: String, messages_url: String) -> Self {
        Self {
            http: Client::new(),
            contacts_url,
            messages_url,
        }
    }

    pub fn contacts_url(&self) -> &str {
        &self.contacts_url
    }

    pub fn messages_url(&self) -> &str {
        &self.messages_url
    }

    /// GET the contacts feed. Any 2xx JSON body is handed to the normalizer
    /// as-is; shape dispatch happens there, not here.
    pub async fn fetch_contacts(&self) -> Result<Value, FeedError> {
        tracing::debug!(url = %self.contacts_url, "fetching contacts feed");
        let response = self
            .http
            .get(&self.contacts_url)
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status));
        }
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// GET one conversation by raw contact key.
    ///
    /// An empty body is a valid "no messages yet" answer and comes back as
    /// an empty array; a non-empty body that is not JSON is an error.
    pub async fn fetch_messages(&self, raw_key: &str) -> Result<Value, FeedError> {
        let url = format!(
            "{}?wa_id={}",
            self.messages_url,
            urlencoding::encode(raw_key)
        );
        tracing::debug!(url = %url, "fetching messages feed");
        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status));
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            tracing::debug!(wa_id = raw_key, "messages feed returned an empty body");
            return Ok(Value::Array(Vec::new()));
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn status_error(status: StatusCode) -> FeedError {
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            FeedError::Inactive(status)
        } else {
            FeedError::Http(status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_inactive_category() {
        let err = FeedClient::status_error(StatusCode::NOT_FOUND);
        assert_eq!(err.category(), "inactive-endpoint");
        let err = FeedClient::status_error(StatusCode::GONE);
        assert_eq!(err.category(), "inactive-endpoint");
    }

    #[test]
    fn test_other_status_is_generic_http() {
        let err = FeedClient::status_error(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.category(), "generic-http");
        assert_eq!(err.warning(), "Error HTTP: 500");
    }

    #[test]
    fn test_malformed_body_category() {
        let parse_err = serde_json::from_str::<Value>("not json").unwrap_err();
        let err = FeedError::from(parse_err);
        assert_eq!(err.category(), "malformed-body");
    }
}
