//! Gmail REST transport and wire payloads
//!
//! Provides the [`MailStore`] seam the mailbox façade talks to, its HTTP
//! implementation over the Gmail v1 API, and the serde types for the payloads
//! the API returns. Every request is bounded by the configured timeout.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

use crate::config::ServerConfig;

/// Longest error body kept in error messages
const ERROR_BODY_MAX_CHARS: usize = 300;

/// Failure of a single remote call
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Request did not complete within the configured timeout
    #[error("request timed out: {0}")]
    Timeout(String),
    /// Connection, TLS, or body read failure
    #[error("transport error: {0}")]
    Transport(String),
    /// Remote rejected the bearer token
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Any other non-success status
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Error message or truncated response body
        body: String,
    },
    /// Response was not the JSON shape we expected
    #[error("invalid response: {0}")]
    Decode(String),
}

/// Level of detail requested for a message fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    /// Headers, part tree, and inline body data
    #[default]
    Full,
    /// Headers only
    Metadata,
    /// Identifiers and labels only
    Minimal,
    /// Whole RFC822 source in `raw`
    Raw,
}

impl MessageFormat {
    /// Query-string value for the API
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Metadata => "metadata",
            Self::Minimal => "minimal",
            Self::Raw => "raw",
        }
    }
}

/// Parameters for `users.messages.list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    /// Gmail search syntax, e.g. `in:inbox`
    pub query: String,
    /// Upper bound on returned ids
    pub max_results: u32,
    /// Include SPAM and TRASH
    pub include_spam_trash: bool,
}

/// Message reference as returned by list calls
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    /// Message id
    pub id: String,
}

/// Draft id with its (unexpanded) message reference
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DraftRef {
    /// Draft id
    pub id: String,
}

/// `users.messages` resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub label_ids: Option<Vec<String>>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub payload: Option<MessagePart>,
    #[serde(default)]
    pub size_estimate: Option<u64>,
    /// Epoch milliseconds, encoded by the API as a string
    #[serde(default)]
    pub internal_date: Option<String>,
}

/// One node of the MIME part tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub headers: Vec<MessageHeader>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

/// Header name/value pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MessageHeader {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Part body: inline base64url data or a reference to a separate attachment
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub attachment_id: Option<String>,
}

/// `users.drafts` resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GmailDraft {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: Option<GmailMessage>,
}

/// Identifiers of a freshly sent message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    /// New message id
    pub id: String,
    /// Thread the message landed in
    #[serde(default)]
    pub thread_id: String,
}

#[derive(Debug, Deserialize)]
struct MessageListResponse {
    #[serde(default)]
    messages: Option<Vec<MessageRef>>,
}

#[derive(Debug, Deserialize)]
struct DraftListResponse {
    #[serde(default)]
    drafts: Option<Vec<DraftRef>>,
}

/// Remote message store
///
/// Every call receives the bearer token explicitly; the store itself holds no
/// auth state.
#[async_trait]
pub trait MailStore: Send + Sync {
    /// `users.messages.list`; no matches is an empty vector
    async fn list_messages(
        &self,
        token: &str,
        query: &MessageQuery,
    ) -> Result<Vec<MessageRef>, RemoteError>;

    /// `users.messages.get`
    async fn get_message(
        &self,
        token: &str,
        id: &str,
        format: MessageFormat,
    ) -> Result<GmailMessage, RemoteError>;

    /// `users.drafts.list`; no drafts is an empty vector
    async fn list_drafts(&self, token: &str, max_results: u32)
    -> Result<Vec<DraftRef>, RemoteError>;

    /// `users.drafts.get`
    async fn get_draft(&self, token: &str, id: &str) -> Result<GmailDraft, RemoteError>;

    /// `users.messages.send` with a base64url `raw` message
    async fn send_message(&self, token: &str, raw: &str) -> Result<SentMessage, RemoteError>;
}

/// Gmail v1 REST client
#[derive(Debug, Clone)]
pub struct HttpMailStore {
    client: Client,
    api_base: String,
    timeout: Duration,
}

impl HttpMailStore {
    /// Build a client against `config.api_base`
    pub fn new(client: Client, config: &ServerConfig) -> Self {
        Self {
            client,
            api_base: config.api_base.clone(),
            timeout: Duration::from_millis(config.http_timeout_ms),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/users/me/{path}", self.api_base)
    }
}

#[async_trait]
impl MailStore for HttpMailStore {
    async fn list_messages(
        &self,
        token: &str,
        query: &MessageQuery,
    ) -> Result<Vec<MessageRef>, RemoteError> {
        let max_results = query.max_results.to_string();
        let include_spam_trash = query.include_spam_trash.to_string();
        let request = self
            .client
            .get(self.url("messages"))
            .bearer_auth(token)
            .query(&[
                ("q", query.query.as_str()),
                ("maxResults", max_results.as_str()),
                ("includeSpamTrash", include_spam_trash.as_str()),
            ]);
        let list: MessageListResponse = execute_json(request, self.timeout, "messages.list").await?;
        Ok(list.messages.unwrap_or_default())
    }

    async fn get_message(
        &self,
        token: &str,
        id: &str,
        format: MessageFormat,
    ) -> Result<GmailMessage, RemoteError> {
        let request = self
            .client
            .get(self.url(&format!("messages/{}", urlencoding::encode(id))))
            .bearer_auth(token)
            .query(&[("format", format.as_str())]);
        execute_json(request, self.timeout, "messages.get").await
    }

    async fn list_drafts(
        &self,
        token: &str,
        max_results: u32,
    ) -> Result<Vec<DraftRef>, RemoteError> {
        let request = self
            .client
            .get(self.url("drafts"))
            .bearer_auth(token)
            .query(&[("maxResults", max_results.to_string())]);
        let list: DraftListResponse = execute_json(request, self.timeout, "drafts.list").await?;
        Ok(list.drafts.unwrap_or_default())
    }

    async fn get_draft(&self, token: &str, id: &str) -> Result<GmailDraft, RemoteError> {
        let request = self
            .client
            .get(self.url(&format!("drafts/{}", urlencoding::encode(id))))
            .bearer_auth(token);
        execute_json(request, self.timeout, "drafts.get").await
    }

    async fn send_message(&self, token: &str, raw: &str) -> Result<SentMessage, RemoteError> {
        let request = self
            .client
            .post(self.url("messages/send"))
            .bearer_auth(token)
            .json(&serde_json::json!({ "raw": raw }));
        execute_json(request, self.timeout, "messages.send").await
    }
}

/// Send `request` and decode a JSON success body
///
/// Shared by the mail store and the OAuth token endpoint. The whole exchange
/// (connect, headers, body) is bounded by `limit`.
///
/// # Errors
///
/// - `Timeout` if `limit` elapses
/// - `Transport` for connection or body read failures
/// - `Unauthorized` on HTTP 401
/// - `Http` for other non-success statuses
/// - `Decode` if the body is not the expected JSON
pub(crate) async fn execute_json<T: DeserializeOwned>(
    request: RequestBuilder,
    limit: Duration,
    what: &str,
) -> Result<T, RemoteError> {
    let (status, body) = timeout(limit, async {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Transport(format!("{what}: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Transport(format!("{what}: reading body: {e}")))?;
        Ok::<_, RemoteError>((status, body))
    })
    .await
    .map_err(|_| RemoteError::Timeout(what.to_owned()))??;

    debug!(call = what, status = status.as_u16(), "remote call completed");
    if status == StatusCode::UNAUTHORIZED {
        return Err(RemoteError::Unauthorized(error_message(&body)));
    }
    if !status.is_success() {
        return Err(RemoteError::Http {
            status: status.as_u16(),
            body: error_message(&body),
        });
    }
    serde_json::from_str(&body).map_err(|e| RemoteError::Decode(format!("{what}: {e}")))
}

/// Pull a readable message out of an error body
///
/// Understands the Gmail shape `{"error":{"message":..}}` and the OAuth shape
/// `{"error":"invalid_grant","error_description":..}`; anything else is
/// truncated verbatim.
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(msg) = value["error"]["message"].as_str() {
            return msg.to_owned();
        }
        if let Some(code) = value["error"].as_str() {
            return match value["error_description"].as_str() {
                Some(desc) => format!("{code}: {desc}"),
                None => code.to_owned(),
            };
        }
    }
    body.chars().take(ERROR_BODY_MAX_CHARS).collect()
}
