//! Input/output DTOs and schema-bearing types
//!
//! Defines all data structures used in MCP tool contracts. Each type is
//! annotated with `JsonSchema` for automatic schema generation. Field names
//! are camelCase to match the tool contract clients already use.

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::gmail::MessageFormat;

/// Metadata included in all tool responses
///
/// Provides timing information and current UTC timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Tool execution duration in milliseconds
    pub duration_ms: u64,
}

impl Meta {
    /// Create metadata populated with current time and elapsed duration
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
        }
    }
}

/// Standard response envelope for all tools
///
/// Wraps tool-specific data with human-readable summary and execution metadata.
/// This structure provides consistent response shape across all MCP tools.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolEnvelope<T>
where
    T: JsonSchema,
{
    /// Human-readable summary of the operation outcome
    pub summary: String,
    /// Tool-specific data payload
    pub data: T,
    /// Execution metadata (timestamp, duration)
    pub meta: Meta,
}

/// Attachment descriptor found in a message part tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentInfo {
    /// Filename from the part
    pub filename: String,
    /// MIME type of the part
    pub mime_type: String,
    /// Size in bytes as reported by the store
    pub size: u64,
    /// Reference for fetching the attachment body, when stored separately
    pub attachment_id: Option<String>,
}

/// Uniform message record
///
/// Rebuilt from the provider payload on every fetch. Missing fields are
/// empty, never absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMessage {
    pub id: String,
    pub thread_id: String,
    pub label_ids: Vec<String>,
    pub snippet: String,
    pub from: String,
    pub to: String,
    pub cc: String,
    pub bcc: String,
    pub subject: String,
    pub date: String,
    /// Decoded body; empty unless the fetch asked for it
    pub body: String,
    pub attachments: Vec<AttachmentInfo>,
    pub size_estimate: u64,
    /// Epoch milliseconds as reported by the store
    pub internal_date: String,
}

/// Draft wrapping exactly one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Draft {
    /// Draft id
    pub id: String,
    /// Wrapped message
    pub message: NormalizedMessage,
}

/// Attachment left out of a sent message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SkippedAttachment {
    /// Path as given by the caller
    pub path: String,
    /// Why it could not be read
    pub reason: String,
}

/// Outcome of `send_email`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    /// Id of the sent message
    pub message_id: String,
    /// Thread the message belongs to
    pub thread_id: String,
    /// Attachments that could not be read and were not sent
    pub skipped_attachments: Vec<SkippedAttachment>,
}

/// Outbound message as requested by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeRequest {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub is_html: bool,
    /// File paths, attached in this order
    pub attachments: Vec<String>,
}

/// One address or a list of addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Recipients {
    /// Single address
    One(String),
    /// Several addresses
    Many(Vec<String>),
}

impl Recipients {
    /// Flatten into a list
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(addr) => vec![addr],
            Self::Many(addrs) => addrs,
        }
    }
}

/// Input: send an email
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailInput {
    /// Recipient email address(es)
    pub to: Recipients,
    /// Email subject line
    pub subject: String,
    /// Email body content
    pub body: String,
    /// CC recipient email address(es)
    pub cc: Option<Recipients>,
    /// BCC recipient email address(es)
    pub bcc: Option<Recipients>,
    /// Whether the body contains HTML content
    #[serde(default)]
    pub html: bool,
    /// File paths to attach
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// Input: list inbox messages
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InboxInput {
    /// Maximum number of emails to retrieve (1..500, default 10)
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    /// Gmail search query (default `in:inbox`)
    #[serde(default = "default_inbox_query")]
    pub query: String,
    /// Include spam and trash emails
    #[serde(default)]
    pub include_spam_trash: bool,
}

/// Input: fetch one message by id
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetEmailInput {
    /// The ID of the email to retrieve
    pub email_id: String,
    /// Format of the email data (full, metadata, minimal)
    #[serde(default)]
    pub format: MessageFormat,
}

/// Input: search messages
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchInput {
    /// Gmail search query, e.g. `from:someone@example.com`, `has:attachment`
    pub query: String,
    /// Maximum number of emails to retrieve (1..500, default 10)
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

/// Input: only a result bound
///
/// Used by `get_sent_emails` and `get_draft_emails`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MaxResultsInput {
    /// Maximum number of items to retrieve (1..500, default 10)
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

/// Default value for `maxResults`
fn default_max_results() -> u32 {
    10
}

/// Default inbox query
pub fn default_inbox_query() -> String {
    "in:inbox".to_owned()
}
