//! Outbound message encoding
//!
//! Builds an RFC 2822 message from a [`ComposeRequest`] and wraps it in the
//! URL-safe, unpadded base64 the send endpoint expects. Attachment files are
//! read concurrently; a file that cannot be read is left out and reported.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::Utc;
use futures::future::join_all;
use tracing::warn;

use crate::errors::AppError;
use crate::models::{ComposeRequest, SkippedAttachment};

/// Line width for base64 part bodies
const BASE64_LINE_LEN: usize = 76;

/// Encoded message ready for `users.messages.send`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    /// base64url (no padding) of the full message bytes
    pub raw: String,
    /// Attachments that were not included
    pub skipped: Vec<SkippedAttachment>,
}

/// Attachment file contents, read and named
#[derive(Debug)]
struct LoadedAttachment {
    filename: String,
    content: Vec<u8>,
}

/// Encode `request` into a sendable message
pub async fn encode(request: &ComposeRequest) -> EncodedMessage {
    let (attachments, skipped) = read_attachments(&request.attachments).await;
    let boundary = new_boundary();
    let message = render(request, &attachments, &boundary);
    EncodedMessage {
        raw: URL_SAFE_NO_PAD.encode(message.as_bytes()),
        skipped,
    }
}

/// Read every attachment concurrently, keeping input order
async fn read_attachments(paths: &[String]) -> (Vec<LoadedAttachment>, Vec<SkippedAttachment>) {
    let results = join_all(paths.iter().map(|path| async move {
        tokio::fs::read(path)
            .await
            .map(|content| LoadedAttachment {
                filename: basename(path),
                content,
            })
            .map_err(|e| AppError::AttachmentReadFailed {
                path: path.clone(),
                reason: e.to_string(),
            })
    }))
    .await;

    let mut loaded = Vec::with_capacity(results.len());
    let mut skipped = Vec::new();
    for result in results {
        match result {
            Ok(attachment) => loaded.push(attachment),
            Err(err) => {
                warn!(error = %err, "skipping unreadable attachment");
                if let AppError::AttachmentReadFailed { path, reason } = err {
                    skipped.push(SkippedAttachment { path, reason });
                }
            }
        }
    }
    (loaded, skipped)
}

/// Render the message text
///
/// Header order is fixed: To, Subject, Cc, Bcc, MIME-Version. Cc and Bcc are
/// omitted when empty.
fn render(request: &ComposeRequest, attachments: &[LoadedAttachment], boundary: &str) -> String {
    let mut headers = vec![
        format!("To: {}", header_text(&request.to.join(", "))),
        format!("Subject: {}", header_text(&request.subject)),
    ];
    if !request.cc.is_empty() {
        headers.push(format!("Cc: {}", header_text(&request.cc.join(", "))));
    }
    if !request.bcc.is_empty() {
        headers.push(format!("Bcc: {}", header_text(&request.bcc.join(", "))));
    }
    headers.push("MIME-Version: 1.0".to_owned());

    let text_type = if request.is_html {
        "text/html"
    } else {
        "text/plain"
    };
    let text_headers = format!(
        "Content-Type: {text_type}; charset=utf-8\r\nContent-Transfer-Encoding: base64"
    );
    let text_body = wrap_base64(request.body.as_bytes());

    if attachments.is_empty() {
        return format!(
            "{}\r\n{text_headers}\r\n\r\n{text_body}",
            headers.join("\r\n")
        );
    }

    headers.push(format!(
        "Content-Type: multipart/mixed; boundary=\"{boundary}\""
    ));
    let mut out = headers.join("\r\n");
    out.push_str("\r\n\r\n");
    out.push_str(&format!("--{boundary}\r\n{text_headers}\r\n\r\n{text_body}\r\n"));
    for attachment in attachments {
        out.push_str(&format!(
            "--{boundary}\r\n\
             Content-Type: application/octet-stream\r\n\
             Content-Disposition: attachment; filename=\"{}\"\r\n\
             Content-Transfer-Encoding: base64\r\n\r\n{}\r\n",
            attachment.filename,
            wrap_base64(&attachment.content)
        ));
    }
    out.push_str(&format!("--{boundary}--\r\n"));
    out
}

/// Fresh multipart boundary: `boundary_<epoch-ms>_<random>`
fn new_boundary() -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("boundary_{}_{}", Utc::now().timestamp_millis(), &random[..12])
}

/// Standard base64 folded into CRLF-separated lines
fn wrap_base64(bytes: &[u8]) -> String {
    let encoded = STANDARD.encode(bytes);
    encoded
        .as_bytes()
        .chunks(BASE64_LINE_LEN)
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect::<Vec<_>>()
        .join("\r\n")
}

/// Final path component, with characters that would break the header removed
fn basename(path: &str) -> String {
    let name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_owned());
    name.replace(['"', '\r', '\n'], "_")
}

/// Header value with line breaks flattened so it cannot start a new header
fn header_text(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}
