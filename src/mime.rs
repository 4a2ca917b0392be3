//! Message decoding and MIME part-tree handling
//!
//! Turns a provider message payload into a [`NormalizedMessage`]: header
//! lookup, body extraction from inline part data, and attachment metadata
//! collected from the part tree. Decoding never fails; anything missing comes
//! back empty.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use tracing::warn;

use crate::gmail::{GmailMessage, MessageHeader, MessagePart};
use crate::models::{AttachmentInfo, NormalizedMessage};

/// Deepest part nesting the walkers descend into
pub const MAX_PART_DEPTH: usize = 32;

/// Decode a provider message into the uniform record
///
/// Headers come from the top-level payload. The body is only decoded when
/// `include_body` is set; attachments are always listed.
pub fn decode(message: &GmailMessage, include_body: bool) -> NormalizedMessage {
    let payload = message.payload.as_ref();
    let headers = payload.map(|p| p.headers.as_slice()).unwrap_or_default();
    let header = |name: &str| header_value(headers, name).unwrap_or_default().to_owned();

    let body = match payload {
        Some(part) if include_body => extract_body(part).unwrap_or_default(),
        _ => String::new(),
    };

    let mut attachments = Vec::new();
    if let Some(part) = payload {
        collect_attachments(&part.parts, 1, &mut attachments);
    }

    NormalizedMessage {
        id: message.id.clone(),
        thread_id: message.thread_id.clone(),
        label_ids: message.label_ids.clone().unwrap_or_default(),
        snippet: message.snippet.clone().unwrap_or_default(),
        from: header("From"),
        to: header("To"),
        cc: header("Cc"),
        bcc: header("Bcc"),
        subject: header("Subject"),
        date: header("Date"),
        body,
        attachments,
        size_estimate: message.size_estimate.unwrap_or_default(),
        internal_date: message.internal_date.clone().unwrap_or_default(),
    }
}

/// First header named `name`, compared case-insensitively
pub fn header_value<'a>(headers: &'a [MessageHeader], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Body text of a message part tree
///
/// Inline data on the payload itself wins; otherwise the first `text/plain`
/// or `text/html` leaf with inline data, found depth-first.
fn extract_body(payload: &MessagePart) -> Option<String> {
    if let Some(data) = inline_data(payload) {
        return Some(decode_body_data(data));
    }
    find_text_leaf(&payload.parts, 1).map(decode_body_data)
}

fn find_text_leaf(parts: &[MessagePart], depth: usize) -> Option<&str> {
    if depth > MAX_PART_DEPTH {
        return None;
    }
    for part in parts {
        let mime_type = part.mime_type.as_deref().unwrap_or_default();
        let is_text = mime_type.eq_ignore_ascii_case("text/plain")
            || mime_type.eq_ignore_ascii_case("text/html");
        if is_text && let Some(data) = inline_data(part) {
            return Some(data);
        }
        if let Some(data) = find_text_leaf(&part.parts, depth + 1) {
            return Some(data);
        }
    }
    None
}

fn inline_data(part: &MessagePart) -> Option<&str> {
    part.body
        .as_ref()
        .and_then(|b| b.data.as_deref())
        .filter(|d| !d.is_empty())
}

/// Pre-order walk collecting every part with a non-empty filename
fn collect_attachments(parts: &[MessagePart], depth: usize, out: &mut Vec<AttachmentInfo>) {
    if depth > MAX_PART_DEPTH {
        warn!(depth, "part tree nested too deeply; ignoring deeper parts");
        return;
    }
    for part in parts {
        if let Some(filename) = part.filename.as_deref().filter(|f| !f.is_empty()) {
            let body = part.body.as_ref();
            out.push(AttachmentInfo {
                filename: filename.to_owned(),
                mime_type: part.mime_type.clone().unwrap_or_default(),
                size: body.and_then(|b| b.size).unwrap_or_default(),
                attachment_id: body.and_then(|b| b.attachment_id.clone()),
            });
        }
        collect_attachments(&part.parts, depth + 1, out);
    }
}

/// Decode inline body data into text
///
/// The API sends URL-safe base64 without padding, but older payloads and
/// forwarded content show up in every other variant too. Undecodable data
/// yields an empty string.
pub fn decode_body_data(data: &str) -> String {
    let trimmed: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = [URL_SAFE_NO_PAD, URL_SAFE, STANDARD_NO_PAD, STANDARD]
        .iter()
        .find_map(|engine| engine.decode(trimmed.as_bytes()).ok());
    match bytes {
        Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        None => {
            warn!(len = data.len(), "undecodable body data; returning empty body");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MAX_PART_DEPTH, decode, decode_body_data, header_value};
    use crate::gmail::{GmailMessage, MessageHeader, MessagePart, PartBody};
    use crate::test_support::simple_message;

    fn leaf(mime_type: &str, filename: &str, data: Option<&str>, size: u64) -> MessagePart {
        MessagePart {
            mime_type: Some(mime_type.to_owned()),
            filename: Some(filename.to_owned()),
            body: Some(PartBody {
                size: Some(size),
                data: data.map(str::to_owned),
                attachment_id: (!filename.is_empty()).then(|| format!("att-{filename}")),
            }),
            ..MessagePart::default()
        }
    }

    fn multipart(mime_type: &str, parts: Vec<MessagePart>) -> MessagePart {
        MessagePart {
            mime_type: Some(mime_type.to_owned()),
            parts,
            ..MessagePart::default()
        }
    }

    #[test]
    fn header_lookup_is_case_insensitive_first_match() {
        let headers = vec![
            MessageHeader {
                name: "SUBJECT".to_owned(),
                value: "first".to_owned(),
            },
            MessageHeader {
                name: "subject".to_owned(),
                value: "second".to_owned(),
            },
        ];
        assert_eq!(header_value(&headers, "Subject"), Some("first"));
        assert_eq!(header_value(&headers, "From"), None);
    }

    #[test]
    fn decodes_inline_payload_body() {
        // "Hello" in URL-safe base64 without padding
        let msg = simple_message("m1", "Hi", "SGVsbG8");
        let decoded = decode(&msg, true);
        assert_eq!(decoded.subject, "Hi");
        assert_eq!(decoded.body, "Hello");
        assert_eq!(decoded.label_ids, vec!["INBOX".to_owned()]);
        assert_eq!(decoded.from, "");
        assert_eq!(decoded.size_estimate, 100);

        let metadata_only = decode(&msg, false);
        assert_eq!(metadata_only.body, "");
        assert_eq!(metadata_only.subject, "Hi");
    }

    #[test]
    fn decode_is_idempotent() {
        let msg = simple_message("m1", "Hi", "SGVsbG8");
        assert_eq!(decode(&msg, true), decode(&msg, true));
    }

    #[test]
    fn missing_fields_come_back_empty() {
        let msg = GmailMessage {
            id: "m1".to_owned(),
            ..GmailMessage::default()
        };
        let decoded = decode(&msg, true);
        assert!(decoded.label_ids.is_empty());
        assert!(decoded.attachments.is_empty());
        assert_eq!(decoded.body, "");
        assert_eq!(decoded.snippet, "");
        assert_eq!(decoded.internal_date, "");
        assert_eq!(decoded.size_estimate, 0);
    }

    #[test]
    fn finds_nested_text_and_attachments_in_pre_order() {
        let payload = multipart(
            "multipart/mixed",
            vec![
                multipart(
                    "multipart/alternative",
                    vec![
                        leaf("text/plain", "", Some("cGxhaW4"), 5),
                        leaf("text/html", "", Some("PGI-aHRtbDwvYj4"), 14),
                    ],
                ),
                leaf("application/pdf", "report.pdf", None, 2048),
                multipart(
                    "message/rfc822",
                    vec![leaf("image/png", "inner.png", None, 10)],
                ),
                leaf("text/csv", "data.csv", None, 7),
            ],
        );
        let msg = GmailMessage {
            id: "m2".to_owned(),
            payload: Some(payload),
            ..GmailMessage::default()
        };

        let decoded = decode(&msg, true);
        assert_eq!(decoded.body, "plain");
        let names: Vec<_> = decoded
            .attachments
            .iter()
            .map(|a| a.filename.as_str())
            .collect();
        assert_eq!(names, vec!["report.pdf", "inner.png", "data.csv"]);
        assert_eq!(decoded.attachments[0].mime_type, "application/pdf");
        assert_eq!(decoded.attachments[0].size, 2048);
        assert_eq!(
            decoded.attachments[0].attachment_id.as_deref(),
            Some("att-report.pdf")
        );
    }

    #[test]
    fn html_leaf_used_when_no_plain_text() {
        let payload = multipart(
            "multipart/alternative",
            vec![leaf("text/html", "", Some("PGI-aHRtbDwvYj4"), 14)],
        );
        let msg = GmailMessage {
            payload: Some(payload),
            ..GmailMessage::default()
        };
        assert_eq!(decode(&msg, true).body, "<b>html</b>");
    }

    #[test]
    fn deep_trees_stop_at_depth_bound() {
        let mut part = leaf("application/zip", "deep.zip", None, 1);
        for _ in 0..(MAX_PART_DEPTH + 5) {
            part = multipart("multipart/mixed", vec![part]);
        }
        let msg = GmailMessage {
            payload: Some(multipart(
                "multipart/mixed",
                vec![leaf("image/gif", "shallow.gif", None, 1), part],
            )),
            ..GmailMessage::default()
        };
        let decoded = decode(&msg, true);
        assert_eq!(decoded.attachments.len(), 1);
        assert_eq!(decoded.attachments[0].filename, "shallow.gif");
    }

    #[test]
    fn body_data_accepts_every_base64_variant() {
        assert_eq!(decode_body_data("SGk_"), "Hi?");
        assert_eq!(decode_body_data("SGk/"), "Hi?");
        assert_eq!(decode_body_data("SGVsbG8="), "Hello");
        assert_eq!(decode_body_data("SGVs\r\nbG8"), "Hello");
        assert_eq!(decode_body_data("***"), "");
    }
}
