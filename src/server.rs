//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers the six Gmail tools.
//! Handles input validation and sanitization, delegates to the [`Mailbox`]
//! façade, and wraps results in the standard response envelope.

use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{Json, ServerHandler, tool, tool_handler, tool_router};

use crate::errors::{AppError, AppResult};
use crate::mailbox::Mailbox;
use crate::models::{
    ComposeRequest, Draft, GetEmailInput, InboxInput, MaxResultsInput, Meta, NormalizedMessage,
    SearchInput, SendEmailInput, SendResult, ToolEnvelope,
};

/// Upper bound accepted for `maxResults`
const MAX_RESULTS_LIMIT: u32 = 500;
/// RFC 5322 line limit, applied to the subject
const MAX_SUBJECT_CHARS: usize = 998;
/// Longest accepted search query
const MAX_QUERY_CHARS: usize = 1_024;
/// Longest accepted message id
const MAX_ID_CHARS: usize = 256;

/// Gmail MCP server
///
/// Holds the mailbox façade and the tool router. Cloned per connection by the
/// rmcp runtime; clones share the façade.
#[derive(Clone)]
pub struct GmailServer {
    /// Mailbox operations over the authorized session
    mailbox: Arc<Mailbox>,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl GmailServer {
    /// Create a new MCP server instance
    pub fn new(mailbox: Arc<Mailbox>) -> Self {
        Self {
            mailbox,
            tool_router: Self::tool_router(),
        }
    }

    /// Tool: Send an email
    ///
    /// Validates addresses, subject, and body, sanitizes the body, then sends.
    /// Attachments that cannot be read are skipped and listed in the result.
    #[tool(
        name = "send_email",
        description = "Send an email to one or more recipients, optionally with CC, BCC, HTML body, and file attachments"
    )]
    async fn send_email(
        &self,
        Parameters(input): Parameters<SendEmailInput>,
    ) -> Result<Json<ToolEnvelope<SendResult>>, ErrorData> {
        let started = Instant::now();
        let result = self.send_email_impl(input).await.map(|data| {
            let summary = if data.skipped_attachments.is_empty() {
                format!("Email sent successfully (message id {})", data.message_id)
            } else {
                format!(
                    "Email sent (message id {}); {} attachment(s) skipped",
                    data.message_id,
                    data.skipped_attachments.len()
                )
            };
            (summary, data)
        });
        finalize_tool(started, result)
    }

    /// Tool: List inbox emails
    #[tool(
        name = "get_inbox_emails",
        description = "Get emails from the inbox. Returns a list of emails with metadata."
    )]
    async fn get_inbox_emails(
        &self,
        Parameters(input): Parameters<InboxInput>,
    ) -> Result<Json<ToolEnvelope<Vec<NormalizedMessage>>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            validate_max_results(input.max_results)?;
            validate_query(&input.query)?;
            self.mailbox
                .list_inbox(input.max_results, &input.query, input.include_spam_trash)
                .await
        }
        .await
        .map(|data| (format!("{} email(s) retrieved", data.len()), data));
        finalize_tool(started, result)
    }

    /// Tool: Get one email by id
    ///
    /// Returns the full record including decoded body and attachment metadata.
    #[tool(
        name = "get_email_by_id",
        description = "Get a specific email by its ID with full content including body and attachments."
    )]
    async fn get_email_by_id(
        &self,
        Parameters(input): Parameters<GetEmailInput>,
    ) -> Result<Json<ToolEnvelope<NormalizedMessage>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            validate_message_id(&input.email_id)?;
            self.mailbox.get_by_id(&input.email_id, input.format).await
        }
        .await
        .map(|data| ("Email retrieved".to_owned(), data));
        finalize_tool(started, result)
    }

    /// Tool: Search emails
    #[tool(
        name = "search_emails",
        description = "Search emails using Gmail search query syntax."
    )]
    async fn search_emails(
        &self,
        Parameters(input): Parameters<SearchInput>,
    ) -> Result<Json<ToolEnvelope<Vec<NormalizedMessage>>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            validate_max_results(input.max_results)?;
            validate_query(&input.query)?;
            self.mailbox.search(&input.query, input.max_results).await
        }
        .await
        .map(|data| {
            (
                format!("{} email(s) matched '{}'", data.len(), input.query),
                data,
            )
        });
        finalize_tool(started, result)
    }

    /// Tool: List sent emails
    #[tool(name = "get_sent_emails", description = "Get emails from the sent folder.")]
    async fn get_sent_emails(
        &self,
        Parameters(input): Parameters<MaxResultsInput>,
    ) -> Result<Json<ToolEnvelope<Vec<NormalizedMessage>>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            validate_max_results(input.max_results)?;
            self.mailbox.list_sent(input.max_results).await
        }
        .await
        .map(|data| (format!("{} sent email(s) retrieved", data.len()), data));
        finalize_tool(started, result)
    }

    /// Tool: List drafts
    #[tool(name = "get_draft_emails", description = "Get draft emails.")]
    async fn get_draft_emails(
        &self,
        Parameters(input): Parameters<MaxResultsInput>,
    ) -> Result<Json<ToolEnvelope<Vec<Draft>>>, ErrorData> {
        let started = Instant::now();
        let result = async {
            validate_max_results(input.max_results)?;
            self.mailbox.list_drafts(input.max_results).await
        }
        .await
        .map(|data| (format!("{} draft(s) retrieved", data.len()), data));
        finalize_tool(started, result)
    }
}

/// MCP server handler implementation
///
/// Provides server info and capabilities to MCP client.
#[tool_handler(router = self.tool_router)]
impl ServerHandler for GmailServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build()).with_instructions(
            "Gmail MCP server. Send mail and read inbox, sent, and draft messages. If a tool reports auth_required, open the returned auth_url, then run `gmail-mcp-rs exchange-code <code>`.",
        )
    }
}

impl GmailServer {
    async fn send_email_impl(&self, input: SendEmailInput) -> AppResult<SendResult> {
        let request = compose_request(input)?;
        self.mailbox.send(&request).await
    }
}

/// Validate a send request and turn it into an encoder request
fn compose_request(input: SendEmailInput) -> AppResult<ComposeRequest> {
    let to = input.to.into_vec();
    if to.is_empty() {
        return Err(AppError::invalid("to must name at least one recipient"));
    }
    let cc = input.cc.map(|r| r.into_vec()).unwrap_or_default();
    let bcc = input.bcc.map(|r| r.into_vec()).unwrap_or_default();
    validate_addresses(&to, "to")?;
    validate_addresses(&cc, "cc")?;
    validate_addresses(&bcc, "bcc")?;
    validate_subject(&input.subject)?;
    if input.body.is_empty() {
        return Err(AppError::invalid("body cannot be empty"));
    }
    if input.attachments.iter().any(|p| p.trim().is_empty()) {
        return Err(AppError::invalid("attachment paths must not be empty"));
    }

    Ok(ComposeRequest {
        to,
        subject: input.subject,
        body: sanitize_body(&input.body, input.html)?,
        cc,
        bcc,
        is_html: input.html,
        attachments: input.attachments,
    })
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Build a standardized MCP tool response envelope from business logic output
fn finalize_tool<T>(
    started: Instant,
    result: AppResult<(String, T)>,
) -> Result<Json<ToolEnvelope<T>>, ErrorData>
where
    T: schemars::JsonSchema,
{
    match result {
        Ok((summary, data)) => Ok(Json(ToolEnvelope {
            summary,
            data,
            meta: Meta::now(duration_ms(started)),
        })),
        Err(e) => Err(e.to_error_data()),
    }
}

/// Validate every address against `local@domain.tld`
fn validate_addresses(addresses: &[String], field: &str) -> AppResult<()> {
    let pattern = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$")
        .map_err(|e| AppError::Internal(format!("invalid address regex: {e}")))?;
    for address in addresses {
        if !pattern.is_match(address) {
            return Err(AppError::InvalidInput(format!(
                "{field} contains invalid email address: {address}"
            )));
        }
    }
    Ok(())
}

/// Subject must be 1..998 characters
fn validate_subject(subject: &str) -> AppResult<()> {
    let len = subject.chars().count();
    if len == 0 {
        return Err(AppError::invalid("subject cannot be empty"));
    }
    if len > MAX_SUBJECT_CHARS {
        return Err(AppError::InvalidInput(format!(
            "subject too long; at most {MAX_SUBJECT_CHARS} characters"
        )));
    }
    Ok(())
}

/// Validate `maxResults` bounds
fn validate_max_results(value: u32) -> AppResult<()> {
    if value == 0 || value > MAX_RESULTS_LIMIT {
        return Err(AppError::InvalidInput(format!(
            "maxResults must be in range 1..{MAX_RESULTS_LIMIT}"
        )));
    }
    Ok(())
}

/// Validate a Gmail search query
fn validate_query(query: &str) -> AppResult<()> {
    if query.trim().is_empty() || query.chars().count() > MAX_QUERY_CHARS {
        return Err(AppError::InvalidInput(format!(
            "query must be 1..{MAX_QUERY_CHARS} characters"
        )));
    }
    validate_no_controls(query, "query")
}

/// Validate a message id
fn validate_message_id(id: &str) -> AppResult<()> {
    if id.is_empty() || id.len() > MAX_ID_CHARS {
        return Err(AppError::InvalidInput(format!(
            "emailId must be 1..{MAX_ID_CHARS} characters"
        )));
    }
    validate_no_controls(id, "emailId")
}

/// Reject control characters in user-provided values
fn validate_no_controls(value: &str, field: &str) -> AppResult<()> {
    if value.chars().any(|ch| ch.is_control()) {
        return Err(AppError::InvalidInput(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

/// Normalize or clean a message body before encoding
///
/// Plain text gets its line endings normalized to `\n`. HTML loses any
/// `<script>` and `<iframe>` elements.
fn sanitize_body(body: &str, is_html: bool) -> AppResult<String> {
    if !is_html {
        return Ok(body.replace("\r\n", "\n").replace('\r', "\n"));
    }
    let active = Regex::new(r"(?is)<script\b.*?</script\s*>|<iframe\b.*?</iframe\s*>")
        .map_err(|e| AppError::Internal(format!("invalid sanitizer regex: {e}")))?;
    Ok(active.replace_all(body, "").into_owned())
}
