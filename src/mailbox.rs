//! Mailbox operations façade
//!
//! The six user-facing operations. Each one asks the token manager for a
//! bearer token carrying the right grant, talks to the [`MailStore`], and turns
//! provider payloads into [`NormalizedMessage`] records. Store failures are
//! wrapped as "failed to <operation>: <cause>".

use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::auth::{Scope, TokenManager};
use crate::compose;
use crate::errors::{AppError, AppResult};
use crate::gmail::{GmailMessage, MailStore, MessageFormat, MessageQuery, MessageRef, RemoteError};
use crate::mime;
use crate::models::{ComposeRequest, Draft, NormalizedMessage, SendResult};

/// Query used by [`Mailbox::list_sent`]
const SENT_QUERY: &str = "in:sent";

/// Gmail operations over one authorized session
pub struct Mailbox {
    tokens: Arc<TokenManager>,
    store: Arc<dyn MailStore>,
    fetch_concurrency: usize,
}

impl Mailbox {
    /// Create a façade; `fetch_concurrency` is clamped to at least 1
    pub fn new(
        tokens: Arc<TokenManager>,
        store: Arc<dyn MailStore>,
        fetch_concurrency: usize,
    ) -> Self {
        Self {
            tokens,
            store,
            fetch_concurrency: fetch_concurrency.max(1),
        }
    }

    /// Encode and send a message
    ///
    /// The send grant is checked before any attachment is read. Unreadable
    /// attachments do not fail the send; they are listed in
    /// [`SendResult::skipped_attachments`].
    ///
    /// # Errors
    ///
    /// Token errors, `MissingScope`, or `RemoteCallFailed`.
    pub async fn send(&self, request: &ComposeRequest) -> AppResult<SendResult> {
        self.tokens.require_scope(Scope::Send).await?;
        let encoded = compose::encode(request).await;
        let raw = encoded.raw.as_str();
        let sent = self
            .with_token(Scope::Send, "send email", |token| async move {
                self.store.send_message(token.expose_secret(), raw).await
            })
            .await?;
        info!(
            message_id = %sent.id,
            skipped = encoded.skipped.len(),
            "message sent"
        );
        Ok(SendResult {
            message_id: sent.id,
            thread_id: sent.thread_id,
            skipped_attachments: encoded.skipped,
        })
    }

    /// Messages matching `query` (normally `in:inbox`), newest first
    ///
    /// Details are fetched with `format=metadata`; bodies are not decoded.
    ///
    /// # Errors
    ///
    /// Token errors, `MissingScope`, or `RemoteCallFailed` from the list call
    /// or the first failing detail fetch.
    pub async fn list_inbox(
        &self,
        max_results: u32,
        query: &str,
        include_spam_trash: bool,
    ) -> AppResult<Vec<NormalizedMessage>> {
        let query = MessageQuery {
            query: query.to_owned(),
            max_results,
            include_spam_trash,
        };
        self.list_and_fetch("get inbox emails", &query, MessageFormat::Metadata)
            .await
    }

    /// One message with its body decoded
    ///
    /// # Errors
    ///
    /// Token errors, `MissingScope`, or `RemoteCallFailed` (including unknown
    /// ids, which the store reports as 404).
    pub async fn get_by_id(&self, id: &str, format: MessageFormat) -> AppResult<NormalizedMessage> {
        let message = self
            .with_token(Scope::ReadOnly, "get email", |token| async move {
                self.store
                    .get_message(token.expose_secret(), id, format)
                    .await
            })
            .await?;
        Ok(mime::decode(&message, true))
    }

    /// Messages matching a Gmail search query, metadata only
    ///
    /// # Errors
    ///
    /// Same as [`Mailbox::list_inbox`].
    pub async fn search(&self, query: &str, max_results: u32) -> AppResult<Vec<NormalizedMessage>> {
        let query = MessageQuery {
            query: query.to_owned(),
            max_results,
            include_spam_trash: false,
        };
        self.list_and_fetch("search emails", &query, MessageFormat::Metadata)
            .await
    }

    /// Sent messages, metadata only
    ///
    /// # Errors
    ///
    /// Same as [`Mailbox::search`].
    pub async fn list_sent(&self, max_results: u32) -> AppResult<Vec<NormalizedMessage>> {
        self.search(SENT_QUERY, max_results).await
    }

    /// Drafts, each with its wrapped message
    ///
    /// Drafts whose message cannot be expanded come back with an empty message
    /// carrying only what the store returned.
    ///
    /// # Errors
    ///
    /// Token errors, `MissingScope`, or `RemoteCallFailed`.
    pub async fn list_drafts(&self, max_results: u32) -> AppResult<Vec<Draft>> {
        let concurrency = self.fetch_concurrency;
        let drafts = self
            .with_token(Scope::ReadOnly, "get draft emails", |token| async move {
                let secret = token.expose_secret();
                let refs = self.store.list_drafts(secret, max_results).await?;
                debug!(count = refs.len(), "drafts listed");
                stream::iter(refs)
                    .map(|draft| async move { self.store.get_draft(secret, &draft.id).await })
                    .buffered(concurrency)
                    .try_collect::<Vec<_>>()
                    .await
            })
            .await?;

        Ok(drafts
            .into_iter()
            .map(|draft| Draft {
                message: draft
                    .message
                    .as_ref()
                    .map(|m| mime::decode(m, true))
                    .unwrap_or_default(),
                id: draft.id,
            })
            .collect())
    }

    /// List ids, then fetch each in list order with bounded concurrency
    async fn list_and_fetch(
        &self,
        operation: &'static str,
        query: &MessageQuery,
        format: MessageFormat,
    ) -> AppResult<Vec<NormalizedMessage>> {
        let messages = self
            .with_token(Scope::ReadOnly, operation, |token| async move {
                let secret = token.expose_secret();
                let refs = self.store.list_messages(secret, query).await?;
                debug!(operation, count = refs.len(), "messages listed");
                self.fetch_details(secret, refs, format).await
            })
            .await?;
        Ok(messages.iter().map(|m| mime::decode(m, false)).collect())
    }

    /// Fetch every referenced message; results keep the order of `refs`
    ///
    /// The first failure ends the whole fetch.
    async fn fetch_details(
        &self,
        token: &str,
        refs: Vec<MessageRef>,
        format: MessageFormat,
    ) -> Result<Vec<GmailMessage>, RemoteError> {
        stream::iter(refs)
            .map(|r| async move { self.store.get_message(token, &r.id, format).await })
            .buffered(self.fetch_concurrency)
            .try_collect()
            .await
    }

    /// Run `call` with a token holding `scope`
    ///
    /// A 401 from the store triggers one forced refresh and one retry; a second
    /// rejection is returned as is.
    async fn with_token<T, F, Fut>(
        &self,
        scope: Scope,
        operation: &'static str,
        call: F,
    ) -> AppResult<T>
    where
        F: Fn(SecretString) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let token = self.tokens.require_scope(scope).await?;
        match call(token.clone()).await {
            Err(RemoteError::Unauthorized(reason)) => {
                debug!(operation, reason = %reason, "store rejected token");
                let fresh = self.tokens.force_refresh(&token).await?;
                call(fresh)
                    .await
                    .map_err(|e| AppError::remote(operation, e))
            }
            other => other.map_err(|e| AppError::remote(operation, e)),
        }
    }
}
