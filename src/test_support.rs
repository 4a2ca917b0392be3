//! In-memory fakes for the token endpoint and the mail store, plus a local
//! HTTP stub for exercising the real transports

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Json;
use chrono::{TimeDelta, Utc};
use secrecy::SecretString;

use crate::auth::{Scope, TokenEndpoint, TokenGrant};
use crate::config::{DEFAULT_AUTH_URL, ServerConfig};
use crate::credentials::{Credentials, OOB_REDIRECT_URI, StoredToken};
use crate::gmail::{
    DraftRef, GmailDraft, GmailMessage, MailStore, MessageFormat, MessageHeader, MessagePart,
    MessageQuery, MessageRef, PartBody, RemoteError, SentMessage,
};

pub fn credentials() -> Credentials {
    Credentials {
        client_id: "client-123".to_owned(),
        client_secret: SecretString::new("secret-456".into()),
        redirect_uri: OOB_REDIRECT_URI.to_owned(),
    }
}

/// Token expiring `offset` from now with every required scope
pub fn stored_token(offset: TimeDelta, refreshable: bool) -> StoredToken {
    StoredToken {
        access_token: "stored-access".to_owned(),
        refresh_token: refreshable.then(|| "stored-refresh".to_owned()),
        scope: Scope::ALL
            .iter()
            .map(|s| s.url())
            .collect::<Vec<_>>()
            .join(" "),
        token_type: Some("Bearer".to_owned()),
        expiry_date: Some((Utc::now() + offset).timestamp_millis()),
    }
}

#[derive(Default)]
pub struct FakeTokenEndpoint {
    pub exchanges: AtomicUsize,
    pub refreshes: AtomicUsize,
    fail_refresh: bool,
    exchange_failure: Mutex<Option<RemoteError>>,
    last_code: Mutex<Option<String>>,
}

impl FakeTokenEndpoint {
    pub fn failing_refresh() -> Self {
        Self {
            fail_refresh: true,
            ..Self::default()
        }
    }

    pub fn failing_exchange(err: RemoteError) -> Self {
        Self {
            exchange_failure: Mutex::new(Some(err)),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst) + self.refreshes.load(Ordering::SeqCst)
    }

    pub fn last_code(&self) -> Option<String> {
        self.last_code.lock().expect("lock").clone()
    }
}

#[async_trait]
impl TokenEndpoint for FakeTokenEndpoint {
    async fn exchange_code(
        &self,
        _credentials: &Credentials,
        code: &str,
    ) -> Result<TokenGrant, RemoteError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        *self.last_code.lock().expect("lock") = Some(code.to_owned());
        if let Some(err) = self.exchange_failure.lock().expect("lock").take() {
            return Err(err);
        }
        Ok(TokenGrant {
            access_token: "exchanged-access".to_owned(),
            refresh_token: Some("exchanged-refresh".to_owned()),
            expires_in: Some(3_600),
            scope: Some(
                Scope::ALL
                    .iter()
                    .map(|s| s.url())
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            token_type: Some("Bearer".to_owned()),
        })
    }

    async fn refresh(
        &self,
        _credentials: &Credentials,
        _refresh_token: &str,
    ) -> Result<TokenGrant, RemoteError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        // Widen the window in which a second caller could race this refresh.
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.fail_refresh {
            return Err(RemoteError::Http {
                status: 400,
                body: "invalid_grant: Token has been expired or revoked.".to_owned(),
            });
        }
        Ok(TokenGrant {
            access_token: format!("refreshed-access-{n}"),
            refresh_token: None,
            expires_in: Some(3_600),
            scope: None,
            token_type: Some("Bearer".to_owned()),
        })
    }
}

/// Message with a subject header and a single `text/plain` body
pub fn simple_message(id: &str, subject: &str, body_b64url: &str) -> GmailMessage {
    GmailMessage {
        id: id.to_owned(),
        thread_id: format!("thread-{id}"),
        label_ids: Some(vec!["INBOX".to_owned()]),
        snippet: Some(format!("snippet {id}")),
        payload: Some(MessagePart {
            mime_type: Some("text/plain".to_owned()),
            headers: vec![MessageHeader {
                name: "Subject".to_owned(),
                value: subject.to_owned(),
            }],
            body: Some(PartBody {
                size: Some(5),
                data: Some(body_b64url.to_owned()),
                attachment_id: None,
            }),
            ..MessagePart::default()
        }),
        size_estimate: Some(100),
        internal_date: Some("1700000000000".to_owned()),
    }
}

#[derive(Default)]
pub struct FakeMailStore {
    /// Ids returned by list calls, in order
    pub listed: Vec<String>,
    pub messages: BTreeMap<String, GmailMessage>,
    pub drafts: BTreeMap<String, GmailMessage>,
    /// Per-id artificial latency, to scramble completion order
    pub delays_ms: BTreeMap<String, u64>,
    pub failing: BTreeSet<String>,
    /// Reject the first call with 401
    pub reject_first: AtomicBool,
    pub calls: AtomicUsize,
    pub queries: Mutex<Vec<MessageQuery>>,
    pub formats: Mutex<Vec<MessageFormat>>,
    pub tokens: Mutex<Vec<String>>,
    pub sent: Mutex<Vec<String>>,
}

impl FakeMailStore {
    pub fn with_messages(messages: Vec<GmailMessage>) -> Self {
        Self {
            listed: messages.iter().map(|m| m.id.clone()).collect(),
            messages: messages.into_iter().map(|m| (m.id.clone(), m)).collect(),
            ..Self::default()
        }
    }

    fn enter(&self, token: &str) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().expect("lock").push(token.to_owned());
        if self.reject_first.swap(false, Ordering::SeqCst) {
            return Err(RemoteError::Unauthorized("Invalid Credentials".to_owned()));
        }
        Ok(())
    }

    async fn delay(&self, id: &str) {
        if let Some(ms) = self.delays_ms.get(id) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
    }
}

#[async_trait]
impl MailStore for FakeMailStore {
    async fn list_messages(
        &self,
        token: &str,
        query: &MessageQuery,
    ) -> Result<Vec<MessageRef>, RemoteError> {
        self.enter(token)?;
        self.queries.lock().expect("lock").push(query.clone());
        Ok(self
            .listed
            .iter()
            .take(query.max_results as usize)
            .map(|id| MessageRef { id: id.clone() })
            .collect())
    }

    async fn get_message(
        &self,
        token: &str,
        id: &str,
        format: MessageFormat,
    ) -> Result<GmailMessage, RemoteError> {
        self.enter(token)?;
        self.formats.lock().expect("lock").push(format);
        self.delay(id).await;
        if self.failing.contains(id) {
            return Err(RemoteError::Http {
                status: 500,
                body: "Backend Error".to_owned(),
            });
        }
        self.messages.get(id).cloned().ok_or(RemoteError::Http {
            status: 404,
            body: "Requested entity was not found.".to_owned(),
        })
    }

    async fn list_drafts(
        &self,
        token: &str,
        max_results: u32,
    ) -> Result<Vec<DraftRef>, RemoteError> {
        self.enter(token)?;
        Ok(self
            .drafts
            .keys()
            .take(max_results as usize)
            .map(|id| DraftRef { id: id.clone() })
            .collect())
    }

    async fn get_draft(&self, token: &str, id: &str) -> Result<GmailDraft, RemoteError> {
        self.enter(token)?;
        self.delay(id).await;
        Ok(GmailDraft {
            id: id.to_owned(),
            message: self.drafts.get(id).cloned(),
        })
    }

    async fn send_message(&self, token: &str, raw: &str) -> Result<SentMessage, RemoteError> {
        self.enter(token)?;
        self.sent.lock().expect("lock").push(raw.to_owned());
        Ok(SentMessage {
            id: "sent-1".to_owned(),
            thread_id: "thread-sent-1".to_owned(),
        })
    }
}

/// Config pointing both remote endpoints at `base_url`
pub fn stub_config(base_url: &str) -> ServerConfig {
    ServerConfig {
        credentials_path: "credentials.json".into(),
        token_path: "token.json".into(),
        auth_code: None,
        api_base: base_url.to_owned(),
        token_url: format!("{base_url}/token"),
        auth_url: DEFAULT_AUTH_URL.to_owned(),
        http_timeout_ms: 5_000,
        fetch_concurrency: 4,
    }
}

/// One request captured by [`StubServer`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub authorization: Option<String>,
    pub body: String,
}

impl RecordedRequest {
    /// Decode an `application/x-www-form-urlencoded` body
    pub fn form(&self) -> BTreeMap<String, String> {
        self.body
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| {
                let decode = |s: &str| {
                    urlencoding::decode(&s.replace('+', " "))
                        .expect("utf-8 form value")
                        .into_owned()
                };
                (decode(k), decode(v))
            })
            .collect()
    }
}

struct StubState {
    status: StatusCode,
    reply: serde_json::Value,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Local HTTP server answering every request with one canned JSON reply
pub struct StubServer {
    pub base_url: String,
    state: Arc<StubState>,
}

impl StubServer {
    pub async fn start(status: u16, reply: serde_json::Value) -> Self {
        let state = Arc::new(StubState {
            status: StatusCode::from_u16(status).expect("status"),
            reply,
            requests: Mutex::new(Vec::new()),
        });
        let app = Router::new().fallback(record).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().expect("lock").clone()
    }
}

async fn record(
    State(state): State<Arc<StubState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<BTreeMap<String, String>>,
    body: String,
) -> (StatusCode, Json<serde_json::Value>) {
    state.requests.lock().expect("lock").push(RecordedRequest {
        method,
        path: uri.path().to_owned(),
        query,
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
        body,
    });
    (state.status, Json(state.reply.clone()))
}
