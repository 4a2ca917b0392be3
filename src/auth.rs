//! OAuth2 token lifecycle
//!
//! Owns the authorization-code flow (URL generation, code exchange), refresh,
//! staleness decisions, scope tracking, and persistence of every new token.
//! Staleness is decided by comparing the wall clock against the stored expiry
//! rather than waiting for the remote store to answer 401.
//!
//! All load/refresh work runs under one async mutex, so concurrent callers
//! that find the same stale token trigger a single refresh.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::credentials::{Credentials, StoredToken, TokenStore};
use crate::errors::{AppError, AppResult};
use crate::gmail::{RemoteError, execute_json};

/// Full mailbox access; implies every narrower grant
const FULL_MAIL_SCOPE: &str = "https://mail.google.com/";

/// Permission grants the server asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Scope {
    /// Send mail on the user's behalf
    Send,
    /// Read messages, drafts, and metadata
    ReadOnly,
    /// Read and change labels/properties
    Modify,
}

impl Scope {
    /// Every scope needed for full functionality
    pub const ALL: [Self; 3] = [Self::Send, Self::ReadOnly, Self::Modify];

    /// Scope URL as sent to and returned by the authorization server
    pub fn url(self) -> &'static str {
        match self {
            Self::Send => "https://www.googleapis.com/auth/gmail.send",
            Self::ReadOnly => "https://www.googleapis.com/auth/gmail.readonly",
            Self::Modify => "https://www.googleapis.com/auth/gmail.modify",
        }
    }

    /// Short description for status output
    pub fn description(self) -> &'static str {
        match self {
            Self::Send => "send emails",
            Self::ReadOnly => "read emails and metadata",
            Self::Modify => "modify email labels and properties",
        }
    }

    /// Whether `granted` allows what this scope allows
    ///
    /// `gmail.modify` covers reading and sending; the full-mail scope covers
    /// everything.
    pub fn is_satisfied_by(self, granted: &BTreeSet<String>) -> bool {
        if granted.contains(self.url()) || granted.contains(FULL_MAIL_SCOPE) {
            return true;
        }
        match self {
            Self::Send | Self::ReadOnly => granted.contains(Self::Modify.url()),
            Self::Modify => false,
        }
    }
}

/// In-memory token
#[derive(Debug, Clone)]
pub struct Token {
    /// Bearer access token
    pub access_token: SecretString,
    /// Refresh credential, if the grant issued one
    pub refresh_token: Option<SecretString>,
    /// Granted scope URLs; empty when the descriptor did not record them
    pub scopes: BTreeSet<String>,
    /// Token type, normally `Bearer`
    pub token_type: Option<String>,
    /// Expiry instant; `None` means the token never goes stale locally
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    /// Build from the persisted descriptor
    pub fn from_stored(stored: StoredToken) -> Self {
        Self {
            access_token: SecretString::new(stored.access_token.into()),
            refresh_token: stored
                .refresh_token
                .filter(|r| !r.is_empty())
                .map(|r| SecretString::new(r.into())),
            scopes: parse_scopes(&stored.scope),
            token_type: stored.token_type,
            expires_at: stored
                .expiry_date
                .and_then(DateTime::<Utc>::from_timestamp_millis),
        }
    }

    /// Persisted form
    pub fn to_stored(&self) -> StoredToken {
        StoredToken {
            access_token: self.access_token.expose_secret().to_owned(),
            refresh_token: self
                .refresh_token
                .as_ref()
                .map(|r| r.expose_secret().to_owned()),
            scope: self.scopes.iter().cloned().collect::<Vec<_>>().join(" "),
            token_type: self.token_type.clone(),
            expiry_date: self.expires_at.map(|t| t.timestamp_millis()),
        }
    }

    /// Build from a token endpoint response
    ///
    /// A refresh response may omit the refresh token and scope; `previous`
    /// supplies them.
    fn from_grant(grant: TokenGrant, previous: Option<&Token>, now: DateTime<Utc>) -> Self {
        let scopes = match grant.scope.as_deref() {
            Some(scope) if !scope.trim().is_empty() => parse_scopes(scope),
            _ => previous.map(|p| p.scopes.clone()).unwrap_or_default(),
        };
        Self {
            access_token: SecretString::new(grant.access_token.into()),
            refresh_token: grant
                .refresh_token
                .filter(|r| !r.is_empty())
                .map(|r| SecretString::new(r.into()))
                .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
            scopes,
            token_type: grant
                .token_type
                .or_else(|| previous.and_then(|p| p.token_type.clone())),
            expires_at: grant
                .expires_in
                .and_then(TimeDelta::try_seconds)
                .and_then(|ttl| now.checked_add_signed(ttl)),
        }
    }

    /// Stale when `now` is at or past the expiry instant
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// [`Token::is_stale_at`] against the current wall clock
    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }
}

fn parse_scopes(scope: &str) -> BTreeSet<String> {
    scope.split_whitespace().map(str::to_owned).collect()
}

/// Token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// OAuth2 token endpoint
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// `grant_type=authorization_code`
    async fn exchange_code(
        &self,
        credentials: &Credentials,
        code: &str,
    ) -> Result<TokenGrant, RemoteError>;

    /// `grant_type=refresh_token`
    async fn refresh(
        &self,
        credentials: &Credentials,
        refresh_token: &str,
    ) -> Result<TokenGrant, RemoteError>;
}

/// Token endpoint over HTTPS form posts
#[derive(Debug, Clone)]
pub struct HttpTokenEndpoint {
    client: Client,
    token_url: String,
    timeout: Duration,
}

impl HttpTokenEndpoint {
    /// Build an endpoint against `config.token_url`
    pub fn new(client: Client, config: &ServerConfig) -> Self {
        Self {
            client,
            token_url: config.token_url.clone(),
            timeout: Duration::from_millis(config.http_timeout_ms),
        }
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange_code(
        &self,
        credentials: &Credentials,
        code: &str,
    ) -> Result<TokenGrant, RemoteError> {
        let request = self.client.post(&self.token_url).form(&[
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.expose_secret()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", credentials.redirect_uri.as_str()),
        ]);
        execute_json(request, self.timeout, "token exchange").await
    }

    async fn refresh(
        &self,
        credentials: &Credentials,
        refresh_token: &str,
    ) -> Result<TokenGrant, RemoteError> {
        let request = self.client.post(&self.token_url).form(&[
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.expose_secret()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ]);
        execute_json(request, self.timeout, "token refresh").await
    }
}

/// Snapshot of the authorization state for status output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStatus {
    /// A parsable token file exists
    pub token_present: bool,
    /// Token is past its expiry
    pub stale: bool,
    /// Token can be refreshed without a human
    pub refreshable: bool,
    /// Expiry instant, RFC 3339
    pub expires_at: Option<String>,
    /// Granted scope URLs
    pub granted: Vec<String>,
    /// Required scopes the token does not satisfy
    pub missing: Vec<Scope>,
}

/// Token lifecycle manager
///
/// Constructed once at startup and shared by the mailbox façade.
pub struct TokenManager {
    credentials: Credentials,
    store: TokenStore,
    endpoint: Arc<dyn TokenEndpoint>,
    auth_base: String,
    current: Mutex<Option<Token>>,
}

impl TokenManager {
    /// Create a manager; nothing is read until the first token request
    pub fn new(
        credentials: Credentials,
        store: TokenStore,
        endpoint: Arc<dyn TokenEndpoint>,
        auth_base: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            store,
            endpoint,
            auth_base: auth_base.into(),
            current: Mutex::new(None),
        }
    }

    /// Consent URL requesting `scopes` with offline access
    ///
    /// Deterministic for a given client and scope list.
    pub fn build_authorization_url(&self, scopes: &[Scope]) -> String {
        let scope = scopes.iter().map(|s| s.url()).collect::<Vec<_>>().join(" ");
        format!(
            "{}?access_type=offline&scope={}&response_type=code&client_id={}&redirect_uri={}",
            self.auth_base,
            urlencoding::encode(&scope),
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(&self.credentials.redirect_uri),
        )
    }

    /// Exchange an authorization code and persist the resulting token
    ///
    /// # Errors
    ///
    /// - `AuthDenied` when the remote signals `access_denied` or HTTP 403
    /// - `ExchangeFailed` for any other remote failure
    /// - `Internal` if the token cannot be persisted
    pub async fn exchange_code(&self, code: &str) -> AppResult<Token> {
        let code = code.trim();
        if code.is_empty() {
            return Err(AppError::invalid("authorization code must not be empty"));
        }
        let mut current = self.current.lock().await;
        let grant = self
            .endpoint
            .exchange_code(&self.credentials, code)
            .await
            .map_err(classify_exchange_error)?;
        let token = Token::from_grant(grant, None, Utc::now());
        self.store.save(&token.to_stored()).await?;
        info!(scopes = token.scopes.len(), "authorization code exchanged");
        *current = Some(token.clone());
        Ok(token)
    }

    /// Return a usable token, refreshing a stale one
    ///
    /// # Errors
    ///
    /// - `AuthRequired` when no parsable token is persisted
    /// - `AuthExpired` when the token is stale and cannot be refreshed
    /// - `RefreshFailed` when the refresh grant fails
    pub async fn load_or_refresh(&self) -> AppResult<Token> {
        let mut current = self.current.lock().await;
        if current.is_none() {
            *current = Some(self.load_stored().await?);
        }
        if let Some(token) = current.as_ref()
            && !token.is_stale()
        {
            return Ok(token.clone());
        }
        self.refresh_locked(&mut current).await
    }

    /// Refresh unconditionally using the stored refresh credential
    ///
    /// # Errors
    ///
    /// - `AuthRequired` when no token is persisted
    /// - `AuthExpired` when the token has no refresh credential
    /// - `RefreshFailed` on any remote error
    pub async fn refresh(&self) -> AppResult<Token> {
        let mut current = self.current.lock().await;
        self.refresh_locked(&mut current).await
    }

    /// Refresh after the store rejected `rejected`
    ///
    /// If another caller already replaced the rejected token, the newer one is
    /// returned without a second refresh.
    ///
    /// # Errors
    ///
    /// Same as [`TokenManager::refresh`].
    pub async fn force_refresh(&self, rejected: &SecretString) -> AppResult<SecretString> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref()
            && token.access_token.expose_secret() != rejected.expose_secret()
            && !token.is_stale()
        {
            return Ok(token.access_token.clone());
        }
        warn!("remote store rejected the access token; refreshing");
        self.refresh_locked(&mut current)
            .await
            .map(|token| token.access_token)
    }

    /// Bearer token for an operation that needs `scope`
    ///
    /// # Errors
    ///
    /// Any [`TokenManager::load_or_refresh`] error, or `MissingScope` when the
    /// token's recorded grants do not cover `scope`.
    pub async fn require_scope(&self, scope: Scope) -> AppResult<SecretString> {
        let mut token = self.load_or_refresh().await?;
        if !grants_cover(&token, scope) {
            // The user may have re-authorized with a wider grant since.
            let reloaded = {
                let mut current = self.current.lock().await;
                self.adopt_persisted(&mut current, &token).await?
            };
            if reloaded {
                token = self.load_or_refresh().await?;
            }
        }
        if !grants_cover(&token, scope) {
            return Err(AppError::MissingScope {
                scope: scope.url().to_owned(),
            });
        }
        Ok(token.access_token)
    }

    /// Exchange a configured one-shot auth code when no token exists yet
    ///
    /// # Errors
    ///
    /// Any [`TokenManager::exchange_code`] error.
    pub async fn bootstrap(&self, auth_code: Option<&SecretString>) -> AppResult<()> {
        if self.store.exists().await {
            return Ok(());
        }
        match auth_code {
            Some(code) => {
                info!("no token found; exchanging configured authorization code");
                self.exchange_code(code.expose_secret()).await.map(|_| ())
            }
            None => {
                warn!(
                    auth_url = %self.build_authorization_url(&Scope::ALL),
                    "no token found; tools will fail until authorization completes"
                );
                Ok(())
            }
        }
    }

    /// Inspect the persisted token without refreshing it
    ///
    /// # Errors
    ///
    /// `Internal` if the token file exists but cannot be read.
    pub async fn status(&self) -> AppResult<AuthStatus> {
        let Some(token) = self.store.load().await?.map(Token::from_stored) else {
            return Ok(AuthStatus {
                token_present: false,
                stale: false,
                refreshable: false,
                expires_at: None,
                granted: Vec::new(),
                missing: Scope::ALL.to_vec(),
            });
        };
        Ok(AuthStatus {
            token_present: true,
            stale: token.is_stale(),
            refreshable: token.refresh_token.is_some(),
            expires_at: token.expires_at.map(|t| t.to_rfc3339()),
            granted: token.scopes.iter().cloned().collect(),
            missing: Scope::ALL
                .into_iter()
                .filter(|s| !s.is_satisfied_by(&token.scopes))
                .collect(),
        })
    }

    fn auth_required(&self) -> AppError {
        AppError::AuthRequired {
            auth_url: self.build_authorization_url(&Scope::ALL),
        }
    }

    async fn load_stored(&self) -> AppResult<Token> {
        self.store
            .load()
            .await?
            .map(Token::from_stored)
            .ok_or_else(|| self.auth_required())
    }

    /// Replace the cached token when the token file holds a different one
    ///
    /// Returns whether a replacement happened. The caller holds the lock.
    async fn adopt_persisted(
        &self,
        current: &mut Option<Token>,
        cached: &Token,
    ) -> AppResult<bool> {
        let Some(persisted) = self.store.load().await?.map(Token::from_stored) else {
            return Ok(false);
        };
        if persisted.access_token.expose_secret() == cached.access_token.expose_secret() {
            return Ok(false);
        }
        info!("token file changed on disk; adopting it");
        *current = Some(persisted);
        Ok(true)
    }

    /// Refresh the cached (or persisted) token; the caller holds the lock
    async fn refresh_locked(&self, current: &mut Option<Token>) -> AppResult<Token> {
        if let Some(cached) = current.clone()
            && cached.refresh_token.is_none()
            && self.adopt_persisted(current, &cached).await?
            && let Some(adopted) = current.as_ref()
            && !adopted.is_stale()
        {
            return Ok(adopted.clone());
        }
        let token = match current.take() {
            Some(token) => token,
            None => self.load_stored().await?,
        };
        let Some(refresh_token) = token.refresh_token.clone() else {
            *current = Some(token);
            return Err(AppError::AuthExpired);
        };
        match self.refresh_with(&token, &refresh_token).await {
            Ok(fresh) => {
                *current = Some(fresh.clone());
                Ok(fresh)
            }
            Err(e) => {
                *current = Some(token);
                Err(e)
            }
        }
    }

    async fn refresh_with(&self, token: &Token, refresh_token: &SecretString) -> AppResult<Token> {
        let grant = self
            .endpoint
            .refresh(&self.credentials, refresh_token.expose_secret())
            .await
            .map_err(|e| AppError::RefreshFailed(e.to_string()))?;
        let fresh = Token::from_grant(grant, Some(token), Utc::now());
        self.store.save(&fresh.to_stored()).await?;
        info!(expires_at = ?fresh.expires_at, "access token refreshed");
        Ok(fresh)
    }
}

/// Whether the token's recorded grants allow `scope`
///
/// Descriptors written without `scope` give no basis for refusing.
fn grants_cover(token: &Token, scope: Scope) -> bool {
    token.scopes.is_empty() || scope.is_satisfied_by(&token.scopes)
}

/// Map a code-exchange failure to `AuthDenied` or `ExchangeFailed`
fn classify_exchange_error(err: RemoteError) -> AppError {
    let msg = err.to_string();
    let denied = matches!(err, RemoteError::Http { status: 403, .. })
        || msg.contains("access_denied");
    if denied {
        AppError::AuthDenied(msg)
    } else {
        AppError::ExchangeFailed(msg)
    }
}
