//! Configuration module for credential paths, endpoints, and server settings
//!
//! All configuration is loaded from environment variables following the
//! pattern `GMAIL_MCP_<KEY>`. Every key has a default so a bare checkout with a
//! `credentials.json` next to the binary works out of the box.

use std::env;
use std::env::VarError;
use std::path::PathBuf;

use secrecy::SecretString;

use crate::errors::{AppError, AppResult};

/// Default Gmail REST API base
pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
/// Default OAuth2 token endpoint
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Default OAuth2 consent endpoint
pub const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Server-wide configuration
///
/// Built once at startup and handed to the components that need it.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Client-secret descriptor (`installed` or `web` shape)
    pub credentials_path: PathBuf,
    /// Persisted token state, rewritten on every exchange/refresh
    pub token_path: PathBuf,
    /// One-shot authorization code exchanged at startup when no token exists
    pub auth_code: Option<SecretString>,
    /// Gmail REST API base URL
    pub api_base: String,
    /// OAuth2 token endpoint
    pub token_url: String,
    /// OAuth2 consent endpoint used to build authorization URLs
    pub auth_url: String,
    /// Per-request timeout for remote calls in milliseconds
    pub http_timeout_ms: u64,
    /// Maximum detail fetches in flight for one list operation
    pub fetch_concurrency: usize,
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a variable is set but malformed.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// GMAIL_MCP_CREDENTIALS_PATH=/etc/gmail-mcp/credentials.json
    /// GMAIL_MCP_TOKEN_PATH=/var/lib/gmail-mcp/token.json
    /// GMAIL_MCP_AUTH_CODE=4/0Ab...
    /// GMAIL_MCP_HTTP_TIMEOUT_MS=30000
    /// GMAIL_MCP_FETCH_CONCURRENCY=8
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let fetch_concurrency = parse_usize_env("GMAIL_MCP_FETCH_CONCURRENCY", 8)?;
        if fetch_concurrency == 0 {
            return Err(AppError::InvalidInput(
                "GMAIL_MCP_FETCH_CONCURRENCY must be at least 1".to_owned(),
            ));
        }

        Ok(Self {
            credentials_path: path_env("GMAIL_MCP_CREDENTIALS_PATH", "credentials.json")?,
            token_path: path_env("GMAIL_MCP_TOKEN_PATH", "token.json")?,
            auth_code: optional_env("GMAIL_MCP_AUTH_CODE")?
                .or(optional_env("AUTH_CODE")?)
                .map(|code| SecretString::new(code.into())),
            api_base: string_env("GMAIL_MCP_API_BASE", DEFAULT_API_BASE)?,
            token_url: string_env("GMAIL_MCP_TOKEN_URL", DEFAULT_TOKEN_URL)?,
            auth_url: string_env("GMAIL_MCP_AUTH_URL", DEFAULT_AUTH_URL)?,
            http_timeout_ms: parse_u64_env("GMAIL_MCP_HTTP_TIMEOUT_MS", 30_000)?,
            fetch_concurrency,
        })
    }
}

/// Read an optional environment variable, treating blank values as unset
fn optional_env(key: &str) -> AppResult<Option<String>> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(Some(v.trim().to_owned())),
        Ok(_) | Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

fn string_env(key: &str, default: &str) -> AppResult<String> {
    Ok(optional_env(key)?
        .map(|v| v.trim_end_matches('/').to_owned())
        .unwrap_or_else(|| default.to_owned()))
}

fn path_env(key: &str, default: &str) -> AppResult<PathBuf> {
    Ok(optional_env(key)?.map_or_else(|| PathBuf::from(default), PathBuf::from))
}

/// Parse a `u64` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u64`.
fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match env::var(key) {
        Ok(v) => v.trim().parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `usize` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `usize`.
fn parse_usize_env(key: &str, default: usize) -> AppResult<usize> {
    match env::var(key) {
        Ok(v) => v.trim().parse::<usize>().map_err(|_| {
            AppError::InvalidInput(format!("invalid usize environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}
