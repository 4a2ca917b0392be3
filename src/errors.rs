//! Application error model with MCP error mapping
//!
//! Defines a typed error hierarchy using `thiserror` for internal error handling,
//! and maps each variant to the appropriate MCP `ErrorData` type for protocol
//! compliance.

use rmcp::model::ErrorData;
use serde_json::json;
use thiserror::Error;

use crate::gmail::RemoteError;

/// Application error type
///
/// Covers the credential lifecycle, remote store calls, and shell-level
/// validation. Each variant maps to an MCP error code in [`ErrorData`].
#[derive(Debug, Error)]
pub enum AppError {
    /// Client-secret descriptor missing, unreadable, or of an unknown shape
    #[error("invalid credentials: {0}")]
    CredentialsInvalid(String),
    /// No usable token; a human must visit `auth_url` and exchange the code
    #[error("authentication required: visit {auth_url} and run `gmail-mcp-rs exchange-code <CODE>`")]
    AuthRequired {
        /// Ready-to-use authorization URL
        auth_url: String,
    },
    /// Token is stale and carries no refresh credential
    #[error("authentication expired: token is stale and has no refresh token; re-authorize")]
    AuthExpired,
    /// Remote rejected consent (app in testing mode, user not allow-listed)
    #[error(
        "OAuth access denied: if the app is in testing mode, add your address under \
         OAuth consent screen > Test users and authorize again ({0})"
    )]
    AuthDenied(String),
    /// Authorization-code exchange failed for a reason other than denial
    #[error("failed to exchange auth code: {0}")]
    ExchangeFailed(String),
    /// Refresh-token grant failed
    #[error("failed to refresh token: {0}")]
    RefreshFailed(String),
    /// Cached token does not hold a grant the operation needs
    #[error(
        "missing permission {scope}: delete the token file and authorize again to grant it"
    )]
    MissingScope {
        /// Scope URL that is required
        scope: String,
    },
    /// Remote store call failed; `operation` reads like "get inbox emails"
    #[error("failed to {operation}: {source}")]
    RemoteCallFailed {
        /// Human-readable operation name
        operation: &'static str,
        /// Underlying transport or API error
        #[source]
        source: RemoteError,
    },
    /// Attachment could not be read while composing; never propagated
    #[error("failed to attach file {path}: {reason}")]
    AttachmentReadFailed {
        /// Path as given by the caller
        path: String,
        /// I/O failure description
        reason: String,
    },
    /// Invalid user input (validation failed, malformed request)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Internal error (unexpected failure, local I/O)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Wrap a remote store error with the operation it belongs to
    pub fn remote(operation: &'static str, source: RemoteError) -> Self {
        Self::RemoteCallFailed { operation, source }
    }

    /// Convert to MCP `ErrorData`
    ///
    /// Maps each `AppError` variant to the appropriate MCP error type and
    /// includes a structured `code` field for client error handling.
    ///
    /// # Mappings
    ///
    /// - `InvalidInput` → `invalid_params`
    /// - credential and auth variants → `invalid_request`
    /// - `RemoteCallFailed` → `internal_error` (`timeout` code on timeouts)
    /// - `AttachmentReadFailed`, `Internal` → `internal_error`
    pub fn to_error_data(&self) -> ErrorData {
        let msg = self.to_string();
        match self {
            Self::InvalidInput(_) => {
                ErrorData::invalid_params(msg, Some(json!({ "code": "invalid_input" })))
            }
            Self::CredentialsInvalid(_) => ErrorData::invalid_request(
                msg,
                Some(json!({ "code": "credentials_invalid" })),
            ),
            Self::AuthRequired { auth_url } => ErrorData::invalid_request(
                msg,
                Some(json!({ "code": "auth_required", "auth_url": auth_url })),
            ),
            Self::AuthExpired => {
                ErrorData::invalid_request(msg, Some(json!({ "code": "auth_expired" })))
            }
            Self::AuthDenied(_) => {
                ErrorData::invalid_request(msg, Some(json!({ "code": "auth_denied" })))
            }
            Self::ExchangeFailed(_) => {
                ErrorData::invalid_request(msg, Some(json!({ "code": "exchange_failed" })))
            }
            Self::RefreshFailed(_) => {
                ErrorData::invalid_request(msg, Some(json!({ "code": "refresh_failed" })))
            }
            Self::MissingScope { scope } => ErrorData::invalid_request(
                msg,
                Some(json!({ "code": "missing_scope", "scope": scope })),
            ),
            Self::RemoteCallFailed { source, .. } => {
                let code = if matches!(source, RemoteError::Timeout(_)) {
                    "timeout"
                } else {
                    "remote_call_failed"
                };
                ErrorData::internal_error(msg, Some(json!({ "code": code })))
            }
            Self::AttachmentReadFailed { .. } => {
                ErrorData::internal_error(msg, Some(json!({ "code": "attachment_read_failed" })))
            }
            Self::Internal(_) => {
                ErrorData::internal_error(msg, Some(json!({ "code": "internal" })))
            }
        }
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;
    use crate::gmail::RemoteError;

    #[test]
    fn remote_errors_are_scoped_to_the_operation() {
        let err = AppError::remote(
            "get inbox emails",
            RemoteError::Http {
                status: 500,
                body: "backend error".to_owned(),
            },
        );
        assert_eq!(
            err.to_string(),
            "failed to get inbox emails: HTTP 500: backend error"
        );
    }

    #[test]
    fn auth_required_carries_url_in_error_data() {
        let err = AppError::AuthRequired {
            auth_url: "https://accounts.example/auth?x=1".to_owned(),
        };
        let data = err.to_error_data();
        let extra = data.data.expect("error data must carry details");
        assert_eq!(extra["code"], "auth_required");
        assert_eq!(extra["auth_url"], "https://accounts.example/auth?x=1");
    }

    #[test]
    fn timeouts_get_their_own_code() {
        let err = AppError::remote(
            "send email",
            RemoteError::Timeout("messages.send".to_owned()),
        );
        let extra = err.to_error_data().data.expect("error data must carry details");
        assert_eq!(extra["code"], "timeout");
    }
}
