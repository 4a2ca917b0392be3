//! Credential store: client-secret descriptor and persisted token state
//!
//! Pure file access. The client-secret descriptor is read once at startup and
//! resolved into [`Credentials`]; the token descriptor is read and written as
//! [`StoredToken`]. Token writes go through a temp file and a rename so a crash
//! never leaves a half-written token behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{AppError, AppResult};

/// Out-of-band redirect: the consent page shows the code instead of calling back
pub const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// OAuth client identity, normalized from either descriptor shape
#[derive(Debug, Clone)]
pub struct Credentials {
    /// OAuth client ID
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: SecretString,
    /// Redirect used for the authorization flow (always out-of-band)
    pub redirect_uri: String,
}

/// Raw descriptor body shared by both shapes (`redirect_uris` is ignored)
#[derive(Debug, Deserialize)]
struct ClientSecretBody {
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: String,
}

/// Descriptor as downloaded from the provider console
#[derive(Debug, Deserialize)]
enum ClientSecretDescriptor {
    /// Desktop ("installed app") client
    #[serde(rename = "installed")]
    Installed(ClientSecretBody),
    /// Web application client
    #[serde(rename = "web")]
    Web(ClientSecretBody),
}

impl Credentials {
    /// Read and resolve the descriptor at `path`
    ///
    /// # Errors
    ///
    /// `CredentialsInvalid` when the file is missing, is not JSON, has neither
    /// or both of `installed`/`web`, or lacks `client_id`/`client_secret`.
    pub async fn load(path: &Path) -> AppResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::CredentialsInvalid(format!(
                "cannot read {}: {e}; download an OAuth client descriptor and save it there",
                path.display()
            ))
        })?;
        Self::from_json(&content)
    }

    /// Resolve a descriptor already in memory
    ///
    /// # Errors
    ///
    /// See [`Credentials::load`].
    pub fn from_json(content: &str) -> AppResult<Self> {
        // Externally tagged enums accept exactly one key, so a descriptor
        // carrying both shapes is rejected here too.
        let descriptor: ClientSecretDescriptor = serde_json::from_str(content).map_err(|e| {
            AppError::CredentialsInvalid(format!(
                "expected exactly one of `installed` or `web`: {e}"
            ))
        })?;
        let body = match descriptor {
            ClientSecretDescriptor::Installed(body) | ClientSecretDescriptor::Web(body) => body,
        };
        if body.client_id.trim().is_empty() || body.client_secret.trim().is_empty() {
            return Err(AppError::CredentialsInvalid(
                "client_id and client_secret must be non-empty".to_owned(),
            ));
        }
        Ok(Self {
            client_id: body.client_id,
            client_secret: SecretString::new(body.client_secret.into()),
            redirect_uri: OOB_REDIRECT_URI.to_owned(),
        })
    }
}

/// Token descriptor as persisted on disk
///
/// Field names match the token files written by the provider's own client
/// libraries so existing `token.json` files keep working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    /// Bearer access token
    pub access_token: String,
    /// Long-lived refresh credential, absent for some grants
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Space-delimited granted scopes
    #[serde(default)]
    pub scope: String,
    /// Token type, normally `Bearer`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Expiry instant in epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
}

/// File-backed token state
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Create a store rooted at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the persisted token
    ///
    /// Returns `Ok(None)` when the file does not exist or cannot be parsed;
    /// both cases mean "authorization required" to the caller.
    ///
    /// # Errors
    ///
    /// `Internal` for I/O failures other than a missing file.
    pub async fn load(&self) -> AppResult<Option<StoredToken>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::Internal(format!(
                    "cannot read token file {}: {e}",
                    self.path.display()
                )));
            }
        };
        match serde_json::from_str::<StoredToken>(&content) {
            Ok(token) => Ok(Some(token)),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "ignoring unparsable token file");
                Ok(None)
            }
        }
    }

    /// Persist `token`, replacing any previous file atomically
    ///
    /// # Errors
    ///
    /// `Internal` if serialization, the temp write, or the rename fails.
    pub async fn save(&self, token: &StoredToken) -> AppResult<()> {
        let json = serde_json::to_string_pretty(token)
            .map_err(|e| AppError::Internal(format!("serialization failure: {e}")))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json.as_bytes()).await.map_err(|e| {
            AppError::Internal(format!("cannot write token file {}: {e}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            AppError::Internal(format!(
                "cannot move token file into place at {}: {e}",
                self.path.display()
            ))
        })?;
        debug!(path = %self.path.display(), "token persisted");
        Ok(())
    }

    /// Whether a token file is present at all
    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::{Credentials, OOB_REDIRECT_URI, StoredToken, TokenStore};
    use crate::errors::AppError;

    #[test]
    fn installed_and_web_shapes_normalize_identically() {
        let installed = Credentials::from_json(
            r#"{"installed":{"client_id":"id-1","client_secret":"s-1","redirect_uris":["http://localhost"]}}"#,
        )
        .expect("installed shape must load");
        let web = Credentials::from_json(
            r#"{"web":{"client_id":"id-1","client_secret":"s-1","redirect_uris":[]}}"#,
        )
        .expect("web shape must load");

        assert_eq!(installed.client_id, web.client_id);
        assert_eq!(
            installed.client_secret.expose_secret(),
            web.client_secret.expose_secret()
        );
        assert_eq!(installed.redirect_uri, OOB_REDIRECT_URI);
        assert_eq!(web.redirect_uri, OOB_REDIRECT_URI);
    }

    #[test]
    fn rejects_unknown_or_ambiguous_shapes() {
        for bad in [
            r#"{"other":{"client_id":"a","client_secret":"b"}}"#,
            r#"{"installed":{"client_id":"a","client_secret":"b"},"web":{"client_id":"a","client_secret":"b"}}"#,
            r#"{"installed":{"client_id":"","client_secret":"b"}}"#,
            "not json",
        ] {
            let err = Credentials::from_json(bad).expect_err("must fail");
            assert!(matches!(err, AppError::CredentialsInvalid(_)), "{bad}: {err}");
        }
    }

    #[tokio::test]
    async fn missing_descriptor_is_credentials_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = Credentials::load(&dir.path().join("credentials.json"))
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::CredentialsInvalid(_)));
    }

    #[tokio::test]
    async fn token_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TokenStore::new(dir.path().join("token.json"));
        assert_eq!(store.load().await.expect("load"), None);

        let token = StoredToken {
            access_token: "ya29.a".to_owned(),
            refresh_token: Some("1//r".to_owned()),
            scope: "https://www.googleapis.com/auth/gmail.readonly".to_owned(),
            token_type: Some("Bearer".to_owned()),
            expiry_date: Some(1_700_000_000_000),
        };
        store.save(&token).await.expect("save");
        assert!(store.exists().await);
        assert_eq!(store.load().await.expect("load"), Some(token));
        assert!(!dir.path().join("token.json.tmp").exists());
    }

    #[tokio::test]
    async fn unparsable_token_reads_as_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("token.json");
        std::fs::write(&path, "{ truncated").expect("write");
        let store = TokenStore::new(path);
        assert_eq!(store.load().await.expect("load"), None);
    }
}
