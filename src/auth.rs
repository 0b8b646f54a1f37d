//! OAuth2 credential provider for the Gmail API
//!
//! The stored credential is an `authorized_user` JSON document holding the
//! client id, client secret and refresh token. When it is present and well
//! formed it is used as-is; anything else falls through to the interactive
//! installed-app flow, whose refresh token is then written back in the same
//! format.

use async_trait::async_trait;
use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};
use yup_oauth2::storage::{TokenInfo, TokenStorage};
use yup_oauth2::ApplicationSecret;

use crate::error::{GmailError, Result};

/// Scopes requested by the interactive flow
pub const REQUIRED_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.send",
];

/// `type` field of a stored credential
pub const AUTHORIZED_USER: &str = "authorized_user";

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub =
    Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// Persisted credential: `{type, client_id, client_secret, refresh_token}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    #[serde(rename = "type")]
    pub kind: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl StoredCredential {
    pub fn new(client_id: String, client_secret: String, refresh_token: String) -> Self {
        Self {
            kind: AUTHORIZED_USER.to_string(),
            client_id,
            client_secret,
            refresh_token,
        }
    }

    /// Structural check only; revocation is not verified
    pub fn validate(&self) -> Result<()> {
        if self.kind != AUTHORIZED_USER {
            return Err(GmailError::CredentialCorrupt(format!(
                "unexpected credential type '{}'",
                self.kind
            )));
        }
        for (field, value) in [
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("refresh_token", &self.refresh_token),
        ] {
            if value.trim().is_empty() {
                return Err(GmailError::CredentialCorrupt(format!("{} is empty", field)));
            }
        }
        Ok(())
    }
}

/// Load a stored credential
///
/// Returns `Ok(None)` when the file does not exist and
/// `Err(CredentialCorrupt)` when it exists but cannot be used.
pub async fn load_stored_credential(path: &Path) -> Result<Option<StoredCredential>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(GmailError::CredentialCorrupt(format!(
                "cannot read {:?}: {}",
                path, e
            )))
        }
    };

    let credential: StoredCredential = serde_json::from_str(&content)
        .map_err(|e| GmailError::CredentialCorrupt(format!("malformed {:?}: {}", path, e)))?;
    credential.validate()?;
    Ok(Some(credential))
}

/// Persist a credential, creating parent directories and restricting permissions
pub async fn save_stored_credential(path: &Path, credential: &StoredCredential) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let payload = serde_json::to_string(credential)?;
    tokio::fs::write(path, payload).await?;
    secure_token_file(path).await?;
    info!("Saved credential to {:?}", path);
    Ok(())
}

/// Build a stored credential from the client configuration and a refresh token
pub fn credential_from_secret(
    secret: &ApplicationSecret,
    refresh_token: String,
) -> StoredCredential {
    StoredCredential::new(
        secret.client_id.clone(),
        secret.client_secret.clone(),
        refresh_token,
    )
}

/// Token storage for the interactive flow
///
/// Access tokens live in memory only. Every refresh token the flow hands
/// back is written straight to the stored credential file, so nothing
/// else on disk ever holds it. The hub asks for subsets of one scope set,
/// so a single slot is enough.
struct CredentialStorage {
    secret: ApplicationSecret,
    token_path: PathBuf,
    token: Mutex<Option<TokenInfo>>,
}

impl CredentialStorage {
    fn new(secret: ApplicationSecret, token_path: impl Into<PathBuf>) -> Self {
        Self {
            secret,
            token_path: token_path.into(),
            token: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TokenStorage for CredentialStorage {
    async fn set(
        &self,
        _scopes: &[&str],
        token: TokenInfo,
    ) -> anyhow::Result<()> {
        let mut current = self.token.lock().await;
        let previous = current.as_ref().and_then(|t| t.refresh_token.as_deref());

        if let Some(refresh_token) = token.refresh_token.as_deref() {
            if !refresh_token.trim().is_empty() && previous != Some(refresh_token) {
                let credential = credential_from_secret(&self.secret, refresh_token.to_string());
                save_stored_credential(&self.token_path, &credential)
                    .await
                    .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            }
        }

        *current = Some(token);
        Ok(())
    }

    async fn get(&self, _scopes: &[&str]) -> Option<TokenInfo> {
        self.token.lock().await.clone()
    }
}

fn https_connector(
) -> Result<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>> {
    // HTTP/1 works better with google-gmail1 than the HTTP/2 default
    Ok(hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .map_err(|e| GmailError::AuthError(format!("Failed to load TLS roots: {}", e)))?
        .https_or_http()
        .enable_http1()
        .build())
}

/// Hub backed by a stored credential; refresh is handled by the authenticator
async fn hub_from_stored(credential: &StoredCredential) -> Result<GmailHub> {
    // Same field names as Google's authorized_user format
    let secret = serde_json::from_value(serde_json::to_value(credential)?)?;
    let auth = yup_oauth2::AuthorizedUserAuthenticator::builder(secret)
        .build()
        .await
        .map_err(|e| GmailError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(https_connector()?);
    Ok(Gmail::new(client, auth))
}

/// Interactive installed-app flow; persists the resulting credential
async fn hub_from_interactive_flow(
    credentials_path: &Path,
    token_path: &Path,
) -> Result<GmailHub> {
    let secret = yup_oauth2::read_application_secret(credentials_path)
        .await
        .map_err(|e| GmailError::AuthError(format!("Failed to read credentials: {}", e)))?;

    let storage = CredentialStorage::new(secret.clone(), token_path);

    // HTTPRedirect opens a browser for user authorization
    let auth = yup_oauth2::InstalledFlowAuthenticator::builder(
        secret,
        yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
    )
    .with_storage(Box::new(storage))
    .build()
    .await
    .map_err(|e| GmailError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    auth.token(REQUIRED_SCOPES)
        .await
        .map_err(|e| GmailError::AuthError(format!("Failed to obtain token: {}", e)))?;

    if !matches!(load_stored_credential(token_path).await, Ok(Some(_))) {
        warn!(
            "Authorization returned no refresh token; credential not persisted. \
             Revoke the app's access and run `auth --force` to obtain one."
        );
    }

    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(https_connector()?);
    Ok(Gmail::new(client, auth))
}

/// Obtain an authenticated Gmail hub
///
/// A stored credential that is present and structurally valid is used
/// without any network verification. A corrupt one is treated as absent.
/// Failure of the interactive flow is fatal.
pub async fn initialize_gmail_hub(credentials_path: &Path, token_path: &Path) -> Result<GmailHub> {
    match load_stored_credential(token_path).await {
        Ok(Some(credential)) => {
            info!("Using stored credential from {:?}", token_path);
            return hub_from_stored(&credential).await;
        }
        Ok(None) => info!("No stored credential at {:?}, starting authorization", token_path),
        Err(e) => warn!("{}; re-authorizing", e),
    }

    hub_from_interactive_flow(credentials_path, token_path).await
}

/// Secure token file permissions on Unix systems
///
/// Sets file permissions to 0600 (read/write for owner only)
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

/// Windows uses ACLs; permissions are left as created
#[cfg(windows)]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}
