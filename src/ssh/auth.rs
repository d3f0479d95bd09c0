//! SSH credential loading and authentication
//!
//! Private keys are supplied either inline or as a `file://` reference:
//! - Inline OpenSSH / PEM text
//! - `file://~/.ssh/id_ed25519` style paths (tilde expanded)
//! - Encrypted keys with passphrase
//!
//! Authentication tries the key first, then the password.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::client::Handle;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PrivateKey;
use thiserror::Error;
use tracing::{debug, info};

use super::client::ClientHandler;
use super::config::{SftpParameters, FILE_PROTOCOL};
use super::error::SshError;

/// Errors that can occur during key loading
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Key file not found: {0}")]
    NotFound(PathBuf),

    #[error("Private Key File \"{path}\": {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse key: {0}")]
    Parse(String),

    #[error("Encrypted key requires passphrase")]
    PassphraseRequired,

    #[error("Key authentication enabled but no private key supplied")]
    MissingKey,

    #[error("Passphrase enabled but no passphrase supplied")]
    MissingPassphrase,
}

/// Where the private key material comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Key text given directly
    Inline(String),
    /// Key read from a local file
    File(PathBuf),
}

impl KeySource {
    /// Interpret a `private_key` parameter
    pub fn parse(value: &str) -> Self {
        match value.strip_prefix(FILE_PROTOCOL) {
            Some(path) => Self::File(expand_tilde(Path::new(path))),
            None => Self::Inline(value.to_string()),
        }
    }

    /// Read the key text
    pub fn load(&self) -> Result<String, KeyError> {
        match self {
            Self::Inline(text) => Ok(text.clone()),
            Self::File(path) => {
                if !path.exists() {
                    return Err(KeyError::NotFound(path.clone()));
                }
                debug!("Loading key from: {:?}", path);
                std::fs::read_to_string(path).map_err(|source| KeyError::Read {
                    path: path.clone(),
                    source,
                })
            }
        }
    }
}

/// Decode key text, optionally decrypting it
pub fn decode_private_key(
    key_data: &str,
    passphrase: Option<&str>,
) -> Result<PrivateKey, KeyError> {
    let is_encrypted =
        key_data.contains("ENCRYPTED") || key_data.contains("Proc-Type: 4,ENCRYPTED");

    if is_encrypted && passphrase.is_none() {
        return Err(KeyError::PassphraseRequired);
    }

    russh::keys::decode_secret_key(key_data, passphrase)
        .map_err(|e| KeyError::Parse(e.to_string()))
}

/// Expand ~ to home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(stripped) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path_str == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }

    path.to_path_buf()
}

/// The authentication methods resolved from [`SftpParameters`]
pub struct Credentials {
    username: String,
    key: Option<Arc<PrivateKey>>,
    password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("key", &self.key.as_ref().map(|k| k.algorithm().to_string()))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    /// Resolve and decode every configured method. Fails before any network I/O.
    pub fn from_params(params: &SftpParameters) -> Result<Self, SshError> {
        let key = if params.use_key {
            let source = params
                .private_key
                .as_deref()
                .map(KeySource::parse)
                .ok_or(KeyError::MissingKey)?;
            let passphrase = if params.use_passphrase {
                Some(
                    params
                        .passphrase
                        .as_deref()
                        .ok_or(KeyError::MissingPassphrase)?,
                )
            } else {
                None
            };
            let key = decode_private_key(&source.load()?, passphrase)?;
            debug!("Decoded {} private key", key.algorithm());
            Some(Arc::new(key))
        } else {
            None
        };

        let password = params.usable_password().map(str::to_string);

        if key.is_none() && password.is_none() {
            return Err(SshError::NoAuthMethod);
        }

        Ok(Self {
            username: params.username.clone(),
            key,
            password,
        })
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// Run every configured method in order until the server accepts one
    pub async fn authenticate(&self, handle: &mut Handle<ClientHandler>) -> Result<(), SshError> {
        if let Some(key) = &self.key {
            let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
            let key_with_hash = PrivateKeyWithHashAlg::new(key.clone(), hash_alg);

            let result = handle
                .authenticate_publickey(&self.username, key_with_hash)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?;

            if result.success() {
                info!("Public key authentication succeeded for {}", self.username);
                return Ok(());
            }
            debug!("Public key rejected for {}", self.username);
        }

        if let Some(password) = &self.password {
            let result = handle
                .authenticate_password(&self.username, password)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?;

            if result.success() {
                info!("Password authentication succeeded for {}", self.username);
                return Ok(());
            }
            debug!("Password rejected for {}", self.username);
        }

        Err(SshError::AuthenticationFailed(
            "Authentication rejected by server".to_string(),
        ))
    }
}
