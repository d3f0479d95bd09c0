//! SSH Error types

use thiserror::Error;

use super::auth::KeyError;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("No usable authentication method: enable a key or supply a password")]
    NoAuthMethod,

    #[error("Failed to resolve {host}: {reason}")]
    Resolve { host: String, reason: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Host key verification failed: unknown host {host}. Fingerprint: {fingerprint}")]
    HostKeyUnknown { host: String, fingerprint: String },

    #[error(
        "Host key for {host} has changed! Expected: {expected_fingerprint}, Actual: {actual_fingerprint}"
    )]
    HostKeyChanged {
        host: String,
        expected_fingerprint: String,
        actual_fingerprint: String,
    },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::ProtocolError(err.to_string())
    }
}
