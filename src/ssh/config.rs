//! SSH connection parameters

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::error::SshError;

/// Prefix marking `private_key` as a reference to a local key file
pub const FILE_PROTOCOL: &str = "file://";

/// Connection parameters, fixed for the lifetime of a [`crate::SecureFtp`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpParameters {
    /// Remote host name or address
    pub host: String,

    /// SSH port (default: 22)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username for authentication
    pub username: String,

    /// Password, tried after key authentication when non-empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Inline private key text, or `file://<path>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    /// Passphrase for an encrypted private key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,

    /// Attempt public key authentication with `private_key`
    #[serde(default)]
    pub use_key: bool,

    /// Decrypt `private_key` with `passphrase`
    #[serde(default)]
    pub use_passphrase: bool,

    /// How the server's host key is checked
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,

    /// known_hosts file (default: ~/.ssh/known_hosts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts_path: Option<PathBuf>,

    /// Deadline for dial + handshake, in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Transport keepalive interval in seconds (None disables keepalives)
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: Option<u64>,
}

/// Host key trust model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Accept any host key without consulting known_hosts
    AcceptAny,
    /// Accept matching keys, record unknown ones, reject changed ones
    #[default]
    TrustOnFirstUse,
    /// Accept only keys already present in known_hosts
    Strict,
}

fn default_port() -> u16 {
    22
}

fn default_timeout() -> u64 {
    30
}

fn default_keepalive() -> Option<u64> {
    Some(30)
}

impl SftpParameters {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: None,
            private_key: None,
            passphrase: None,
            use_key: false,
            use_passphrase: false,
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_path: None,
            timeout_secs: default_timeout(),
            keepalive_secs: default_keepalive(),
        }
    }

    /// Parse parameters from a JSON document
    pub fn from_json(json: &str) -> Result<Self, SshError> {
        serde_json::from_str(json).map_err(|e| SshError::InvalidParameters(e.to_string()))
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Enable key authentication. `key` is inline key text or `file://<path>`.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = Some(key.into());
        self.use_key = true;
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self.use_passphrase = true;
        self
    }

    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub fn with_known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Password, if one was supplied and is non-empty
    pub fn usable_password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }
}
