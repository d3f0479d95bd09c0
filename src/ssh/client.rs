//! SSH Client implementation using russh

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::keys::PublicKey;
use tracing::{debug, info, warn};

use super::auth::Credentials;
use super::config::{HostKeyPolicy, SftpParameters};
use super::error::SshError;
use super::known_hosts::{HostKeyVerification, KnownHostsStore};

/// Dials and authenticates an SSH transport
pub struct SshClient<'a> {
    params: &'a SftpParameters,
}

impl<'a> SshClient<'a> {
    pub fn new(params: &'a SftpParameters) -> Self {
        Self { params }
    }

    /// Connect to the SSH server and return an authenticated handle
    pub async fn connect(self) -> Result<Handle<ClientHandler>, SshError> {
        // Key and password problems surface before touching the network
        let credentials = Credentials::from_params(self.params)?;

        let socket_addr = resolve(&self.params.host, self.params.port).await?;
        info!(
            "Connecting to SSH server {}:{} at {}",
            self.params.host, self.params.port, socket_addr
        );

        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: self.params.keepalive_secs.map(Duration::from_secs),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = ClientHandler::for_params(self.params)?;

        let mut handle = tokio::time::timeout(
            Duration::from_secs(self.params.timeout_secs),
            client::connect(Arc::new(ssh_config), socket_addr, handler),
        )
        .await
        .map_err(|_| SshError::Timeout("Connection timed out".to_string()))??;

        debug!("SSH handshake completed");

        if let Err(e) = credentials.authenticate(&mut handle).await {
            if let Err(close_err) = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await
            {
                debug!("Disconnect after failed authentication: {}", close_err);
            }
            return Err(e);
        }

        info!("SSH authentication successful");
        Ok(handle)
    }
}

/// Resolve `host:port` to the first address returned by the resolver
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, SshError> {
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| SshError::Resolve {
            host: host.to_string(),
            reason: e.to_string(),
        })?
        .next()
        .ok_or_else(|| SshError::Resolve {
            host: host.to_string(),
            reason: "No address found".to_string(),
        })
}

/// Client handler for russh callbacks
///
/// Checks the server's host key according to the configured [`HostKeyPolicy`].
pub struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    /// Absent for `AcceptAny`
    known_hosts: Option<KnownHostsStore>,
}

impl ClientHandler {
    pub fn new(
        host: String,
        port: u16,
        policy: HostKeyPolicy,
        known_hosts: Option<KnownHostsStore>,
    ) -> Self {
        Self {
            host,
            port,
            policy,
            known_hosts,
        }
    }

    fn for_params(params: &SftpParameters) -> Result<Self, SshError> {
        let known_hosts = match params.host_key_policy {
            HostKeyPolicy::AcceptAny => None,
            HostKeyPolicy::TrustOnFirstUse | HostKeyPolicy::Strict => {
                let path = params
                    .known_hosts_path
                    .clone()
                    .unwrap_or_else(KnownHostsStore::default_path);
                Some(KnownHostsStore::open(path)?)
            }
        };

        Ok(Self::new(
            params.host.clone(),
            params.port,
            params.host_key_policy,
            known_hosts,
        ))
    }

    fn host_label(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Decide whether `key` is acceptable for this host
    pub fn check_key(&self, key: &PublicKey) -> Result<bool, SshError> {
        let Some(known_hosts) = &self.known_hosts else {
            warn!(
                "Accepting host key for {} without verification (fingerprint: {})",
                self.host_label(),
                KnownHostsStore::fingerprint(key)
            );
            return Ok(true);
        };

        match known_hosts.verify(&self.host, self.port, key) {
            HostKeyVerification::Verified => {
                info!("Host key verified for {}", self.host_label());
                Ok(true)
            }
            HostKeyVerification::Unknown { fingerprint } => match self.policy {
                HostKeyPolicy::Strict => {
                    warn!(
                        "Unknown host key for {} (fingerprint: {}). Strict mode enabled, rejecting.",
                        self.host_label(),
                        fingerprint
                    );
                    Err(SshError::HostKeyUnknown {
                        host: self.host_label(),
                        fingerprint,
                    })
                }
                _ => {
                    info!(
                        "TOFU: Trusting and saving host key for {} (fingerprint: {})",
                        self.host_label(),
                        fingerprint
                    );
                    if let Err(e) = known_hosts.add_host(&self.host, self.port, key) {
                        warn!("Failed to save host key: {}", e);
                    }
                    Ok(true)
                }
            },
            HostKeyVerification::Changed {
                expected_fingerprint,
                actual_fingerprint,
            } => Err(SshError::HostKeyChanged {
                host: self.host_label(),
                expected_fingerprint,
                actual_fingerprint,
            }),
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        self.check_key(server_public_key)
    }
}
