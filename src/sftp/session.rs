//! SFTP Session management
//!
//! Pairs an authenticated russh transport with a russh-sftp session running
//! on an `sftp` subsystem channel of that transport.

use async_trait::async_trait;
use russh::client::Handle;
use russh::ChannelMsg;
use russh_sftp::client::SftpSession as RusshSftpSession;
use tracing::{debug, info, warn};

use super::error::SftpError;
use super::remote::{CommandOutput, RemoteFs, RemoteReader, RemoteWriter};
use crate::ssh::{ClientHandler, SftpParameters, SshClient, SshError};

/// The SSH connection an SFTP channel runs on
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a command on a fresh exec channel and collect its output
    async fn exec(&self, command: &str) -> Result<CommandOutput, SftpError>;

    /// Disconnect the whole connection
    async fn shutdown(&self) -> Result<(), SftpError>;
}

#[async_trait]
impl Transport for Handle<ClientHandler> {
    async fn exec(&self, command: &str) -> Result<CommandOutput, SftpError> {
        let mut channel = self
            .channel_open_session()
            .await
            .map_err(|e| SftpError::Ssh(SshError::ChannelError(e.to_string())))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| SftpError::Ssh(SshError::ChannelError(e.to_string())))?;

        let mut output = CommandOutput::default();

        // ExitStatus may arrive before the last Data message, so drain until the channel closes
        while let Some(msg) = channel.wait().await {
            absorb(&mut output, msg);
        }
        Ok(output)
    }

    async fn shutdown(&self) -> Result<(), SftpError> {
        self.disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| SftpError::Ssh(SshError::from(e)))
    }
}

/// Fold one exec channel message into `output`
fn absorb(output: &mut CommandOutput, msg: ChannelMsg) {
    match msg {
        ChannelMsg::Data { ref data } => output.stdout.extend_from_slice(data),
        // ext 1 is stderr
        ChannelMsg::ExtendedData { ref data, ext: 1 } => output.stderr.extend_from_slice(data),
        ChannelMsg::ExitStatus { exit_status } => output.exit_status = Some(exit_status),
        _ => {}
    }
}

/// A live (transport, SFTP channel) pair
pub struct SshRemote {
    transport: Box<dyn Transport>,
    sftp: RusshSftpSession,
    /// `user@host:port`, for logging
    label: String,
}

impl SshRemote {
    /// Dial, authenticate and open the SFTP subsystem
    pub async fn open(params: &SftpParameters) -> Result<Self, SftpError> {
        let label = format!("{}@{}:{}", params.username, params.host, params.port);
        let handle = SshClient::new(params).connect().await?;

        info!("Opening SFTP subsystem for {}", label);
        let sftp = match open_sftp(&handle).await {
            Ok(sftp) => sftp,
            Err(e) => {
                warn!("SFTP subsystem failed for {}: {}", label, e);
                return Err(match handle.shutdown().await {
                    Ok(()) => e,
                    Err(teardown) => SftpError::Teardown {
                        source: Box::new(e),
                        teardown: Box::new(teardown),
                    },
                });
            }
        };
        info!("SFTP subsystem opened for {}", label);

        Ok(Self::from_parts(handle, sftp, label))
    }

    /// Wrap an already established transport and SFTP session
    pub fn from_parts(
        transport: impl Transport + 'static,
        sftp: RusshSftpSession,
        label: impl Into<String>,
    ) -> Self {
        Self {
            transport: Box::new(transport),
            sftp,
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

async fn open_sftp(handle: &Handle<ClientHandler>) -> Result<RusshSftpSession, SftpError> {
    let channel = handle
        .channel_open_session()
        .await
        .map_err(|e| SftpError::Ssh(SshError::ChannelError(e.to_string())))?;

    channel.request_subsystem(true, "sftp").await.map_err(|e| {
        SftpError::SubsystemNotAvailable(format!("Failed to request SFTP subsystem: {}", e))
    })?;

    RusshSftpSession::new(channel.into_stream())
        .await
        .map_err(|e| SftpError::SubsystemNotAvailable(e.to_string()))
}

/// Combine the outcomes of the two close steps
fn close_outcome(
    label: &str,
    channel: Result<(), SftpError>,
    transport: Result<(), SftpError>,
) -> Result<(), SftpError> {
    let mut errors = Vec::new();

    if let Err(e) = channel {
        warn!("Failed to close SFTP channel for {}: {}", label, e);
        errors.push(e);
    }
    if let Err(e) = transport {
        warn!("Failed to disconnect {}: {}", label, e);
        errors.push(e);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SftpError::Close(errors))
    }
}

#[async_trait]
impl RemoteFs for SshRemote {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, SftpError> {
        debug!("Executing `{}` on {}", command, self.label);
        let output = self.transport.exec(command).await?;
        debug!(
            "`{}` exited with {:?} ({} bytes of output)",
            command,
            output.exit_status,
            output.stdout.len()
        );
        Ok(output)
    }

    async fn open_read(&mut self, path: &str) -> Result<RemoteReader, SftpError> {
        debug!("Opening {} for reading", path);
        let file = self
            .sftp
            .open(path)
            .await
            .map_err(|e| SftpError::from_sftp(e, path))?;
        Ok(Box::pin(file))
    }

    async fn create_write(&mut self, path: &str) -> Result<RemoteWriter, SftpError> {
        debug!("Creating {}", path);
        let file = self
            .sftp
            .create(path)
            .await
            .map_err(|e| SftpError::from_sftp(e, path))?;
        Ok(Box::pin(file))
    }

    async fn mkdir(&mut self, path: &str) -> Result<(), SftpError> {
        info!("Creating directory: {}", path);
        self.sftp
            .create_dir(path)
            .await
            .map_err(|e| SftpError::from_sftp(e, path))
    }

    async fn remove(&mut self, path: &str) -> Result<(), SftpError> {
        info!("Deleting: {}", path);

        // Don't follow links: a link to a directory is removed as a file
        let metadata = self
            .sftp
            .symlink_metadata(path)
            .await
            .map_err(|e| SftpError::from_sftp(e, path))?;

        let result = if metadata.is_dir() {
            self.sftp.remove_dir(path).await
        } else {
            self.sftp.remove_file(path).await
        };
        result.map_err(|e| SftpError::from_sftp(e, path))
    }

    async fn rename(&mut self, old_path: &str, new_path: &str) -> Result<(), SftpError> {
        info!("Renaming {} to {}", old_path, new_path);
        self.sftp
            .rename(old_path, new_path)
            .await
            .map_err(|e| SftpError::from_sftp(e, old_path))
    }

    async fn symlink(&mut self, target_path: &str, link_path: &str) -> Result<(), SftpError> {
        info!("Linking {} -> {}", link_path, target_path);
        // russh-sftp writes its first argument into the first SSH_FXP_SYMLINK
        // field, which OpenSSH's sftp-server reads as the target
        self.sftp
            .symlink(target_path, link_path)
            .await
            .map_err(|e| SftpError::from_sftp(e, link_path))
    }

    async fn close(&mut self) -> Result<(), SftpError> {
        info!("Closing session {}", self.label);
        let channel = self
            .sftp
            .close()
            .await
            .map_err(|e| SftpError::ProtocolError(e.to_string()));
        // Attempted even when the SFTP close failed
        let transport = self.transport.shutdown().await;
        close_outcome(&self.label, channel, transport)
    }
}
