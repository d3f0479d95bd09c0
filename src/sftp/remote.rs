//! The remote side of a session
//!
//! [`RemoteFs`] is everything the facade needs from a live session. The SSH
//! implementation is [`super::session::SshRemote`].

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use super::error::SftpError;

/// Remote file opened for reading
pub type RemoteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Remote file opened for writing
pub type RemoteWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Captured result of a remote command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// None when the channel closed without reporting a status
    pub exit_status: Option<u32>,
}

impl CommandOutput {
    /// Stdout as text if the command exited with status 0
    pub fn into_stdout(self, command: &str) -> Result<String, SftpError> {
        match self.exit_status {
            Some(0) => Ok(String::from_utf8_lossy(&self.stdout).into_owned()),
            exit_status => Err(SftpError::CommandFailed {
                command: command.to_string(),
                exit_status,
                stderr: String::from_utf8_lossy(&self.stderr).trim_end().to_string(),
            }),
        }
    }
}

/// Operations delegated to the transport and SFTP channel of one session
#[async_trait]
pub trait RemoteFs: Send {
    /// Run a command on a fresh exec channel and collect its output
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, SftpError>;

    async fn open_read(&mut self, path: &str) -> Result<RemoteReader, SftpError>;

    /// Create or truncate `path`
    async fn create_write(&mut self, path: &str) -> Result<RemoteWriter, SftpError>;

    async fn mkdir(&mut self, path: &str) -> Result<(), SftpError>;

    /// Remove a file, symlink or empty directory
    async fn remove(&mut self, path: &str) -> Result<(), SftpError>;

    async fn rename(&mut self, old_path: &str, new_path: &str) -> Result<(), SftpError>;

    /// Create `link_path` pointing at `target_path`
    async fn symlink(&mut self, target_path: &str, link_path: &str) -> Result<(), SftpError>;

    /// Close the SFTP channel and the transport, attempting both
    async fn close(&mut self) -> Result<(), SftpError>;
}
