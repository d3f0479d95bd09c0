//! SFTP Error types

use std::path::PathBuf;

use russh_sftp::client::error::Error as SftpErrorInner;
use russh_sftp::protocol::StatusCode;
use thiserror::Error;

use crate::ssh::SshError;

#[derive(Error, Debug)]
pub enum SftpError {
    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error("SFTP subsystem not available: {0}")]
    SubsystemNotAvailable(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Session already connected")]
    AlreadyConnected,

    #[error("Session closed; create a new client to reconnect")]
    SessionClosed,

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("SFTP protocol error: {0}")]
    ProtocolError(String),

    #[error("Command `{command}` failed (exit status {exit_status:?}): {stderr}")]
    CommandFailed {
        command: String,
        exit_status: Option<u32>,
        stderr: String,
    },

    #[error("Local file {path:?}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transfer of {path} failed: {source}")]
    Transfer {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{source}; session teardown also failed: {teardown}")]
    Teardown {
        source: Box<SftpError>,
        teardown: Box<SftpError>,
    },

    #[error("Failed to close session: {}", join_errors(.0))]
    Close(Vec<SftpError>),
}

fn join_errors(errors: &[SftpError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl SftpError {
    /// Map a russh-sftp error for an operation on `path`
    pub fn from_sftp(err: SftpErrorInner, path: &str) -> Self {
        match &err {
            SftpErrorInner::Status(status) => match status.status_code {
                StatusCode::NoSuchFile => SftpError::FileNotFound(path.to_string()),
                StatusCode::PermissionDenied => SftpError::PermissionDenied(path.to_string()),
                _ => SftpError::ProtocolError(format!("{}: {}", path, err)),
            },
            _ => SftpError::ProtocolError(format!("{}: {}", path, err)),
        }
    }

    /// Whether this error means the remote path does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            SftpError::FileNotFound(_) => true,
            SftpError::Teardown { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// The error that caused a teardown, or `self`
    pub fn primary(&self) -> &SftpError {
        match self {
            SftpError::Teardown { source, .. } => source.primary(),
            other => other,
        }
    }
}
