//! SFTP client module
//!
//! Provides the session facade and the remote operations it delegates to.

mod client;
pub mod error;
pub mod local;
pub mod path_utils;
pub mod remote;
pub mod session;

pub use client::SecureFtp;
pub use error::SftpError;
pub use local::{LocalSink, LocalSource};
pub use remote::{CommandOutput, RemoteFs, RemoteReader, RemoteWriter};
pub use session::{SshRemote, Transport};
