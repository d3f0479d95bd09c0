//! sftps - A session-oriented SFTP client
//!
//! Built on russh and russh-sftp. A [`SecureFtp`] authenticates once, then
//! forwards listing, transfer and filesystem calls to the remote host:
//!
//! ```no_run
//! use sftps::{SecureFtp, SftpParameters};
//!
//! # async fn run() -> Result<(), sftps::SftpError> {
//! let params = SftpParameters::new("files.example.com", 22, "deploy")
//!     .with_key("file://~/.ssh/id_ed25519");
//! let mut client = SecureFtp::new(params);
//! client.connect().await?;
//! client.upload("build/app.tar.gz", "/srv/releases/app.tar.gz").await?;
//! println!("{}", client.list("/srv/releases").await?);
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

pub mod sftp;
pub mod ssh;

pub use sftp::{LocalSink, LocalSource, RemoteFs, SecureFtp, SftpError};
pub use ssh::{HostKeyPolicy, SftpParameters, SshError};
