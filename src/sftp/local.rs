//! Local endpoints of a transfer

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWrite};

use super::error::SftpError;

pub type LocalReader = Box<dyn AsyncRead + Unpin + Send>;
pub type LocalWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Where uploaded bytes come from
pub enum LocalSource {
    /// Local file, opened by the client
    Path(PathBuf),
    /// Caller-provided stream, dropped once the transfer ends
    Reader(LocalReader),
}

/// Where downloaded bytes go
pub enum LocalSink {
    /// Local file, created (or truncated) by the client
    Path(PathBuf),
    /// Caller-provided stream, shut down once the transfer ends
    Writer(LocalWriter),
}

impl LocalSource {
    pub fn reader(reader: impl AsyncRead + Unpin + Send + 'static) -> Self {
        Self::Reader(Box::new(reader))
    }

    pub(crate) async fn open(self) -> Result<LocalReader, SftpError> {
        match self {
            Self::Path(path) => match tokio::fs::File::open(&path).await {
                Ok(file) => Ok(Box::new(file)),
                Err(source) => Err(SftpError::LocalIo { path, source }),
            },
            Self::Reader(reader) => Ok(reader),
        }
    }
}

impl LocalSink {
    pub fn writer(writer: impl AsyncWrite + Unpin + Send + 'static) -> Self {
        Self::Writer(Box::new(writer))
    }

    pub(crate) async fn open(self) -> Result<LocalWriter, SftpError> {
        match self {
            Self::Path(path) => match tokio::fs::File::create(&path).await {
                Ok(file) => Ok(Box::new(file)),
                Err(source) => Err(SftpError::LocalIo { path, source }),
            },
            Self::Writer(writer) => Ok(writer),
        }
    }
}

macro_rules! impl_path_conversions {
    ($ty:ident) => {
        impl From<PathBuf> for $ty {
            fn from(path: PathBuf) -> Self {
                Self::Path(path)
            }
        }

        impl From<&Path> for $ty {
            fn from(path: &Path) -> Self {
                Self::Path(path.to_path_buf())
            }
        }

        impl From<&str> for $ty {
            fn from(path: &str) -> Self {
                Self::Path(PathBuf::from(path))
            }
        }

        impl From<String> for $ty {
            fn from(path: String) -> Self {
                Self::Path(PathBuf::from(path))
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
                    _ => f.write_str("Stream"),
                }
            }
        }
    };
}

impl_path_conversions!(LocalSource);
impl_path_conversions!(LocalSink);
