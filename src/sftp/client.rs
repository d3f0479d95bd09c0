//! The session facade
//!
//! [`SecureFtp`] holds connection parameters, lazily establishes the SSH
//! transport and SFTP channel, and forwards each operation to them. Any
//! failing operation tears the whole session down; a closed facade cannot
//! be reconnected.

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::error::SftpError;
use super::local::{LocalReader, LocalSink, LocalSource, LocalWriter};
use super::path_utils::list_command;
use super::remote::RemoteFs;
use super::session::SshRemote;
use crate::ssh::SftpParameters;

/// unconnected -> connected -> closed
enum SessionState {
    Unconnected,
    Connected(Box<dyn RemoteFs>),
    Closed,
}

/// Session-oriented SFTP client
pub struct SecureFtp {
    params: SftpParameters,
    state: SessionState,
}

impl SecureFtp {
    pub fn new(params: SftpParameters) -> Self {
        Self {
            params,
            state: SessionState::Unconnected,
        }
    }

    /// A facade already connected through `remote`
    pub fn with_remote(params: SftpParameters, remote: impl RemoteFs + 'static) -> Self {
        Self {
            params,
            state: SessionState::Connected(Box::new(remote)),
        }
    }

    pub fn params(&self) -> &SftpParameters {
        &self.params
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed)
    }

    /// Dial, authenticate and open the SFTP channel.
    ///
    /// A failed connect leaves the facade unconnected; nothing needs closing.
    pub async fn connect(&mut self) -> Result<(), SftpError> {
        match self.state {
            SessionState::Connected(_) => return Err(SftpError::AlreadyConnected),
            SessionState::Closed => return Err(SftpError::SessionClosed),
            SessionState::Unconnected => {}
        }

        let remote = SshRemote::open(&self.params).await?;
        info!("Session established: {}", remote.label());
        self.state = SessionState::Connected(Box::new(remote));
        Ok(())
    }

    /// `ls -al <path>` on the remote shell, returned verbatim
    pub async fn list(&mut self, path: &str) -> Result<String, SftpError> {
        let command = list_command(path);
        let result = self
            .remote()?
            .exec(&command)
            .await
            .and_then(|output| output.into_stdout(&command));
        self.check(result).await
    }

    /// Copy `remote_path` into `destination`, returning the byte count
    pub async fn download(
        &mut self,
        destination: impl Into<LocalSink>,
        remote_path: &str,
    ) -> Result<u64, SftpError> {
        let destination = destination.into();
        self.remote()?;
        debug!("Downloading {} to {:?}", remote_path, destination);

        let result = match destination.open().await {
            Ok(mut sink) => copy_from_remote(self.remote()?, &mut sink, remote_path).await,
            Err(e) => Err(e),
        };
        let bytes = self.check(result).await?;

        info!("Downloaded {} ({} bytes)", remote_path, bytes);
        Ok(bytes)
    }

    /// Copy `source` into `remote_path` (created or truncated), returning the byte count
    pub async fn upload(
        &mut self,
        source: impl Into<LocalSource>,
        remote_path: &str,
    ) -> Result<u64, SftpError> {
        let source = source.into();
        self.remote()?;
        debug!("Uploading {:?} to {}", source, remote_path);

        let result = match source.open().await {
            Ok(mut reader) => copy_to_remote(self.remote()?, &mut reader, remote_path).await,
            Err(e) => Err(e),
        };
        let bytes = self.check(result).await?;

        info!("Uploaded {} ({} bytes)", remote_path, bytes);
        Ok(bytes)
    }

    pub async fn mkdir(&mut self, path: &str) -> Result<(), SftpError> {
        let result = self.remote()?.mkdir(path).await;
        self.check(result).await
    }

    /// Remove a file, symlink or empty directory
    pub async fn remove(&mut self, path: &str) -> Result<(), SftpError> {
        let result = self.remote()?.remove(path).await;
        self.check(result).await
    }

    pub async fn rename(&mut self, old_path: &str, new_path: &str) -> Result<(), SftpError> {
        let result = self.remote()?.rename(old_path, new_path).await;
        self.check(result).await
    }

    /// Create `link_path` pointing at `target_path`
    pub async fn symlink(&mut self, target_path: &str, link_path: &str) -> Result<(), SftpError> {
        let result = self.remote()?.symlink(target_path, link_path).await;
        self.check(result).await
    }

    /// Close the SFTP channel and the transport.
    ///
    /// Both are attempted even if the first fails; failures come back together
    /// as [`SftpError::Close`]. The facade is closed afterwards regardless.
    pub async fn quit(&mut self) -> Result<(), SftpError> {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Connected(mut remote) => remote.close().await,
            SessionState::Unconnected | SessionState::Closed => Ok(()),
        }
    }

    fn remote(&mut self) -> Result<&mut dyn RemoteFs, SftpError> {
        match &mut self.state {
            SessionState::Connected(remote) => Ok(remote.as_mut()),
            SessionState::Unconnected => Err(SftpError::NotConnected),
            SessionState::Closed => Err(SftpError::SessionClosed),
        }
    }

    /// Pass `result` through, tearing the session down on error
    async fn check<T>(&mut self, result: Result<T, SftpError>) -> Result<T, SftpError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => Err(self.teardown(e).await),
        }
    }

    async fn teardown(&mut self, err: SftpError) -> SftpError {
        warn!("Operation failed, closing session: {}", err);
        match self.quit().await {
            Ok(()) => err,
            Err(teardown) => SftpError::Teardown {
                source: Box::new(err),
                teardown: Box::new(teardown),
            },
        }
    }
}

async fn copy_from_remote(
    remote: &mut dyn RemoteFs,
    sink: &mut LocalWriter,
    remote_path: &str,
) -> Result<u64, SftpError> {
    let mut reader = remote.open_read(remote_path).await?;
    let transfer_err = |source| SftpError::Transfer {
        path: remote_path.to_string(),
        source,
    };

    let bytes = tokio::io::copy(&mut reader, sink)
        .await
        .map_err(transfer_err)?;
    sink.shutdown().await.map_err(transfer_err)?;
    Ok(bytes)
}

async fn copy_to_remote(
    remote: &mut dyn RemoteFs,
    reader: &mut LocalReader,
    remote_path: &str,
) -> Result<u64, SftpError> {
    let mut writer = remote.create_write(remote_path).await?;
    let transfer_err = |source| SftpError::Transfer {
        path: remote_path.to_string(),
        source,
    };

    let bytes = tokio::io::copy(reader, &mut writer)
        .await
        .map_err(transfer_err)?;
    // Closes the remote handle
    writer.shutdown().await.map_err(transfer_err)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp::remote::{CommandOutput, RemoteReader, RemoteWriter};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, BTreeSet};
    use std::io;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tokio::io::AsyncWrite;

    #[derive(Default)]
    struct MemState {
        files: BTreeMap<String, Vec<u8>>,
        dirs: BTreeSet<String>,
        links: BTreeMap<String, String>,
        closed: bool,
        fail_close: bool,
    }

    /// In-memory remote filesystem; `/` always exists
    #[derive(Clone, Default)]
    struct MemRemote {
        state: Arc<Mutex<MemState>>,
    }

    fn parent(path: &str) -> String {
        match path.trim_end_matches('/').rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => path[..idx].to_string(),
        }
    }

    fn name(path: &str) -> &str {
        path.rsplit('/').next().unwrap_or(path)
    }

    impl MemState {
        fn is_dir(&self, path: &str) -> bool {
            path == "/" || self.dirs.contains(path)
        }

        fn exists(&self, path: &str) -> bool {
            self.is_dir(path) || self.files.contains_key(path) || self.links.contains_key(path)
        }

        fn require_parent(&self, path: &str) -> Result<(), SftpError> {
            if self.is_dir(&parent(path)) {
                Ok(())
            } else {
                Err(SftpError::FileNotFound(path.to_string()))
            }
        }

        fn exists_under(&self, dir: &str) -> bool {
            self.dirs.iter().any(|d| parent(d) == dir)
                || self.files.keys().any(|f| parent(f) == dir)
                || self.links.keys().any(|l| parent(l) == dir)
        }
    }

    struct MemWriter {
        path: String,
        state: Arc<Mutex<MemState>>,
    }

    impl AsyncWrite for MemWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.state
                .lock()
                .files
                .entry(self.path.clone())
                .or_default()
                .extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[async_trait]
    impl RemoteFs for MemRemote {
        async fn exec(&mut self, command: &str) -> Result<CommandOutput, SftpError> {
            let state = self.state.lock();
            let dir = command
                .strip_prefix("ls -al '")
                .and_then(|rest| rest.strip_suffix('\''))
                .unwrap_or_default()
                .trim_end_matches('/');
            let dir = if dir.is_empty() { "/" } else { dir };

            if !state.is_dir(dir) {
                return Ok(CommandOutput {
                    stdout: Vec::new(),
                    stderr: format!("ls: cannot access '{}': No such file or directory\n", dir)
                        .into_bytes(),
                    exit_status: Some(2),
                });
            }

            let mut listing = String::from("total 0\n");
            listing.push_str("drwxr-xr-x 2 user user 4096 Jan  1 00:00 .\n");
            listing.push_str("drwxr-xr-x 2 user user 4096 Jan  1 00:00 ..\n");
            for d in state.dirs.iter().filter(|d| parent(d) == dir) {
                listing.push_str(&format!(
                    "drwxr-xr-x 2 user user 4096 Jan  1 00:00 {}\n",
                    name(d)
                ));
            }
            for (f, data) in state.files.iter().filter(|(f, _)| parent(f) == dir) {
                listing.push_str(&format!(
                    "-rw-r--r-- 1 user user {} Jan  1 00:00 {}\n",
                    data.len(),
                    name(f)
                ));
            }
            for (l, target) in state.links.iter().filter(|(l, _)| parent(l) == dir) {
                listing.push_str(&format!(
                    "lrwxrwxrwx 1 user user 0 Jan  1 00:00 {} -> {}\n",
                    name(l),
                    target
                ));
            }

            Ok(CommandOutput {
                stdout: listing.into_bytes(),
                stderr: Vec::new(),
                exit_status: Some(0),
            })
        }

        async fn open_read(&mut self, path: &str) -> Result<RemoteReader, SftpError> {
            let data = self
                .state
                .lock()
                .files
                .get(path)
                .cloned()
                .ok_or_else(|| SftpError::FileNotFound(path.to_string()))?;
            Ok(Box::pin(std::io::Cursor::new(data)))
        }

        async fn create_write(&mut self, path: &str) -> Result<RemoteWriter, SftpError> {
            let mut state = self.state.lock();
            state.require_parent(path)?;
            state.files.insert(path.to_string(), Vec::new());
            Ok(Box::pin(MemWriter {
                path: path.to_string(),
                state: self.state.clone(),
            }))
        }

        async fn mkdir(&mut self, path: &str) -> Result<(), SftpError> {
            let mut state = self.state.lock();
            state.require_parent(path)?;
            if state.exists(path) {
                return Err(SftpError::ProtocolError(format!("{}: Failure", path)));
            }
            state.dirs.insert(path.to_string());
            Ok(())
        }

        async fn remove(&mut self, path: &str) -> Result<(), SftpError> {
            let mut state = self.state.lock();
            if state.files.remove(path).is_some() || state.links.remove(path).is_some() {
                return Ok(());
            }
            if !state.dirs.contains(path) {
                return Err(SftpError::FileNotFound(path.to_string()));
            }
            let occupied = state.exists_under(path);
            if occupied {
                return Err(SftpError::ProtocolError(format!("{}: Failure", path)));
            }
            state.dirs.remove(path);
            Ok(())
        }

        async fn rename(&mut self, old_path: &str, new_path: &str) -> Result<(), SftpError> {
            let mut state = self.state.lock();
            state.require_parent(new_path)?;
            if let Some(data) = state.files.remove(old_path) {
                state.files.insert(new_path.to_string(), data);
            } else if state.dirs.remove(old_path) {
                state.dirs.insert(new_path.to_string());
            } else if let Some(target) = state.links.remove(old_path) {
                state.links.insert(new_path.to_string(), target);
            } else {
                return Err(SftpError::FileNotFound(old_path.to_string()));
            }
            Ok(())
        }

        async fn symlink(&mut self, target_path: &str, link_path: &str) -> Result<(), SftpError> {
            let mut state = self.state.lock();
            state.require_parent(link_path)?;
            if state.exists(link_path) {
                return Err(SftpError::ProtocolError(format!("{}: Failure", link_path)));
            }
            state
                .links
                .insert(link_path.to_string(), target_path.to_string());
            Ok(())
        }

        async fn close(&mut self) -> Result<(), SftpError> {
            let mut state = self.state.lock();
            state.closed = true;
            if state.fail_close {
                Err(SftpError::Close(vec![SftpError::ProtocolError(
                    "channel already closed".to_string(),
                )]))
            } else {
                Ok(())
            }
        }
    }

    fn params() -> SftpParameters {
        SftpParameters::new("sftp.example.com", 22, "tester").with_password("secret")
    }

    fn connected() -> (SecureFtp, MemRemote) {
        let remote = MemRemote::default();
        (SecureFtp::with_remote(params(), remote.clone()), remote)
    }

    #[tokio::test]
    async fn test_operations_before_connect() {
        let mut client = SecureFtp::new(params());
        assert!(!client.is_connected());
        assert!(matches!(client.list("/").await, Err(SftpError::NotConnected)));
        assert!(matches!(client.mkdir("/x").await, Err(SftpError::NotConnected)));
        assert!(matches!(
            client.download("/tmp/never-created", "/x").await,
            Err(SftpError::NotConnected)
        ));
        // Nothing open: quit is a no-op
        client.quit().await.unwrap();
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_download_before_connect_leaves_no_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let mut client = SecureFtp::new(params());
        assert!(client.download(target.clone(), "/remote").await.is_err());
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_upload_download_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.bin");
        let target = dir.path().join("target.bin");
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&source, &payload).unwrap();

        let (mut client, _remote) = connected();
        let up = client.upload(source.as_path(), "/data.bin").await.unwrap();
        let down = client.download(target.as_path(), "/data.bin").await.unwrap();

        assert_eq!(up, payload.len() as u64);
        assert_eq!(down, payload.len() as u64);
        assert_eq!(std::fs::read(&target).unwrap(), payload);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_stream_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("streamed.txt");

        let (mut client, remote) = connected();
        let up = client
            .upload(LocalSource::reader(&b"hello over sftp"[..]), "/greeting.txt")
            .await
            .unwrap();
        assert_eq!(up, 15);
        assert_eq!(
            remote.state.lock().files.get("/greeting.txt").map(Vec::as_slice),
            Some(&b"hello over sftp"[..])
        );

        let file = tokio::fs::File::create(&target).await.unwrap();
        let down = client
            .download(LocalSink::writer(file), "/greeting.txt")
            .await
            .unwrap();
        assert_eq!(down, 15);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello over sftp");
    }

    #[tokio::test]
    async fn test_upload_truncates_existing() {
        let (mut client, remote) = connected();
        client
            .upload(LocalSource::reader(&b"a much longer first version"[..]), "/f")
            .await
            .unwrap();
        client
            .upload(LocalSource::reader(&b"short"[..]), "/f")
            .await
            .unwrap();
        assert_eq!(remote.state.lock().files["/f"], b"short");
    }

    #[tokio::test]
    async fn test_list_shows_files_and_dirs() {
        let (mut client, _remote) = connected();
        client.mkdir("/work").await.unwrap();
        client.mkdir("/work/b").await.unwrap();
        client
            .upload(LocalSource::reader(&b"x"[..]), "/work/a.txt")
            .await
            .unwrap();

        let listing = client.list("/work").await.unwrap();
        assert!(listing.contains("a.txt"));
        assert!(listing.lines().any(|l| l.starts_with('d') && l.ends_with(" b")));
    }

    #[tokio::test]
    async fn test_rename_then_list() {
        let (mut client, _remote) = connected();
        client.mkdir("/dir").await.unwrap();
        client
            .upload(LocalSource::reader(&b"x"[..]), "/dir/old.txt")
            .await
            .unwrap();
        client.rename("/dir/old.txt", "/dir/new.txt").await.unwrap();

        let listing = client.list("/dir").await.unwrap();
        assert!(listing.contains("new.txt"));
        assert!(!listing.contains("old.txt"));
    }

    #[tokio::test]
    async fn test_symlink_listed() {
        let (mut client, remote) = connected();
        client
            .upload(LocalSource::reader(&b"x"[..]), "/target.txt")
            .await
            .unwrap();
        client.symlink("/target.txt", "/link.txt").await.unwrap();

        assert_eq!(
            remote.state.lock().links.get("/link.txt").map(String::as_str),
            Some("/target.txt")
        );
        assert!(client.list("/").await.unwrap().contains("link.txt -> /target.txt"));
    }

    #[tokio::test]
    async fn test_remove_then_download_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, remote) = connected();
        client
            .upload(LocalSource::reader(&b"x"[..]), "/gone.txt")
            .await
            .unwrap();
        client.remove("/gone.txt").await.unwrap();

        let err = client
            .download(dir.path().join("gone.txt"), "/gone.txt")
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        // The failed download tore the session down
        assert!(remote.state.lock().closed);
        assert!(client.is_closed());
        assert!(matches!(client.list("/").await, Err(SftpError::SessionClosed)));
    }

    #[tokio::test]
    async fn test_failure_tears_down_session() {
        let (mut client, remote) = connected();
        let err = client
            .upload(LocalSource::reader(&b"x"[..]), "/missing/parent/file.txt")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(remote.state.lock().closed);

        assert!(matches!(
            client.mkdir("/anything").await,
            Err(SftpError::SessionClosed)
        ));
        assert!(matches!(client.connect().await, Err(SftpError::SessionClosed)));
    }

    #[tokio::test]
    async fn test_list_failure_tears_down() {
        let (mut client, remote) = connected();
        let err = client.list("/does/not/exist").await.unwrap_err();
        assert!(matches!(
            err,
            SftpError::CommandFailed {
                exit_status: Some(2),
                ..
            }
        ));
        assert!(remote.state.lock().closed);
    }

    #[tokio::test]
    async fn test_local_open_failure_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let (mut client, remote) = connected();
        let err = client
            .upload(dir.path().join("absent.bin"), "/x")
            .await
            .unwrap_err();
        assert!(matches!(err, SftpError::LocalIo { .. }));
        assert!(remote.state.lock().closed);
        assert!(!remote.state.lock().files.contains_key("/x"));
    }

    #[tokio::test]
    async fn test_teardown_failure_is_returned_not_raised() {
        let (mut client, remote) = connected();
        remote.state.lock().fail_close = true;

        // mkdir into a missing parent fails, and so does the close that follows
        let err = client.mkdir("/no/such/dir").await.unwrap_err();
        match &err {
            SftpError::Teardown { source, teardown } => {
                assert!(matches!(**source, SftpError::FileNotFound(_)));
                assert!(matches!(**teardown, SftpError::Close(_)));
            }
            other => panic!("expected Teardown, got {:?}", other),
        }
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_remove_non_empty_dir_fails() {
        let (mut client, _remote) = connected();
        client.mkdir("/full").await.unwrap();
        client.mkdir("/full/inner").await.unwrap();
        assert!(client.remove("/full").await.is_err());
    }

    #[tokio::test]
    async fn test_quit_is_terminal_and_idempotent() {
        let (mut client, remote) = connected();
        client.quit().await.unwrap();
        assert!(remote.state.lock().closed);
        client.quit().await.unwrap();
        assert!(matches!(client.connect().await, Err(SftpError::SessionClosed)));
    }

    #[tokio::test]
    async fn test_quit_reports_close_errors() {
        let (mut client, remote) = connected();
        remote.state.lock().fail_close = true;
        assert!(matches!(client.quit().await, Err(SftpError::Close(_))));
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_connect_when_connected() {
        let (mut client, _remote) = connected();
        assert!(matches!(client.connect().await, Err(SftpError::AlreadyConnected)));
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_connect_failure_then_quit() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let params = SftpParameters::new("127.0.0.1", port, "tester")
            .with_password("secret")
            .with_host_key_policy(crate::ssh::HostKeyPolicy::AcceptAny)
            .with_timeout_secs(5);
        let mut client = SecureFtp::new(params);
        assert!(client.connect().await.is_err());
        assert!(!client.is_connected());
        client.quit().await.unwrap();
    }
}
