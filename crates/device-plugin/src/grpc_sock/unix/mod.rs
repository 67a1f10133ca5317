//! The server half: a bound Unix socket whose accepted connections serve as tonic's incoming
//! stream, with the socket file removed when it is dropped.

// This is a modified version of: https://github.com/hyperium/tonic/blob/f1275b611e38ec5fe992b2f10552bf95e8448b17/examples/src/uds/server.rs

use std::{
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tonic::transport::server::Connected;
use tracing::{debug, warn};

use crate::PluginError;

/// An accepted connection on a [`Socket`]
#[derive(Debug)]
pub struct UnixStream(tokio::net::UnixStream);

/// A `PathBuf` that will get deleted on drop
struct OwnedPathBuf {
    inner: PathBuf,
}

impl Drop for OwnedPathBuf {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.inner) {
            Ok(_) => debug!(path = %self.inner.display(), "Removed socket on drop"),
            Err(e) if matches!(e.kind(), std::io::ErrorKind::NotFound) => (),
            Err(e) => warn!(
                error = %e,
                path = %self.inner.display(),
                "Cleanup of socket failed, manual cleanup needed"
            ),
        }
    }
}

/// A bound Unix listener that yields accepted connections. The socket file is removed when the
/// `Socket` is dropped.
pub struct Socket {
    listener: tokio::net::UnixListener,
    socket_path: OwnedPathBuf,
}

impl Socket {
    /// Binds a listener at `path`, creating the parent directory if needed. Any file already at
    /// `path` is removed first.
    pub fn bind<P: AsRef<Path> + ?Sized>(path: &P) -> Result<Self, PluginError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PluginError::BindFailure {
                path: path.to_owned(),
                source,
            })?;
        }
        super::cleanup(path)?;
        let listener =
            tokio::net::UnixListener::bind(path).map_err(|source| PluginError::BindFailure {
                path: path.to_owned(),
                source,
            })?;
        debug!(path = %path.display(), "Bound plugin socket");
        Ok(Socket {
            listener,
            socket_path: OwnedPathBuf {
                inner: path.to_owned(),
            },
        })
    }

    /// The filesystem path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.socket_path.inner
    }
}

impl Stream for Socket {
    type Item = Result<UnixStream, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.listener).poll_accept(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(res) => Poll::Ready(Some(res.map(|(stream, _)| UnixStream(stream)))),
        }
    }
}

/// Connection info for a [`UnixStream`]. Unix peers carry nothing tonic can use.
#[derive(Clone, Debug)]
pub struct ConnectionData {}

impl Connected for UnixStream {
    type ConnectInfo = ConnectionData;

    fn connect_info(&self) -> Self::ConnectInfo {
        ConnectionData {}
    }
}

impl AsyncRead for UnixStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for UnixStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_replaces_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.sock");
        std::fs::write(&path, b"left over").unwrap();

        let socket = Socket::bind(&path).expect("bind should clean up the stale file");
        assert_eq!(socket.path(), path.as_path());
        tokio::net::UnixStream::connect(&path)
            .await
            .expect("listener should accept connections");
    }

    #[tokio::test]
    async fn drop_removes_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("plugin.sock");
        let socket = Socket::bind(&path).unwrap();
        assert!(path.exists());
        drop(socket);
        assert!(!path.exists());
    }
}
