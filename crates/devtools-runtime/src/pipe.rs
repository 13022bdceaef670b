//! Platform pipe transport: Unix domain sockets or Windows named pipes.
//!
//! Binding is exclusive — a second bind on a held name fails with
//! [`Error::AddrInUse`] — which is what the role arbiter races on.

use crate::{Error, Result};
use std::path::Path;

#[cfg(unix)]
pub use unix_impl::{connect, PipeListener, PipeStream};
#[cfg(windows)]
pub use windows_impl::{connect, PipeListener, PipeStream};

/// True when something is currently accepting connections on the pipe name.
pub async fn is_bound(path: &Path) -> bool {
    connect(path).await.is_ok()
}

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::path::PathBuf;
    use tokio::net::{UnixListener, UnixStream};

    pub type PipeStream = UnixStream;

    #[derive(Debug)]
    pub struct PipeListener {
        inner: UnixListener,
        path: PathBuf,
    }

    impl PipeListener {
        /// Bind the pipe name, claiming it exclusively.
        ///
        /// A socket file may be left over from a crashed process. Probe it
        /// with a connect: a live listener answers (the name is held), a
        /// stale file refuses and is removed before binding.
        pub async fn bind(path: &Path) -> Result<Self> {
            if path.exists() {
                match UnixStream::connect(path).await {
                    Ok(_) => return Err(Error::AddrInUse(path.to_path_buf())),
                    Err(_) => {
                        let _ = std::fs::remove_file(path);
                    }
                }
            }
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match UnixListener::bind(path) {
                Ok(inner) => Ok(Self {
                    inner,
                    path: path.to_path_buf(),
                }),
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    Err(Error::AddrInUse(path.to_path_buf()))
                }
                Err(e) => Err(e.into()),
            }
        }

        pub async fn accept(&mut self) -> Result<PipeStream> {
            let (stream, _addr) = self.inner.accept().await?;
            Ok(stream)
        }
    }

    impl Drop for PipeListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    pub async fn connect(path: &Path) -> Result<PipeStream> {
        Ok(UnixStream::connect(path).await?)
    }
}

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    // Creating a first instance of a name that is already served fails with
    // ERROR_ACCESS_DENIED rather than an address-in-use kind.
    const ERROR_ACCESS_DENIED: i32 = 5;
    const ERROR_PIPE_BUSY: i32 = 231;

    pub struct PipeListener {
        path: String,
        next: Option<NamedPipeServer>,
    }

    impl PipeListener {
        pub async fn bind(path: &Path) -> Result<Self> {
            let path = path.to_string_lossy().into_owned();
            let first = ServerOptions::new()
                .first_pipe_instance(true)
                .create(&path)
                .map_err(|e| {
                    if e.raw_os_error() == Some(ERROR_ACCESS_DENIED) {
                        Error::AddrInUse(path.clone().into())
                    } else {
                        Error::Io(e)
                    }
                })?;
            Ok(Self {
                path,
                next: Some(first),
            })
        }

        pub async fn accept(&mut self) -> Result<PipeStream> {
            let server = match self.next.take() {
                Some(s) => s,
                None => ServerOptions::new().create(&self.path)?,
            };
            server.connect().await?;
            // Pre-create the next instance so the name stays held while the
            // accepted connection is being served.
            self.next = Some(ServerOptions::new().create(&self.path)?);
            Ok(PipeStream::Server(server))
        }
    }

    pub enum PipeStream {
        Server(NamedPipeServer),
        Client(NamedPipeClient),
    }

    impl AsyncRead for PipeStream {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.get_mut() {
                PipeStream::Server(s) => Pin::new(s).poll_read(cx, buf),
                PipeStream::Client(c) => Pin::new(c).poll_read(cx, buf),
            }
        }
    }

    impl AsyncWrite for PipeStream {
        fn poll_write(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            match self.get_mut() {
                PipeStream::Server(s) => Pin::new(s).poll_write(cx, buf),
                PipeStream::Client(c) => Pin::new(c).poll_write(cx, buf),
            }
        }

        fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            match self.get_mut() {
                PipeStream::Server(s) => Pin::new(s).poll_flush(cx),
                PipeStream::Client(c) => Pin::new(c).poll_flush(cx),
            }
        }

        fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            match self.get_mut() {
                PipeStream::Server(s) => Pin::new(s).poll_shutdown(cx),
                PipeStream::Client(c) => Pin::new(c).poll_shutdown(cx),
            }
        }
    }

    pub async fn connect(path: &Path) -> Result<PipeStream> {
        let path = path.to_string_lossy().into_owned();
        match ClientOptions::new().open(&path) {
            Ok(client) => Ok(PipeStream::Client(client)),
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                // All instances busy; one short retry after the canonical wait.
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                Ok(PipeStream::Client(ClientOptions::new().open(&path)?))
            }
            Err(e) => Err(e.into()),
        }
    }
}
