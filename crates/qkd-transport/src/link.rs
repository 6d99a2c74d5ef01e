use crate::endpoint::EndpointSpec;
use qkd_core::error::{QkdError, Result};
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

/// A duplex byte stream to a peer or to the local process's stdio, erased
/// behind a single trait object so stage code does not need to care which
/// endpoint scheme it was configured with.
pub struct Link {
    inner: Pin<Box<dyn AsyncReadWrite + Send>>,
}

trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

impl AsyncRead for Link {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        self.inner.as_mut().poll_read(cx, buf)
    }
}

impl AsyncWrite for Link {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        self.inner.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        self.inner.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        self.inner.as_mut().poll_shutdown(cx)
    }
}

/// Whether this side of the link actively connects or passively listens.
/// By pipeline convention Alice listens and Bob connects, mirroring which
/// side originates a key stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Listen,
    Connect,
}

impl Link {
    /// Wrap an arbitrary duplex stream as a [`Link`]. Used by other crates'
    /// tests to exercise stage logic over an in-memory pipe instead of a
    /// real socket.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Link {
            inner: Box::pin(stream),
        }
    }

    pub fn stdio() -> Self {
        struct Stdio {
            stdin: tokio::io::Stdin,
            stdout: tokio::io::Stdout,
        }
        impl AsyncRead for Stdio {
            fn poll_read(
                mut self: Pin<&mut Self>,
                cx: &mut std::task::Context<'_>,
                buf: &mut ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                Pin::new(&mut self.stdin).poll_read(cx, buf)
            }
        }
        impl AsyncWrite for Stdio {
            fn poll_write(
                mut self: Pin<&mut Self>,
                cx: &mut std::task::Context<'_>,
                buf: &[u8],
            ) -> std::task::Poll<std::io::Result<usize>> {
                Pin::new(&mut self.stdout).poll_write(cx, buf)
            }
            fn poll_flush(
                mut self: Pin<&mut Self>,
                cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                Pin::new(&mut self.stdout).poll_flush(cx)
            }
            fn poll_shutdown(
                mut self: Pin<&mut Self>,
                cx: &mut std::task::Context<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                Pin::new(&mut self.stdout).poll_shutdown(cx)
            }
        }
        Link {
            inner: Box::pin(Stdio {
                stdin: tokio::io::stdin(),
                stdout: tokio::io::stdout(),
            }),
        }
    }

    pub async fn connect(spec: &EndpointSpec, role: LinkRole) -> Result<Self> {
        match (spec, role) {
            (EndpointSpec::Stdin, _) | (EndpointSpec::Stdout, _) => Ok(Link::stdio()),
            (EndpointSpec::Tcp(addr), LinkRole::Connect) => {
                let stream = TcpStream::connect(addr).await?;
                Ok(Link { inner: Box::pin(stream) })
            }
            (EndpointSpec::Tcp(addr), LinkRole::Listen) => {
                let listener = TcpListener::bind(addr).await?;
                let (stream, _peer) = listener.accept().await?;
                Ok(Link { inner: Box::pin(stream) })
            }
            (EndpointSpec::Ipc(path), LinkRole::Connect) => {
                let stream = UnixStream::connect(path).await?;
                Ok(Link { inner: Box::pin(stream) })
            }
            (EndpointSpec::Ipc(path), LinkRole::Listen) => {
                let _ = std::fs::remove_file(path);
                let listener = UnixListener::bind(path)
                    .map_err(|e| QkdError::Other(format!("binding {}: {e}", path.display())))?;
                let (stream, _peer) = listener.accept().await?;
                Ok(Link { inner: Box::pin(stream) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{read_key, write_key};
    use qkd_core::key::Key;
    use qkd_core::types::KeyId;

    #[tokio::test]
    async fn tcp_loopback_carries_a_key() {
        let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(addr).await.unwrap();
        let bound = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut link = Link { inner: Box::pin(stream) };
            let key = read_key(&mut link).await.unwrap();
            assert_eq!(key.id, KeyId(55));
        });

        let mut client = Link::connect(&EndpointSpec::Tcp(bound), LinkRole::Connect)
            .await
            .unwrap();
        write_key(&mut client, &Key::new(KeyId(55), vec![1, 2])).await.unwrap();
        server.await.unwrap();
    }
}
