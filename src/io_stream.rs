//! A single `AsyncRead + AsyncWrite` type unifying the three states a session's transport socket
//! passes through: plain TCP (used only transiently, before TLS wraps it), client-side TLS, and
//! server-side TLS.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::server::TlsStream as ServerTlsStream;

#[cfg(test)]
use tokio::io::DuplexStream;

/// The transport stream underlying a [`crate::session::Session`], after TLS has (or has not
/// yet) wrapped the raw socket.
pub enum IoStream {
    Tcp(TcpStream),
    ClientTls(Box<ClientTlsStream<TcpStream>>),
    ServerTls(Box<ServerTlsStream<TcpStream>>),
    /// An in-memory duplex pair, for unit tests that exercise `Session` without a real socket.
    #[cfg(test)]
    Duplex(Box<DuplexStream>),
}

impl AsyncRead for IoStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            IoStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            IoStream::ClientTls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
            IoStream::ServerTls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
            #[cfg(test)]
            IoStream::Duplex(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for IoStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            IoStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            IoStream::ClientTls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
            IoStream::ServerTls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
            #[cfg(test)]
            IoStream::Duplex(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            IoStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            IoStream::ClientTls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
            IoStream::ServerTls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
            #[cfg(test)]
            IoStream::Duplex(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            IoStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            IoStream::ClientTls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
            IoStream::ServerTls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
            #[cfg(test)]
            IoStream::Duplex(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

impl From<TcpStream> for IoStream {
    fn from(stream: TcpStream) -> Self {
        IoStream::Tcp(stream)
    }
}

impl From<ClientTlsStream<TcpStream>> for IoStream {
    fn from(stream: ClientTlsStream<TcpStream>) -> Self {
        IoStream::ClientTls(Box::new(stream))
    }
}

impl From<ServerTlsStream<TcpStream>> for IoStream {
    fn from(stream: ServerTlsStream<TcpStream>) -> Self {
        IoStream::ServerTls(Box::new(stream))
    }
}

#[cfg(test)]
impl From<DuplexStream> for IoStream {
    fn from(stream: DuplexStream) -> Self {
        IoStream::Duplex(Box::new(stream))
    }
}
