//! Network provider abstraction.
//!
//! A node only ever needs two things from the network: a listener for the
//! channels it accepts and outbound connections for the channels it
//! initiates. Both yield plain byte streams; framing lives in
//! `lockstep-transport`.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

/// Opens the byte streams under neighbor channels.
///
/// Single-core design: no `Send` bounds. `Clone` so every channel worker can
/// hold its own handle.
#[async_trait(?Send)]
pub trait NetworkProvider: Clone {
    /// Byte stream under one channel.
    type Stream: AsyncRead + AsyncWrite + Unpin + 'static;
    /// Listener produced by `bind`.
    type Listener: ChannelListener<Stream = Self::Stream> + 'static;

    /// Bind a listener on `addr` (`host:port`).
    async fn bind(&self, addr: &str) -> io::Result<Self::Listener>;

    /// Open a channel stream to `addr`.
    ///
    /// Fails with [`io::ErrorKind::ConnectionRefused`] when nothing listens
    /// there yet; callers decide whether to retry.
    async fn connect(&self, addr: &str) -> io::Result<Self::Stream>;
}

/// Listener side of a [`NetworkProvider`].
#[async_trait(?Send)]
pub trait ChannelListener {
    /// Byte stream produced for each accepted channel.
    type Stream: AsyncRead + AsyncWrite + Unpin + 'static;

    /// Wait for the next inbound channel, returning it with the remote
    /// address. The remote address is only used for logging; the peer's
    /// node id comes from the handshake.
    async fn accept(&self) -> io::Result<(Self::Stream, String)>;

    /// Address the listener is bound to.
    fn local_addr(&self) -> io::Result<String>;
}

/// Channels over Tokio TCP sockets.
#[derive(Debug, Clone, Default)]
pub struct TokioNetworkProvider;

impl TokioNetworkProvider {
    /// Create a new Tokio network provider.
    pub fn new() -> Self {
        Self
    }
}

/// Socket options for a channel: one small frame per round, no Nagle.
fn prepare_channel(stream: &tokio::net::TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)
}

/// Prefix `error` with the address it concerns.
fn with_address(addr: &str, error: io::Error) -> io::Error {
    io::Error::new(error.kind(), format!("{}: {}", addr, error))
}

#[async_trait(?Send)]
impl NetworkProvider for TokioNetworkProvider {
    type Stream = tokio::net::TcpStream;
    type Listener = TokioChannelListener;

    async fn bind(&self, addr: &str) -> io::Result<Self::Listener> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| with_address(addr, e))?;
        Ok(TokioChannelListener { inner: listener })
    }

    async fn connect(&self, addr: &str) -> io::Result<Self::Stream> {
        let stream = tokio::net::TcpStream::connect(addr)
            .await
            .map_err(|e| with_address(addr, e))?;
        prepare_channel(&stream)?;
        Ok(stream)
    }
}

/// [`ChannelListener`] over a Tokio `TcpListener`.
#[derive(Debug)]
pub struct TokioChannelListener {
    inner: tokio::net::TcpListener,
}

#[async_trait(?Send)]
impl ChannelListener for TokioChannelListener {
    type Stream = tokio::net::TcpStream;

    async fn accept(&self) -> io::Result<(Self::Stream, String)> {
        let (stream, remote) = self.inner.accept().await?;
        prepare_channel(&stream)?;
        Ok((stream, remote.to_string()))
    }

    fn local_addr(&self) -> io::Result<String> {
        Ok(self.inner.local_addr()?.to_string())
    }
}
