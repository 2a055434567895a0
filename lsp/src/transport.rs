//! Socket transport to a language server.
//!
//! A [`Transport`] owns both halves of a byte stream and moves whole frames
//! across it. Sessions split it so reading and writing run in separate tasks.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::codec::{FrameReader, FrameWriter};
use crate::error::{LspError, Result};
use crate::types::{ConnectPolicy, Endpoint};

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct Transport {
    peer: String,
    reader: Option<FrameReader<BoxedReader>>,
    writer: Option<FrameWriter<BoxedWriter>>,
}

impl Transport {
    /// Connect to `endpoint`, giving up after `timeout`.
    pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Self> {
        match tokio::time::timeout(timeout, Self::open_stream(endpoint)).await {
            Ok(Ok(transport)) => {
                tracing::debug!(%endpoint, "Connected to language server");
                Ok(transport)
            }
            Ok(Err(e)) => Err(LspError::Connection {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(LspError::Connection {
                endpoint: endpoint.to_string(),
                reason: format!("timed out after {timeout:?}"),
            }),
        }
    }

    /// Connect, retrying failed attempts per `policy`.
    pub async fn connect_with_policy(
        endpoint: &Endpoint,
        timeout: Duration,
        policy: &ConnectPolicy,
    ) -> Result<Self> {
        let attempts = policy.attempts();
        let mut attempt = 1;
        loop {
            match Self::connect(endpoint, timeout).await {
                Ok(transport) => return Ok(transport),
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        attempt,
                        attempts,
                        "{e}; retrying in {:?}",
                        policy.backoff()
                    );
                    tokio::time::sleep(policy.backoff()).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn open_stream(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).await?;
                stream.set_nodelay(true)?;
                let (reader, writer) = stream.into_split();
                Ok(Self::from_io(endpoint.to_string(), reader, writer))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                let (reader, writer) = stream.into_split();
                Ok(Self::from_io(endpoint.to_string(), reader, writer))
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not available on this platform",
            )),
        }
    }

    /// Wrap an already-established stream pair.
    pub fn from_io<R, W>(peer: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            peer: peer.into(),
            reader: Some(FrameReader::new(Box::new(reader))),
            writer: Some(FrameWriter::new(Box::new(writer))),
        }
    }

    /// Human-readable peer description.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Write one framed message.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.write_frame(payload).await,
            None => Err(LspError::SessionClosed),
        }
    }

    /// Wait for the next complete framed message; `None` on clean EOF.
    pub async fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        match self.reader.as_mut() {
            Some(reader) => reader.read_frame().await,
            None => Err(LspError::SessionClosed),
        }
    }

    /// Release the socket. Idempotent.
    pub async fn close(&mut self) {
        self.reader = None;
        if let Some(mut writer) = self.writer.take() {
            writer.close().await;
            tracing::debug!(peer = %self.peer, "Transport closed");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    /// Split into independently owned halves. A closed transport yields
    /// `None`.
    pub(crate) fn into_split(
        self,
    ) -> Option<(FrameReader<BoxedReader>, FrameWriter<BoxedWriter>)> {
        Some((self.reader?, self.writer?))
    }
}
