//! Content-Length framing for LSP messages.
//!
//! Every message on the wire is `Content-Length: N\r\n\r\n` followed by
//! exactly `N` bytes of JSON. [`FrameReader`] and [`FrameWriter`] move whole
//! frames across any async byte stream; JSON decoding happens one layer up so
//! a bad payload doesn't desynchronize the stream.

use std::io::ErrorKind;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{LspError, Result};

/// Maximum frame size (4 MiB) to prevent unbounded memory allocation.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Reads framed payloads from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame body.
    ///
    /// Returns `Ok(None)` on EOF between frames (clean shutdown).
    /// Malformed headers, oversized frames and truncated bodies are
    /// [`LspError::Protocol`]; failures of the stream itself are
    /// [`LspError::Io`].
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let content_length = match self.read_headers().await? {
            Some(len) => len,
            None => return Ok(None),
        };

        if content_length > MAX_FRAME_BYTES {
            return Err(LspError::protocol(format!(
                "Content-Length {content_length} exceeds maximum {MAX_FRAME_BYTES}"
            )));
        }

        let mut body = vec![0u8; content_length];
        match self.reader.read_exact(&mut body).await {
            Ok(_) => Ok(Some(body)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(LspError::protocol(format!(
                "stream closed before {content_length} body bytes arrived"
            ))),
            Err(e) => Err(LspError::Io(e)),
        }
    }

    /// Parse headers until the empty line separator.
    ///
    /// Returns the `Content-Length` value, or `None` on EOF.
    async fn read_headers(&mut self) -> Result<Option<usize>> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = match self.reader.read_line(&mut line).await {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    return Err(LspError::protocol("header is not valid UTF-8"));
                }
                Err(e) => return Err(LspError::Io(e)),
            };

            if bytes_read == 0 {
                // EOF is only clean before the first header byte of a frame.
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                return Err(LspError::protocol("unexpected EOF while reading headers"));
            }
            saw_any_header_bytes = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            let Some((key, value)) = trimmed.split_once(':') else {
                return Err(LspError::protocol(format!(
                    "malformed header line: {trimmed:?}"
                )));
            };
            if key.trim().eq_ignore_ascii_case("Content-Length") {
                let len = value.trim().parse::<usize>().map_err(|_| {
                    LspError::protocol(format!("invalid Content-Length value: {:?}", value.trim()))
                })?;
                content_length = Some(len);
            }
            // Other headers (Content-Type) carry nothing we need.
        }

        match content_length {
            Some(len) => Ok(Some(len)),
            None => Err(LspError::protocol("missing Content-Length header")),
        }
    }
}

/// Writes framed payloads to an async writer.
pub struct FrameWriter<W> {
    writer: W,
    closed: bool,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            closed: false,
        }
    }

    /// Write one frame: header, then exactly `payload.len()` bytes.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        if self.closed {
            return Err(LspError::SessionClosed);
        }
        let header = format!("Content-Length: {}\r\n\r\n", payload.len());

        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(payload).await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// Serialize `msg` and write it as one frame.
    pub async fn write_json(&mut self, msg: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(msg)
            .map_err(|e| LspError::protocol(format!("serializing message: {e}")))?;
        self.write_frame(&body).await
    }

    /// Shut down the write side. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!("Ignoring error while closing transport writer: {e}");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
