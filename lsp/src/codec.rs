//! `Content-Length` framing for JSON-RPC over stdio.
//!
//! Each message is `Content-Length: N\r\n\r\n{json}`. [`FrameReader`] and
//! [`FrameWriter`] wrap the server's stdout and stdin respectively.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::CodecError;

/// Upper bound on a single frame body (4 MiB).
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Reads framed JSON-RPC messages.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next message.
    ///
    /// `Ok(None)` means the stream closed cleanly between frames.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, CodecError> {
        let Some(length) = self.read_content_length().await? else {
            return Ok(None);
        };

        if length > MAX_FRAME_BYTES {
            return Err(CodecError::FrameTooLarge {
                length,
                max: MAX_FRAME_BYTES,
            });
        }

        let mut body = vec![0u8; length];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(CodecError::Body)?;

        serde_json::from_slice(&body)
            .map(Some)
            .map_err(CodecError::Json)
    }

    async fn read_content_length(&mut self) -> Result<Option<usize>, CodecError> {
        let mut length = None;
        let mut line = String::new();
        let mut started = false;

        loop {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(CodecError::Header)?;

            if n == 0 {
                // A partial header block is a truncated frame, not a clean close.
                if started {
                    return Err(CodecError::TruncatedHeaders);
                }
                return Ok(None);
            }
            started = true;

            let header = line.trim();
            if header.is_empty() {
                break;
            }

            let Some((name, value)) = header.split_once(':') else {
                continue;
            };
            if name.trim().eq_ignore_ascii_case("Content-Length") {
                let parsed = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| CodecError::InvalidLength(value.trim().to_string()))?;
                length = Some(parsed);
            }
        }

        length.map(Some).ok_or(CodecError::MissingLength)
    }
}

/// Writes framed JSON-RPC messages.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize `message`, prefix it with its byte length and flush.
    pub async fn write_frame(&mut self, message: &serde_json::Value) -> Result<(), CodecError> {
        let body = serde_json::to_vec(message).map_err(CodecError::Json)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer
            .write_all(header.as_bytes())
            .await
            .map_err(CodecError::Write)?;
        self.writer
            .write_all(&body)
            .await
            .map_err(CodecError::Write)?;
        self.writer.flush().await.map_err(CodecError::Write)
    }

    /// Close the underlying stream so the server sees EOF on stdin.
    pub async fn close(&mut self) -> Result<(), CodecError> {
        self.writer.shutdown().await.map_err(CodecError::Write)
    }
}
