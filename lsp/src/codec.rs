//! `Content-Length` framing for JSON-RPC over the server's stdio.
//!
//! Each message is `Content-Length: N\r\n\r\n` followed by N bytes of JSON.
//! [`FrameReader`] decodes the server's stdout, [`FrameWriter`] encodes
//! frames onto its stdin.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single frame body (16 MiB). Symbol lists for large
/// generated sources can run to several megabytes.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

pub struct FrameReader<R> {
    reader: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: String::new(),
        }
    }

    /// Read the next frame.
    ///
    /// `Ok(None)` means the stream ended cleanly between frames.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(len) = self.read_header_block().await? else {
            return Ok(None);
        };
        if len > MAX_FRAME_BYTES {
            bail!("frame of {len} bytes exceeds limit of {MAX_FRAME_BYTES}");
        }

        let mut body = vec![0u8; len];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;
        let value = serde_json::from_slice(&body).context("decoding frame body")?;
        Ok(Some(value))
    }

    async fn read_header_block(&mut self) -> Result<Option<usize>> {
        let mut content_length = None;
        let mut started = false;

        loop {
            self.line.clear();
            let n = self
                .reader
                .read_line(&mut self.line)
                .await
                .context("reading frame header")?;
            if n == 0 {
                if started {
                    bail!("stream ended inside a frame header");
                }
                return Ok(None);
            }
            started = true;

            let header = self.line.trim();
            if header.is_empty() {
                break;
            }
            if let Some(len) = parse_content_length(header)? {
                content_length = Some(len);
            }
        }

        content_length
            .map(Some)
            .context("frame header has no Content-Length")
    }
}

/// `Some(len)` for a Content-Length header (case-insensitive name), `None`
/// for any other header.
fn parse_content_length(header: &str) -> Result<Option<usize>> {
    let Some((name, value)) = header.split_once(':') else {
        return Ok(None);
    };
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return Ok(None);
    }
    let len = value
        .trim()
        .parse()
        .with_context(|| format!("invalid Content-Length {:?}", value.trim()))?;
    Ok(Some(len))
}

pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize `message` and write it as one flushed frame.
    pub async fn write_frame<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<()> {
        let body = serde_json::to_vec(message).context("encoding frame body")?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer
            .write_all(header.as_bytes())
            .await
            .context("writing frame header")?;
        self.writer
            .write_all(&body)
            .await
            .context("writing frame body")?;
        self.writer.flush().await.context("flushing frame")?;
        Ok(())
    }
}
