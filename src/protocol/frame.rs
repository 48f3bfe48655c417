//! Length-prefixed wire frames
//!
//! Frame format:
//! ```text
//! +----------------+------------------+
//! | length         | payload          |
//! | (N bytes, BE)  | (UTF-8, variable)|
//! +----------------+------------------+
//! ```
//!
//! The header width N is a configuration parameter shared by all participants.
//! Reads accumulate bytes until the declared lengths are satisfied, so a frame
//! split across several TCP segments is never truncated.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ChatError, Result};
use crate::Config;

/// Positive reply token of the control protocol
pub const ACK: &str = "ACK";

/// Negative reply token of the control protocol
pub const NACK: &str = "NACK";

/// Widest supported length header
pub const MAX_HEADER_BYTES: usize = 8;

/// Maximum accepted payload size (16 MB), regardless of header width
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Result of reading one frame from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A complete decoded frame
    Frame(String),
    /// The peer closed the connection (at a frame boundary or mid-frame)
    Closed,
}

/// Encoder/decoder for length-prefixed UTF-8 frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framer {
    header_bytes: usize,
}

impl Framer {
    /// Create a framer with the given header width (1..=8 bytes)
    pub fn new(header_bytes: usize) -> Result<Self> {
        if header_bytes == 0 || header_bytes > MAX_HEADER_BYTES {
            return Err(ChatError::config(format!(
                "Invalid header width: {} bytes (supported: 1..={})",
                header_bytes, MAX_HEADER_BYTES
            )));
        }
        Ok(Self { header_bytes })
    }

    /// Create a framer from the shared configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.header_bytes)
    }

    /// Header width in bytes
    pub fn header_bytes(&self) -> usize {
        self.header_bytes
    }

    /// Largest payload length representable in the header
    pub fn max_payload(&self) -> u64 {
        if self.header_bytes >= MAX_HEADER_BYTES {
            u64::MAX
        } else {
            (1u64 << (self.header_bytes * 8)) - 1
        }
    }

    /// Encode a frame: fixed-width big-endian length header + UTF-8 payload
    pub fn encode(&self, text: &str) -> Result<Bytes> {
        let len = text.len() as u64;
        if len > self.max_payload() {
            return Err(ChatError::protocol(format!(
                "Payload of {} bytes does not fit a {}-byte header",
                len, self.header_bytes
            )));
        }
        if text.len() > MAX_FRAME_SIZE {
            return Err(ChatError::protocol(format!(
                "Payload too large: {} bytes (max: {})",
                len, MAX_FRAME_SIZE
            )));
        }

        let mut buf = BytesMut::with_capacity(self.header_bytes + text.len());
        for shift in (0..self.header_bytes).rev() {
            buf.put_u8((len >> (shift * 8)) as u8);
        }
        buf.put_slice(text.as_bytes());
        Ok(buf.freeze())
    }

    /// Read one frame, accumulating bytes until the declared lengths are met
    ///
    /// A closed socket (before or inside a frame) is reported as
    /// [`Incoming::Closed`], never as an error. Invalid UTF-8 is a protocol
    /// error; transport failures are network errors.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Incoming>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; MAX_HEADER_BYTES];
        match reader.read_exact(&mut header[..self.header_bytes]).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(Incoming::Closed),
            Err(e) => return Err(e.into()),
        }

        let mut len: u128 = 0;
        for byte in &header[..self.header_bytes] {
            len = (len << 8) | *byte as u128;
        }
        if len > MAX_FRAME_SIZE as u128 {
            return Err(ChatError::protocol(format!(
                "Declared payload too large: {} bytes (max: {})",
                len, MAX_FRAME_SIZE
            )));
        }
        let len = len as usize;

        let mut payload = vec![0u8; len];
        match reader.read_exact(&mut payload).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(Incoming::Closed),
            Err(e) => return Err(e.into()),
        }

        let text = String::from_utf8(payload)
            .map_err(|e| ChatError::protocol(format!("Frame payload is not UTF-8: {}", e)))?;
        Ok(Incoming::Frame(text))
    }

    /// Encode and write one frame
    pub async fn write_frame<W>(&self, writer: &mut W, text: &str) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let encoded = self.encode(text)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }
}
