//! Length-prefixed text frames.
//!
//! ```text
//! +----------------+---------------------------------+
//! | len: u16 (BE)  | payload: len bytes, UTF-16 LE   |
//! +----------------+---------------------------------+
//! ```
//!
//! Payloads longer than [`MAX_PAYLOAD`] bytes are truncated by the sender.
//! Truncation can split a code unit; the receiver decodes a dangling byte as
//! U+FFFD.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload a two-byte header can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

pub const HEADER_LEN: usize = 2;

/// Encode text as UTF-16 little-endian bytes.
pub fn encode_text(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Decode UTF-16 little-endian bytes, replacing invalid sequences.
pub fn decode_text(bytes: &[u8]) -> String {
    let chunks = bytes.chunks_exact(2);
    let dangling = !chunks.remainder().is_empty();
    let units: Vec<u16> = chunks
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let mut text = String::from_utf16_lossy(&units);
    if dangling {
        text.push(char::REPLACEMENT_CHARACTER);
    }
    text
}

/// Frame `text` into header + (possibly truncated) payload.
pub fn encode_frame(text: &str) -> Vec<u8> {
    let payload = encode_text(text);
    let len = payload.len().min(MAX_PAYLOAD);
    let mut frame = Vec::with_capacity(HEADER_LEN + len);
    frame.extend_from_slice(&(len as u16).to_be_bytes());
    frame.extend_from_slice(&payload[..len]);
    frame
}

/// Framed text messaging over any duplex byte stream.
#[derive(Debug)]
pub struct ChannelStream<S> {
    inner: S,
}

impl<S> ChannelStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Write one frame and flush. Returns bytes written, header included.
    pub async fn send(&mut self, text: &str) -> io::Result<usize> {
        let frame = encode_frame(text);
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(frame.len())
    }

    /// Read exactly one frame.
    pub async fn receive(&mut self) -> io::Result<String> {
        let mut header = [0u8; HEADER_LEN];
        self.inner.read_exact(&mut header).await?;
        let len = u16::from_be_bytes(header) as usize;

        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).await?;
        Ok(decode_text(&payload))
    }

    /// One synchronous round trip.
    pub async fn send_receive(&mut self, text: &str) -> io::Result<String> {
        self.send(text).await?;
        self.receive().await
    }
}
