//! Message codec for NETCONF byte streams

use crate::frame::{END_OF_CHUNKS, END_OF_MESSAGE, MAX_CHUNK_SIZE};
use crate::{Framing, ProtocolError};
use bytes::{Buf, BytesMut};
use std::io::{Read, Write};
use tracing::trace;

/// Maximum message size (64MB); configuration dumps can be large
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Longest decimal chunk-size header RFC 6242 allows
const MAX_CHUNK_DIGITS: usize = 10;

/// Codec for encoding/decoding NETCONF messages over blocking streams
pub struct FrameCodec {
    /// Read buffer for incoming data
    read_buf: BytesMut,
    /// Chunks of the message currently being reassembled
    partial: BytesMut,
    /// Active framing mechanism
    framing: Framing,
    /// Maximum message size allowed
    max_message_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a new codec using end-of-message framing
    pub fn new() -> Self {
        Self::with_max_message_size(MAX_MESSAGE_SIZE)
    }

    /// Create a new codec with custom max message size
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            read_buf: BytesMut::with_capacity(8192),
            partial: BytesMut::new(),
            framing: Framing::EndOfMessage,
            max_message_size,
        }
    }

    /// Currently active framing
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Switch framing, normally right after the hello exchange
    pub fn set_framing(&mut self, framing: Framing) {
        self.framing = framing;
    }

    /// Write one message to a blocking writer
    pub fn write_message<W>(&self, writer: &mut W, message: &str) -> Result<(), ProtocolError>
    where
        W: Write,
    {
        let encoded = self.framing.encode(message);
        writer.write_all(&encoded)?;
        writer.flush()?;
        Ok(())
    }

    /// Read one message from a blocking reader.
    ///
    /// Returns `Ok(None)` on a clean end of stream between messages.
    pub fn read_message<R>(&mut self, reader: &mut R) -> Result<Option<String>, ProtocolError>
    where
        R: Read,
    {
        loop {
            if let Some(message) = self.try_decode_message()? {
                return Ok(Some(message));
            }

            let mut temp_buf = [0u8; 8192];
            let n = reader.read(&mut temp_buf)?;

            if n == 0 {
                if self.read_buf.iter().all(u8::is_ascii_whitespace) && self.partial.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::StreamClosed);
            }

            trace!("Read {} bytes", n);
            self.read_buf.extend_from_slice(&temp_buf[..n]);
        }
    }

    /// Feed bytes that were read elsewhere
    pub fn extend(&mut self, data: &[u8]) {
        self.read_buf.extend_from_slice(data);
    }

    /// Try to decode a message from the internal buffer
    pub fn try_decode_message(&mut self) -> Result<Option<String>, ProtocolError> {
        match self.framing {
            Framing::EndOfMessage => self.try_decode_end_of_message(),
            Framing::Chunked => self.try_decode_chunked(),
        }
    }

    fn try_decode_end_of_message(&mut self) -> Result<Option<String>, ProtocolError> {
        let position = self
            .read_buf
            .windows(END_OF_MESSAGE.len())
            .position(|window| window == END_OF_MESSAGE);

        let Some(position) = position else {
            if self.read_buf.len() > self.max_message_size + END_OF_MESSAGE.len() {
                return Err(ProtocolError::MessageTooLarge {
                    size: self.read_buf.len(),
                    max: self.max_message_size,
                });
            }
            return Ok(None);
        };

        if position > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: position,
                max: self.max_message_size,
            });
        }

        let data = self.read_buf.split_to(position);
        self.read_buf.advance(END_OF_MESSAGE.len());

        let message = String::from_utf8(data.to_vec())?;
        Ok(Some(message.trim().to_string()))
    }

    fn try_decode_chunked(&mut self) -> Result<Option<String>, ProtocolError> {
        loop {
            // Tolerate stray whitespace left over from the hello delimiter
            if self.partial.is_empty() {
                let leading = self
                    .read_buf
                    .iter()
                    .take_while(|b| **b == b'\r' || **b == b' ' || **b == b'\t')
                    .count();
                self.read_buf.advance(leading);
                while self.read_buf.starts_with(b"\n\n") {
                    self.read_buf.advance(1);
                }
            }

            if self.read_buf.len() < END_OF_CHUNKS.len() {
                return Ok(None);
            }

            if !self.read_buf.starts_with(b"\n#") {
                return Err(ProtocolError::InvalidFrame(
                    "chunk header must start with LF #".to_string(),
                ));
            }

            if self.read_buf.starts_with(END_OF_CHUNKS) {
                self.read_buf.advance(END_OF_CHUNKS.len());
                let data = self.partial.split();
                let message = String::from_utf8(data.to_vec())?;
                return Ok(Some(message.trim().to_string()));
            }

            let digits_end = self.read_buf[2..]
                .iter()
                .take(MAX_CHUNK_DIGITS + 1)
                .position(|b| *b == b'\n');

            let Some(digit_count) = digits_end else {
                if self.read_buf.len() > 2 + MAX_CHUNK_DIGITS {
                    return Err(ProtocolError::InvalidFrame("chunk size header too long".to_string()));
                }
                return Ok(None);
            };

            let digits = &self.read_buf[2..2 + digit_count];
            if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) || digits[0] == b'0' {
                return Err(ProtocolError::InvalidFrame(format!(
                    "invalid chunk size: {:?}",
                    String::from_utf8_lossy(digits)
                )));
            }

            let size: u64 = std::str::from_utf8(digits)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| ProtocolError::InvalidFrame("unparsable chunk size".to_string()))?;

            if size > MAX_CHUNK_SIZE {
                return Err(ProtocolError::InvalidFrame(format!("chunk size {} out of range", size)));
            }

            let size = size as usize;
            if self.partial.len() + size > self.max_message_size {
                return Err(ProtocolError::MessageTooLarge {
                    size: self.partial.len() + size,
                    max: self.max_message_size,
                });
            }

            let header_len = 2 + digit_count + 1;
            if self.read_buf.len() < header_len + size {
                return Ok(None);
            }

            self.read_buf.advance(header_len);
            let chunk = self.read_buf.split_to(size);
            self.partial.extend_from_slice(&chunk);
        }
    }

    /// Get the current buffer size
    pub fn buffer_size(&self) -> usize {
        self.read_buf.len() + self.partial.len()
    }

    /// Clear the internal buffers
    pub fn clear_buffer(&mut self) {
        self.read_buf.clear();
        self.partial.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn test_decode_end_of_message() {
        let mut codec = FrameCodec::new();
        codec.extend(b"<hello/>\n]]>]]>");

        let message = codec.try_decode_message().unwrap().unwrap();
        assert_eq!(message, "<hello/>");
        assert_eq!(codec.buffer_size(), 0);
    }

    #[test]
    fn test_decode_partial_end_of_message() {
        let mut codec = FrameCodec::new();
        codec.extend(b"<hello/>\n]]>");
        assert!(codec.try_decode_message().unwrap().is_none());

        codec.extend(b"]]>");
        assert_eq!(codec.try_decode_message().unwrap().unwrap(), "<hello/>");
    }

    #[test]
    fn test_decode_multi_chunk_message() {
        let mut codec = FrameCodec::new();
        codec.set_framing(Framing::Chunked);
        codec.extend(b"\n#4\n<rpc\n#18\n-reply><ok/></rpc-reply>\n##\n");

        let message = codec.try_decode_message().unwrap().unwrap();
        assert_eq!(message, "<rpc-reply><ok/></rpc-reply>");
    }

    #[test]
    fn test_chunked_after_hello_delimiter() {
        let mut codec = FrameCodec::new();
        codec.extend(b"<hello/>]]>]]>\n#6\n<rpc/>\n##\n");
        assert_eq!(codec.try_decode_message().unwrap().unwrap(), "<hello/>");

        codec.set_framing(Framing::Chunked);
        assert_eq!(codec.try_decode_message().unwrap().unwrap(), "<rpc/>");
    }

    #[test]
    fn test_invalid_chunk_header() {
        let mut codec = FrameCodec::new();
        codec.set_framing(Framing::Chunked);
        codec.extend(b"\n#abc\nxyz");

        assert!(matches!(
            codec.try_decode_message(),
            Err(ProtocolError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut codec = FrameCodec::new();
        codec.set_framing(Framing::Chunked);
        codec.extend(b"\n#0\n\n##\n");

        assert!(codec.try_decode_message().is_err());
    }

    #[test]
    fn test_message_too_large() {
        let mut codec = FrameCodec::with_max_message_size(8);
        codec.extend(b"0123456789abcdef]]>]]>");

        assert!(matches!(
            codec.try_decode_message(),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_read_message_from_stream() {
        let mut codec = FrameCodec::new();
        let mut cursor = Cursor::new(b"<a/>]]>]]><b/>]]>]]>".to_vec());

        assert_eq!(codec.read_message(&mut cursor).unwrap().unwrap(), "<a/>");
        assert_eq!(codec.read_message(&mut cursor).unwrap().unwrap(), "<b/>");
        assert!(codec.read_message(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_read_message_truncated_stream() {
        let mut codec = FrameCodec::new();
        let mut cursor = Cursor::new(b"<rpc-reply>".to_vec());

        assert!(matches!(
            codec.read_message(&mut cursor),
            Err(ProtocolError::StreamClosed)
        ));
    }

    #[test]
    fn test_write_message_uses_active_framing() {
        let mut codec = FrameCodec::new();
        let mut out = Vec::new();
        codec.write_message(&mut out, "<x/>").unwrap();
        assert!(out.ends_with(b"]]>]]>"));

        codec.set_framing(Framing::Chunked);
        let mut out = Vec::new();
        codec.write_message(&mut out, "<x/>").unwrap();
        assert_eq!(out, b"\n#4\n<x/>\n##\n");
    }

    proptest! {
        // Decoding must not depend on how the transport splits the bytes
        #[test]
        fn test_chunked_decode_any_split(
            body in "[a-z<>/ ]{1,200}",
            split in 0usize..256,
        ) {
            let wire = Framing::Chunked.encode(&body);
            let split = split.min(wire.len());

            let mut codec = FrameCodec::new();
            codec.set_framing(Framing::Chunked);
            codec.extend(&wire[..split]);
            let early = codec.try_decode_message().unwrap();
            codec.extend(&wire[split..]);

            let decoded = match early {
                Some(message) => message,
                None => codec.try_decode_message().unwrap().unwrap(),
            };
            prop_assert_eq!(decoded, body.trim().to_string());
        }
    }
}
