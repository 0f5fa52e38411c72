//! NETCONF framing (RFC 6242)

use bytes::{BufMut, Bytes, BytesMut};

/// End-of-message delimiter used by base:1.0 framing
pub const END_OF_MESSAGE: &[u8] = b"]]>]]>";

/// Terminator of a chunked (base:1.1) message
pub const END_OF_CHUNKS: &[u8] = b"\n##\n";

/// Largest chunk size permitted by RFC 6242
pub const MAX_CHUNK_SIZE: u64 = 4_294_967_295;

/// Framing mechanism negotiated for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// `]]>]]>` delimited messages; always used for the hello exchange
    #[default]
    EndOfMessage,
    /// Length-prefixed chunks, selected when both peers advertise base:1.1
    Chunked,
}

impl Framing {
    /// Wrap a message for the wire
    pub fn encode(self, message: &str) -> Bytes {
        match self {
            Framing::EndOfMessage => {
                let mut buf = BytesMut::with_capacity(message.len() + END_OF_MESSAGE.len() + 1);
                buf.put_slice(message.as_bytes());
                buf.put_u8(b'\n');
                buf.put_slice(END_OF_MESSAGE);
                buf.freeze()
            }
            Framing::Chunked => {
                // A single chunk is always enough for messages we produce
                let header = format!("\n#{}\n", message.len());
                let mut buf = BytesMut::with_capacity(header.len() + message.len() + END_OF_CHUNKS.len());
                buf.put_slice(header.as_bytes());
                buf.put_slice(message.as_bytes());
                buf.put_slice(END_OF_CHUNKS);
                buf.freeze()
            }
        }
    }

    /// Human readable name, used in logs
    pub fn name(self) -> &'static str {
        match self {
            Framing::EndOfMessage => "end-of-message",
            Framing::Chunked => "chunked",
        }
    }
}
