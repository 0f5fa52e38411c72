//! # nwkit NETCONF
//!
//! Framing, codec and message types for NETCONF over SSH (RFC 6241/6242).

#![warn(missing_docs)]

/// Frame delimiters and encoding
pub mod frame;

/// Message types: hello, rpc, rpc-reply
pub mod message;

/// Message codec for blocking streams
pub mod codec;

/// Error types for protocol operations
pub mod error;

pub use frame::Framing;
pub use message::{ErrorSeverity, Hello, Rpc, RpcError, RpcReply, BASE_1_0, BASE_1_1};
pub use codec::FrameCodec;
pub use error::ProtocolError;
