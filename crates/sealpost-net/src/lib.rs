// TCP transport: JSON object framing and per-connection reader/writer tasks.

pub mod connection;
pub mod error;
pub mod framing;

pub use connection::{connect, spawn, ConnectionHandle, ConnectionId, Inbound};
pub use error::{FrameError, NetError};
pub use framing::JsonFrameDecoder;
