//! # sealpost-shared
//!
//! Types and primitives shared by the Sealpost server, client and storage
//! crates: the JSON wire protocol, RSA-OAEP / AES-256-GCM primitives, the
//! hybrid message envelope and the canonical conversation identifier.

pub mod constants;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{CryptoError, ProtocolError};
