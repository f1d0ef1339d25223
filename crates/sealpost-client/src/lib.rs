//! # sealpost-client
//!
//! Blocking client session for the Sealpost messenger.
//!
//! [`PeerSession`] sends one action at a time and waits for its response on
//! the calling thread. Fetched messages stay encrypted until the caller asks
//! for them to be decrypted with the locally stored private key.

pub mod config;
pub mod error;
pub mod session;

pub use config::ClientConfig;
pub use error::SessionError;
pub use session::{DecryptedMessage, PeerSession};
