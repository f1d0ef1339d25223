//! # sealpost-store
//!
//! File-backed persistence for the Sealpost server: the user registry, each
//! user's RSA key files and the per-conversation message logs.
//!
//! Everything lives under one data directory (see [`StorageLayout`]) and is
//! guarded by a single lock inside [`FileStorage`]. The API is synchronous.

pub mod conversations;
pub mod layout;
pub mod models;
pub mod storage;
pub mod users;

mod error;

pub use error::{Result, StoreError};
pub use layout::StorageLayout;
pub use models::*;
pub use storage::{FileStorage, KeyPairSource, RsaKeySource};
