use sealpost_shared::CryptoError;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem failure while reading or writing a store file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("User already exists")]
    UserExists,

    #[error("User does not exist")]
    UserNotFound,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Invalid username")]
    InvalidUsername,

    /// Key pair generation or encoding failed during account creation.
    #[error("Key generation failed: {0}")]
    KeyGeneration(#[from] CryptoError),

    /// A thread panicked while holding the storage lock.
    #[error("Storage lock poisoned")]
    LockPoisoned,

    /// Account deletion removed what it could; each string names one failed step.
    #[error("Partial delete: {}", .0.join("; "))]
    PartialDelete(Vec<String>),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
