use sealpost_net::NetError;
use sealpost_shared::CryptoError;
use thiserror::Error;

/// Why a session operation did not succeed.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No response arrived within the configured window.
    #[error("Timed out waiting for a response to {action}")]
    Timeout { action: &'static str },

    /// The server answered with `status: "error"`.
    #[error("Server rejected the request: {0}")]
    Rejected(String),

    /// Another action is still waiting for its response.
    #[error("Another action is already in flight")]
    ActionInFlight,

    #[error("Disconnected from server")]
    Disconnected,

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Private key not loaded")]
    MissingPrivateKey,

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Session lock poisoned")]
    LockPoisoned,

    #[error("Network error: {0}")]
    Net(#[from] NetError),
}
