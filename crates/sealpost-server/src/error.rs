use sealpost_shared::protocol::Response;
use thiserror::Error;

/// Request failures. The display string is the `message` the client sees.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("User not logged in")]
    SenderNotLoggedIn,

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Missing fields")]
    MissingFields,

    #[error("Missing credentials")]
    MissingCredentials,

    #[error("Missing 'with' field")]
    MissingWith,

    #[error("Cannot send a message to yourself")]
    SelfMessage,

    #[error("Recipient does not exist")]
    RecipientNotFound,

    #[error("User does not exist")]
    UserNotFound,

    #[error("Missing RSA keys")]
    MissingKeys,

    #[error("Failed to encrypt message")]
    EncryptionFailed,

    #[error("Failed to save message")]
    StorageFailure,

    #[error("User already exists")]
    UserExists,

    #[error("Invalid username")]
    InvalidUsername,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Failed to create account")]
    AccountCreationFailed,

    #[error("Account deleted with errors")]
    AccountDeletionIncomplete,

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid request format")]
    InvalidFormat,

    /// Details are logged server-side and never sent to the client.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn into_response(self) -> Response {
        let message = match &self {
            ServerError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        Response::error(message)
    }
}

impl From<sealpost_store::StoreError> for ServerError {
    fn from(e: sealpost_store::StoreError) -> Self {
        ServerError::Internal(e.to_string())
    }
}
