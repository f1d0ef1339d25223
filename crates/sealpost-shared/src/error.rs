use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("RSA key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Failed to load public key PEM: {0}")]
    InvalidPublicKey(String),

    #[error("Failed to load private key PEM: {0}")]
    InvalidPrivateKey(String),

    #[error("RSA plaintext too large: {size} bytes (max {max})")]
    PlaintextTooLarge { size: usize, max: usize },

    #[error("RSA encryption failed")]
    RsaEncryptionFailed,

    #[error("RSA decryption failed")]
    RsaDecryptionFailed,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: authentication tag mismatch or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Invalid IV length: {0} bytes")]
    InvalidIvLength(usize),

    #[error("Invalid tag length: {0} bytes")]
    InvalidTagLength(usize),

    #[error("Base64 decode error in field '{0}'")]
    Base64Decode(&'static str),

    #[error("Decrypted message is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid conversation identifier: {0}")]
    InvalidConversationId(String),

    #[error("Invalid username")]
    InvalidUsername,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
