/// RSA modulus size for per-user key pairs
pub const RSA_KEY_BITS: usize = 2048;

/// Largest payload RSA-OAEP (SHA-256) can seal under a 2048-bit key: 256 - 2*32 - 2
pub const RSA_OAEP_MAX_PLAINTEXT: usize = 190;

/// AES-256 key size in bytes
pub const AES_KEY_SIZE: usize = 32;

/// AES-GCM IV size in bytes (96 bits)
pub const AES_IV_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes (128 bits)
pub const AES_TAG_SIZE: usize = 16;

/// Maximum size of one buffered JSON frame (256 KiB)
pub const MAX_FRAME_SIZE: usize = 262_144;

/// Socket read chunk size
pub const READ_BUFFER_SIZE: usize = 1024;

/// Upper bound on flushing already-queued writes when a connection closes
pub const CLOSE_FLUSH_TIMEOUT_MS: u64 = 1000;

/// Default TCP port for the relay server
pub const DEFAULT_PORT: u16 = 5555;

/// How long a peer session waits for the server to answer one action
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 500;

/// Longest accepted username, in bytes
pub const MAX_USERNAME_LEN: usize = 64;

/// Storage layout names
pub const USERS_FILE: &str = "users.json";
pub const KEYS_DIR: &str = "keys";
pub const MESSAGES_DIR: &str = "messages";
pub const PUBLIC_KEY_FILE: &str = "public.pem";
pub const PRIVATE_KEY_FILE: &str = "private.pem";
pub const CONVERSATION_FILE: &str = "conversation.json";
