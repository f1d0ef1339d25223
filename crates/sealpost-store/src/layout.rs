//! Where every store file lives under the data directory.
//!
//! ```text
//! <root>/users.json
//! <root>/keys/<username>/public.pem
//! <root>/keys/<username>/private.pem
//! <root>/messages/<token>/conversation.json
//! ```

use std::path::{Path, PathBuf};

use sealpost_shared::constants::{
    CONVERSATION_FILE, KEYS_DIR, MESSAGES_DIR, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE, USERS_FILE,
};
use sealpost_shared::types::ConversationId;

#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn users_file(&self) -> PathBuf {
        self.root.join(USERS_FILE)
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.root.join(KEYS_DIR)
    }

    /// Callers must have validated `username`; it is used as a path segment.
    pub fn user_key_dir(&self, username: &str) -> PathBuf {
        self.keys_dir().join(username)
    }

    pub fn public_key_path(&self, username: &str) -> PathBuf {
        self.user_key_dir(username).join(PUBLIC_KEY_FILE)
    }

    pub fn private_key_path(&self, username: &str) -> PathBuf {
        self.user_key_dir(username).join(PRIVATE_KEY_FILE)
    }

    pub fn messages_dir(&self) -> PathBuf {
        self.root.join(MESSAGES_DIR)
    }

    pub fn conversation_dir(&self, id: &ConversationId) -> PathBuf {
        self.messages_dir().join(id.to_token())
    }

    pub fn conversation_file(&self, id: &ConversationId) -> PathBuf {
        self.conversation_dir(id).join(CONVERSATION_FILE)
    }
}
