use serde::{Deserialize, Serialize};

use sealpost_shared::protocol::MessageEntry;

/// One registry row as stored in `users.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
}

/// On-disk shape of `conversation.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationLog {
    #[serde(default)]
    pub messages: Vec<MessageEntry>,
}
