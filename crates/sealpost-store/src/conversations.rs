use std::fs;
use std::io::ErrorKind;

use tracing::debug;

use sealpost_shared::protocol::MessageEntry;
use sealpost_shared::types::ConversationId;

use crate::error::Result;
use crate::models::ConversationLog;
use crate::storage::{write_atomic, FileStorage, Registry};

impl FileStorage {
    /// Append `entry` to the log shared by `user_a` and `user_b`. Returns the
    /// new length of the log.
    pub fn append_conversation_message(
        &self,
        user_a: &str,
        user_b: &str,
        entry: MessageEntry,
    ) -> Result<usize> {
        let id = ConversationId::new(user_a, user_b);
        let registry = self.lock()?;

        let mut log = self.read_log_locked(&registry, &id)?;
        log.messages.push(entry);

        fs::create_dir_all(self.layout.conversation_dir(&id))?;
        let json = serde_json::to_vec_pretty(&log)?;
        write_atomic(&self.layout.conversation_file(&id), &json)?;

        debug!(conversation = %id, len = log.messages.len(), "Appended message");
        Ok(log.messages.len())
    }

    /// Every message between the two users in append order; empty if they
    /// have never talked.
    pub fn load_conversation(&self, user_a: &str, user_b: &str) -> Result<Vec<MessageEntry>> {
        let id = ConversationId::new(user_a, user_b);
        let registry = self.lock()?;
        Ok(self.read_log_locked(&registry, &id)?.messages)
    }

    /// Usernames `username` has a conversation with, sorted.
    ///
    /// Scans every conversation directory.
    pub fn list_conversations(&self, username: &str) -> Result<Vec<String>> {
        let registry = self.lock()?;

        let mut partners: Vec<String> = self
            .conversation_ids_locked(&registry)?
            .iter()
            .filter_map(|id| id.counterpart(username))
            .map(str::to_string)
            .collect();
        partners.sort();
        partners.dedup();
        Ok(partners)
    }

    pub(crate) fn conversation_ids_locked(&self, _registry: &Registry) -> Result<Vec<ConversationId>> {
        let entries = match fs::read_dir(self.layout.messages_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(token) = name.to_str() else {
                continue;
            };
            match ConversationId::from_token(token) {
                Ok(id) => ids.push(id),
                Err(_) => debug!(dir = %token, "Skipping unrecognized conversation directory"),
            }
        }
        Ok(ids)
    }

    fn read_log_locked(&self, _registry: &Registry, id: &ConversationId) -> Result<ConversationLog> {
        match fs::read(self.layout.conversation_file(id)) {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ConversationLog::default()),
            Err(e) => Err(e.into()),
        }
    }
}
