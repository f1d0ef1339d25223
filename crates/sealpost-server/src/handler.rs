//! Message pipeline: validate, seal for both participants, persist, fetch.

use std::sync::Arc;

use tracing::{debug, error, warn};

use sealpost_shared::envelope;
use sealpost_shared::protocol::MessageEntry;
use sealpost_store::FileStorage;

use crate::error::ServerError;

pub struct MessageHandler {
    storage: Arc<FileStorage>,
}

impl MessageHandler {
    pub fn new(storage: Arc<FileStorage>) -> Self {
        Self { storage }
    }

    /// Encrypt `plaintext` from `sender` to `to` and append it to their
    /// conversation. The server keeps only ciphertext and the two sealed keys.
    pub fn process_message(
        &self,
        sender: Option<&str>,
        to: &str,
        plaintext: &str,
    ) -> Result<(), ServerError> {
        let sender = match sender {
            Some(name) if !name.is_empty() => name,
            _ => return Err(ServerError::SenderNotLoggedIn),
        };
        if to.is_empty() || plaintext.is_empty() {
            return Err(ServerError::MissingFields);
        }
        if to == sender {
            return Err(ServerError::SelfMessage);
        }
        if !self.storage.user_exists(to)? {
            return Err(ServerError::RecipientNotFound);
        }

        let sender_key = self.storage.get_user_public_key(sender)?;
        let recipient_key = self.storage.get_user_public_key(to)?;
        let (Some(sender_key), Some(recipient_key)) = (sender_key, recipient_key) else {
            warn!(from = %sender, to = %to, "Public key missing for a participant");
            return Err(ServerError::MissingKeys);
        };

        let sealed = envelope::seal(plaintext.as_bytes(), &sender_key, &recipient_key).map_err(|e| {
            error!(from = %sender, to = %to, error = %e, "Failed to seal message");
            ServerError::EncryptionFailed
        })?;

        let timestamp = chrono::Utc::now().timestamp();
        let entry = sealed.into_entry(sender, to, timestamp);

        match self.storage.append_conversation_message(sender, to, entry) {
            Ok(len) => {
                debug!(from = %sender, to = %to, len, "Message stored");
                Ok(())
            }
            Err(e) => {
                error!(from = %sender, to = %to, error = %e, "Failed to persist message");
                Err(ServerError::StorageFailure)
            }
        }
    }

    /// The full ordered conversation between `requester` and `with`, still
    /// encrypted.
    pub fn fetch_messages(
        &self,
        requester: Option<&str>,
        with: &str,
    ) -> Result<Vec<MessageEntry>, ServerError> {
        let requester = requester
            .filter(|name| !name.is_empty())
            .ok_or(ServerError::NotLoggedIn)?;
        if with.is_empty() {
            return Err(ServerError::MissingWith);
        }
        if !self.storage.user_exists(with)? {
            return Err(ServerError::UserNotFound);
        }

        Ok(self.storage.load_conversation(requester, with)?)
    }

    pub fn list_conversations(&self, requester: Option<&str>) -> Result<Vec<String>, ServerError> {
        let requester = requester
            .filter(|name| !name.is_empty())
            .ok_or(ServerError::NotLoggedIn)?;
        Ok(self.storage.list_conversations(requester)?)
    }
}
