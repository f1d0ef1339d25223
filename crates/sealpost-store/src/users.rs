use std::fs;
use std::io::ErrorKind;

use tracing::{error, info, warn};

use sealpost_shared::types::validate_username;

use crate::error::{Result, StoreError};
use crate::models::UserRecord;
use crate::storage::{remove_dir_if_exists, write_atomic, FileStorage, Registry};

impl FileStorage {
    pub fn user_exists(&self, username: &str) -> Result<bool> {
        let registry = self.lock()?;
        Ok(registry.contains(username))
    }

    /// Register `username` and write its key pair.
    ///
    /// If the key pair cannot be generated or written, the key directory and
    /// the registry entry are removed again before the error is returned.
    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<()> {
        validate_username(username).map_err(|_| StoreError::InvalidUsername)?;

        let mut registry = self.lock()?;
        self.create_user_locked(&mut registry, username, password_hash)
    }

    /// Plain equality check against the stored hash.
    pub fn login_user(&self, username: &str, password_hash: &str) -> Result<()> {
        let registry = self.lock()?;
        let record = registry.find(username).ok_or(StoreError::UserNotFound)?;
        if record.password_hash == password_hash {
            Ok(())
        } else {
            Err(StoreError::InvalidPassword)
        }
    }

    /// PEM public key of `username`, or `None` if no key file exists.
    pub fn get_user_public_key(&self, username: &str) -> Result<Option<String>> {
        if validate_username(username).is_err() {
            return Ok(None);
        }

        let registry = self.lock()?;
        self.read_public_key_locked(&registry, username)
    }

    /// Remove the registry entry, the key directory and every conversation
    /// involving `username`.
    ///
    /// Cleanup is best-effort: every step is attempted and the registry is
    /// saved regardless. Steps that failed are listed in
    /// [`StoreError::PartialDelete`].
    pub fn delete_user(&self, username: &str) -> Result<()> {
        let mut registry = self.lock()?;
        if !registry.contains(username) {
            return Err(StoreError::UserNotFound);
        }

        let mut failures = Vec::new();
        registry.remove(username);

        if validate_username(username).is_ok() {
            if let Err(e) = remove_dir_if_exists(&self.layout.user_key_dir(username)) {
                failures.push(format!("remove key directory: {e}"));
            }
        }

        match self.conversation_ids_locked(&registry) {
            Ok(ids) => {
                for id in ids.into_iter().filter(|id| id.involves(username)) {
                    if let Err(e) = remove_dir_if_exists(&self.layout.conversation_dir(&id)) {
                        failures.push(format!("remove conversation {id}: {e}"));
                    }
                }
            }
            Err(e) => failures.push(format!("scan conversations: {e}")),
        }

        if let Err(e) = self.save_registry_locked(&registry) {
            failures.push(format!("save registry: {e}"));
        }

        if failures.is_empty() {
            info!(user = %username, "Deleted account");
            Ok(())
        } else {
            warn!(user = %username, failures = ?failures, "Account deleted with errors");
            Err(StoreError::PartialDelete(failures))
        }
    }

    fn create_user_locked(
        &self,
        registry: &mut Registry,
        username: &str,
        password_hash: &str,
    ) -> Result<()> {
        if registry.contains(username) {
            return Err(StoreError::UserExists);
        }

        registry.users.push(UserRecord {
            username: username.to_string(),
            password_hash: password_hash.to_string(),
        });
        if let Err(e) = self.save_registry_locked(registry) {
            registry.remove(username);
            return Err(e);
        }

        if let Err(e) = self.write_keys_locked(registry, username) {
            warn!(user = %username, error = %e, "Key setup failed, rolling back account");
            self.rollback_create_locked(registry, username);
            return Err(e);
        }

        info!(user = %username, "Created account");
        Ok(())
    }

    fn write_keys_locked(&self, _registry: &Registry, username: &str) -> Result<()> {
        let pair = self.key_source.generate()?;

        fs::create_dir_all(self.layout.user_key_dir(username))?;
        write_atomic(&self.layout.public_key_path(username), pair.public_pem.as_bytes())?;
        write_atomic(&self.layout.private_key_path(username), pair.private_pem.as_bytes())?;
        Ok(())
    }

    fn rollback_create_locked(&self, registry: &mut Registry, username: &str) {
        if let Err(e) = remove_dir_if_exists(&self.layout.user_key_dir(username)) {
            warn!(user = %username, error = %e, "Could not remove key directory during rollback");
        }

        registry.remove(username);
        if let Err(e) = self.save_registry_locked(registry) {
            error!(user = %username, error = %e, "Could not persist registry during rollback");
        }
    }

    fn read_public_key_locked(&self, _registry: &Registry, username: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.layout.public_key_path(username)) {
            Ok(pem) => Ok(Some(pem)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
