//! The [`FileStorage`] service object.
//!
//! All durable state (the user registry, key files and conversation logs)
//! sits behind one mutex. Every public method takes the lock once and then
//! calls `*_locked` helpers that require the guarded [`Registry`] as a
//! parameter, so composite operations such as account creation and its
//! rollback run inside a single critical section.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use sealpost_shared::crypto::{self, RsaKeyPair};
use sealpost_shared::CryptoError;

use crate::error::{Result, StoreError};
use crate::layout::StorageLayout;
use crate::models::UserRecord;

/// Produces the RSA key pair written for each new account.
pub trait KeyPairSource: Send + Sync {
    fn generate(&self) -> std::result::Result<RsaKeyPair, CryptoError>;
}

/// Fresh RSA-2048 keys from the OS random source.
#[derive(Debug, Default, Clone, Copy)]
pub struct RsaKeySource;

impl KeyPairSource for RsaKeySource {
    fn generate(&self) -> std::result::Result<RsaKeyPair, CryptoError> {
        crypto::generate_rsa_keypair()
    }
}

/// In-memory copy of `users.json`. Only reachable through the storage lock.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    pub(crate) users: Vec<UserRecord>,
}

impl Registry {
    pub(crate) fn find(&self, username: &str) -> Option<&UserRecord> {
        self.users.iter().find(|u| u.username == username)
    }

    pub(crate) fn contains(&self, username: &str) -> bool {
        self.find(username).is_some()
    }

    pub(crate) fn remove(&mut self, username: &str) -> bool {
        let before = self.users.len();
        self.users.retain(|u| u.username != username);
        self.users.len() != before
    }
}

pub(crate) type StorageGuard<'a> = MutexGuard<'a, Registry>;

pub struct FileStorage {
    pub(crate) layout: StorageLayout,
    registry: Mutex<Registry>,
    pub(crate) key_source: Box<dyn KeyPairSource>,
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("root", &self.layout.root())
            .finish_non_exhaustive()
    }
}

impl FileStorage {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_key_source(root, Box::new(RsaKeySource))
    }

    pub fn open_with_key_source(
        root: impl Into<PathBuf>,
        key_source: Box<dyn KeyPairSource>,
    ) -> Result<Self> {
        let layout = StorageLayout::new(root);
        fs::create_dir_all(layout.keys_dir())?;
        fs::create_dir_all(layout.messages_dir())?;

        let users = load_registry(&layout)?;
        info!(
            root = %layout.root().display(),
            users = users.len(),
            "Opened storage"
        );

        Ok(Self {
            layout,
            registry: Mutex::new(Registry { users }),
            key_source,
        })
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub(crate) fn lock(&self) -> Result<StorageGuard<'_>> {
        self.registry.lock().map_err(|_| StoreError::LockPoisoned)
    }

    pub(crate) fn save_registry_locked(&self, registry: &Registry) -> Result<()> {
        let json = serde_json::to_vec_pretty(&registry.users)?;
        write_atomic(&self.layout.users_file(), &json)
    }
}

/// Read `users.json`, repairing it when it is missing, empty or corrupt.
fn load_registry(layout: &StorageLayout) -> Result<Vec<UserRecord>> {
    let path = layout.users_file();

    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "No user registry yet, creating one");
            write_empty_registry(&path)?;
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    if raw.trim().is_empty() {
        write_empty_registry(&path)?;
        return Ok(Vec::new());
    }

    match serde_json::from_str(&raw) {
        Ok(users) => Ok(users),
        Err(e) => {
            let backup = path.with_extension("json.bak");
            warn!(
                path = %path.display(),
                backup = %backup.display(),
                error = %e,
                "User registry is unreadable, moving it aside"
            );
            fs::rename(&path, &backup)?;
            write_empty_registry(&path)?;
            Ok(Vec::new())
        }
    }
}

fn write_empty_registry(path: &Path) -> Result<()> {
    let json = serde_json::to_vec_pretty(&Vec::<UserRecord>::new())?;
    write_atomic(path, &json)
}

/// Write to a sibling `.tmp` file and rename it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// `remove_dir_all` that treats an already-missing directory as success.
pub(crate) fn remove_dir_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
