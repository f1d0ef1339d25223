//! Request/response correlation over one server connection.
//!
//! The wire protocol has no request ids, so a session allows exactly one
//! outstanding action. The calling thread sends the action, records it as
//! pending and blocks on a condition variable until the connection's consumer
//! task delivers the matching response, the connection drops, or the
//! response timeout elapses. Responses update the cached state (identity,
//! conversation list, last fetched batch) according to the pending action.

use std::fs;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use sealpost_net::{ConnectionHandle, Inbound, NetError};
use sealpost_shared::crypto::hash_password;
use sealpost_shared::envelope;
use sealpost_shared::protocol::{FrameKind, MessageEntry, Request, Response};
use sealpost_shared::types::validate_username;
use sealpost_store::StorageLayout;

use crate::config::ClientConfig;
use crate::error::SessionError;

/// A fetched message after local decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecryptedMessage {
    pub from: String,
    pub to: String,
    pub timestamp: i64,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingAction {
    CreateAccount,
    Login { username: String },
    SendMessage,
    GetConversations,
    GetMessages,
    DeleteAccount,
}

impl PendingAction {
    fn name(&self) -> &'static str {
        match self {
            PendingAction::CreateAccount => "create_account",
            PendingAction::Login { .. } => "login",
            PendingAction::SendMessage => "send_message",
            PendingAction::GetConversations => "get_conversations",
            PendingAction::GetMessages => "get_messages",
            PendingAction::DeleteAccount => "delete_account",
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    username: Option<String>,
    private_key_pem: Option<String>,
    pending: Option<PendingAction>,
    /// Response to `pending`; taken by the waiting caller.
    ready: Option<Response>,
    conversations: Vec<String>,
    messages: Vec<MessageEntry>,
    disconnected: bool,
}

struct SessionShared {
    state: Mutex<SessionState>,
    response_ready: Condvar,
    keys: StorageLayout,
}

impl SessionShared {
    fn new(keys: StorageLayout) -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            response_ready: Condvar::new(),
            keys,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionState>, SessionError> {
        self.state.lock().map_err(|_| SessionError::LockPoisoned)
    }

    fn handle_frame(&self, frame: Value) {
        match FrameKind::of(&frame) {
            FrameKind::Response => {}
            FrameKind::Request => {
                debug!("Ignoring action frame from server");
                return;
            }
            FrameKind::Unknown => {
                warn!("Ignoring frame with neither action nor status");
                return;
            }
        }

        let response: Response = match serde_json::from_value(frame) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Discarding unparseable response");
                return;
            }
        };

        let Ok(mut state) = self.state.lock() else {
            warn!("Session lock poisoned, dropping response");
            return;
        };

        let Some(action) = state.pending.take() else {
            debug!(status = ?response.status, "Response with no pending action, ignoring");
            return;
        };

        if response.is_success() {
            match &action {
                PendingAction::Login { username } => {
                    state.username = Some(username.clone());
                    state.private_key_pem = self.load_private_key(username);
                    state.conversations.clear();
                    state.messages.clear();
                }
                PendingAction::GetConversations => {
                    state.conversations = response.conversations.clone().unwrap_or_default();
                }
                PendingAction::GetMessages => {
                    state.messages = response.messages.clone().unwrap_or_default();
                }
                PendingAction::DeleteAccount => {
                    state.username = None;
                    state.private_key_pem = None;
                    state.conversations.clear();
                    state.messages.clear();
                }
                PendingAction::CreateAccount | PendingAction::SendMessage => {}
            }
        } else {
            debug!(
                action = action.name(),
                message = response.message_or_default(),
                "Action failed"
            );
        }

        state.ready = Some(response);
        self.response_ready.notify_all();
    }

    fn load_private_key(&self, username: &str) -> Option<String> {
        if validate_username(username).is_err() {
            warn!(user = %username, "Username is not a valid key directory name");
            return None;
        }

        let path = self.keys.private_key_path(username);
        match fs::read_to_string(&path) {
            Ok(pem) => Some(pem),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not load private key");
                None
            }
        }
    }

    fn on_disconnected(&self) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.disconnected = true;
        self.response_ready.notify_all();
    }
}

async fn consume(shared: Arc<SessionShared>, mut inbound: Inbound) {
    while let Some(frame) = inbound.recv().await {
        shared.handle_frame(frame);
    }
    info!("Connection to server closed");
    shared.on_disconnected();
}

/// One client connection plus its cached state.
///
/// All methods block the calling thread. The session owns a small tokio
/// runtime for its socket tasks, so it must not be created or dropped from
/// inside an async context.
pub struct PeerSession {
    config: ClientConfig,
    connection: ConnectionHandle,
    shared: Arc<SessionShared>,
    /// Drives the socket tasks; dropped last.
    _runtime: Runtime,
}

impl PeerSession {
    pub fn connect(config: ClientConfig) -> Result<Self, SessionError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("sealpost-io")
            .enable_all()
            .build()
            .map_err(NetError::from)?;

        let (connection, inbound) = runtime.block_on(sealpost_net::connect(&config.server_addr))?;
        let shared = Arc::new(SessionShared::new(StorageLayout::new(config.data_dir.clone())));
        runtime.spawn(consume(shared.clone(), inbound));

        info!(server = %config.server_addr, conn = %connection.id(), "Connected");

        Ok(Self {
            config,
            connection,
            shared,
            _runtime: runtime,
        })
    }

    pub fn create_account(&self, username: &str, password: &str) -> Result<(), SessionError> {
        let request = Request::CreateAccount {
            username: username.to_string(),
            password_hash: hash_password(password),
        };
        self.execute(request, PendingAction::CreateAccount).map(drop)
    }

    /// On success the session adopts `username` and loads its private key
    /// from the local data directory. A missing key does not fail the login;
    /// it only makes decryption unavailable.
    pub fn login(&self, username: &str, password: &str) -> Result<(), SessionError> {
        let request = Request::Login {
            username: username.to_string(),
            password_hash: hash_password(password),
        };
        let action = PendingAction::Login {
            username: username.to_string(),
        };
        self.execute(request, action).map(drop)
    }

    pub fn send_message(&self, to: &str, message: &str) -> Result<(), SessionError> {
        let request = Request::SendMessage {
            to: to.to_string(),
            message: message.to_string(),
        };
        self.execute(request, PendingAction::SendMessage).map(drop)
    }

    pub fn get_conversations(&self) -> Result<Vec<String>, SessionError> {
        let response = self.execute(Request::GetConversations, PendingAction::GetConversations)?;
        Ok(response.conversations.unwrap_or_default())
    }

    /// Fetch the whole conversation with `with`. Entries stay encrypted.
    pub fn get_messages(&self, with: &str) -> Result<Vec<MessageEntry>, SessionError> {
        let request = Request::GetMessages {
            with: with.to_string(),
        };
        let response = self.execute(request, PendingAction::GetMessages)?;
        Ok(response.messages.unwrap_or_default())
    }

    pub fn delete_account(&self, password: &str) -> Result<(), SessionError> {
        let request = Request::DeleteAccount {
            password_hash: hash_password(password),
        };
        self.execute(request, PendingAction::DeleteAccount).map(drop)
    }

    pub fn username(&self) -> Option<String> {
        self.shared.lock().ok().and_then(|state| state.username.clone())
    }

    pub fn has_private_key(&self) -> bool {
        self.shared
            .lock()
            .map(|state| state.private_key_pem.is_some())
            .unwrap_or(false)
    }

    /// Conversation partners from the last successful `get_conversations`.
    pub fn conversations(&self) -> Vec<String> {
        self.shared
            .lock()
            .map(|state| state.conversations.clone())
            .unwrap_or_default()
    }

    /// Batch from the last successful `get_messages`.
    pub fn messages(&self) -> Vec<MessageEntry> {
        self.shared
            .lock()
            .map(|state| state.messages.clone())
            .unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.shared
            .lock()
            .map(|state| !state.disconnected)
            .unwrap_or(false)
    }

    /// Open an entry with the logged-in user's private key.
    pub fn decrypt_message(&self, entry: &MessageEntry) -> Result<String, SessionError> {
        let (username, private_pem) = {
            let state = self.shared.lock()?;
            let username = state.username.clone().ok_or(SessionError::NotLoggedIn)?;
            let private_pem = state
                .private_key_pem
                .clone()
                .ok_or(SessionError::MissingPrivateKey)?;
            (username, private_pem)
        };

        Ok(envelope::open_text(entry, &username, &private_pem)?)
    }

    /// Fetch the conversation with `with` and decrypt every entry.
    pub fn read_conversation(&self, with: &str) -> Result<Vec<DecryptedMessage>, SessionError> {
        self.get_messages(with)?
            .into_iter()
            .map(|entry| {
                let body = self.decrypt_message(&entry)?;
                Ok(DecryptedMessage {
                    from: entry.from,
                    to: entry.to,
                    timestamp: entry.timestamp,
                    body,
                })
            })
            .collect()
    }

    pub fn close(&self) {
        self.connection.close();
    }

    fn execute(&self, request: Request, action: PendingAction) -> Result<Response, SessionError> {
        let name = action.name();
        {
            let mut state = self.shared.lock()?;
            if state.disconnected {
                return Err(SessionError::Disconnected);
            }
            if state.pending.is_some() {
                return Err(SessionError::ActionInFlight);
            }
            state.pending = Some(action);
            state.ready = None;
        }

        if let Err(e) = self.connection.send(&request) {
            if let Ok(mut state) = self.shared.lock() {
                state.pending = None;
            }
            return Err(match e {
                NetError::Closed => SessionError::Disconnected,
                other => other.into(),
            });
        }
        debug!(action = name, "Sent action, waiting for response");

        let state = self.shared.lock()?;
        let (mut state, _) = self
            .shared
            .response_ready
            .wait_timeout_while(state, self.config.response_timeout, |s| {
                s.ready.is_none() && !s.disconnected
            })
            .map_err(|_| SessionError::LockPoisoned)?;

        if let Some(response) = state.ready.take() {
            return if response.is_success() {
                Ok(response)
            } else {
                Err(SessionError::Rejected(response.message_or_default().to_string()))
            };
        }

        state.pending = None;
        if state.disconnected {
            return Err(SessionError::Disconnected);
        }

        warn!(
            action = name,
            timeout_ms = self.config.response_timeout.as_millis() as u64,
            "Timed out waiting for response"
        );
        Err(SessionError::Timeout { action: name })
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.connection.close();
        debug!(conn = %self.connection.id(), "Session dropped");
    }
}
