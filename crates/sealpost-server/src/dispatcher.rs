//! Accept loop and request routing.
//!
//! Each accepted connection gets one task that takes decoded frames off its
//! inbound channel one at a time. Handling a frame touches storage and may
//! generate an RSA key pair, so it runs on the blocking pool; the task awaits
//! it before taking the next frame, which keeps responses in request order.

use std::io;
use std::sync::Arc;

use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use sealpost_net::{ConnectionHandle, Inbound};
use sealpost_shared::protocol::{parse_request, FrameKind, Request, RequestParseError, Response};
use sealpost_store::{FileStorage, StoreError};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handler::MessageHandler;
use crate::registry::ConnectionRegistry;

pub struct Server {
    config: ServerConfig,
    storage: Arc<FileStorage>,
    handler: MessageHandler,
    connections: ConnectionRegistry,
}

impl Server {
    /// Open the store under `config.data_dir`.
    pub fn open(config: ServerConfig) -> Result<Self, StoreError> {
        let storage = Arc::new(FileStorage::open(config.data_dir.clone())?);
        Ok(Self::with_storage(config, storage))
    }

    pub fn with_storage(config: ServerConfig, storage: Arc<FileStorage>) -> Self {
        Self {
            handler: MessageHandler::new(storage.clone()),
            storage,
            config,
            connections: ConnectionRegistry::new(),
        }
    }

    pub fn storage(&self) -> &Arc<FileStorage> {
        &self.storage
    }

    pub async fn bind(&self) -> io::Result<TcpListener> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(addr = %listener.local_addr()?, "Listening");
        Ok(listener)
    }

    /// Accept connections until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    continue;
                }
            };

            let limit = self.config.max_connections;
            if limit > 0 && self.connections.len() >= limit {
                warn!(peer = %peer, limit, "Connection limit reached, dropping");
                drop(stream);
                continue;
            }

            let (handle, inbound) = match sealpost_net::spawn(stream) {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Could not start connection");
                    continue;
                }
            };

            info!(conn = %handle.id(), peer = %peer, "New connection accepted");
            self.connections.on_connected(handle.clone());
            tokio::spawn(self.clone().run_connection(handle, inbound));
        }
    }

    /// Close every open connection.
    pub fn shutdown(&self) {
        info!(active = self.connections.len(), "Closing all connections");
        self.connections.close_all();
    }

    async fn run_connection(self: Arc<Self>, handle: ConnectionHandle, mut inbound: Inbound) {
        while let Some(frame) = inbound.recv().await {
            let server = self.clone();
            let conn = handle.clone();
            let outcome =
                tokio::task::spawn_blocking(move || server.handle_frame(&conn, frame)).await;

            let response = match outcome {
                Ok(Some(response)) => response,
                Ok(None) => continue,
                Err(e) => {
                    error!(conn = %handle.id(), error = %e, "Request handler panicked");
                    ServerError::Internal(e.to_string()).into_response()
                }
            };

            if let Err(e) = handle.send(&response) {
                debug!(conn = %handle.id(), error = %e, "Could not send response");
                break;
            }
        }

        handle.close();
        self.connections.on_disconnected(handle.id());
        info!(
            conn = %handle.id(),
            active = self.connections.len(),
            "Connection closed"
        );
    }

    /// Route one decoded frame. Returns `None` for frames that get no answer.
    pub fn handle_frame(&self, conn: &ConnectionHandle, frame: Value) -> Option<Response> {
        match FrameKind::of(&frame) {
            FrameKind::Request => {}
            FrameKind::Response => {
                debug!(conn = %conn.id(), "Ignoring status frame from client");
                return None;
            }
            FrameKind::Unknown => {
                warn!(conn = %conn.id(), "Ignoring frame with neither action nor status");
                return None;
            }
        }

        let response = match parse_request(frame) {
            Ok(request) => self.handle_request(conn, request),
            Err(RequestParseError::UnknownAction(action)) => {
                warn!(conn = %conn.id(), action = %action, "Unknown action");
                ServerError::UnknownAction(action).into_response()
            }
            Err(RequestParseError::Malformed) => {
                warn!(conn = %conn.id(), "Malformed request body");
                ServerError::InvalidFormat.into_response()
            }
        };
        Some(response)
    }

    pub fn handle_request(&self, conn: &ConnectionHandle, request: Request) -> Response {
        let action = request.action();
        let result = match request {
            Request::CreateAccount {
                username,
                password_hash,
            } => self
                .create_account(&username, &password_hash)
                .map(|()| Response::success("Account created")),
            Request::Login {
                username,
                password_hash,
            } => self
                .login(conn, &username, &password_hash)
                .map(|()| Response::success("Login successful")),
            Request::SendMessage { to, message } => self
                .handler
                .process_message(conn.username().as_deref(), &to, &message)
                .map(|()| Response::success("Message stored")),
            Request::GetConversations => self
                .handler
                .list_conversations(conn.username().as_deref())
                .map(Response::with_conversations),
            Request::GetMessages { with } => self
                .handler
                .fetch_messages(conn.username().as_deref(), &with)
                .map(Response::with_messages),
            Request::DeleteAccount { password_hash } => self
                .delete_account(conn, &password_hash)
                .map(|()| Response::success("Account deleted")),
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                if let ServerError::Internal(detail) = &e {
                    error!(conn = %conn.id(), action, detail = %detail, "Request failed");
                } else {
                    debug!(conn = %conn.id(), action, error = %e, "Request rejected");
                }
                e.into_response()
            }
        }
    }

    fn create_account(&self, username: &str, password_hash: &str) -> Result<(), ServerError> {
        if username.is_empty() || password_hash.is_empty() {
            return Err(ServerError::MissingCredentials);
        }

        self.storage
            .create_user(username, password_hash)
            .map_err(|e| match e {
                StoreError::UserExists => ServerError::UserExists,
                StoreError::InvalidUsername => ServerError::InvalidUsername,
                other => {
                    error!(user = %username, error = %other, "Account creation failed");
                    ServerError::AccountCreationFailed
                }
            })
    }

    fn login(
        &self,
        conn: &ConnectionHandle,
        username: &str,
        password_hash: &str,
    ) -> Result<(), ServerError> {
        self.storage
            .login_user(username, password_hash)
            .map_err(|e| match e {
                StoreError::UserNotFound => ServerError::InvalidUsername,
                StoreError::InvalidPassword => ServerError::InvalidPassword,
                other => other.into(),
            })?;

        conn.set_username(Some(username.to_string()));
        info!(conn = %conn.id(), user = %username, "Logged in");
        Ok(())
    }

    fn delete_account(&self, conn: &ConnectionHandle, password_hash: &str) -> Result<(), ServerError> {
        let username = conn.username().ok_or(ServerError::NotLoggedIn)?;
        if password_hash.is_empty() {
            return Err(ServerError::MissingCredentials);
        }

        self.storage
            .login_user(&username, password_hash)
            .map_err(|e| match e {
                StoreError::InvalidPassword => ServerError::InvalidPassword,
                StoreError::UserNotFound => ServerError::UserNotFound,
                other => other.into(),
            })?;

        let outcome = self.storage.delete_user(&username);
        // The registry entry is gone once delete_user ran, even if cleanup was partial.
        let cleared = self.connections.log_out_everywhere(&username);
        conn.set_username(None);
        debug!(user = %username, sessions = cleared, "Cleared identity after account deletion");

        match outcome {
            Ok(()) => Ok(()),
            Err(StoreError::PartialDelete(_)) => Err(ServerError::AccountDeletionIncomplete),
            Err(StoreError::UserNotFound) => Err(ServerError::UserNotFound),
            Err(other) => Err(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealpost_shared::protocol::Status;
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        server: Server,
        conn: ConnectionHandle,
        _peer: ConnectionHandle,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            listen_addr: ([127, 0, 0, 1], 0).into(),
            data_dir: dir.path().to_path_buf(),
            max_connections: 0,
        };
        let server = Server::open(config).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (peer, _) = sealpost_net::connect(&addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let (conn, _) = sealpost_net::spawn(stream).unwrap();

        Fixture {
            _dir: dir,
            server,
            conn,
            _peer: peer,
        }
    }

    fn call(f: &Fixture, frame: Value) -> Response {
        f.server.handle_frame(&f.conn, frame).unwrap()
    }

    fn message(resp: &Response) -> &str {
        resp.message_or_default()
    }

    #[tokio::test]
    async fn test_account_lifecycle() {
        let f = fixture().await;

        let resp = call(&f, json!({"action": "create_account", "username": "alice", "password_hash": "h"}));
        assert_eq!(resp.status, Status::Success);
        assert_eq!(message(&resp), "Account created");
        // creating an account does not log in
        assert_eq!(f.conn.username(), None);

        let resp = call(&f, json!({"action": "create_account", "username": "alice", "password_hash": "x"}));
        assert_eq!(message(&resp), "User already exists");

        let resp = call(&f, json!({"action": "login", "username": "alice", "password_hash": "x"}));
        assert_eq!(message(&resp), "Invalid password");
        assert_eq!(f.conn.username(), None);

        let resp = call(&f, json!({"action": "login", "username": "nobody", "password_hash": "h"}));
        assert_eq!(message(&resp), "Invalid username");

        let resp = call(&f, json!({"action": "login", "username": "alice", "password_hash": "h"}));
        assert_eq!(message(&resp), "Login successful");
        assert_eq!(f.conn.username().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_create_account_validation() {
        let f = fixture().await;

        let resp = call(&f, json!({"action": "create_account", "username": "alice"}));
        assert_eq!(message(&resp), "Missing credentials");

        let resp = call(&f, json!({"action": "create_account", "username": "../etc", "password_hash": "h"}));
        assert_eq!(message(&resp), "Invalid username");
        assert!(!f.server.storage().user_exists("../etc").unwrap());
    }

    #[tokio::test]
    async fn test_requests_requiring_login() {
        let f = fixture().await;

        let resp = call(&f, json!({"action": "send_message", "to": "bob", "message": "hi"}));
        assert_eq!(message(&resp), "User not logged in");

        let resp = call(&f, json!({"action": "get_conversations"}));
        assert_eq!(message(&resp), "Not logged in");

        let resp = call(&f, json!({"action": "get_messages", "with": "bob"}));
        assert_eq!(message(&resp), "Not logged in");

        let resp = call(&f, json!({"action": "delete_account", "password_hash": "h"}));
        assert_eq!(message(&resp), "Not logged in");
    }

    #[tokio::test]
    async fn test_send_and_fetch() {
        let f = fixture().await;
        f.server.storage().create_user("alice", "ha").unwrap();
        f.server.storage().create_user("bob", "hb").unwrap();
        call(&f, json!({"action": "login", "username": "alice", "password_hash": "ha"}));

        let resp = call(&f, json!({"action": "send_message", "to": "bob", "message": "hi bob"}));
        assert_eq!(message(&resp), "Message stored");

        let resp = call(&f, json!({"action": "send_message", "to": "carol", "message": "hi"}));
        assert_eq!(message(&resp), "Recipient does not exist");

        let resp = call(&f, json!({"action": "get_conversations"}));
        assert_eq!(resp.conversations, Some(vec!["bob".to_string()]));

        let resp = call(&f, json!({"action": "get_messages", "with": "bob"}));
        let messages = resp.messages.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].from, "alice");
        assert_eq!(messages[0].to, "bob");
        assert_ne!(messages[0].ciphertext, "hi bob");

        let resp = call(&f, json!({"action": "get_messages"}));
        assert_eq!(message(&resp), "Missing 'with' field");
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_requests() {
        let f = fixture().await;

        let resp = call(&f, json!({"action": "teleport"}));
        assert_eq!(resp.status, Status::Error);
        assert_eq!(message(&resp), "Unknown action: teleport");

        let resp = call(&f, json!({"action": "login", "username": ["alice"]}));
        assert_eq!(message(&resp), "Invalid request format");

        assert!(f.server.handle_frame(&f.conn, json!({"status": "success"})).is_none());
        assert!(f.server.handle_frame(&f.conn, json!({"hello": "world"})).is_none());
    }

    #[tokio::test]
    async fn test_delete_account() {
        let f = fixture().await;
        f.server.storage().create_user("alice", "ha").unwrap();
        f.server.storage().create_user("bob", "hb").unwrap();
        call(&f, json!({"action": "login", "username": "alice", "password_hash": "ha"}));
        call(&f, json!({"action": "send_message", "to": "bob", "message": "bye"}));

        let resp = call(&f, json!({"action": "delete_account", "password_hash": "wrong"}));
        assert_eq!(message(&resp), "Invalid password");
        assert_eq!(f.conn.username().as_deref(), Some("alice"));

        let resp = call(&f, json!({"action": "delete_account", "password_hash": "ha"}));
        assert_eq!(message(&resp), "Account deleted");
        assert_eq!(f.conn.username(), None);
        assert!(!f.server.storage().user_exists("alice").unwrap());
        assert!(f.server.storage().list_conversations("bob").unwrap().is_empty());
    }
}
