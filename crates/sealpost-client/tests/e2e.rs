//! Full client/server round trips over loopback TCP.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::runtime::Runtime;

use sealpost_client::{ClientConfig, PeerSession, SessionError};
use sealpost_server::{Server, ServerConfig};

struct TestServer {
    addr: String,
    data: TempDir,
    server: Arc<Server>,
    _runtime: Runtime,
}

impl TestServer {
    fn start() -> Self {
        Self::start_with_limit(0)
    }

    fn start_with_limit(max_connections: usize) -> Self {
        let data = TempDir::new().unwrap();
        let config = ServerConfig {
            listen_addr: ([127, 0, 0, 1], 0).into(),
            data_dir: data.path().to_path_buf(),
            max_connections,
        };
        let server = Arc::new(Server::open(config).unwrap());

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let listener = runtime.block_on(server.bind()).unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        runtime.spawn(server.clone().serve(listener));

        Self {
            addr,
            data,
            server,
            _runtime: runtime,
        }
    }

    fn data_dir(&self) -> &Path {
        self.data.path()
    }

    /// Sessions share the server's data directory so they find their private keys.
    fn session(&self) -> PeerSession {
        PeerSession::connect(ClientConfig {
            server_addr: self.addr.clone(),
            data_dir: self.data_dir().to_path_buf(),
            // account creation generates an RSA key pair on the server
            response_timeout: Duration::from_secs(10),
        })
        .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}

fn registered(server: &TestServer, username: &str, password: &str) -> PeerSession {
    let session = server.session();
    session.create_account(username, password).unwrap();
    session.login(username, password).unwrap();
    session
}

#[test]
fn test_create_account_then_login() {
    let server = TestServer::start();
    let session = server.session();

    session.create_account("alice", "correct horse").unwrap();
    assert!(server.data_dir().join("keys/alice/public.pem").is_file());

    match session.create_account("alice", "other") {
        Err(SessionError::Rejected(message)) => assert_eq!(message, "User already exists"),
        other => panic!("unexpected result: {other:?}"),
    }

    match session.login("alice", "wrong") {
        Err(SessionError::Rejected(message)) => assert_eq!(message, "Invalid password"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(session.username(), None);

    session.login("alice", "correct horse").unwrap();
    assert_eq!(session.username().as_deref(), Some("alice"));
    assert!(session.has_private_key());
}

#[test]
fn test_message_round_trip() {
    let server = TestServer::start();
    let alice = registered(&server, "alice", "pw-a");
    let bob = registered(&server, "bob", "pw-b");

    alice.send_message("bob", "hello {bob}, \"quoted\"").unwrap();
    bob.send_message("alice", "hi alice").unwrap();

    let batch = bob.get_messages("alice").unwrap();
    assert_eq!(batch.len(), 2);
    let first = &batch[0];
    assert_eq!(first.from, "alice");
    assert_eq!(first.to, "bob");
    assert_eq!(bob.decrypt_message(first).unwrap(), "hello {bob}, \"quoted\"");

    // the sender reads its own message through aes_for_sender
    let conversation = alice.read_conversation("bob").unwrap();
    let bodies: Vec<&str> = conversation.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["hello {bob}, \"quoted\"", "hi alice"]);

    assert_eq!(alice.get_conversations().unwrap(), vec!["bob"]);
    assert_eq!(bob.conversations(), Vec::<String>::new());
    assert_eq!(bob.get_conversations().unwrap(), vec!["alice"]);
    assert_eq!(bob.conversations(), vec!["alice"]);
}

#[test]
fn test_server_side_validation() {
    let server = TestServer::start();
    let anonymous = server.session();

    match anonymous.send_message("bob", "hi") {
        Err(SessionError::Rejected(message)) => assert_eq!(message, "User not logged in"),
        other => panic!("unexpected result: {other:?}"),
    }

    let alice = registered(&server, "alice", "pw");
    for (to, expected) in [
        ("nobody", "Recipient does not exist"),
        ("alice", "Cannot send a message to yourself"),
        ("", "Missing fields"),
    ] {
        match alice.send_message(to, "hi") {
            Err(SessionError::Rejected(message)) => assert_eq!(message, expected),
            other => panic!("unexpected result for {to:?}: {other:?}"),
        }
    }

    match alice.get_messages("nobody") {
        Err(SessionError::Rejected(message)) => assert_eq!(message, "User does not exist"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(alice.get_messages("alice").unwrap().is_empty());
}

#[test]
fn test_tampered_entry_does_not_decrypt() {
    let server = TestServer::start();
    let alice = registered(&server, "alice", "pw-a");
    let bob = registered(&server, "bob", "pw-b");

    alice.send_message("bob", "wire 100").unwrap();
    alice.send_message("bob", "wire 999").unwrap();
    let batch = bob.get_messages("alice").unwrap();

    let mut forged = batch[0].clone();
    forged.tag = batch[1].tag.clone();
    assert!(matches!(bob.decrypt_message(&forged), Err(SessionError::Crypto(_))));

    let mut forged = batch[0].clone();
    forged.ciphertext = batch[1].ciphertext.clone();
    assert!(matches!(bob.decrypt_message(&forged), Err(SessionError::Crypto(_))));

    assert_eq!(bob.decrypt_message(&batch[0]).unwrap(), "wire 100");
}

#[test]
fn test_delete_account() {
    let server = TestServer::start();
    let alice = registered(&server, "alice", "pw-a");
    let bob = registered(&server, "bob", "pw-b");
    alice.send_message("bob", "bye").unwrap();

    alice.delete_account("pw-a").unwrap();
    assert_eq!(alice.username(), None);
    assert!(!server.data_dir().join("keys/alice").exists());

    assert!(bob.get_conversations().unwrap().is_empty());
    match bob.send_message("alice", "still there?") {
        Err(SessionError::Rejected(message)) => assert_eq!(message, "Recipient does not exist"),
        other => panic!("unexpected result: {other:?}"),
    }

    // the name is free again
    alice.create_account("alice", "new").unwrap();
}

#[test]
fn test_connection_limit() {
    let server = TestServer::start_with_limit(1);
    let first = server.session();
    first.create_account("alice", "pw").unwrap();

    let second = server.session();
    assert!(second.get_conversations().is_err());

    // the first connection keeps working
    first.login("alice", "pw").unwrap();
}

#[test]
fn test_server_shutdown_disconnects_sessions() {
    let server = TestServer::start();
    let session = server.session();
    session.create_account("alice", "pw").unwrap();

    server.server.shutdown();
    std::thread::sleep(Duration::from_millis(200));

    assert!(matches!(session.get_conversations(), Err(SessionError::Disconnected)));
    assert!(!session.is_connected());
}
