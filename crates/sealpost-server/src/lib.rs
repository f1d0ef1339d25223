//! # sealpost-server
//!
//! TCP server for the Sealpost messenger. Clients send JSON action objects;
//! the server answers each with a `{status, message}` object plus any
//! payload. Messages are sealed for sender and recipient on arrival and
//! stored only as ciphertext.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod registry;

pub use config::ServerConfig;
pub use dispatcher::Server;
pub use error::ServerError;
pub use handler::MessageHandler;
pub use registry::ConnectionRegistry;
