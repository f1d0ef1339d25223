use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Action names as they appear in the `action` field.
pub const ACTION_CREATE_ACCOUNT: &str = "create_account";
pub const ACTION_LOGIN: &str = "login";
pub const ACTION_SEND_MESSAGE: &str = "send_message";
pub const ACTION_GET_CONVERSATIONS: &str = "get_conversations";
pub const ACTION_GET_MESSAGES: &str = "get_messages";
pub const ACTION_DELETE_ACCOUNT: &str = "delete_account";

pub const KNOWN_ACTIONS: &[&str] = &[
    ACTION_CREATE_ACCOUNT,
    ACTION_LOGIN,
    ACTION_SEND_MESSAGE,
    ACTION_GET_CONVERSATIONS,
    ACTION_GET_MESSAGES,
    ACTION_DELETE_ACCOUNT,
];

/// Client -> server requests, tagged by `action`.
///
/// String fields default to empty when absent so that handlers can answer
/// with a specific "missing field" error instead of a generic parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    CreateAccount {
        #[serde(default)]
        username: String,
        #[serde(default)]
        password_hash: String,
    },
    Login {
        #[serde(default)]
        username: String,
        #[serde(default)]
        password_hash: String,
    },
    SendMessage {
        #[serde(default)]
        to: String,
        #[serde(default)]
        message: String,
    },
    GetConversations,
    GetMessages {
        #[serde(default)]
        with: String,
    },
    DeleteAccount {
        #[serde(default)]
        password_hash: String,
    },
}

impl Request {
    pub fn action(&self) -> &'static str {
        match self {
            Request::CreateAccount { .. } => ACTION_CREATE_ACCOUNT,
            Request::Login { .. } => ACTION_LOGIN,
            Request::SendMessage { .. } => ACTION_SEND_MESSAGE,
            Request::GetConversations => ACTION_GET_CONVERSATIONS,
            Request::GetMessages { .. } => ACTION_GET_MESSAGES,
            Request::DeleteAccount { .. } => ACTION_DELETE_ACCOUNT,
        }
    }

    pub fn to_value(&self) -> Result<Value, ProtocolError> {
        Ok(serde_json::to_value(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Server -> client response. Payload fields are present only for the
/// actions that produce them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversations: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<MessageEntry>>,
}

impl Response {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            message: Some(message.into()),
            conversations: None,
            messages: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: Some(message.into()),
            conversations: None,
            messages: None,
        }
    }

    pub fn with_conversations(conversations: Vec<String>) -> Self {
        Self {
            status: Status::Success,
            message: None,
            conversations: Some(conversations),
            messages: None,
        }
    }

    pub fn with_messages(messages: Vec<MessageEntry>) -> Self {
        Self {
            status: Status::Success,
            message: None,
            conversations: None,
            messages: Some(messages),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn message_or_default(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }
}

/// One stored message. Binary fields are standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub from: String,
    pub to: String,
    /// Unix seconds
    pub timestamp: i64,
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
    pub aes_for_sender: String,
    pub aes_for_recipient: String,
}

/// What a decoded frame is, judged by its discriminating field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Has an `action` field (client -> server)
    Request,
    /// Has a `status` field (server -> client)
    Response,
    Unknown,
}

impl FrameKind {
    pub fn of(frame: &Value) -> Self {
        if frame.get("action").is_some() {
            FrameKind::Request
        } else if frame.get("status").is_some() {
            FrameKind::Response
        } else {
            FrameKind::Unknown
        }
    }
}

/// Why a request frame could not be turned into a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestParseError {
    UnknownAction(String),
    Malformed,
}

pub fn parse_request(frame: Value) -> Result<Request, RequestParseError> {
    let action = frame
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if !KNOWN_ACTIONS.contains(&action.as_str()) {
        return Err(RequestParseError::UnknownAction(action));
    }

    serde_json::from_value(frame).map_err(|_| RequestParseError::Malformed)
}
