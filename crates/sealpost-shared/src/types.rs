use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::constants::MAX_USERNAME_LEN;
use crate::error::ProtocolError;

/// Usernames double as directory names under `keys/`, so only a
/// filesystem-safe alphabet is accepted.
pub fn validate_username(username: &str) -> Result<(), ProtocolError> {
    let valid = !username.is_empty()
        && username.len() <= MAX_USERNAME_LEN
        && !username.starts_with('.')
        && username
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));

    if valid {
        Ok(())
    } else {
        Err(ProtocolError::InvalidUsername)
    }
}

/// Unordered pair of usernames naming one conversation.
///
/// The canonical form is `len:first|len:second` with the byte-wise smaller
/// username first, so `(a, b)` and `(b, a)` share one identifier and
/// usernames containing `|` or `:` still parse unambiguously.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId {
    first: String,
    second: String,
}

impl ConversationId {
    pub fn new(a: &str, b: &str) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self {
            first: first.to_string(),
            second: second.to_string(),
        }
    }

    pub fn participants(&self) -> (&str, &str) {
        (&self.first, &self.second)
    }

    pub fn involves(&self, username: &str) -> bool {
        self.first == username || self.second == username
    }

    /// The other participant, if `username` is part of this conversation.
    pub fn counterpart(&self, username: &str) -> Option<&str> {
        if self.first == username {
            Some(&self.second)
        } else if self.second == username {
            Some(&self.first)
        } else {
            None
        }
    }

    pub fn canonical(&self) -> String {
        format!(
            "{}:{}|{}:{}",
            self.first.len(),
            self.first,
            self.second.len(),
            self.second
        )
    }

    pub fn parse(canonical: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidConversationId(canonical.to_string());

        let (first, rest) = take_prefixed(canonical).ok_or_else(invalid)?;
        let rest = rest.strip_prefix('|').ok_or_else(invalid)?;
        let (second, rest) = take_prefixed(rest).ok_or_else(invalid)?;
        if !rest.is_empty() {
            return Err(invalid());
        }

        // Only the canonical ordering is accepted so that every pair has exactly one token.
        if first > second {
            return Err(invalid());
        }

        Ok(Self {
            first: first.to_string(),
            second: second.to_string(),
        })
    }

    /// Filesystem-safe directory name: unpadded URL-safe base64 of the canonical form.
    pub fn to_token(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.canonical().as_bytes())
    }

    pub fn from_token(token: &str) -> Result<Self, ProtocolError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| ProtocolError::InvalidConversationId(token.to_string()))?;
        let canonical = String::from_utf8(bytes)
            .map_err(|_| ProtocolError::InvalidConversationId(token.to_string()))?;
        Self::parse(&canonical)
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

// Parses `<decimal len>:<len bytes>` and returns the value plus the remainder.
fn take_prefixed(input: &str) -> Option<(&str, &str)> {
    let (len, rest) = input.split_once(':')?;
    if len.is_empty() || !len.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let len: usize = len.parse().ok()?;
    let value = rest.get(..len)?;
    let remainder = rest.get(len..)?;
    Some((value, remainder))
}
