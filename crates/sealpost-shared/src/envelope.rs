//! Hybrid message encryption.
//!
//! Every message gets a fresh AES-256 key. The plaintext is encrypted once
//! with AES-256-GCM and the AES key is sealed twice with RSA-OAEP: once for
//! the sender and once for the recipient. Either participant can later
//! recover the same symmetric key with their own private key; neither needs
//! the other's.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::crypto::{self, SymmetricKey};
use crate::error::CryptoError;
use crate::protocol::MessageEntry;

/// Raw output of [`seal`], before encoding into a [`MessageEntry`].
#[derive(Debug, Clone)]
pub struct SealedMessage {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
    pub aes_for_sender: Vec<u8>,
    pub aes_for_recipient: Vec<u8>,
}

impl SealedMessage {
    pub fn into_entry(self, from: &str, to: &str, timestamp: i64) -> MessageEntry {
        MessageEntry {
            from: from.to_string(),
            to: to.to_string(),
            timestamp,
            ciphertext: STANDARD.encode(self.ciphertext),
            iv: STANDARD.encode(self.iv),
            tag: STANDARD.encode(self.tag),
            aes_for_sender: STANDARD.encode(self.aes_for_sender),
            aes_for_recipient: STANDARD.encode(self.aes_for_recipient),
        }
    }
}

pub fn seal(
    plaintext: &[u8],
    sender_public_pem: &str,
    recipient_public_pem: &str,
) -> Result<SealedMessage, CryptoError> {
    let key: SymmetricKey = crypto::generate_aes_key();
    let encrypted = crypto::aes_encrypt(plaintext, &key)?;

    let aes_for_sender = crypto::rsa_encrypt(&key, sender_public_pem)?;
    let aes_for_recipient = crypto::rsa_encrypt(&key, recipient_public_pem)?;

    Ok(SealedMessage {
        ciphertext: encrypted.ciphertext,
        iv: encrypted.iv,
        tag: encrypted.tag,
        aes_for_sender,
        aes_for_recipient,
    })
}

/// Decrypt an entry as `local_username`.
///
/// Uses `aes_for_recipient` when the local user is the entry's `to`,
/// otherwise `aes_for_sender`. A tag mismatch is an error, never garbage.
pub fn open(entry: &MessageEntry, local_username: &str, private_pem: &str) -> Result<Vec<u8>, CryptoError> {
    let sealed_key = if entry.to == local_username {
        decode_field("aes_for_recipient", &entry.aes_for_recipient)?
    } else {
        decode_field("aes_for_sender", &entry.aes_for_sender)?
    };

    let key = crypto::rsa_decrypt(&sealed_key, private_pem)?;
    let iv = decode_field("iv", &entry.iv)?;
    let ciphertext = decode_field("ciphertext", &entry.ciphertext)?;
    let tag = decode_field("tag", &entry.tag)?;

    crypto::aes_decrypt(&key, &iv, &ciphertext, &tag)
}

pub fn open_text(entry: &MessageEntry, local_username: &str, private_pem: &str) -> Result<String, CryptoError> {
    let bytes = open(entry, local_username, private_pem)?;
    String::from_utf8(bytes).map_err(|_| CryptoError::InvalidUtf8)
}

fn decode_field(name: &'static str, value: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(value)
        .map_err(|_| CryptoError::Base64Decode(name))
}
