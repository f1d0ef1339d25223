use aes_gcm::{
    aead::{AeadInPlace, KeyInit},
    Aes256Gcm, Nonce, Tag,
};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::constants::{AES_IV_SIZE, AES_KEY_SIZE, AES_TAG_SIZE, RSA_KEY_BITS};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; AES_KEY_SIZE];

/// PEM-encoded RSA key pair. The public half is SubjectPublicKeyInfo
/// (`BEGIN PUBLIC KEY`), the private half PKCS#1 (`BEGIN RSA PRIVATE KEY`).
#[derive(Clone)]
pub struct RsaKeyPair {
    pub public_pem: String,
    pub private_pem: String,
}

impl std::fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("public_pem", &self.public_pem)
            .field("private_pem", &"<redacted>")
            .finish()
    }
}

/// Output of one AES-256-GCM encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AesEncrypted {
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

pub fn generate_rsa_keypair() -> Result<RsaKeyPair, CryptoError> {
    generate_rsa_keypair_with_bits(RSA_KEY_BITS)
}

pub fn generate_rsa_keypair_with_bits(bits: usize) -> Result<RsaKeyPair, CryptoError> {
    let private_key = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    let public_key = RsaPublicKey::from(&private_key);

    let public_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    let private_pem = private_key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

    Ok(RsaKeyPair {
        public_pem,
        private_pem: private_pem.as_str().to_owned(),
    })
}

pub fn parse_public_key(public_pem: &str) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_pem(public_pem)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Accepts both PKCS#1 and PKCS#8 private keys.
pub fn parse_private_key(private_pem: &str) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::from_pkcs1_pem(private_pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(private_pem))
        .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))
}

/// RSA-OAEP (SHA-256) seal under a PEM public key.
pub fn rsa_encrypt(plaintext: &[u8], public_pem: &str) -> Result<Vec<u8>, CryptoError> {
    let public_key = parse_public_key(public_pem)?;
    rsa_encrypt_with(plaintext, &public_key)
}

pub fn rsa_encrypt_with(plaintext: &[u8], public_key: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    // k - 2*hLen - 2 for SHA-256
    let max = public_key.size().saturating_sub(66);
    if plaintext.len() > max {
        return Err(CryptoError::PlaintextTooLarge {
            size: plaintext.len(),
            max,
        });
    }

    public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|_| CryptoError::RsaEncryptionFailed)
}

pub fn rsa_decrypt(ciphertext: &[u8], private_pem: &str) -> Result<Vec<u8>, CryptoError> {
    let private_key = parse_private_key(private_pem)?;
    rsa_decrypt_with(ciphertext, &private_key)
}

pub fn rsa_decrypt_with(ciphertext: &[u8], private_key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    private_key
        .decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|_| CryptoError::RsaDecryptionFailed)
}

pub fn generate_aes_key() -> SymmetricKey {
    let mut key = [0u8; AES_KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_iv() -> [u8; AES_IV_SIZE] {
    let mut iv = [0u8; AES_IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    iv
}

// Fresh random IV on every call; the tag is returned detached.
pub fn aes_encrypt(plaintext: &[u8], key: &[u8]) -> Result<AesEncrypted, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength)?;
    let iv = generate_iv();

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok(AesEncrypted {
        iv: iv.to_vec(),
        ciphertext: buffer,
        tag: tag.to_vec(),
    })
}

pub fn aes_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8], tag: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != AES_IV_SIZE {
        return Err(CryptoError::InvalidIvLength(iv.len()));
    }
    if tag.len() != AES_TAG_SIZE {
        return Err(CryptoError::InvalidTagLength(tag.len()));
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength)?;

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(Nonce::from_slice(iv), b"", &mut buffer, Tag::from_slice(tag))
        .map_err(|_| CryptoError::DecryptionFailed)?;

    Ok(buffer)
}

/// One-way digest a client sends instead of the password: lowercase hex SHA-256.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}
