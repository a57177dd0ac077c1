//! Symmetric envelope for values too long for direct RSA encryption.
//!
//! Payloads are AES-256 in CFB mode with 8-bit feedback segments, laid out as
//! `iv || ciphertext`. The IV travels in the clear; the session key is wrapped
//! separately by the asymmetric codec.
//!
//! # Security
//! - Session keys and IVs are drawn from the OS RNG for every envelope
//! - Session keys are zeroized on drop
//! - CFB carries no authentication tag; integrity rests on the wrapped key

use std::fmt;

use aes::cipher::{generic_array::GenericArray, AsyncStreamCipher, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use publicpillar_common::{Error, Result};

/// Session key length in bytes (AES-256).
pub const SESSION_KEY_LENGTH: usize = 32;

/// IV length in bytes (the AES block size).
pub const IV_SIZE: usize = 16;

type Aes256Cfb8Enc = cfb8::Encryptor<aes::Aes256>;
type Aes256Cfb8Dec = cfb8::Decryptor<aes::Aes256>;

/// One-time symmetric key for a single envelope.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    key: [u8; SESSION_KEY_LENGTH],
}

impl SessionKey {
    /// Generate a random session key.
    pub fn generate() -> Self {
        let mut key = [0u8; SESSION_KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Create a session key from raw bytes.
    pub fn from_bytes(key: [u8; SESSION_KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Rebuild a session key recovered from a wrapped key.
    ///
    /// # Errors
    /// - `MalformedCiphertext` if `bytes` is not exactly SESSION_KEY_LENGTH long
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SESSION_KEY_LENGTH {
            return Err(Error::MalformedCiphertext(format!(
                "Invalid session key length: expected {}, got {}",
                SESSION_KEY_LENGTH,
                bytes.len()
            )));
        }
        let mut key = [0u8; SESSION_KEY_LENGTH];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey([REDACTED])")
    }
}

/// Initialization vector for one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iv([u8; IV_SIZE]);

impl Iv {
    /// Generate a random IV.
    pub fn generate() -> Self {
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);
        Self(iv)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; IV_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the IV bytes.
    pub fn as_bytes(&self) -> &[u8; IV_SIZE] {
        &self.0
    }
}

/// Encrypt `plaintext` under `key` and `iv`.
///
/// # Postconditions
/// - Returns `iv || ciphertext`
/// - The output is exactly IV_SIZE bytes longer than `plaintext`
pub fn seal(plaintext: &[u8], key: &SessionKey, iv: &Iv) -> Vec<u8> {
    let mut payload = Vec::with_capacity(IV_SIZE + plaintext.len());
    payload.extend_from_slice(iv.as_bytes());
    payload.extend_from_slice(plaintext);

    Aes256Cfb8Enc::new(
        GenericArray::from_slice(key.as_bytes()),
        GenericArray::from_slice(iv.as_bytes()),
    )
    .encrypt(&mut payload[IV_SIZE..]);

    payload
}

/// Decrypt an `iv || ciphertext` payload under `key`.
///
/// # Errors
/// - `DecryptionFailed` if `payload` is shorter than one IV
pub fn open(payload: &[u8], key: &SessionKey) -> Result<Vec<u8>> {
    if payload.len() < IV_SIZE {
        return Err(Error::DecryptionFailed(format!(
            "Envelope payload too short: {} bytes, IV alone is {}",
            payload.len(),
            IV_SIZE
        )));
    }

    let (iv, ciphertext) = payload.split_at(IV_SIZE);
    let mut plaintext = ciphertext.to_vec();

    Aes256Cfb8Dec::new(
        GenericArray::from_slice(key.as_bytes()),
        GenericArray::from_slice(iv),
    )
    .decrypt(&mut plaintext);

    Ok(plaintext)
}
