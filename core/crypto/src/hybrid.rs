//! Hybrid encryption: direct RSA when the value fits, an envelope otherwise.
//!
//! The route is a pure function of the plaintext length and the key's OAEP
//! capacity. A value of exactly `capacity` bytes is encrypted directly; only
//! a negative padding length (`k - len - 2h - 2 < 0`) selects the envelope.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::asymmetric::{AsymmetricCodec, DigestAlgorithm};
use crate::envelope::{self, Iv, SessionKey, SESSION_KEY_LENGTH};
use crate::keys::KeyMaterial;
use publicpillar_common::{Error, Result};

/// Field holding the wrapped session key in an enveloped leaf.
pub const KEY_FIELD: &str = "key";

/// Field holding the `iv || ciphertext` payload in an enveloped leaf.
pub const CIPHERTEXT_FIELD: &str = "ciphertext";

/// An encrypted value as stored on disk.
///
/// Serializes to a bare base64 string (direct) or to a
/// `{key, ciphertext}` record (enveloped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ciphertext {
    /// Base64 of the RSA-OAEP ciphertext of the value.
    Direct(String),
    /// Base64 of the wrapped session key and of `iv || ciphertext`.
    Enveloped { key: String, ciphertext: String },
}

impl Ciphertext {
    /// Check if this is the direct form.
    pub fn is_direct(&self) -> bool {
        matches!(self, Ciphertext::Direct(_))
    }

    /// Check if this is the enveloped form.
    pub fn is_enveloped(&self) -> bool {
        matches!(self, Ciphertext::Enveloped { .. })
    }
}

/// Encrypts and decrypts individual values under one RSA key.
///
/// Holds no mutable state; a shared reference may be used from several
/// threads at once.
#[derive(Debug, Clone)]
pub struct HybridEngine {
    codec: AsymmetricCodec,
}

impl HybridEngine {
    /// Engine using the default OAEP digest (SHA-512).
    pub fn new(key: KeyMaterial) -> Self {
        Self::with_digest(key, DigestAlgorithm::default())
    }

    /// Engine using a specific OAEP digest.
    pub fn with_digest(key: KeyMaterial, digest: DigestAlgorithm) -> Self {
        Self {
            codec: AsymmetricCodec::new(key, digest),
        }
    }

    /// The underlying RSA codec.
    pub fn codec(&self) -> &AsymmetricCodec {
        &self.codec
    }

    /// Largest value, in bytes, that is encrypted directly.
    pub fn capacity(&self) -> i64 {
        self.codec.capacity()
    }

    /// Encrypt a text value.
    pub fn encrypt(&self, plaintext: &str) -> Result<Ciphertext> {
        self.encrypt_bytes(plaintext.as_bytes())
    }

    /// Encrypt an arbitrary byte value.
    ///
    /// # Errors
    /// - `KeyTooSmall` if the value needs an envelope and the key cannot
    ///   wrap a SESSION_KEY_LENGTH-byte session key
    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> Result<Ciphertext> {
        let capacity = self.codec.capacity();

        if self.codec.fits(plaintext.len()) {
            debug!(len = plaintext.len(), capacity, "Encrypting value directly");
            let encrypted = self.codec.encrypt(plaintext)?;
            return Ok(Ciphertext::Direct(STANDARD.encode(encrypted)));
        }

        if !self.codec.fits(SESSION_KEY_LENGTH) {
            return Err(Error::KeyTooSmall {
                bits: self.codec.key().modulus_bits(),
                needed: SESSION_KEY_LENGTH,
            });
        }

        let session_key = SessionKey::generate();

        debug!(len = plaintext.len(), capacity, "Encrypting value in envelope");
        let payload = envelope::seal(plaintext, &session_key, &Iv::generate());
        let wrapped = self.codec.encrypt(session_key.as_bytes())?;

        Ok(Ciphertext::Enveloped {
            key: STANDARD.encode(wrapped),
            ciphertext: STANDARD.encode(payload),
        })
    }

    /// Decrypt to a text value.
    ///
    /// # Errors
    /// - `MalformedPlaintext` if the decrypted bytes are not UTF-8
    pub fn decrypt(&self, ciphertext: &Ciphertext) -> Result<String> {
        let bytes = self.decrypt_bytes(ciphertext)?;
        String::from_utf8(bytes).map_err(|e| Error::MalformedPlaintext(e.to_string()))
    }

    /// Decrypt to raw bytes.
    ///
    /// # Errors
    /// - `MalformedCiphertext` if a field is not base64
    /// - `DecryptionFailed` if RSA padding verification fails
    pub fn decrypt_bytes(&self, ciphertext: &Ciphertext) -> Result<Vec<u8>> {
        match ciphertext {
            Ciphertext::Direct(value) => {
                let encrypted = decode_field("value", value)?;
                self.codec.decrypt(&encrypted)
            }
            Ciphertext::Enveloped { key, ciphertext } => {
                let wrapped = decode_field(KEY_FIELD, key)?;
                let payload = decode_field(CIPHERTEXT_FIELD, ciphertext)?;
                let session_key = SessionKey::from_slice(&self.codec.decrypt(&wrapped)?)?;
                envelope::open(&payload, &session_key)
            }
        }
    }
}

/// Decode a base64 field, ignoring embedded whitespace.
///
/// YAML emitters fold long scalars across lines, which turns line breaks
/// into spaces when the document is read back.
fn decode_field(field: &str, value: &str) -> Result<Vec<u8>> {
    let compact: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| Error::MalformedCiphertext(format!("'{}' is not base64: {}", field, e)))
}
