//! Direct RSA-OAEP encryption of bounded-size values.
//!
//! OAEP uses MGF1 over the same digest as the label hash. The largest
//! message a key can carry is `k - 2*h - 2` bytes, where `k` is the modulus
//! length in bytes and `h` the digest length; switching the digest changes
//! this bound.

use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use rsa::Oaep;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};

use crate::keys::KeyMaterial;
use publicpillar_common::{Error, Result};

/// Hash used for OAEP padding and its mask generation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
    #[default]
    Sha512,
}

impl DigestAlgorithm {
    /// Digest output length in bytes.
    pub fn digest_size(self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    /// Lowercase name as used in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha384 => "sha384",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    // A fresh padding instance per operation; Oaep owns its digest state.
    fn padding(self) -> Oaep {
        match self {
            DigestAlgorithm::Sha256 => Oaep::new::<Sha256>(),
            DigestAlgorithm::Sha384 => Oaep::new::<Sha384>(),
            DigestAlgorithm::Sha512 => Oaep::new::<Sha512>(),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha384" => Ok(DigestAlgorithm::Sha384),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            _ => Err(Error::InvalidInput(format!(
                "Unknown digest '{}'. Use: sha256, sha384 or sha512",
                s
            ))),
        }
    }
}

/// RSA-OAEP encryption under a loaded key.
#[derive(Debug, Clone)]
pub struct AsymmetricCodec {
    key: KeyMaterial,
    digest: DigestAlgorithm,
}

impl AsymmetricCodec {
    /// Create a codec for `key` padding with `digest`.
    pub fn new(key: KeyMaterial, digest: DigestAlgorithm) -> Self {
        Self { key, digest }
    }

    /// The key this codec encrypts under.
    pub fn key(&self) -> &KeyMaterial {
        &self.key
    }

    /// The OAEP digest.
    pub fn digest(&self) -> DigestAlgorithm {
        self.digest
    }

    /// Maximum plaintext length for a given digest size: `k - 2*h - 2`.
    ///
    /// Negative when the key is too small for the digest to fit at all.
    pub fn capacity_bytes(&self, digest_size: usize) -> i64 {
        self.key.modulus_bytes() as i64 - 2 * digest_size as i64 - 2
    }

    /// Capacity for this codec's own digest.
    pub fn capacity(&self) -> i64 {
        self.capacity_bytes(self.digest.digest_size())
    }

    /// Whether `len` bytes can be encrypted directly.
    pub fn fits(&self, len: usize) -> bool {
        len as i64 <= self.capacity()
    }

    /// Encrypt `plaintext` directly with the public key.
    ///
    /// # Errors
    /// - `CapacityExceeded` if `plaintext` is longer than [`Self::capacity`]
    /// - `EncryptionFailed` if the RSA primitive rejects the input
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if !self.fits(plaintext.len()) {
            return Err(Error::CapacityExceeded {
                len: plaintext.len(),
                capacity: self.capacity(),
            });
        }

        self.key
            .public_key()
            .encrypt(&mut OsRng, self.digest.padding(), plaintext)
            .map_err(|e| Error::EncryptionFailed(format!("RSA-OAEP: {}", e)))
    }

    /// Decrypt an RSA-OAEP ciphertext with the private key.
    ///
    /// # Errors
    /// - `InvalidKey(PrivateKeyRequired)` for public-only key material
    /// - `DecryptionFailed` if padding verification fails
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let private = self.key.private_key()?;

        private
            .decrypt_blinded(&mut OsRng, self.digest.padding(), ciphertext)
            .map_err(|e| Error::DecryptionFailed(format!("RSA-OAEP: {}", e)))
    }
}
