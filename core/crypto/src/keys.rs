//! RSA key material loading.
//!
//! A key file is loaded once per process and is immutable afterwards. Private
//! keys carry their public half, so the same file serves both directions.
//!
//! Supported encodings:
//! - PKCS#1 `RSA PRIVATE KEY` and `RSA PUBLIC KEY`, including OpenSSL's
//!   passphrase-protected `Proc-Type: 4,ENCRYPTED` variant
//! - PKCS#8 `PRIVATE KEY` and passphrase-protected `ENCRYPTED PRIVATE KEY`
//! - SubjectPublicKeyInfo `PUBLIC KEY`
//! - OpenSSH `ssh-rsa` public keys

use std::fmt;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use pkcs8::{DecodePrivateKey, EncryptedPrivateKeyInfo, SecretDocument};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};

use crate::legacy;
use publicpillar_common::{Error, KeyError, Result};

const LEGACY_ENCRYPTED_MARKER: &str = "Proc-Type: 4,ENCRYPTED";
const OPENSSH_RSA_PREFIX: &str = "ssh-rsa";

/// An RSA public key with an optional private half.
#[derive(Clone)]
pub struct KeyMaterial {
    public: RsaPublicKey,
    private: Option<RsaPrivateKey>,
}

impl KeyMaterial {
    /// Wrap a private key; the public half is derived from it.
    pub fn from_private(private: RsaPrivateKey) -> Self {
        Self {
            public: private.to_public_key(),
            private: Some(private),
        }
    }

    /// Wrap a public key for encrypt-only use.
    pub fn from_public(public: RsaPublicKey) -> Self {
        Self {
            public,
            private: None,
        }
    }

    /// Load key material from a file.
    ///
    /// # Errors
    /// - `InvalidKey(Unreadable)` if the file cannot be read
    /// - `InvalidKey(PassphraseRequired)` if the key is encrypted and
    ///   `passphrase` is `None`
    /// - `InvalidKey(IncorrectPassphrase)` if the passphrase does not decrypt it
    /// - `InvalidKey(Malformed)` for anything that is not a supported RSA key
    pub fn load(path: impl AsRef<Path>, passphrase: Option<&str>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(KeyError::Unreadable)?;
        let key = Self::parse(&text, passphrase)?;
        tracing::debug!(
            path = %path.display(),
            bits = key.modulus_bits(),
            private = key.has_private(),
            "Key loaded"
        );
        Ok(key)
    }

    /// Parse key material from its textual encoding.
    ///
    /// The passphrase is ignored for keys that are not encrypted.
    pub fn parse(text: &str, passphrase: Option<&str>) -> Result<Self> {
        let trimmed = text.trim();

        if trimmed.starts_with(OPENSSH_RSA_PREFIX) {
            return parse_openssh(trimmed).map(Self::from_public);
        }

        let label = pem_label(trimmed)
            .ok_or_else(|| malformed("no PEM header or OpenSSH prefix found"))?;

        match label {
            "RSA PRIVATE KEY" if trimmed.contains(LEGACY_ENCRYPTED_MARKER) => {
                let passphrase = passphrase.ok_or(KeyError::PassphraseRequired)?;
                legacy::decrypt(trimmed, passphrase).map(Self::from_private)
            }
            "RSA PRIVATE KEY" => RsaPrivateKey::from_pkcs1_pem(trimmed)
                .map(Self::from_private)
                .map_err(malformed),
            "PRIVATE KEY" => RsaPrivateKey::from_pkcs8_pem(trimmed)
                .map(Self::from_private)
                .map_err(malformed),
            "ENCRYPTED PRIVATE KEY" => {
                let passphrase = passphrase.ok_or(KeyError::PassphraseRequired)?;
                decrypt_pkcs8(trimmed, passphrase).map(Self::from_private)
            }
            "PUBLIC KEY" => RsaPublicKey::from_public_key_pem(trimmed)
                .map(Self::from_public)
                .map_err(malformed),
            "RSA PUBLIC KEY" => RsaPublicKey::from_pkcs1_pem(trimmed)
                .map(Self::from_public)
                .map_err(malformed),
            other => Err(malformed(format!("unsupported PEM label '{}'", other))),
        }
    }

    /// Modulus size in bits.
    pub fn modulus_bits(&self) -> usize {
        self.public.n().bits()
    }

    /// Modulus size in bytes, rounded up.
    pub fn modulus_bytes(&self) -> usize {
        self.public.size()
    }

    /// Whether the private component is present.
    pub fn has_private(&self) -> bool {
        self.private.is_some()
    }

    /// The public half.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// The private half, required for decryption.
    pub fn private_key(&self) -> Result<&RsaPrivateKey> {
        self.private
            .as_ref()
            .ok_or(Error::InvalidKey(KeyError::PrivateKeyRequired))
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("bits", &self.modulus_bits())
            .field("private", &self.private.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

pub(crate) fn malformed(reason: impl fmt::Display) -> Error {
    Error::InvalidKey(KeyError::Malformed(reason.to_string()))
}

/// Label of the first PEM block, e.g. `RSA PRIVATE KEY`.
fn pem_label(text: &str) -> Option<&str> {
    let start = text.find("-----BEGIN ")? + "-----BEGIN ".len();
    let rest = &text[start..];
    let end = rest.find("-----")?;
    Some(&rest[..end])
}

/// Decrypt a PBES2-protected PKCS#8 document.
///
/// Structural damage is reported as malformed; anything failing after the
/// envelope parsed is attributed to the passphrase.
fn decrypt_pkcs8(pem: &str, passphrase: &str) -> Result<RsaPrivateKey> {
    let (_, document) = SecretDocument::from_pem(pem).map_err(malformed)?;
    let info = EncryptedPrivateKeyInfo::try_from(document.as_bytes()).map_err(malformed)?;
    let decrypted = info
        .decrypt(passphrase)
        .map_err(|_| KeyError::IncorrectPassphrase)?;
    RsaPrivateKey::from_pkcs8_der(decrypted.as_bytes())
        .map_err(|_| Error::InvalidKey(KeyError::IncorrectPassphrase))
}

/// Parse an `ssh-rsa AAAA... comment` line.
///
/// The blob is a sequence of length-prefixed fields: the algorithm name, the
/// public exponent and the modulus.
fn parse_openssh(line: &str) -> Result<RsaPublicKey> {
    let mut parts = line.split_whitespace();
    let _algorithm = parts.next();
    let blob = parts
        .next()
        .ok_or_else(|| malformed("OpenSSH key has no key data"))?;
    let blob = STANDARD
        .decode(blob)
        .map_err(|e| malformed(format!("OpenSSH key data: {}", e)))?;

    let mut reader = SshReader { data: &blob };
    let name = reader.read_field()?;
    if name != OPENSSH_RSA_PREFIX.as_bytes() {
        return Err(malformed("OpenSSH key is not an RSA key"));
    }
    let e = BigUint::from_bytes_be(reader.read_field()?);
    let n = BigUint::from_bytes_be(reader.read_field()?);

    RsaPublicKey::new(n, e).map_err(malformed)
}

struct SshReader<'a> {
    data: &'a [u8],
}

impl<'a> SshReader<'a> {
    fn read_field(&mut self) -> Result<&'a [u8]> {
        if self.data.len() < 4 {
            return Err(malformed("truncated OpenSSH key data"));
        }
        let (len_bytes, rest) = self.data.split_at(4);
        let len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
            as usize;
        if rest.len() < len {
            return Err(malformed("truncated OpenSSH key data"));
        }
        let (field, rest) = rest.split_at(len);
        self.data = rest;
        Ok(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_2048: &str = include_str!("../testdata/key2048.pem");
    const KEY_2048_PKCS8: &str = include_str!("../testdata/key2048.pk8");
    const KEY_2048_ENCRYPTED: &str = include_str!("../testdata/key2048enc.pem");
    const KEY_2048_LEGACY: &str = include_str!("../testdata/key2048legacy.pem");
    const KEY_2048_DES3: &str = include_str!("../testdata/key2048des3.pem");
    const PUB_2048: &str = include_str!("../testdata/key2048.pub");
    const PUB_2048_PKCS1: &str = include_str!("../testdata/key2048.rsapub");
    const PUB_2048_SSH: &str = include_str!("../testdata/key2048.ssh.pub");

    #[test]
    fn test_parse_pkcs1_private() {
        let key = KeyMaterial::parse(KEY_2048, None).unwrap();
        assert!(key.has_private());
        assert_eq!(key.modulus_bits(), 2048);
        assert_eq!(key.modulus_bytes(), 256);
    }

    #[test]
    fn test_parse_pkcs8_private() {
        let key = KeyMaterial::parse(KEY_2048_PKCS8, None).unwrap();
        assert!(key.has_private());
    }

    #[test]
    fn test_public_encodings_agree() {
        let private = KeyMaterial::parse(KEY_2048, None).unwrap();

        for text in [PUB_2048, PUB_2048_PKCS1, PUB_2048_SSH] {
            let public = KeyMaterial::parse(text, None).unwrap();
            assert!(!public.has_private());
            assert_eq!(public.public_key(), private.public_key());
        }
    }

    #[test]
    fn test_encrypted_key_requires_passphrase() {
        let err = KeyMaterial::parse(KEY_2048_ENCRYPTED, None).unwrap_err();
        assert!(matches!(err, Error::InvalidKey(KeyError::PassphraseRequired)));
        assert!(err.needs_passphrase());
    }

    #[test]
    fn test_encrypted_key_wrong_passphrase() {
        let err = KeyMaterial::parse(KEY_2048_ENCRYPTED, Some("foo")).unwrap_err();
        assert!(matches!(err, Error::InvalidKey(KeyError::IncorrectPassphrase)));
    }

    #[test]
    fn test_encrypted_key_correct_passphrase() {
        let key = KeyMaterial::parse(KEY_2048_ENCRYPTED, Some("test")).unwrap();
        let plain = KeyMaterial::parse(KEY_2048, None).unwrap();
        assert!(key.has_private());
        assert_eq!(key.public_key(), plain.public_key());
    }

    #[test]
    fn test_legacy_encrypted_pem() {
        let plain = KeyMaterial::parse(KEY_2048, None).unwrap();

        for text in [KEY_2048_LEGACY, KEY_2048_DES3] {
            let err = KeyMaterial::parse(text, None).unwrap_err();
            assert!(matches!(err, Error::InvalidKey(KeyError::PassphraseRequired)));

            let err = KeyMaterial::parse(text, Some("foo")).unwrap_err();
            assert!(matches!(err, Error::InvalidKey(KeyError::IncorrectPassphrase)));

            let key = KeyMaterial::parse(text, Some("test")).unwrap();
            assert!(key.has_private());
            assert_eq!(key.public_key(), plain.public_key());
        }
    }

    #[test]
    fn test_garbage_is_malformed() {
        for text in ["", "not a key", "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----"] {
            let err = KeyMaterial::parse(text, None).unwrap_err();
            assert!(matches!(err, Error::InvalidKey(KeyError::Malformed(_))), "{text}");
        }
    }

    #[test]
    fn test_truncated_openssh_key() {
        let err = KeyMaterial::parse("ssh-rsa AAAAB3NzaC1yc2EAAAADAQAB", None).unwrap_err();
        assert!(matches!(err, Error::InvalidKey(KeyError::Malformed(_))));
    }

    #[test]
    fn test_public_key_has_no_private_half() {
        let key = KeyMaterial::parse(PUB_2048, None).unwrap();
        assert!(matches!(
            key.private_key(),
            Err(Error::InvalidKey(KeyError::PrivateKeyRequired))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = KeyMaterial::load("/nonexistent/key.pem", None).unwrap_err();
        assert!(matches!(err, Error::InvalidKey(KeyError::Unreadable(_))));
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = KeyMaterial::parse(KEY_2048, None).unwrap();
        let debug = format!("{:?}", key);
        assert!(debug.contains("REDACTED"));
        assert!(debug.contains("2048"));
    }
}
