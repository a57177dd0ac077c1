//! Common error types for PublicPillar.

use thiserror::Error;

/// Reason a key file could not be turned into usable key material.
///
/// Callers that prompt for a passphrase match on [`KeyError::PassphraseRequired`]
/// and [`KeyError::IncorrectPassphrase`]; every other reason is final.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The key file could not be read.
    #[error("key file unreadable: {0}")]
    Unreadable(#[source] std::io::Error),

    /// The key file is not a supported RSA key encoding.
    #[error("malformed key: {0}")]
    Malformed(String),

    /// The private key is encrypted and no passphrase was supplied.
    #[error("private key is encrypted, a passphrase is required")]
    PassphraseRequired,

    /// The supplied passphrase did not decrypt the private key.
    #[error("incorrect passphrase for private key")]
    IncorrectPassphrase,

    /// The operation needs a private key but only a public key was loaded.
    #[error("operation requires a private key")]
    PrivateKeyRequired,
}

/// Top-level error type for PublicPillar operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Key material could not be loaded or is unsuitable for the operation.
    #[error("Invalid key: {0}")]
    InvalidKey(#[from] KeyError),

    /// Plaintext is larger than a direct RSA encryption can carry.
    #[error("Capacity exceeded: {len} bytes does not fit in {capacity} bytes")]
    CapacityExceeded { len: usize, capacity: i64 },

    /// The RSA key cannot even wrap a symmetric session key.
    #[error("Key too small: {bits}-bit key cannot wrap a {needed}-byte session key")]
    KeyTooSmall { bits: usize, needed: usize },

    /// The asymmetric primitive refused to encrypt.
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Padding or cipher verification failed.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// A ciphertext leaf has the wrong shape or encoding.
    #[error("Malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// Decrypted bytes are not valid UTF-8.
    #[error("Malformed plaintext: {0}")]
    MalformedPlaintext(String),

    /// A plaintext group uses both envelope field names as its own keys.
    #[error("Ambiguous group at '{0}': keys 'key' and 'ciphertext' collide with the envelope shape")]
    AmbiguousGroup(String),

    /// A value that cannot be represented as a secret leaf.
    #[error("Unsupported value at '{0}'")]
    UnsupportedValue(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// True when a retry with a (different) passphrase might succeed.
    pub fn needs_passphrase(&self) -> bool {
        matches!(
            self,
            Error::InvalidKey(KeyError::PassphraseRequired | KeyError::IncorrectPassphrase)
        )
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
