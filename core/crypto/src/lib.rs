//! Cryptographic engine for PublicPillar.
//!
//! This module provides:
//! - RSA key loading from PEM (including legacy OpenSSL-encrypted PEM) and
//!   OpenSSH encodings
//! - Direct RSA-OAEP encryption for values that fit the key
//! - AES-256-CFB8 envelopes with RSA-wrapped session keys for longer values
//! - A hybrid engine choosing between the two per value
//!
//! # Security Guarantees
//! - Session keys are zeroized on drop
//! - Every session key, IV and padding draw comes fresh from the OS RNG
//! - No plaintext or key material is ever logged

pub mod asymmetric;
pub mod envelope;
pub mod hybrid;
pub mod keys;
mod legacy;

pub use asymmetric::{AsymmetricCodec, DigestAlgorithm};
pub use envelope::{open, seal, Iv, SessionKey};
pub use hybrid::{Ciphertext, HybridEngine, CIPHERTEXT_FIELD, KEY_FIELD};
pub use keys::KeyMaterial;
