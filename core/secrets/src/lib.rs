//! Secret documents for PublicPillar.
//!
//! This module provides:
//! - A recursive walker that encrypts or decrypts every leaf of a nested tree
//! - YAML and JSON document codecs
//! - Single-file and whole-directory operations
//! - Owner-only output files that never expose partial content
//!
//! # Architecture
//! Documents are parsed into a neutral value, converted into a [`SecretTree`],
//! and transformed leaf by leaf through a [`publicpillar_crypto::HybridEngine`].
//! The tree shape and key order always survive the transform.

pub mod config;
pub mod format;
pub mod operations;
pub mod tree;
mod verbatim;
pub mod writer;

pub use config::{PillarConfig, CONFIG_FILENAME};
pub use format::DocumentFormat;
pub use operations::{BatchReport, PillarOperations};
pub use tree::{
    decrypt_tree, decrypt_value, encrypt_tree, encrypt_value, PlainTree, SealedTree, SecretNode,
    SecretTree,
};
pub use writer::{SecureFile, SecureWriter};
