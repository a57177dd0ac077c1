//! Common utilities and types shared across PublicPillar crates.
//!
//! This crate holds the error taxonomy used by the crypto engine, the
//! structured-data walker and the command line front end, so that every
//! layer reports failures the same way.

pub mod error;
pub mod types;

pub use error::{Error, KeyError, Result};
pub use types::KeyPath;
