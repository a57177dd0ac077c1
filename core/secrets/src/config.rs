//! Tool configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::format::DocumentFormat;
use publicpillar_common::{Error, Result};
use publicpillar_crypto::DigestAlgorithm;

/// Configuration file looked up in the working directory.
pub const CONFIG_FILENAME: &str = ".ppillar.json";

/// Settings shared by every command.
///
/// Missing fields take their defaults, so an empty `{}` is a valid file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PillarConfig {
    /// OAEP hash. Must match the one used to encrypt.
    pub digest: DigestAlgorithm,
    /// Document format to use regardless of file extension.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<DocumentFormat>,
    /// Where directory decryption writes when no output is given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl PillarConfig {
    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Read a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(|e| match e {
            Error::Serialization(msg) => {
                Error::Serialization(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Read `path` if given, else [`CONFIG_FILENAME`] if it exists, else
    /// defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(CONFIG_FILENAME).is_file() => Self::load(CONFIG_FILENAME),
            None => Ok(Self::default()),
        }
    }
}
