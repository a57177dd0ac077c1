//! YAML and JSON document codecs.
//!
//! Documents are parsed into an order-preserving `serde_json::Value`, so the
//! same walker serves both formats and key order survives a round trip.
//! Numbers and booleans are read as the exact text they were written with.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::verbatim;
use publicpillar_common::{Error, Result};

/// On-disk document encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    #[default]
    Yaml,
    Json,
}

impl DocumentFormat {
    /// Pick a format from a file extension.
    ///
    /// `.json` selects JSON; anything else (`.yml`, `.yaml`, `.sls`, none)
    /// is treated as YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => DocumentFormat::Json,
            _ => DocumentFormat::Yaml,
        }
    }

    /// Parse a document. Blank input is an empty mapping.
    ///
    /// Non-string scalars come back as strings of their source text, so
    /// `1.50` stays `1.50`.
    pub fn parse(self, text: &str) -> Result<Value> {
        if text.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }

        match self {
            DocumentFormat::Yaml => verbatim::parse_yaml(text)
                .map_err(|e| Error::Serialization(format!("YAML: {}", e))),
            DocumentFormat::Json => verbatim::parse_json(text)
                .map_err(|e| Error::Serialization(format!("JSON: {}", e))),
        }
    }

    /// Render a document.
    pub fn render(self, value: &Value) -> Result<String> {
        match self {
            DocumentFormat::Yaml => serde_yaml::to_string(value)
                .map_err(|e| Error::Serialization(format!("YAML: {}", e))),
            DocumentFormat::Json => serde_json::to_string_pretty(value)
                .map(|mut json| {
                    json.push('\n');
                    json
                })
                .map_err(|e| Error::Serialization(format!("JSON: {}", e))),
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentFormat::Yaml => f.write_str("yaml"),
            DocumentFormat::Json => f.write_str("json"),
        }
    }
}

impl FromStr for DocumentFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(DocumentFormat::Yaml),
            "json" => Ok(DocumentFormat::Json),
            _ => Err(Error::InvalidInput(format!(
                "Unknown format '{}'. Use: yaml or json",
                s
            ))),
        }
    }
}
