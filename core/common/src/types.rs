//! Common types used throughout PublicPillar.

use std::fmt;

/// Location of a value inside a nested secret document.
///
/// Used to name the offending entry in errors and log events without
/// ever carrying the value itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KeyPath {
    components: Vec<String>,
}

impl KeyPath {
    /// The document root.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Path of a child entry.
    pub fn join(&self, child: &str) -> Self {
        let mut components = self.components.clone();
        components.push(child.to_string());
        Self { components }
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Last component, if any.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "<root>");
        }
        write!(f, "{}", self.components.join("."))
    }
}
