//! Invocation ID generation

use std::fmt;
use uuid::Uuid;

/// Lambda-style request ID attached to one invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvocationId {
    pub id: String,
}

impl InvocationId {
    /// Generate a new random invocation ID
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().hyphenated().to_string(),
        }
    }

    /// Create an invocation ID with a specific value (for testing)
    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    /// First eight characters, used in log stream names
    pub fn short(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
