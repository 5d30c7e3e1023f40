//! Registry and coercion settings

use serde::{Deserialize, Serialize};

/// What the registry does when a name is registered twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Second registration of a name to a different type fails
    #[default]
    Reject,

    /// Second registration replaces the first
    Overwrite,
}

/// Settings shared by the registry and record coercion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Key naming the concrete record type inside a raw mapping
    pub discriminator_key: String,
    /// Key carrying a construction-time setup patch inside a raw mapping
    pub setup_key: String,
    /// Duplicate registration policy
    pub duplicate_policy: DuplicatePolicy,
}

impl Settings {
    /// Create default settings
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With discriminator key
    #[inline]
    #[must_use]
    pub fn with_discriminator_key(mut self, key: impl Into<String>) -> Self {
        self.discriminator_key = key.into();
        self
    }

    /// With setup key
    #[inline]
    #[must_use]
    pub fn with_setup_key(mut self, key: impl Into<String>) -> Self {
        self.setup_key = key.into();
        self
    }

    /// With duplicate registration policy
    #[inline]
    #[must_use]
    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            discriminator_key: "__factory__".to_string(),
            setup_key: "__setup__".to_string(),
            duplicate_policy: DuplicatePolicy::Reject,
        }
    }
}
