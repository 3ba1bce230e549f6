//! Capability names declared by jobs.
//!
//! A job lists the capabilities it is permitted to exercise (for example
//! `email.send` or `http.post`). This crate only validates and carries them;
//! enforcement belongs to the job execution engine.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A single declared capability, e.g. `email.send`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Capability(String);

impl Capability {
    /// Parse and validate a capability name
    ///
    /// # Errors
    ///
    /// Returns error if the name is empty or contains characters outside
    /// `[a-z0-9_.:*-]`
    pub fn parse(name: &str) -> CoreResult<Self> {
        if name.is_empty() {
            return Err(CoreError::InvalidCapability {
                reason: "empty name".to_string(),
            });
        }

        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || "_.:-*".contains(*c)))
        {
            return Err(CoreError::InvalidCapability {
                reason: format!("'{name}' contains '{bad}'"),
            });
        }

        Ok(Self(name.to_string()))
    }

    /// Get the capability name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace part before the first `.`, e.g. `email` for `email.send`
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }
}

impl TryFrom<String> for Capability {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Capability> for String {
    fn from(cap: Capability) -> Self {
        cap.0
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The set of capabilities declared by one job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet {
    capabilities: BTreeSet<Capability>,
}

impl CapabilitySet {
    /// Create a new empty capability set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a capability
    pub fn grant(&mut self, capability: Capability) {
        self.capabilities.insert(capability);
    }

    /// Check for an exact capability
    #[must_use]
    pub fn has(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Check if a capability name is covered by this set.
    ///
    /// `email.*` covers `email.send` and `email.send.bulk`; `*` covers everything.
    #[must_use]
    pub fn allows(&self, name: &str) -> bool {
        self.capabilities.iter().any(|cap| matches_name(cap.as_str(), name))
    }

    /// Get the number of capabilities
    #[must_use]
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Iterate over capabilities in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self {
            capabilities: iter.into_iter().collect(),
        }
    }
}

fn matches_name(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix(".*") {
        return name == prefix || name.starts_with(&format!("{prefix}."));
    }

    pattern == name
}
