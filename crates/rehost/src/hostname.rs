//! Fully-qualified lab hostnames.
//!
//! Every system handled by this crate is addressed as `short-name.domain`
//! (e.g. `asrock325x-png-5cr14-02b.png.dcgpu`). The short name is what
//! MAAS and the inventory `name` field use, the full form is what DNS,
//! SSH and Jenkins use.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors produced when parsing a [`Hostname`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostnameError {
    /// The value does not look like `short-name.domain`.
    #[error("invalid hostname format '{0}': expected <short-name>.<domain>")]
    InvalidFormat(String),
}

/// A validated `short-name.domain` hostname.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hostname {
    value: String,
    /// Byte offset of the first `.`.
    split: usize,
}

impl Hostname {
    /// Parse and validate a hostname.
    ///
    /// The value must be at least two RFC 1123 labels joined by `.`: each
    /// label is non-empty, made of ASCII letters, digits and `-`, and does
    /// not start or end with `-`. The value is spliced into remote shell
    /// commands, so nothing else is accepted.
    ///
    /// # Errors
    /// Returns [`HostnameError::InvalidFormat`] when the shape does not match.
    pub fn parse(value: &str) -> Result<Self, HostnameError> {
        let invalid = || HostnameError::InvalidFormat(value.to_string());

        let split = value.find('.').ok_or_else(invalid)?;
        if !value.split('.').all(is_valid_label) {
            return Err(invalid());
        }

        Ok(Self {
            value: value.to_string(),
            split,
        })
    }

    /// The full hostname.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Text before the first `.`.
    #[must_use]
    pub fn short_name(&self) -> &str {
        &self.value[..self.split]
    }

    /// Text after the first `.`.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.value[self.split + 1..]
    }

    /// Build `<prefix>-<short-name>`, the naming scheme of auxiliary devices.
    #[must_use]
    pub fn prefixed_short_name(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.short_name())
    }

    /// Build `<prefix>-<short-name>.<domain>`.
    #[must_use]
    pub fn with_prefix(&self, prefix: &str, domain: &str) -> String {
        format!("{}.{domain}", self.prefixed_short_name(prefix))
    }
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

impl fmt::Display for Hostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl FromStr for Hostname {
    type Err = HostnameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Hostname {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

impl Serialize for Hostname {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl<'de> Deserialize<'de> for Hostname {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
