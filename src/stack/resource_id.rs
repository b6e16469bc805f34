//! Stable resource identities.
//!
//! Generated stacks publish a map from these identities to the engine's own
//! resource handles, which is how snapshot resources are re-keyed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StackError;

/// Stable identity of a resource: `provider:type[:namespace]:name`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    /// Provider (e.g. `aws`).
    pub provider: String,
    /// Resource type (e.g. `s3_bucket`).
    pub kind: String,
    /// Optional namespace.
    pub namespace: String,
    /// Resource name.
    pub name: String,
}

impl ResourceId {
    /// Parses a resource id.
    ///
    /// # Errors
    ///
    /// Returns an error if a segment contains characters outside its allowed set.
    pub fn parse(input: &str) -> Result<Self, StackError> {
        let parts: Vec<&str> = input.splitn(4, ':').collect();
        let mut id = Self::default();

        match parts.as_slice() {
            [""] => return Ok(id),
            [_] => return Err(invalid(input, "provider-only ids need a trailing ':'")),
            [provider, kind] => {
                id.provider = (*provider).to_string();
                id.kind = (*kind).to_string();
            }
            [provider, kind, name] => {
                id.provider = (*provider).to_string();
                id.kind = (*kind).to_string();
                id.name = (*name).to_string();
            }
            [provider, kind, namespace, name, ..] => {
                id.provider = (*provider).to_string();
                id.kind = (*kind).to_string();
                id.namespace = (*namespace).to_string();
                id.name = (*name).to_string();
            }
            [] => return Ok(id),
        }

        if id.provider.is_empty() || !id.provider.chars().all(is_word) {
            return Err(invalid(input, "invalid provider"));
        }
        if !id.kind.is_empty() && !id.kind.chars().all(is_word) {
            return Err(invalid(input, "invalid type"));
        }
        if !id.namespace.chars().all(|c| is_name(c) && c != ':') {
            return Err(invalid(input, "invalid namespace"));
        }
        if !id.name.chars().all(is_name) {
            return Err(invalid(input, "invalid name"));
        }
        Ok(id)
    }

    /// Returns true for the empty id.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self == &Self::default()
    }

    /// Returns `provider:type`.
    #[must_use]
    pub fn qualified_type(&self) -> String {
        format!("{}:{}", self.provider, self.kind)
    }
}

const fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

const fn is_name(c: char) -> bool {
    is_word(c) || matches!(c, '.' | '/' | '-' | ':' | '[' | ']')
}

fn invalid(input: &str, reason: &str) -> StackError {
    StackError::MalformedSnapshot {
        message: format!("invalid resource id '{input}': {reason}"),
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return Ok(());
        }
        write!(f, "{}:{}", self.provider, self.kind)?;
        if !self.namespace.is_empty() || self.name.contains(':') {
            write!(f, ":{}", self.namespace)?;
        }
        if !self.name.is_empty() {
            write!(f, ":{}", self.name)?;
        }
        Ok(())
    }
}

impl FromStr for ResourceId {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = StackError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}
