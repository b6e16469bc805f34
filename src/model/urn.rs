//! Unique resource names for constructs.
//!
//! A URN has the shape
//! `urn:<account>:<project>:<environment>:<application>:<type>/<subtype>:<parent>/<resource>:<output>`
//! with trailing empty segments trimmed.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

/// Number of colon-separated segments after the `urn` prefix.
const MAX_SEGMENTS: usize = 7;

/// Unique resource name identifying a construct (or another addressable entity).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Urn {
    /// Account identifier.
    pub account_id: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Application name.
    pub application: String,
    /// Type (e.g. `construct`).
    pub kind: String,
    /// Subtype (e.g. `klotho.aws.Bucket`).
    pub subtype: String,
    /// Optional parent resource identifier.
    pub parent_resource_id: String,
    /// Resource identifier.
    pub resource_id: String,
    /// Output name.
    pub output: String,
}

/// Classification of a URN by which segments are populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrnKind {
    /// Account only.
    Account,
    /// Account and project.
    Project,
    /// Account, project and environment.
    Environment,
    /// An application inside an environment.
    ApplicationEnvironment,
    /// A typed resource.
    Resource,
    /// An output of a resource.
    Output,
    /// A bare type.
    Type,
}

impl Urn {
    /// Parses a URN string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string has too few or too many segments, or a
    /// malformed type segment.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidUrn {
            urn: input.to_string(),
            reason: reason.to_string(),
        };

        let mut segments: Vec<&str> = input.split(':').collect();
        if segments.first() == Some(&"urn") {
            segments.remove(0);
        }
        if segments.len() < 2 {
            return Err(invalid("expected at least account and project"));
        }
        if segments.len() > MAX_SEGMENTS {
            return Err(invalid("too many segments"));
        }

        let segment = |i: usize| segments.get(i).copied().unwrap_or_default().to_string();

        let mut urn = Self {
            account_id: segment(0),
            project: segment(1),
            environment: segment(2),
            application: segment(3),
            output: segment(6),
            ..Self::default()
        };

        let kind = segment(4);
        if !kind.is_empty() {
            let (kind, subtype) = kind
                .split_once('/')
                .ok_or_else(|| invalid("type segment must be <type>/<subtype>"))?;
            if subtype.contains('/') {
                return Err(invalid("type segment must be <type>/<subtype>"));
            }
            urn.kind = kind.to_string();
            urn.subtype = subtype.to_string();
        }

        let resource = segment(5);
        if let Some((parent, id)) = resource.split_once('/') {
            urn.parent_resource_id = parent.to_string();
            urn.resource_id = id.to_string();
        } else {
            urn.resource_id = resource;
        }

        Ok(urn)
    }

    /// Returns the classification of this URN.
    #[must_use]
    pub fn kind_of(&self) -> Option<UrnKind> {
        let filled = |s: &str| !s.is_empty();
        let base = filled(&self.account_id) && filled(&self.project);
        let typed = filled(&self.kind) && filled(&self.subtype);

        if filled(&self.account_id)
            && !filled(&self.project)
            && !filled(&self.environment)
            && !typed
            && !filled(&self.resource_id)
        {
            return Some(UrnKind::Account);
        }
        if base && filled(&self.environment) && typed && filled(&self.resource_id) {
            return Some(if filled(&self.output) {
                UrnKind::Output
            } else {
                UrnKind::Resource
            });
        }
        if base && !typed && !filled(&self.resource_id) && !filled(&self.output) {
            return Some(match (filled(&self.environment), filled(&self.application)) {
                (false, false) => UrnKind::Project,
                (true, false) => UrnKind::Environment,
                (true, true) => UrnKind::ApplicationEnvironment,
                (false, true) => return None,
            });
        }
        if filled(&self.kind) && !filled(&self.subtype) && !filled(&self.resource_id) {
            return Some(UrnKind::Type);
        }
        None
    }

    /// Returns the relative filesystem path for this URN's namespace.
    ///
    /// The path joins project, application, environment and resource id,
    /// stopping at the first empty segment.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        [
            self.project.as_str(),
            self.application.as_str(),
            self.environment.as_str(),
            self.resource_id.as_str(),
        ]
        .into_iter()
        .take_while(|part| !part.is_empty())
        .collect()
    }

    /// Returns a short, human-friendly name (the resource id when present).
    #[must_use]
    pub fn short_name(&self) -> String {
        if self.resource_id.is_empty() {
            self.to_string()
        } else {
            self.resource_id.clone()
        }
    }

    /// Returns a name unique to this resource among its application's constructs.
    ///
    /// Joins subtype, parent and resource id with `-`. Characters a stack or
    /// directory name cannot hold become `_`.
    #[must_use]
    pub fn stack_name(&self) -> String {
        [
            self.subtype.as_str(),
            self.parent_resource_id.as_str(),
            self.resource_id.as_str(),
        ]
        .into_iter()
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, '.' | '_') {
                        c
                    } else {
                        '_'
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("-")
    }

    fn fields(&self) -> [&str; 9] {
        [
            self.account_id.as_str(),
            self.project.as_str(),
            self.environment.as_str(),
            self.application.as_str(),
            self.kind.as_str(),
            self.subtype.as_str(),
            self.parent_resource_id.as_str(),
            self.resource_id.as_str(),
            self.output.as_str(),
        ]
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.kind.is_empty() || self.subtype.is_empty() {
            String::new()
        } else {
            format!("{}/{}", self.kind, self.subtype)
        };
        let resource = if self.parent_resource_id.is_empty() || self.resource_id.is_empty() {
            self.resource_id.clone()
        } else {
            format!("{}/{}", self.parent_resource_id, self.resource_id)
        };

        let joined = [
            "urn",
            self.account_id.as_str(),
            self.project.as_str(),
            self.environment.as_str(),
            self.application.as_str(),
            kind.as_str(),
            resource.as_str(),
            self.output.as_str(),
        ]
        .join(":");
        f.write_str(joined.trim_end_matches(':'))
    }
}

impl FromStr for Urn {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Urn {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Urn> for String {
    fn from(urn: Urn) -> Self {
        urn.to_string()
    }
}

impl PartialOrd for Urn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Urn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fields().cmp(&other.fields())
    }
}
