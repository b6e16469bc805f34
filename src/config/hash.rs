//! Construct declaration hashing for change detection.
//!
//! A construct whose declaration hash matches the one recorded in state is
//! left alone, which is what makes repeated `up` runs idempotent.

use sha2::{Digest, Sha256};

use crate::model::{ConstructSpec, InputStatus, Urn};

/// Hasher for construct declarations.
#[derive(Debug, Default)]
pub struct ConstructHasher;

impl ConstructHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the hash of a single construct declaration.
    ///
    /// Maps are already ordered, so the digest is deterministic. Pending input
    /// values are excluded because they are filled in during the run.
    #[must_use]
    pub fn hash_construct(&self, urn: &Urn, spec: &ConstructSpec) -> String {
        let mut hasher = Sha256::new();

        hasher.update(urn.to_string().as_bytes());

        for (name, input) in &spec.inputs {
            hasher.update(b"input");
            hasher.update(name.as_bytes());
            if let Some(producer) = &input.depends_on {
                hasher.update(producer.to_string().as_bytes());
            }
            if input.status == InputStatus::Resolved {
                hasher.update(input.value.to_string().as_bytes());
            }
        }

        for dependency in &spec.depends_on {
            hasher.update(b"dependsOn");
            hasher.update(dependency.to_string().as_bytes());
        }

        for binding in &spec.bindings {
            hasher.update(b"binding");
            hasher.update(binding.to_string().as_bytes());
        }

        for (key, value) in &spec.options {
            hasher.update(b"option");
            hasher.update(key.as_bytes());
            hasher.update(value.to_string().as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(hash: &str) -> String {
        hash.chars().take(8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Input;

    fn urn() -> Urn {
        Urn::parse("urn:acme:shop:dev:web:construct/klotho.aws.Bucket:assets").expect("valid urn")
    }

    #[test]
    fn test_hash_deterministic() {
        let hasher = ConstructHasher::new();
        let spec = ConstructSpec::default();

        let first = hasher.hash_construct(&urn(), &spec);
        let second = hasher.hash_construct(&urn(), &spec);
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_option_change_changes_hash() {
        let hasher = ConstructHasher::new();
        let mut spec = ConstructSpec::default();
        let before = hasher.hash_construct(&urn(), &spec);

        spec.options
            .insert(String::from("versioning"), serde_json::json!(true));
        assert_ne!(before, hasher.hash_construct(&urn(), &spec));
    }

    #[test]
    fn test_pending_value_ignored() {
        let hasher = ConstructHasher::new();
        let mut spec = ConstructSpec::default();
        spec.inputs.insert(
            String::from("endpoint"),
            Input {
                value: serde_json::Value::Null,
                status: InputStatus::Pending,
                depends_on: None,
            },
        );
        let before = hasher.hash_construct(&urn(), &spec);

        if let Some(input) = spec.inputs.get_mut("endpoint") {
            input.value = serde_json::json!("resolved-later");
        }
        assert_eq!(before, hasher.hash_construct(&urn(), &spec));
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(ConstructHasher::short_hash("abcdef0123456789"), "abcdef01");
    }
}
