//! Reads an exported stack snapshot into outputs and per-resource state.
//!
//! Generated programs publish two synthetic maps on the root stack resource:
//! `$outputs` with the construct's outputs, and `$urns` mapping each stable
//! [`ResourceId`] to the engine's own resource handle. The handle map is
//! inverted to re-key the snapshot's resources by stable identity.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::error::StackError;

use super::resource_id::ResourceId;

/// Type of the root resource carrying the synthetic maps.
pub const ROOT_STACK_TYPE: &str = "pulumi:pulumi:Stack";

/// Output key holding the construct's outputs.
pub const OUTPUTS_KEY: &str = "$outputs";

/// Output key holding the identity map.
pub const URNS_KEY: &str = "$urns";

/// Resource type prefixes that never carry a stable identity.
const INTERNAL_TYPE_PREFIXES: [&str; 2] = ["pulumi:", "docker:"];

/// Decoded view of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StackState {
    /// Construct outputs published by the program.
    pub outputs: BTreeMap<String, Value>,
    /// Resource state keyed by stable identity.
    pub resources: BTreeMap<ResourceId, Value>,
}

#[derive(Debug, Deserialize)]
struct Export {
    deployment: Deployment,
}

#[derive(Debug, Default, Deserialize)]
struct Deployment {
    #[serde(default)]
    resources: Vec<SnapshotResource>,
}

#[derive(Debug, Deserialize)]
struct SnapshotResource {
    urn: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    outputs: Map<String, Value>,
}

/// Snapshot decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackStateReader;

impl StackStateReader {
    /// Decodes an exported snapshot.
    ///
    /// Accepts either the full export document or its bare `deployment`
    /// object. Resources whose handle has no stable identity are skipped with
    /// a warning.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::MissingMeta`] if the root resource or either
    /// synthetic map is absent, or [`StackError::MalformedSnapshot`] if the
    /// document does not have the expected shape.
    pub fn read(snapshot: &Value) -> Result<StackState, StackError> {
        let deployment = if snapshot.get("deployment").is_some() {
            serde_json::from_value::<Export>(snapshot.clone()).map(|e| e.deployment)
        } else {
            serde_json::from_value::<Deployment>(snapshot.clone())
        }
        .map_err(|e| StackError::MalformedSnapshot {
            message: e.to_string(),
        })?;

        let root = deployment
            .resources
            .iter()
            .find(|r| r.kind == ROOT_STACK_TYPE)
            .ok_or_else(|| missing("root stack resource"))?;

        let outputs: BTreeMap<String, Value> = match root.outputs.get(OUTPUTS_KEY) {
            Some(Value::Object(map)) => map.clone().into_iter().collect(),
            Some(other) => {
                return Err(StackError::MalformedSnapshot {
                    message: format!("{OUTPUTS_KEY} is not an object: {other}"),
                });
            }
            None => return Err(missing(OUTPUTS_KEY)),
        };

        let ids_by_handle = match root.outputs.get(URNS_KEY) {
            Some(Value::Object(map)) => invert_identity_map(map),
            Some(other) => {
                return Err(StackError::MalformedSnapshot {
                    message: format!("{URNS_KEY} is not an object: {other}"),
                });
            }
            None => return Err(missing(URNS_KEY)),
        };

        let mut resources = BTreeMap::new();
        for resource in &deployment.resources {
            if INTERNAL_TYPE_PREFIXES
                .iter()
                .any(|prefix| resource.kind.starts_with(prefix))
            {
                continue;
            }
            let Some(id) = ids_by_handle.get(&resource.urn) else {
                warn!(handle = %resource.urn, "Resource has no stable identity, skipping");
                continue;
            };
            resources.insert(id.clone(), Value::Object(resource.outputs.clone()));
        }

        debug!(
            outputs = outputs.len(),
            resources = resources.len(),
            "Read stack snapshot"
        );
        Ok(StackState { outputs, resources })
    }
}

fn invert_identity_map(map: &Map<String, Value>) -> HashMap<String, ResourceId> {
    let mut inverted = HashMap::with_capacity(map.len());
    for (raw_id, handle) in map {
        let Some(handle) = handle.as_str() else {
            warn!(id = %raw_id, "Identity map value is not a string, skipping");
            continue;
        };
        match ResourceId::parse(raw_id) {
            Ok(id) => {
                inverted.insert(handle.to_string(), id);
            }
            Err(e) => warn!(id = %raw_id, error = %e, "Unparseable resource id, skipping"),
        }
    }
    inverted
}

fn missing(what: &str) -> StackError {
    StackError::MissingMeta {
        what: what.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn export(root_outputs: Value) -> Value {
        json!({
            "version": 3,
            "deployment": {
                "resources": [
                    {
                        "urn": "urn:pulumi:db::db::pulumi:pulumi:Stack::db-db",
                        "type": "pulumi:pulumi:Stack",
                        "outputs": root_outputs
                    },
                    {
                        "urn": "urn:pulumi:db::db::pulumi:providers:aws::default",
                        "type": "pulumi:providers:aws",
                        "outputs": {}
                    },
                    {
                        "urn": "urn:pulumi:db::db::aws:rds/instance:Instance::main",
                        "type": "aws:rds/instance:Instance",
                        "outputs": { "endpoint": "db.internal:5432" }
                    },
                    {
                        "urn": "urn:pulumi:db::db::aws:ec2/securityGroup:SecurityGroup::sg",
                        "type": "aws:ec2/securityGroup:SecurityGroup",
                        "outputs": { "id": "sg-123" }
                    }
                ]
            }
        })
    }

    #[test]
    fn test_reads_outputs_and_rekeys_resources() {
        let snapshot = export(json!({
            "$outputs": { "endpoint": "db.internal:5432" },
            "$urns": {
                "aws:rds_instance:main": "urn:pulumi:db::db::aws:rds/instance:Instance::main"
            }
        }));

        let state = StackStateReader::read(&snapshot).expect("readable snapshot");
        assert_eq!(state.outputs["endpoint"], json!("db.internal:5432"));

        let id = ResourceId::parse("aws:rds_instance:main").expect("valid id");
        assert_eq!(state.resources.len(), 1);
        assert_eq!(state.resources[&id]["endpoint"], json!("db.internal:5432"));
    }

    #[test]
    fn test_skips_bad_identities() {
        let snapshot = export(json!({
            "$outputs": {},
            "$urns": {
                "aws:rds_instance:main": 42,
                "not an id": "urn:pulumi:db::db::aws:ec2/securityGroup:SecurityGroup::sg"
            }
        }));

        let state = StackStateReader::read(&snapshot).expect("readable snapshot");
        assert!(state.resources.is_empty());
    }

    #[test]
    fn test_missing_meta_is_an_error() {
        let err = StackStateReader::read(&export(json!({ "$outputs": {} })))
            .expect_err("no identity map");
        assert!(matches!(err, StackError::MissingMeta { ref what } if what == URNS_KEY));

        let err = StackStateReader::read(&json!({ "resources": [] })).expect_err("no root");
        assert!(matches!(err, StackError::MissingMeta { .. }));
    }

    #[test]
    fn test_null_synthetic_maps_are_malformed() {
        let err = StackStateReader::read(&export(json!({ "$outputs": null, "$urns": {} })))
            .expect_err("null outputs");
        assert!(matches!(err, StackError::MalformedSnapshot { .. }));

        let err = StackStateReader::read(&export(json!({ "$outputs": {}, "$urns": null })))
            .expect_err("null identity map");
        assert!(matches!(err, StackError::MalformedSnapshot { .. }));
    }

    #[test]
    fn test_malformed_snapshot() {
        let err = StackStateReader::read(&json!({ "deployment": { "resources": 5 } }))
            .expect_err("malformed");
        assert!(matches!(err, StackError::MalformedSnapshot { .. }));
    }
}
