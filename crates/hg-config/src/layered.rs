use std::fs;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::guard::reject_secret_literals;

/// Merged configuration plus its identity.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Hex SHA-256 of `canonical_json`.
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

/// Read `paths` in order (base first) and merge them.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let docs = paths
        .iter()
        .map(|p| fs::read_to_string(p).with_context(|| format!("CONFIG_READ_FAILED path={p}")))
        .collect::<Result<Vec<String>>>()?;
    let refs: Vec<&str> = docs.iter().map(String::as_str).collect();
    load_layered_yaml_from_strings(&refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Map::new());
    for (layer, raw) in yaml_docs.iter().enumerate() {
        let doc: serde_yaml::Value =
            serde_yaml::from_str(raw).with_context(|| format!("invalid yaml in layer {layer}"))?;
        // An empty file parses as null; treat it as an empty layer.
        if doc.is_null() {
            continue;
        }
        let doc = serde_json::to_value(doc)
            .with_context(|| format!("layer {layer}: yaml->json conversion failed"))?;
        overlay(&mut merged, doc);
    }

    reject_secret_literals(&merged)?;

    // serde_json's default Map is ordered, so this is already key-sorted.
    let canonical_json = serde_json::to_string(&merged).context("canonical json serialize failed")?;
    let config_hash = hex::encode(Sha256::digest(canonical_json.as_bytes()));
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

fn overlay(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base_map), Value::Object(layer_map)) => {
            for (key, value) in layer_map {
                match base_map.get_mut(&key) {
                    Some(existing) => overlay(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overlay_merges_maps_and_replaces_sequences() {
        let mut base = json!({"rules": [1, 2], "directory": {"guild_id": "1"}});
        overlay(&mut base, json!({"rules": [3], "directory": {"base_url": "u"}}));
        assert_eq!(
            base,
            json!({"rules": [3], "directory": {"guild_id": "1", "base_url": "u"}})
        );
    }

    #[test]
    fn empty_layer_is_ignored() {
        let a = load_layered_yaml_from_strings(&["verification:\n  min_interval_secs: 60\n"]).unwrap();
        let b = load_layered_yaml_from_strings(&["verification:\n  min_interval_secs: 60\n", ""])
            .unwrap();
        assert_eq!(a.config_hash, b.config_hash);
    }
}
