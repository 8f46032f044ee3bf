//! Config hash stability
//!
//! GREEN when:
//! - `load_layered_yaml_from_strings` called twice on the same inputs returns
//!   identical config_hash.
//! - Reordering keys within YAML doesn't change the hash (canonicalization).
//! - An overlay that changes a value changes the hash.

use hg_config::load_layered_yaml_from_strings;

const BASE_YAML: &str = r#"
verification:
  min_interval_secs: 300
rate_limit:
  max_calls: 40
  window_ms: 1000
directory:
  base_url: "https://directory.example/api"
  guild_id: "42"
  token_env: "HG_DIRECTORY_TOKEN"
"#;

const BASE_YAML_REORDERED: &str = r#"
directory:
  token_env: "HG_DIRECTORY_TOKEN"
  guild_id: "42"
  base_url: "https://directory.example/api"
rate_limit:
  window_ms: 1000
  max_calls: 40
verification:
  min_interval_secs: 300
"#;

const OVERLAY_YAML: &str = r#"
verification:
  min_interval_secs: 60
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn reordered_keys_produce_same_hash() {
    let original = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let reordered = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(original.config_hash, reordered.config_hash);
}

#[test]
fn overlay_changes_value_and_hash() {
    let base = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let layered = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();

    assert_ne!(base.config_hash, layered.config_hash);
    assert_eq!(
        layered.config_json["verification"]["min_interval_secs"],
        serde_json::json!(60)
    );
    // Untouched siblings survive the merge.
    assert_eq!(layered.config_json["rate_limit"]["max_calls"], serde_json::json!(40));
}
