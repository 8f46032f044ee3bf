//! `hg config check` / `hg config-hash`
//!
//! # Invariants under test
//!
//! 1. A valid layered config passes and prints its hash.
//! 2. A rule referencing an undeclared collection fails with
//!    CONFIG_INVALID_RULES and a non-zero exit.
//! 3. `--strict` turns unused keys into a failure.
//! 4. The same layers hash identically via `config-hash` and `config check`.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;

const BASE: &str = r#"
directory:
  base_url: "https://directory.example/api"
  guild_id: "42"
  token_env: "HG_DIRECTORY_TOKEN"
entitlements:
  collections: [alpha]
  rules:
    - { kind: holder, collection: alpha, group: alpha_holder }
"#;

fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
    let p = dir.path().join(name);
    fs::write(&p, body).unwrap();
    p.to_string_lossy().to_string()
}

#[test]
fn valid_config_passes() {
    let dir = tempfile::tempdir().unwrap();
    let base = write(&dir, "base.yaml", BASE);

    Command::cargo_bin("hg")
        .unwrap()
        .args(["config", "check", &base])
        .assert()
        .success()
        .stdout(predicate::str::contains("config_ok=true"))
        .stdout(predicate::str::contains("balance_tier_policy=cumulative"));
}

#[test]
fn unknown_collection_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let base = write(&dir, "base.yaml", BASE);
    let overlay = write(
        &dir,
        "overlay.yaml",
        "entitlements:\n  rules:\n    - { kind: holder, collection: gamma, group: gamma_holder }\n",
    );

    Command::cargo_bin("hg")
        .unwrap()
        .args(["config", "check", &base, &overlay])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_INVALID_RULES"));
}

#[test]
fn strict_mode_fails_on_unused_keys() {
    let dir = tempfile::tempdir().unwrap();
    let base = write(&dir, "base.yaml", BASE);
    let overlay = write(&dir, "typo.yaml", "verification:\n  min_intervl_secs: 60\n");

    Command::cargo_bin("hg")
        .unwrap()
        .args(["config", "check", &base, &overlay])
        .assert()
        .success()
        .stdout(predicate::str::contains("unused_key=/verification/min_intervl_secs"));

    Command::cargo_bin("hg")
        .unwrap()
        .args(["config", "check", "--strict", &base, &overlay])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_UNUSED_KEYS"));
}

#[test]
fn config_hash_matches_check() {
    let dir = tempfile::tempdir().unwrap();
    let base = write(&dir, "base.yaml", BASE);

    let hash_out = Command::cargo_bin("hg")
        .unwrap()
        .args(["config-hash", &base])
        .output()
        .unwrap();
    assert!(hash_out.status.success());
    let stdout = String::from_utf8(hash_out.stdout).unwrap();
    let hash_line = stdout.lines().next().unwrap().to_string();
    assert!(hash_line.starts_with("config_hash="));

    Command::cargo_bin("hg")
        .unwrap()
        .args(["config", "check", &base])
        .assert()
        .success()
        .stdout(predicate::str::contains(hash_line));
}
