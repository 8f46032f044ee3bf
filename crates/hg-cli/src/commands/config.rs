use anyhow::Result;
use hg_config::{load_layered_yaml, report_unused_keys, UnusedKeyPolicy, VerifierConfig};

/// Load, hash and validate config offline; the same checks startup runs.
pub fn check(paths: &[String], strict: bool) -> Result<()> {
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let loaded = load_layered_yaml(&refs)?;

    let policy = if strict {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };
    let report = report_unused_keys(&loaded.config_json, policy)?;
    for ptr in &report.unused_leaf_pointers {
        println!("unused_key={ptr}");
    }

    let cfg = VerifierConfig::from_config_json(&loaded.config_json)?;

    println!("config_ok=true");
    println!("config_hash={}", loaded.config_hash);
    println!("rules={}", cfg.rules.rules().len());
    println!("balance_tier_policy={}", cfg.rules.policy().as_str());
    println!("protected_groups={}", cfg.protected.len());
    println!("min_interval_secs={}", cfg.min_interval.as_secs());
    println!("token_env={}", cfg.directory.token_env);
    Ok(())
}
