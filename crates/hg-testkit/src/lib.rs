//! hg-testkit
//!
//! In-process collaborators for exercising the verification pipeline without
//! Postgres or a live directory:
//! - [`InMemoryStore`]: storage with compare-and-set and fault injection
//! - [`ScriptedDirectory`]: directory fake with per-group scripted failures
//! - [`CountingGate`]: outbound gate that counts admissions
//! - [`Harness`]: all of the above wired into a `VerificationOrchestrator`

mod directory;
mod gate;
mod store;

pub use directory::{DirectoryCall, ScriptedDirectory};
pub use gate::CountingGate;
pub use store::InMemoryStore;

use std::sync::Arc;
use std::time::Duration;

use hg_entitlements::{
    BalanceTierPolicy, EntitlementRule, EntitlementRuleSet, EntitlementSet, ProtectedGroupSet,
    RuleSetSpec,
};
use hg_runtime::{DirectoryReconciler, OrchestratorConfig, OutboundGate, VerificationOrchestrator};

pub fn set(items: &[&str]) -> EntitlementSet {
    items.iter().copied().collect()
}

/// `alpha` and `beta` collections: holder tiers, an alpha whale tier at 10,
/// four balance tiers (2500/10000/25000/50000) and a full-set aggregate.
pub fn community_rules(policy: BalanceTierPolicy) -> EntitlementRuleSet {
    let tier = |min_balance: u64, group: &str| EntitlementRule::BalanceTier {
        min_balance,
        group: group.into(),
    };
    let spec = RuleSetSpec {
        balance_tier_policy: policy,
        collections: vec!["alpha".into(), "beta".into()],
        rules: vec![
            EntitlementRule::Holder {
                collection: "alpha".into(),
                group: "alpha_holder".into(),
            },
            EntitlementRule::Whale {
                collection: "alpha".into(),
                min_count: 10,
                group: "alpha_whale".into(),
            },
            EntitlementRule::Holder {
                collection: "beta".into(),
                group: "beta_holder".into(),
            },
            tier(2_500, "beginner"),
            tier(10_000, "builder"),
            tier(25_000, "whale_tier"),
            tier(50_000, "legend"),
            EntitlementRule::Aggregate {
                requires: vec!["alpha".into(), "beta".into()],
                group: "full_set".into(),
            },
        ],
    };
    // Fixed, known-valid spec.
    match EntitlementRuleSet::new(spec) {
        Ok(rules) => rules,
        Err(e) => panic!("community rule set invalid: {e}"),
    }
}

pub fn protected(items: &[&str]) -> ProtectedGroupSet {
    items.iter().copied().collect()
}

/// Orchestrator over in-memory collaborators, with handles kept for asserts.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub directory: Arc<ScriptedDirectory>,
    pub gate: Arc<CountingGate>,
    pub orchestrator: Arc<VerificationOrchestrator>,
}

pub struct HarnessBuilder {
    rules: EntitlementRuleSet,
    protected: ProtectedGroupSet,
    config: OrchestratorConfig,
    directory_timeout: Duration,
    inner_gate: Option<Arc<dyn OutboundGate>>,
    mirror: Option<hg_audit::AuditWriter>,
    store: Option<Arc<InMemoryStore>>,
}

impl HarnessBuilder {
    pub fn protected(mut self, groups: &[&str]) -> Self {
        self.protected = protected(groups);
        self
    }

    pub fn min_interval(mut self, d: Duration) -> Self {
        self.config.min_interval = d;
        self
    }

    pub fn directory_timeout(mut self, d: Duration) -> Self {
        self.directory_timeout = d;
        self
    }

    /// Put a real gate (e.g. a `RateLimiter`) behind the counting gate.
    pub fn gate(mut self, inner: Arc<dyn OutboundGate>) -> Self {
        self.inner_gate = Some(inner);
        self
    }

    pub fn audit_mirror(mut self, writer: hg_audit::AuditWriter) -> Self {
        self.mirror = Some(writer);
        self
    }

    /// Share another harness's store, as a second process would share the DB.
    pub fn store(mut self, store: Arc<InMemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Harness {
        let store = self.store.unwrap_or_default();
        let directory = Arc::new(ScriptedDirectory::new());
        let gate = Arc::new(match self.inner_gate {
            Some(inner) => CountingGate::wrapping(inner),
            None => CountingGate::new(),
        });

        let mut reconciler = DirectoryReconciler::new(
            directory.clone(),
            gate.clone(),
            store.clone(),
            self.directory_timeout,
        );
        if let Some(w) = self.mirror {
            reconciler = reconciler.with_mirror(w);
        }

        let orchestrator = Arc::new(VerificationOrchestrator::new(
            self.rules,
            self.protected,
            store.clone(),
            reconciler,
            gate.clone(),
            self.config,
        ));

        Harness {
            store,
            directory,
            gate,
            orchestrator,
        }
    }
}

impl Harness {
    /// Community rules, cumulative tiers, no protected groups, no throttle.
    pub fn builder() -> HarnessBuilder {
        Self::builder_with_rules(community_rules(BalanceTierPolicy::Cumulative))
    }

    pub fn builder_with_rules(rules: EntitlementRuleSet) -> HarnessBuilder {
        HarnessBuilder {
            rules,
            protected: ProtectedGroupSet::empty(),
            config: OrchestratorConfig {
                min_interval: Duration::ZERO,
                ownership_timeout: Duration::from_secs(5),
            },
            directory_timeout: Duration::from_secs(5),
            inner_gate: None,
            mirror: None,
            store: None,
        }
    }
}
