//! Domain Registry (C5, spec §4.5): thread-safe name→domain map with
//! health monitoring and discovery.
//!
//! Grounded in the teacher's `dsl/domain_registry.rs::DomainRegistry`
//! (`HashMap<String, Box<dyn DomainHandler>>`), generalised to enforce the
//! spec's verb-ownership-uniqueness invariant at registration time and to
//! run a background health probe per domain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::{Domain, HealthStatus};
use crate::error::EngineError;

struct RegisteredDomain {
    domain: Arc<dyn Domain>,
    last_health: RwLock<HealthStatus>,
}

/// Thread-safe name→domain map. Writes (registration) are rare relative to
/// reads (lookup), matching spec §5's shared-resource policy.
pub struct DomainRegistry {
    domains: RwLock<HashMap<String, Arc<RegisteredDomain>>>,
    /// `verb name -> owning domain name`, maintained alongside `domains` to
    /// enforce the registry uniqueness invariant (spec §8) in O(1).
    verb_owners: RwLock<HashMap<String, String>>,
    probe_interval: Duration,
    probe_generation: AtomicU64,
}

impl DomainRegistry {
    /// Builds the registry and immediately spawns its background health
    /// probe loop, ticking at `probe_interval` (spec §4.5: "Registration
    /// also spawns a background health probe on a configurable interval,
    /// storing the last result"). The loop holds only a `Weak` reference
    /// and exits once the last `Arc<DomainRegistry>` is dropped.
    pub fn new(probe_interval: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            spawn_probe_loop(weak.clone(), probe_interval);
            Self {
                domains: RwLock::new(HashMap::new()),
                verb_owners: RwLock::new(HashMap::new()),
                probe_interval,
                probe_generation: AtomicU64::new(0),
            }
        })
    }

    /// Registers `domain`. Rejects a duplicate name, and rejects any
    /// domain whose vocabulary claims a verb already owned by another
    /// registered domain (spec §4.5, §8 "Registry uniqueness").
    pub async fn register(&self, domain: Arc<dyn Domain>) -> Result<(), EngineError> {
        let name = domain.name().to_string();

        let mut domains = self.domains.write().await;
        if domains.contains_key(&name) {
            return Err(EngineError::DuplicateDomainName(name));
        }

        let mut verb_owners = self.verb_owners.write().await;
        for verb in domain.vocabulary().verbs.keys() {
            if let Some(existing) = verb_owners.get(verb) {
                return Err(EngineError::DuplicateVerbOwnership {
                    verb: verb.clone(),
                    existing_domain: existing.clone(),
                    new_domain: name,
                });
            }
        }
        for verb in domain.vocabulary().verbs.keys() {
            verb_owners.insert(verb.clone(), name.clone());
        }

        info!(domain = %name, verb_count = domain.vocabulary().verbs.len(), "registered domain");
        domains.insert(
            name,
            Arc::new(RegisteredDomain {
                domain,
                last_health: RwLock::new(HealthStatus::Healthy),
            }),
        );
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Domain>> {
        self.domains
            .read()
            .await
            .get(name)
            .map(|d| d.domain.clone())
    }

    pub async fn list(&self) -> Vec<Arc<dyn Domain>> {
        let domains = self.domains.read().await;
        let mut names: Vec<&String> = domains.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|n| domains.get(n).unwrap().domain.clone())
            .collect()
    }

    pub async fn find_by_verb(&self, verb: &str) -> Option<Arc<dyn Domain>> {
        let owner = self.verb_owners.read().await.get(verb).cloned()?;
        self.get(&owner).await
    }

    pub async fn find_by_category(&self, category: &str) -> Vec<Arc<dyn Domain>> {
        let domains = self.list().await;
        domains
            .into_iter()
            .filter(|d| d.vocabulary().categories().iter().any(|c| c == category))
            .collect()
    }

    /// Reads the cached health snapshot for every registered domain.
    pub async fn health_all(&self) -> HashMap<String, HealthStatus> {
        let domains = self.domains.read().await;
        let mut out = HashMap::new();
        for (name, entry) in domains.iter() {
            out.insert(name.clone(), entry.last_health.read().await.clone());
        }
        out
    }

    /// Runs one health-probe sweep over every registered domain, updating
    /// the cached snapshot `health_all` reads from. Driven automatically by
    /// the background loop spawned in `new`, but kept as a standalone
    /// public method so tests can call it deterministically instead of
    /// racing the timer.
    pub async fn run_health_probe(&self) {
        self.probe_generation.fetch_add(1, Ordering::Relaxed);
        let domains = self.domains.read().await;
        for entry in domains.values() {
            let status = entry.domain.health();
            if !matches!(status, HealthStatus::Healthy) {
                warn!(domain = entry.domain.name(), ?status, "domain health degraded");
            }
            *entry.last_health.write().await = status;
        }
    }

    pub fn probe_interval(&self) -> Duration {
        self.probe_interval
    }
}

/// Background health-probe loop, spawned once per `DomainRegistry`. Holds
/// only a `Weak` handle so it doesn't keep the registry alive, and exits
/// once it can no longer be upgraded.
fn spawn_probe_loop(registry: Weak<DomainRegistry>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; registration sets the initial snapshot
        loop {
            ticker.tick().await;
            match registry.upgrade() {
                Some(registry) => registry.run_health_probe().await,
                None => return,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::hedge_fund::HedgeFundDomain;
    use crate::domains::onboarding::OnboardingDomain;

    #[tokio::test]
    async fn registers_distinct_domains() {
        let registry = DomainRegistry::new(Duration::from_secs(30));
        registry
            .register(Arc::new(OnboardingDomain::new()))
            .await
            .unwrap();
        registry
            .register(Arc::new(HedgeFundDomain::new()))
            .await
            .unwrap();
        assert_eq!(registry.list().await.len(), 2);
    }

    #[tokio::test]
    async fn rejects_duplicate_domain_name() {
        let registry = DomainRegistry::new(Duration::from_secs(30));
        registry
            .register(Arc::new(OnboardingDomain::new()))
            .await
            .unwrap();
        let err = registry
            .register(Arc::new(OnboardingDomain::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateDomainName(_)));
    }

    #[tokio::test]
    async fn find_by_verb_locates_owning_domain() {
        let registry = DomainRegistry::new(Duration::from_secs(30));
        registry
            .register(Arc::new(OnboardingDomain::new()))
            .await
            .unwrap();
        registry
            .register(Arc::new(HedgeFundDomain::new()))
            .await
            .unwrap();

        let owner = registry.find_by_verb("case.create").await.unwrap();
        assert_eq!(owner.name(), "onboarding");

        let owner = registry.find_by_verb("subscribe.request").await.unwrap();
        assert_eq!(owner.name(), "hedge-fund-investor");
    }

    #[tokio::test]
    async fn health_all_reflects_last_probe() {
        let registry = DomainRegistry::new(Duration::from_secs(30));
        registry
            .register(Arc::new(OnboardingDomain::new()))
            .await
            .unwrap();
        registry.run_health_probe().await;
        let health = registry.health_all().await;
        assert_eq!(health.get("onboarding"), Some(&HealthStatus::Healthy));
    }
}
