//! Multi-domain DSL engine: a domain-agnostic S-expression parser and
//! placeholder resolver (`parser`, `resolver`, `ast`) wired up to a
//! concurrent session manager (`session`), a pluggable domain contract and
//! registry (`domain`, `registry`), a five-strategy router (`router`), a
//! declarative macro/Plan-IR engine (`macros`), external service contracts
//! (`external`), and two concrete business domains (`domains`).
//!
//! Nothing in this crate executes the accumulated DSL or persists it
//! beyond what's handed to a `DataStore` implementation — it only builds
//! up, validates, and routes well-formed S-expression fragments.

pub mod ast;
pub mod domain;
pub mod domains;
pub mod error;
pub mod external;
pub mod macros;
pub mod parser;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::Domain;
use crate::registry::DomainRegistry;
use crate::router::{DomainAliases, Router};
use crate::session::{SessionManager, SessionManagerConfig};

/// Top-level engine configuration. Defaults match what the teacher's
/// binaries hardcode inline; every field is overridable via an
/// environment variable of the same name, uppercased and prefixed with
/// `DSL_ENGINE_` (read through [`EngineConfig::from_env`], loaded via
/// `dotenvy` the way the teacher's server binaries pull `DATABASE_URL`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long an idle session survives before `cleanup_expired` evicts it.
    pub session_idle_timeout_secs: u64,
    /// Interval `DomainRegistry::run_health_probe` is expected to be
    /// invoked at by whatever scheduler owns the registry.
    pub health_probe_interval_secs: u64,
    /// Minimum keyword hits the router's keyword-match strategy requires
    /// before it will commit to a domain (spec §5 "KeywordMatch").
    pub router_keyword_hit_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_idle_timeout_secs: 24 * 60 * 60,
            health_probe_interval_secs: 60,
            router_keyword_hit_threshold: 2,
        }
    }
}

impl EngineConfig {
    /// Loads `.env` (if present) then overlays any `DSL_ENGINE_*`
    /// environment variables on top of the defaults. Malformed values for
    /// an overridden variable fall back to the default rather than
    /// failing startup, since none of these fields are safety-critical.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("DSL_ENGINE_SESSION_IDLE_TIMEOUT_SECS") {
            if let Ok(value) = raw.parse() {
                config.session_idle_timeout_secs = value;
            }
        }
        if let Ok(raw) = std::env::var("DSL_ENGINE_HEALTH_PROBE_INTERVAL_SECS") {
            if let Ok(value) = raw.parse() {
                config.health_probe_interval_secs = value;
            }
        }
        if let Ok(raw) = std::env::var("DSL_ENGINE_ROUTER_KEYWORD_HIT_THRESHOLD") {
            if let Ok(value) = raw.parse() {
                config.router_keyword_hit_threshold = value;
            }
        }

        config
    }

    fn session_manager_config(&self) -> SessionManagerConfig {
        SessionManagerConfig {
            idle_timeout: Duration::from_secs(self.session_idle_timeout_secs),
        }
    }

    fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.health_probe_interval_secs)
    }
}

/// Initializes the process-wide tracing subscriber from `RUST_LOG` (or
/// `info` if unset), mirroring the teacher's `tracing_subscriber::fmt::init()`
/// call in its server binaries. Safe to call more than once; later calls
/// are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Owns the registry, router, and session manager for one running engine
/// instance. This is the handle an embedding application holds; domains
/// are registered onto it at startup and every subsequent interaction goes
/// through [`Engine::registry`], [`Engine::router`], or [`Engine::sessions`].
pub struct Engine {
    registry: Arc<DomainRegistry>,
    router: Router,
    sessions: SessionManager,
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let registry = DomainRegistry::new(config.probe_interval());
        let router = Router::with_keyword_hit_threshold(
            registry.clone(),
            DomainAliases::new(),
            config.router_keyword_hit_threshold,
        );
        let sessions = SessionManager::new(config.session_manager_config());
        Self {
            registry,
            router,
            sessions,
            config,
        }
    }

    /// Builds an engine with both concrete domains already registered.
    /// Returns an error only if the two domains somehow collide on name
    /// or verb ownership, which would indicate a packaging bug rather
    /// than a runtime condition.
    pub async fn with_default_domains(config: EngineConfig) -> Result<Self, error::EngineError> {
        let engine = Self::new(config);
        engine
            .registry
            .register(Arc::new(domains::OnboardingDomain::new()) as Arc<dyn Domain>)
            .await?;
        engine
            .registry
            .register(Arc::new(domains::HedgeFundDomain::new()) as Arc<dyn Domain>)
            .await?;
        Ok(engine)
    }

    pub fn registry(&self) -> &Arc<DomainRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
