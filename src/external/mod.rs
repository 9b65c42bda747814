//! External collaborators (C10, spec §6): typed interfaces this crate
//! depends on but does not implement — the LLM backend, the relational
//! session/DSL store, and the attribute dictionary service.
//!
//! Grounded in the teacher's `agentic/llm_client.rs::LlmClient` trait (same
//! `chat`/`chat_json` shape, generalised to a single `generate` entry point
//! with an explicit deadline per spec §5 "every long-running operation...
//! accepts a deadline") and `data_dictionary/mod.rs::DictionaryService`
//! (kept verbatim as a trait name and `get_attribute` method). The
//! `DataStore` trait has no single teacher file to mirror — it's modelled
//! on the same async-trait, `Result<_, String>`-light-error shape those two
//! use, trimmed to the operations spec §6 actually lists.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::GenerationError;

/// `LlmClient` (spec §6): `Generate(prompt, system_prompt, deadline) -> text
/// | error`. The core supplies the prompt (vocabulary summary, current
/// `BuiltDSL`, user instruction); the client returns free text the domain's
/// generator extracts a DSL fragment from.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: &str,
        deadline: Duration,
    ) -> Result<String, GenerationError>;

    fn model_name(&self) -> &str;
}

/// Deterministic stub used by tests and doctests in place of a real model —
/// it never calls out, so assertions don't depend on network or API keys.
/// Echoes back a canned response keyed by a substring of the prompt, or a
/// retryable timeout error if `deadline` is zero (spec §5 "Timeouts on LLM
/// calls surface as a domain-specific `GenerationError`").
pub struct StubLlmClient {
    responses: HashMap<String, String>,
}

impl StubLlmClient {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
        }
    }

    pub fn with_response(mut self, prompt_contains: &str, response: &str) -> Self {
        self.responses
            .insert(prompt_contains.to_string(), response.to_string());
        self
    }
}

impl Default for StubLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for StubLlmClient {
    async fn generate(
        &self,
        prompt: &str,
        _system_prompt: &str,
        deadline: Duration,
    ) -> Result<String, GenerationError> {
        if deadline.is_zero() {
            return Err(GenerationError::retryable("llm call exceeded its deadline"));
        }
        self.responses
            .iter()
            .find(|(k, _)| prompt.contains(k.as_str()))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| {
                GenerationError::terminal("stub llm client has no canned response for this prompt")
            })
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}

/// Minimal persisted session record, as `DataStore::LoadSession` /
/// `SaveSession` see it (spec §6). Deliberately thinner than
/// [`crate::session::Session`] — it carries only what's worth persisting,
/// not the in-memory locking structure around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub session_id: String,
    pub domain: String,
    pub built_dsl: String,
    pub context: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

/// `DataStore` (spec §6): the relational store for accumulated DSL
/// programs, sessions, and (for the optional product-driven workflow
/// feature) product-requirement rows.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn get_latest_dsl(&self, cbu_id: &str) -> Result<Option<String>, String>;
    async fn insert_dsl_with_state(
        &self,
        cbu_id: &str,
        dsl: &str,
        state: &str,
    ) -> Result<String, String>;

    async fn load_session(&self, id: &str) -> Result<Option<PersistedSession>, String>;
    async fn save_session(&self, session: PersistedSession) -> Result<(), String>;
    async fn delete_session(&self, id: &str) -> Result<(), String>;
    async fn list_active_sessions(&self) -> Result<Vec<String>, String>;
    async fn cleanup_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, String>;

    /// Seeds the product-requirement catalogue. A startup-time operation
    /// for the optional product-driven workflow feature (spec §6); not
    /// itself part of the core hardness.
    async fn seed_product_requirements(&self) -> Result<(), String>;
    async fn product_requirements_for(&self, product: &str) -> Result<Vec<String>, String>;
}

/// In-memory `DataStore` test double (SPEC_FULL §2 "an in-memory `DataStore`
/// test double"). Never used outside tests — this crate has no real
/// persistence engine (spec §1 Non-goals).
#[derive(Default)]
pub struct InMemoryDataStore {
    dsl_versions: Mutex<HashMap<String, Vec<(String, String)>>>,
    sessions: Mutex<HashMap<String, PersistedSession>>,
    product_requirements: Mutex<HashMap<String, Vec<String>>>,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataStore for InMemoryDataStore {
    async fn get_latest_dsl(&self, cbu_id: &str) -> Result<Option<String>, String> {
        let versions = self.dsl_versions.lock().await;
        Ok(versions
            .get(cbu_id)
            .and_then(|v| v.last())
            .map(|(dsl, _)| dsl.clone()))
    }

    async fn insert_dsl_with_state(
        &self,
        cbu_id: &str,
        dsl: &str,
        state: &str,
    ) -> Result<String, String> {
        let mut versions = self.dsl_versions.lock().await;
        let entry = versions.entry(cbu_id.to_string()).or_default();
        entry.push((dsl.to_string(), state.to_string()));
        Ok(format!("{cbu_id}-v{}", entry.len()))
    }

    async fn load_session(&self, id: &str) -> Result<Option<PersistedSession>, String> {
        Ok(self.sessions.lock().await.get(id).cloned())
    }

    async fn save_session(&self, session: PersistedSession) -> Result<(), String> {
        self.sessions
            .lock()
            .await
            .insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<(), String> {
        self.sessions.lock().await.remove(id);
        Ok(())
    }

    async fn list_active_sessions(&self) -> Result<Vec<String>, String> {
        Ok(self.sessions.lock().await.keys().cloned().collect())
    }

    async fn cleanup_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, String> {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, s| now - s.last_used < chrono::Duration::days(1));
        Ok((before - sessions.len()) as u64)
    }

    async fn seed_product_requirements(&self) -> Result<(), String> {
        let mut reqs = self.product_requirements.lock().await;
        reqs.entry("CUSTODY".to_string())
            .or_insert_with(|| vec!["kyc.start".to_string(), "resources.plan".to_string()]);
        reqs.entry("FUND_ACCOUNTING".to_string())
            .or_insert_with(|| vec!["services.discover".to_string()]);
        Ok(())
    }

    async fn product_requirements_for(&self, product: &str) -> Result<Vec<String>, String> {
        Ok(self
            .product_requirements
            .lock()
            .await
            .get(product)
            .cloned()
            .unwrap_or_default())
    }
}

/// `Attribute` (spec §6): the universal semantic type shared across
/// domains. `Mask` is the source's term for a data type hint, kept verbatim
/// rather than renamed to `data_type` to match the wire contract other
/// collaborators (the dictionary web service) already expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribute {
    pub attribute_id: String,
    pub name: String,
    pub description: String,
    pub mask: String,
    /// Business-domain tag (e.g. "compliance"), distinct from a registry
    /// `Domain` name — spec §6 is explicit about this not being the same
    /// axis as C5's domain registry.
    pub domain: String,
    pub source: String,
    pub sink: String,
}

/// `DictionaryService` (spec §6): `GetAttribute(uuid) -> Attribute`. Also
/// carries the catalog-backed slot-suggestion lookup the macro engine uses
/// (SPEC_FULL §4 "Macro catalog-backed slot suggestions").
#[async_trait]
pub trait DictionaryService: Send + Sync {
    async fn get_attribute(&self, attribute_id: &str) -> Result<Option<Attribute>, String>;

    /// Suggested values for a macro placeholder, sourced from whatever
    /// catalogue this service backs onto (e.g. known product codes,
    /// previously-seen entity names). Empty when the service has nothing
    /// to suggest — never an error.
    async fn suggestions_for(&self, placeholder_name: &str) -> Vec<String>;
}

/// In-memory dictionary test double.
#[derive(Default)]
pub struct InMemoryDictionary {
    attributes: HashMap<String, Attribute>,
    suggestions: HashMap<String, Vec<String>>,
}

impl InMemoryDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes
            .insert(attribute.attribute_id.clone(), attribute);
        self
    }

    pub fn with_suggestions(mut self, placeholder: &str, values: &[&str]) -> Self {
        self.suggestions.insert(
            placeholder.to_string(),
            values.iter().map(|s| s.to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl DictionaryService for InMemoryDictionary {
    async fn get_attribute(&self, attribute_id: &str) -> Result<Option<Attribute>, String> {
        Ok(self.attributes.get(attribute_id).cloned())
    }

    async fn suggestions_for(&self, placeholder_name: &str) -> Vec<String> {
        self.suggestions
            .get(placeholder_name)
            .cloned()
            .unwrap_or_default()
    }
}

/// Shared handle type used to thread these collaborators through the
/// engine without the core depending on any concrete backend (spec §9
/// "Global state... constructed explicitly and passed down").
pub type SharedLlmClient = Arc<dyn LlmClient>;
pub type SharedDataStore = Arc<dyn DataStore>;
pub type SharedDictionary = Arc<dyn DictionaryService>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn stub_llm_returns_canned_response() {
        let client = StubLlmClient::new().with_response("create a case", "(case.create)");
        let out = client
            .generate("please create a case now", "system", StdDuration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out, "(case.create)");
    }

    #[tokio::test]
    async fn stub_llm_times_out_retryably_on_zero_deadline() {
        let client = StubLlmClient::new();
        let err = client
            .generate("anything", "system", StdDuration::from_secs(0))
            .await
            .unwrap_err();
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn in_memory_data_store_round_trips_dsl_versions() {
        let store = InMemoryDataStore::new();
        store
            .insert_dsl_with_state("CBU-1", "(case.create)", "CREATE")
            .await
            .unwrap();
        let latest = store.get_latest_dsl("CBU-1").await.unwrap();
        assert_eq!(latest, Some("(case.create)".to_string()));
    }

    #[tokio::test]
    async fn in_memory_dictionary_serves_attribute_and_suggestions() {
        let dict = InMemoryDictionary::new()
            .with_attribute(Attribute {
                attribute_id: "uuid-1".to_string(),
                name: "entity.legal_name".to_string(),
                description: "Legal entity name".to_string(),
                mask: "STRING".to_string(),
                domain: "compliance".to_string(),
                source: "onboarding-form".to_string(),
                sink: "entity_registry".to_string(),
            })
            .with_suggestions("product", &["CUSTODY", "FUND_ACCOUNTING"]);

        let attr = dict.get_attribute("uuid-1").await.unwrap().unwrap();
        assert_eq!(attr.name, "entity.legal_name");
        assert_eq!(dict.suggestions_for("product").await.len(), 2);
    }
}
