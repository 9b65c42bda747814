//! Session Manager (C3, spec §4.3): the single source of truth for the
//! accumulated DSL document. No code path outside this module may mutate
//! `built_dsl` — every other layer treats it read-only.
//!
//! Mirrors the teacher's `api/session.rs` concurrency shape
//! (`Arc<RwLock<HashMap<Id, Session>>>`) but adds a second, per-session
//! `RwLock` so that concurrent readers of *different* sessions never
//! contend on the outer map lock, and so that `AccumulateDSL` on one
//! session never blocks a `Get` on another (spec §4.3 "Concurrency").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::parser;
use crate::resolver::Context;

pub type SessionId = String;

/// One entry in a session's conversational history.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
    pub generated_dsl_fragment: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Mutable per-case state. See spec §3 "Session".
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub domain: String,
    built_dsl: String,
    context: Context,
    history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl Session {
    fn new(session_id: SessionId, domain: String) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            domain,
            built_dsl: String::new(),
            context: Context::new(),
            history: Vec::new(),
            created_at: now,
            last_used: now,
        }
    }

    /// Read-only snapshot of the accumulated DSL document.
    pub fn built_dsl(&self) -> &str {
        &self.built_dsl
    }

    /// A deep copy of the context map. External readers never get a
    /// reference into live session state.
    pub fn context_snapshot(&self) -> Context {
        self.context.clone()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    fn touch(&mut self) {
        self.last_used = Utc::now();
    }
}

/// A session manager configuration, per SPEC_FULL §3 ("Config").
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub idle_timeout: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            // Default idle TTL per spec §3 "Session" lifecycle.
            idle_timeout: Duration::from_secs(24 * 60 * 60),
        }
    }
}

type SessionMap = HashMap<SessionId, Arc<RwLock<Session>>>;

/// Thread-safe registry of sessions. The outer lock protects the
/// id-to-session map; each session additionally owns its own
/// reader/writer lock so that mutating one session never blocks reads of
/// another.
pub struct SessionManager {
    sessions: RwLock<SessionMap>,
    config: SessionManagerConfig,
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// `GetOrCreate`: fetches the session handle for `id`, creating it with
    /// `domain` as its initial active domain if absent. Opportunistically
    /// runs `cleanup_expired` first.
    #[instrument(skip(self))]
    pub async fn get_or_create(&self, id: &str, domain: &str) -> Arc<RwLock<Session>> {
        self.cleanup_expired(Utc::now()).await;

        {
            let sessions = self.sessions.read().await;
            if let Some(existing) = sessions.get(id) {
                return existing.clone();
            }
        }

        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(session_id = id, domain, "creating session");
                Arc::new(RwLock::new(Session::new(id.to_string(), domain.to_string())))
            })
            .clone()
    }

    pub async fn get(&self, id: &str) -> EngineResult<Arc<RwLock<Session>>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::SessionNotFound(id.to_string()))
    }

    /// The sanctioned append primitive: the *only* way `built_dsl` may
    /// change. On syntax error the session is left untouched. An empty
    /// fragment is a silent no-op, not an error (spec §4.3).
    #[instrument(skip(self, fragment))]
    pub async fn accumulate_dsl(&self, id: &str, fragment: &str) -> EngineResult<()> {
        if fragment.trim().is_empty() {
            return Ok(());
        }

        // Parse first; a syntax error must never mutate state.
        parser::parse(fragment).map_err(EngineError::Syntax)?;

        let handle = self.get(id).await?;
        let mut session = handle.write().await;
        if !session.built_dsl.is_empty() {
            session.built_dsl.push_str("\n\n");
        }
        session.built_dsl.push_str(fragment);
        session.history.push(HistoryEntry {
            role: "system".to_string(),
            content: "accumulate_dsl".to_string(),
            generated_dsl_fragment: Some(fragment.to_string()),
            timestamp: Utc::now(),
        });
        session.touch();
        Ok(())
    }

    /// Merges `delta` into the session's context (last-write-wins per key).
    pub async fn update_context(&self, id: &str, delta: Context) -> EngineResult<()> {
        let handle = self.get(id).await?;
        let mut session = handle.write().await;
        session.context.extend(delta);
        session.touch();
        Ok(())
    }

    /// Changes the session's active domain. Does not itself validate the
    /// target domain is registered — that's the registry's job; callers
    /// that want the check should go through the router/registry first.
    pub async fn switch_domain(&self, id: &str, domain: &str) -> EngineResult<()> {
        let handle = self.get(id).await?;
        let mut session = handle.write().await;
        session.domain = domain.to_string();
        session.touch();
        Ok(())
    }

    pub async fn delete(&self, id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id);
    }

    /// Evicts sessions whose `last_used` is older than `idle_timeout`.
    /// Called opportunistically from `get_or_create`.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) {
        let timeout = chrono::Duration::from_std(self.config.idle_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(1));

        let expired: Vec<SessionId> = {
            let sessions = self.sessions.read().await;
            let mut expired = Vec::new();
            for (id, handle) in sessions.iter() {
                let last_used = handle.read().await.last_used;
                if now - last_used > timeout {
                    expired.push(id.clone());
                }
            }
            expired
        };

        if expired.is_empty() {
            return;
        }
        let mut sessions = self.sessions.write().await;
        for id in expired {
            warn!(session_id = %id, "evicting expired session");
            sessions.remove(&id);
        }
    }

    pub async fn active_session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }
}

/// Generates a fresh opaque session id.
pub fn new_session_id() -> SessionId {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn accumulate_dsl_appends_in_order() {
        let mgr = SessionManager::new(SessionManagerConfig::default());
        mgr.get_or_create("s1", "onboarding").await;
        mgr.accumulate_dsl("s1", r#"(case.create :id "CBU-1234")"#)
            .await
            .unwrap();
        mgr.accumulate_dsl("s1", r#"(products.add "CUSTODY")"#)
            .await
            .unwrap();

        let handle = mgr.get("s1").await.unwrap();
        let dsl = handle.read().await.built_dsl().to_string();
        assert!(dsl.find("case.create").unwrap() < dsl.find("products.add").unwrap());
    }

    #[tokio::test]
    async fn syntax_error_does_not_mutate_session() {
        let mgr = SessionManager::new(SessionManagerConfig::default());
        mgr.get_or_create("s1", "onboarding").await;
        mgr.accumulate_dsl("s1", r#"(case.create :id "CBU-1234")"#)
            .await
            .unwrap();
        let before = {
            let handle = mgr.get("s1").await.unwrap();
            handle.read().await.built_dsl().to_string()
        };

        let err = mgr.accumulate_dsl("s1", "(unterminated").await;
        assert!(err.is_err());

        let handle = mgr.get("s1").await.unwrap();
        let after = handle.read().await.built_dsl().to_string();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn empty_fragment_is_a_no_op() {
        let mgr = SessionManager::new(SessionManagerConfig::default());
        mgr.get_or_create("s1", "onboarding").await;
        mgr.accumulate_dsl("s1", "   ").await.unwrap();
        let handle = mgr.get("s1").await.unwrap();
        assert!(handle.read().await.built_dsl().is_empty());
    }

    #[tokio::test]
    async fn context_reads_are_copies() {
        let mgr = SessionManager::new(SessionManagerConfig::default());
        mgr.get_or_create("s1", "onboarding").await;
        let mut delta = Context::new();
        delta.insert("investor_id".to_string(), json!("u-1"));
        mgr.update_context("s1", delta).await.unwrap();

        let handle = mgr.get("s1").await.unwrap();
        let mut snapshot = handle.read().await.context_snapshot();
        snapshot.insert("investor_id".to_string(), json!("mutated"));

        let real = handle.read().await.context_snapshot();
        assert_eq!(real.get("investor_id").unwrap(), &json!("u-1"));
    }

    #[tokio::test]
    async fn concurrent_accumulation_is_serialised_and_total() {
        let mgr = Arc::new(SessionManager::new(SessionManagerConfig::default()));
        mgr.get_or_create("s1", "onboarding").await;

        let mut handles = Vec::new();
        for i in 0..100 {
            let mgr = mgr.clone();
            handles.push(tokio::spawn(async move {
                let fragment = format!(r#"(note.append :seq {})"#, i);
                mgr.accumulate_dsl("s1", &fragment).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let handle = mgr.get("s1").await.unwrap();
        let dsl = handle.read().await.built_dsl().to_string();
        for i in 0..100 {
            assert!(dsl.contains(&format!(":seq {}", i)));
        }
    }

    #[tokio::test]
    async fn cleanup_expired_evicts_idle_sessions() {
        let mgr = SessionManager::new(SessionManagerConfig {
            idle_timeout: Duration::from_secs(0),
        });
        mgr.get_or_create("s1", "onboarding").await;
        mgr.cleanup_expired(Utc::now() + chrono::Duration::seconds(1))
            .await;
        assert!(mgr.get("s1").await.is_err());
    }
}
