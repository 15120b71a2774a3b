//! Client-local session cache over a [`KeyValueStore`].
//!
//! Reads never fail: an absent or unreadable record is `None` and the parse
//! failure is logged. Writes surface their error so callers can decide to log
//! and carry on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fast_track_core::api::{session_key, SESSION_KEY_PREFIX};
use fast_track_core::{generate_session_id, Session};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::KeyValueStore;

pub const SESSIONS_KEY: &str = "fasting_sessions";
pub const ACTIVE_SESSION_KEY: &str = "active_session_id";
pub const LEGACY_SESSION_KEY: &str = "fasting-tracker-data";
const MIGRATED_SESSION_NAME: &str = "Session 1";

/// The "all sessions plus the active one" blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsData {
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub active_session_id: Option<String>,
}

impl SessionsData {
    pub fn active(&self) -> Option<&Session> {
        let id = self.active_session_id.as_deref()?;
        self.sessions.iter().find(|s| s.id == id)
    }
}

#[derive(Clone)]
pub struct LocalSessionCache {
    store: Arc<dyn KeyValueStore>,
}

impl LocalSessionCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn load(&self, id: &str) -> Option<Session> {
        let raw = match self.store.get(&session_key(id)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(session_id = %id, error = %err, "failed to read cached session");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(err) => {
                warn!(session_id = %id, error = %err, "cached session is unreadable");
                None
            }
        }
    }

    pub fn save(&self, session: &Session) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(session)?;
        self.store.set(&session_key(&session.id), &serialized)?;
        debug!(session_id = %session.id, revision = session.revision, "session cached");
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.store.delete(&session_key(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        matches!(self.store.get(&session_key(id)), Ok(Some(_)))
    }

    /// Every readable cached session, newest start first.
    pub fn list(&self) -> Result<Vec<Session>, StoreError> {
        let mut sessions = Vec::new();
        for key in self.store.scan(SESSION_KEY_PREFIX)? {
            let Some(id) = key.strip_prefix(SESSION_KEY_PREFIX) else {
                continue;
            };
            if let Some(session) = self.load(id) {
                sessions.push(session);
            }
        }
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }

    pub fn load_all(&self) -> SessionsData {
        let raw = match self.store.get(SESSIONS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return SessionsData::default(),
            Err(err) => {
                warn!(error = %err, "failed to read session list");
                return SessionsData::default();
            }
        };
        match serde_json::from_str::<SessionsData>(&raw) {
            Ok(mut data) => {
                if data.active_session_id.is_none() {
                    data.active_session_id = data.sessions.first().map(|s| s.id.clone());
                }
                data
            }
            Err(err) => {
                warn!(error = %err, "session list is unreadable");
                SessionsData::default()
            }
        }
    }

    pub fn save_all(&self, data: &SessionsData) -> Result<(), StoreError> {
        self.store.set(SESSIONS_KEY, &serde_json::to_string(data)?)?;
        if let Some(active) = &data.active_session_id {
            self.store.set(ACTIVE_SESSION_KEY, active)?;
        }
        Ok(())
    }

    /// Marks `id` active if it is in the session list. Returns whether it was.
    pub fn set_active(&self, id: &str) -> Result<bool, StoreError> {
        let mut data = self.load_all();
        if !data.sessions.iter().any(|s| s.id == id) {
            return Ok(false);
        }
        data.active_session_id = Some(id.to_string());
        self.save_all(&data)?;
        Ok(true)
    }

    pub fn active_session(&self) -> Option<Session> {
        self.load_all().active().cloned()
    }

    /// Upserts `session` into the session list and makes it active.
    pub fn remember(&self, session: &Session) -> Result<(), StoreError> {
        let mut data = self.load_all();
        match data.sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session.clone(),
            None => data.sessions.push(session.clone()),
        }
        data.active_session_id = Some(session.id.clone());
        self.save_all(&data)
    }

    /// Drops `id` from the session list, moving the active marker to the
    /// first remaining session if needed.
    pub fn forget(&self, id: &str) -> Result<(), StoreError> {
        let mut data = self.load_all();
        let before = data.sessions.len();
        data.sessions.retain(|s| s.id != id);
        if data.sessions.len() == before && data.active_session_id.as_deref() != Some(id) {
            return Ok(());
        }
        if data.active_session_id.as_deref() == Some(id) {
            data.active_session_id = data.sessions.first().map(|s| s.id.clone());
            if data.active_session_id.is_none() {
                self.store.delete(ACTIVE_SESSION_KEY)?;
            }
        }
        self.save_all(&data)
    }

    /// Moves a pre-multi-session record into the session list, once.
    ///
    /// Only runs while the session list is empty. The migrated session gets a
    /// fresh slug id, a default name, and an end time if it had already ended.
    pub fn migrate_legacy(&self, now: DateTime<Utc>) -> Result<Option<Session>, StoreError> {
        let Some(raw) = self.store.get(LEGACY_SESSION_KEY)? else {
            return Ok(None);
        };
        if !self.load_all().sessions.is_empty() {
            return Ok(None);
        }

        let mut value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "legacy session is unreadable; leaving it in place");
                return Ok(None);
            }
        };
        if let Some(object) = value.as_object_mut() {
            object.entry("id").or_insert_with(|| "".into());
        }
        let mut session: Session = match serde_json::from_value(value) {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "legacy session is unreadable; leaving it in place");
                return Ok(None);
            }
        };

        session.id = generate_session_id();
        if session.name.trim().is_empty() {
            session.name = MIGRATED_SESSION_NAME.to_string();
        }
        session.end_time = if session.is_active { None } else { Some(now) };

        self.save(&session)?;
        self.remember(&session)?;
        self.store.delete(LEGACY_SESSION_KEY)?;
        debug!(session_id = %session.id, "migrated legacy session");
        Ok(Some(session))
    }
}
