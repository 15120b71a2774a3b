//! Session lifecycle on top of the cache, the link book and the remote store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fast_track_core::api::SendLinksResponse;
use fast_track_core::timefmt::now_millis;
use fast_track_core::{
    generate_edit_token, generate_session_id, is_valid_email, is_valid_session_id,
    validate_target_duration, LinkType, Session, SessionLink,
};
use tracing::{debug, info, warn};

use crate::cache::LocalSessionCache;
use crate::error::SyncError;
use crate::gate::{AccessGate, Route};
use crate::links::SessionLinkBook;
use crate::remote::RemoteStore;
use crate::store::KeyValueStore;
use crate::sync::{AccessMode, SessionSync, SyncTimings};

const ID_ATTEMPTS: usize = 8;

#[derive(Clone)]
pub struct Tracker {
    cache: LocalSessionCache,
    links: SessionLinkBook,
    remote: Arc<dyn RemoteStore>,
    timings: SyncTimings,
}

impl Tracker {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteStore>,
        timings: SyncTimings,
    ) -> Self {
        Self {
            cache: LocalSessionCache::new(store.clone()),
            links: SessionLinkBook::new(store),
            remote,
            timings,
        }
    }

    pub fn cache(&self) -> &LocalSessionCache {
        &self.cache
    }

    pub fn links(&self) -> &SessionLinkBook {
        &self.links
    }

    pub fn gate(&self) -> AccessGate {
        AccessGate::new(self.cache.clone(), self.links.clone(), self.remote.clone())
    }

    pub async fn create_session(
        &self,
        name: &str,
        start_time: DateTime<Utc>,
        target_duration: f64,
        email: Option<String>,
    ) -> Result<(Session, Route), SyncError> {
        validate_target_duration(target_duration)?;
        if let Some(email) = email.as_deref().filter(|e| !e.trim().is_empty()) {
            if !is_valid_email(email) {
                return Err(SyncError::InvalidEmail(email.to_string()));
            }
        }

        let mut session = Session::new(name.trim(), start_time, target_duration).with_email(email);
        session.id = self.unique_id().await;
        let route = self.adopt_new(session.clone()).await?;
        info!(session_id = %session.id, "session created");
        Ok((session, route))
    }

    pub async fn open(&self, id: &str, mode: AccessMode) -> Result<SessionSync, SyncError> {
        SessionSync::open(id, mode, self.cache.clone(), self.remote.clone(), self.timings).await
    }

    /// Stores an imported session under a fresh id so it can never collide
    /// with the session it was exported from.
    pub async fn import_session(&self, mut session: Session) -> Result<(Session, Route), SyncError> {
        let original_id = std::mem::take(&mut session.id);
        session.id = self.unique_id().await;
        if session.edit_token.as_deref().map_or(true, str::is_empty) {
            session.edit_token = Some(generate_edit_token());
        }
        let route = self.adopt_new(session.clone()).await?;
        info!(session_id = %session.id, original_id = %original_id, "session imported");
        Ok((session, route))
    }

    pub async fn delete_session(&self, id: &str) -> Result<(), SyncError> {
        if !is_valid_session_id(id) {
            return Err(SyncError::InvalidSessionId(id.to_string()));
        }
        self.cache.delete(id)?;
        self.cache.forget(id)?;
        self.links.forget(id)?;
        if let Err(err) = self.remote.delete(id).await {
            warn!(session_id = %id, error = %err, "failed to delete remote copy");
        }
        info!(session_id = %id, "session deleted");
        Ok(())
    }

    /// Editor route for a session this client already holds. Sessions from
    /// before edit tokens existed get one minted here.
    pub async fn switch_to(&self, id: &str) -> Result<Route, SyncError> {
        let mut session = self
            .cache
            .load(id)
            .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
        if session.edit_token.is_none() {
            session.set_edit_token(generate_edit_token());
            self.cache.save(&session)?;
            if let Err(err) = self.remote.save(&session).await {
                warn!(session_id = %id, error = %err, "failed to store minted edit token remotely");
            }
            debug!(session_id = %id, "edit token minted on switch");
        }
        self.cache.set_active(id)?;
        self.links.record(&session, LinkType::Editable, now_millis())?;
        Route::editor(&session).ok_or_else(|| SyncError::NotLoaded(id.to_string()))
    }

    /// Sessions cached on this client, newest first.
    pub fn local_sessions(&self) -> Result<Vec<Session>, SyncError> {
        if let Some(migrated) = self.cache.migrate_legacy(now_millis())? {
            info!(session_id = %migrated.id, "legacy session migrated");
        }
        Ok(self.cache.list()?)
    }

    pub fn recent_links(&self) -> Vec<SessionLink> {
        self.links.recent()
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Vec<Session>, SyncError> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(SyncError::InvalidEmail(email.to_string()));
        }
        Ok(self.remote.find_by_email(email).await?)
    }

    pub async fn email_links(&self, email: &str) -> Result<SendLinksResponse, SyncError> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(SyncError::InvalidEmail(email.to_string()));
        }
        Ok(self.remote.send_links(email).await?)
    }

    async fn adopt_new(&self, session: Session) -> Result<Route, SyncError> {
        self.cache.save(&session)?;
        self.cache.remember(&session)?;
        self.links
            .record(&session, LinkType::Editable, now_millis())?;
        if let Err(err) = self.remote.save(&session).await {
            // The next open pushes the local copy.
            warn!(session_id = %session.id, error = %err, "failed to store session remotely");
        }
        Route::editor(&session).ok_or_else(|| SyncError::NotLoaded(session.id.clone()))
    }

    /// A slug not already used locally or, when reachable, remotely.
    async fn unique_id(&self) -> String {
        let mut candidate = generate_session_id();
        for attempt in 1..=ID_ATTEMPTS {
            if !self.cache.contains(&candidate) {
                match self.remote.fetch(&candidate).await {
                    Ok(None) => return candidate,
                    Ok(Some(_)) => {}
                    Err(err) => {
                        debug!(error = %err, "remote unreachable; id checked locally only");
                        return candidate;
                    }
                }
            }
            debug!(session_id = %candidate, attempt, "session id taken; drawing again");
            candidate = generate_session_id();
        }
        candidate
    }
}
