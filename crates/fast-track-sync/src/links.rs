use std::sync::Arc;

use chrono::{DateTime, Utc};
use fast_track_core::{LinkType, Session, SessionLink};
use tracing::warn;

use crate::error::StoreError;
use crate::store::KeyValueStore;

pub const SESSION_LINKS_KEY: &str = "sessionLinks";

/// Sessions this client has opened, with the access it had at the time.
#[derive(Clone)]
pub struct SessionLinkBook {
    store: Arc<dyn KeyValueStore>,
}

impl SessionLinkBook {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn all(&self) -> Vec<SessionLink> {
        let raw = match self.store.get(SESSION_LINKS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(error = %err, "failed to read session links");
                return Vec::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!(error = %err, "session links are unreadable");
            Vec::new()
        })
    }

    /// Upserts the `(id, type)` link, refreshing its display fields.
    pub fn record(
        &self,
        session: &Session,
        link_type: LinkType,
        now: DateTime<Utc>,
    ) -> Result<SessionLink, StoreError> {
        let mut links = self.all();
        let link = session.link(link_type, now);
        match links
            .iter_mut()
            .find(|l| l.id == link.id && l.link_type == link_type)
        {
            Some(existing) => {
                existing.last_accessed = now;
                existing.name = link.name.clone();
                existing.is_active = link.is_active;
                if link.edit_token.is_some() {
                    existing.edit_token = link.edit_token.clone();
                }
            }
            None => links.push(link.clone()),
        }
        self.write(&links)?;
        Ok(link)
    }

    /// Newest access first.
    pub fn recent(&self) -> Vec<SessionLink> {
        let mut links = self.all();
        links.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        links
    }

    pub fn forget(&self, id: &str) -> Result<(), StoreError> {
        let mut links = self.all();
        let before = links.len();
        links.retain(|l| l.id != id);
        if links.len() != before {
            self.write(&links)?;
        }
        Ok(())
    }

    fn write(&self, links: &[SessionLink]) -> Result<(), StoreError> {
        self.store
            .set(SESSION_LINKS_KEY, &serde_json::to_string(links)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};
    use fast_track_core::timefmt::now_millis;

    #[test_timeout::timeout]
    fn record_upserts_per_access_type() {
        let book = SessionLinkBook::new(Arc::new(MemoryStore::new()));
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut session = Session::new("Spring reset", t0, 36.0);

        book.record(&session, LinkType::Editable, t0).unwrap();
        book.record(&session, LinkType::Readonly, t0 + Duration::minutes(1))
            .unwrap();
        session.name = "Spring reset (renamed)".into();
        session.end_fast(t0 + Duration::hours(36));
        book.record(&session, LinkType::Editable, t0 + Duration::minutes(2))
            .unwrap();

        let recent = book.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].link_type, LinkType::Editable);
        assert_eq!(recent[0].name, "Spring reset (renamed)");
        assert!(!recent[0].is_active);
        assert_eq!(recent[0].edit_token, session.edit_token);
        assert_eq!(recent[1].link_type, LinkType::Readonly);
        assert_eq!(recent[1].edit_token, None);
    }

    #[test_timeout::timeout]
    fn forget_drops_every_link_for_session() {
        let book = SessionLinkBook::new(Arc::new(MemoryStore::new()));
        let now = now_millis();
        let kept = Session::new("kept", now, 16.0);
        let dropped = Session::new("dropped", now, 16.0);
        book.record(&kept, LinkType::Readonly, now).unwrap();
        book.record(&dropped, LinkType::Editable, now).unwrap();
        book.record(&dropped, LinkType::Readonly, now).unwrap();

        book.forget(&dropped.id).unwrap();
        let ids: Vec<_> = book.all().into_iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![kept.id]);
    }
}
