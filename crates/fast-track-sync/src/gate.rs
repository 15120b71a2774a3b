//! URL routes and the edit/read-only access decision.

use std::fmt;
use std::sync::Arc;

use fast_track_core::timefmt::now_millis;
use fast_track_core::{generate_edit_token, is_valid_session_id, validate_edit_token, LinkType, Session};
use tracing::{debug, warn};
use url::Url;

use crate::cache::LocalSessionCache;
use crate::error::SyncError;
use crate::links::SessionLinkBook;
use crate::remote::RemoteStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    /// `/session/{id}`, from before links carried a token.
    Legacy { id: String },
    Editor { token: String, id: String },
    View { id: String },
}

impl Route {
    /// Accepts a path or a full URL. Query strings and fragments are ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let path = if raw.starts_with("http://") || raw.starts_with("https://") {
            Url::parse(raw).ok()?.path().to_string()
        } else {
            raw.split(['?', '#']).next().unwrap_or_default().to_string()
        };
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [] => Some(Route::Home),
            ["session", id] => Some(Route::Legacy { id: id.to_string() }),
            ["session", token, id] => Some(Route::Editor {
                token: token.to_string(),
                id: id.to_string(),
            }),
            ["view", id] => Some(Route::View { id: id.to_string() }),
            _ => None,
        }
    }

    pub fn editor(session: &Session) -> Option<Self> {
        session.edit_token.as_ref().map(|token| Route::Editor {
            token: token.clone(),
            id: session.id.clone(),
        })
    }

    pub fn view(id: impl Into<String>) -> Self {
        Route::View { id: id.into() }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Route::Home => None,
            Route::Legacy { id } | Route::Editor { id, .. } | Route::View { id } => Some(id),
        }
    }

    pub fn path(&self) -> String {
        match self {
            Route::Home => "/".to_string(),
            Route::Legacy { id } => format!("/session/{id}"),
            Route::Editor { token, id } => format!("/session/{token}/{id}"),
            Route::View { id } => format!("/view/{id}"),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    Home,
    Edit { session: Session },
    ReadOnly { session: Session },
    Redirect(Route),
    NotFound { id: String },
}

#[derive(Clone)]
pub struct AccessGate {
    cache: LocalSessionCache,
    links: SessionLinkBook,
    remote: Arc<dyn RemoteStore>,
}

impl AccessGate {
    pub fn new(cache: LocalSessionCache, links: SessionLinkBook, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            cache,
            links,
            remote,
        }
    }

    pub async fn resolve(&self, route: &Route) -> Result<GateOutcome, SyncError> {
        let id = match route.session_id() {
            None => return Ok(GateOutcome::Home),
            Some(id) if !is_valid_session_id(id) => {
                debug!(session_id = %id, "malformed session id; sending home");
                return Ok(GateOutcome::Redirect(Route::Home));
            }
            Some(id) => id.to_string(),
        };

        let Some(mut session) = self.lookup(&id).await else {
            return Ok(GateOutcome::NotFound { id });
        };

        match route {
            Route::Home => Ok(GateOutcome::Home),
            Route::Legacy { .. } => {
                if session.edit_token.is_some() {
                    return Ok(GateOutcome::Redirect(Route::view(id)));
                }
                // First visitor of an untokenized link claims it.
                let token = generate_edit_token();
                session.set_edit_token(token.clone());
                self.cache.save(&session)?;
                if let Err(err) = self.remote.save(&session).await {
                    warn!(session_id = %id, error = %err, "failed to store minted edit token remotely");
                }
                debug!(session_id = %id, "edit token minted for legacy link");
                Ok(GateOutcome::Redirect(Route::Editor { token, id }))
            }
            Route::Editor { token, .. } => {
                if !validate_edit_token(session.edit_token.as_deref(), Some(token)) {
                    debug!(session_id = %id, "edit token mismatch; read-only");
                    return Ok(GateOutcome::Redirect(Route::view(id)));
                }
                self.record(&session, LinkType::Editable);
                Ok(GateOutcome::Edit { session })
            }
            Route::View { .. } => {
                self.record(&session, LinkType::Readonly);
                Ok(GateOutcome::ReadOnly { session })
            }
        }
    }

    /// Remote first; the local cache covers outages, sessions that never
    /// reached the remote store, and edits not yet sent.
    async fn lookup(&self, id: &str) -> Option<Session> {
        match self.remote.fetch(id).await {
            Ok(Some(remote)) => match self.cache.load(id) {
                Some(local) if local.revision > remote.revision => Some(local),
                _ => Some(remote),
            },
            Ok(None) => self.cache.load(id),
            Err(err) => {
                warn!(session_id = %id, error = %err, "remote lookup failed; trying local cache");
                self.cache.load(id)
            }
        }
    }

    fn record(&self, session: &Session, link_type: LinkType) {
        if let Err(err) = self.links.record(session, link_type, now_millis()) {
            warn!(session_id = %session.id, error = %err, "failed to record session link");
        }
    }
}
