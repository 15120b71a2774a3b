//! Client side of the session store HTTP API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fast_track_core::api::{ErrorBody, SendLinksRequest, SendLinksResponse, SessionsByEmailResponse};
use fast_track_core::Session;
use parking_lot::Mutex;
use reqwest::{Client, Response, StatusCode};
use tracing::debug;
use url::Url;

use crate::error::RemoteError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// `Ok(None)` when the store has no record for `id`.
    async fn fetch(&self, id: &str) -> Result<Option<Session>, RemoteError>;

    /// Replaces the whole record.
    async fn save(&self, session: &Session) -> Result<(), RemoteError>;

    async fn delete(&self, id: &str) -> Result<(), RemoteError>;

    /// Empty when nothing matches.
    async fn find_by_email(&self, email: &str) -> Result<Vec<Session>, RemoteError>;

    async fn send_links(&self, email: &str) -> Result<SendLinksResponse, RemoteError>;
}

#[derive(Clone)]
pub struct HttpRemoteStore {
    http: Client,
    base_url: Url,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn session_url(&self, id: &str) -> Result<Url, RemoteError> {
        let mut url = self.base_url.join("sessions/")?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::Rejected("server url cannot hold a path".into()))?
            .pop_if_empty()
            .push(id);
        Ok(url)
    }
}

async fn failure(res: Response) -> RemoteError {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.clone());
    match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        StatusCode::BAD_REQUEST => RemoteError::Rejected(message),
        _ => RemoteError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        },
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn fetch(&self, id: &str) -> Result<Option<Session>, RemoteError> {
        let res = self.http.get(self.session_url(id)?).send().await?;
        match res.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(res.json::<Session>().await?)),
            _ => Err(failure(res).await),
        }
    }

    async fn save(&self, session: &Session) -> Result<(), RemoteError> {
        let res = self
            .http
            .post(self.session_url(&session.id)?)
            .json(session)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(failure(res).await);
        }
        debug!(session_id = %session.id, revision = session.revision, "session saved remotely");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        let res = self.http.delete(self.session_url(id)?).send().await?;
        if res.status().is_success() {
            Ok(())
        } else {
            Err(failure(res).await)
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<Session>, RemoteError> {
        let url = self.base_url.join("sessions/by-email")?;
        let res = self
            .http
            .get(url)
            .query(&[("email", email)])
            .send()
            .await?;
        match res.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => {
                Ok(res.json::<SessionsByEmailResponse>().await?.sessions)
            }
            _ => Err(failure(res).await),
        }
    }

    async fn send_links(&self, email: &str) -> Result<SendLinksResponse, RemoteError> {
        let url = self.base_url.join("email/send-links")?;
        let res = self
            .http
            .post(url)
            .json(&SendLinksRequest {
                email: Some(email.to_string()),
            })
            .send()
            .await?;
        if res.status().is_success() {
            Ok(res.json::<SendLinksResponse>().await?)
        } else {
            Err(failure(res).await)
        }
    }
}

/// In-memory adapter for tests and offline wiring.
///
/// `set_offline(true)` makes every call fail with [`RemoteError::Unavailable`],
/// which is how tests simulate a network outage.
#[derive(Default)]
pub struct MemoryRemoteStore {
    sessions: Mutex<HashMap<String, Session>>,
    saves: Mutex<Vec<Session>>,
    offline: AtomicBool,
}

impl MemoryRemoteStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Writes a record directly, bypassing the save log.
    pub fn insert(&self, session: Session) {
        self.sessions.lock().insert(session.id.clone(), session);
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.lock().get(id).cloned()
    }

    /// Every record accepted by [`RemoteStore::save`], in order.
    pub fn saves(&self) -> Vec<Session> {
        self.saves.lock().clone()
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RemoteError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn matching(&self, email: &str) -> Vec<Session> {
        let wanted = email.to_lowercase();
        let mut found: Vec<_> = self
            .sessions
            .lock()
            .values()
            .filter(|s| s.email.as_deref().map(str::to_lowercase) == Some(wanted.clone()))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        found
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn fetch(&self, id: &str) -> Result<Option<Session>, RemoteError> {
        self.check_online()?;
        Ok(self.get(id))
    }

    async fn save(&self, session: &Session) -> Result<(), RemoteError> {
        self.check_online()?;
        self.saves.lock().push(session.clone());
        self.insert(session.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        self.check_online()?;
        self.sessions.lock().remove(id);
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<Session>, RemoteError> {
        self.check_online()?;
        Ok(self.matching(email))
    }

    async fn send_links(&self, email: &str) -> Result<SendLinksResponse, RemoteError> {
        self.check_online()?;
        let count = self.matching(email).len();
        if count == 0 {
            return Err(RemoteError::NotFound(
                "No sessions found for this email".into(),
            ));
        }
        Ok(SendLinksResponse {
            success: true,
            session_count: count,
            message: format!("Sent {count} session link(s) to {email}"),
        })
    }
}
