//! Keeps one open session in step with the local cache and the remote store.
//!
//! Lifecycle of a view: mount reads the local cache, then the remote store
//! (which wins when reachable). Each mutation is applied in memory, written
//! through to the cache, and queued as a debounced remote write; a new
//! mutation restarts the debounce so a burst of edits produces one write. A
//! poll loop re-fetches the remote copy on a fixed period so two clients on
//! the same session converge.
//!
//! Remote failures never surface from mutations. They are logged, the view
//! stays on its local state, and the next poll retries the write.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fast_track_core::timefmt::now_millis;
use fast_track_core::{
    is_valid_session_id, BodyMetric, BodyMetricInput, CheckinEntry, CheckinInput, CoreError,
    JournalEntry, Session,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::LocalSessionCache;
use crate::error::{RemoteError, SyncError};
use crate::remote::RemoteStore;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTimings {
    pub debounce: Duration,
    pub poll: Duration,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            poll: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Loading,
    Synced,
    /// A local mutation has not reached the remote store yet.
    Dirty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Edit,
    ReadOnly,
}

struct ViewState {
    session: Option<Session>,
    status: SyncStatus,
    last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct PendingSave {
    generation: u64,
    handle: Option<JoinHandle<()>>,
    snapshot: Option<Session>,
}

impl PendingSave {
    fn is_waiting(&self) -> bool {
        self.snapshot.is_some()
    }
}

// Lock order: `view` before `pending`, never the reverse.
struct SyncInner {
    session_id: String,
    mode: AccessMode,
    cache: LocalSessionCache,
    remote: Arc<dyn RemoteStore>,
    timings: SyncTimings,
    view: Mutex<ViewState>,
    pending: Mutex<PendingSave>,
    in_flight: AtomicUsize,
    changes: watch::Sender<Option<Session>>,
    /// Flips to `true` once the remote copy has been reconciled with the cached one.
    mounted: watch::Sender<bool>,
}

pub struct SessionSync {
    inner: Arc<SyncInner>,
    cancel: CancellationToken,
}

impl SessionSync {
    /// Mounts the session view and starts its poll loop.
    ///
    /// A cached copy is shown right away and reconciled with the remote
    /// store in the background (see [`SessionSync::wait_mounted`]). Without
    /// one, the remote fetch is awaited here. Fails with
    /// [`SyncError::NotFound`] when neither has the session.
    pub async fn open(
        session_id: &str,
        mode: AccessMode,
        cache: LocalSessionCache,
        remote: Arc<dyn RemoteStore>,
        timings: SyncTimings,
    ) -> Result<Self, SyncError> {
        if !is_valid_session_id(session_id) {
            return Err(SyncError::InvalidSessionId(session_id.to_string()));
        }

        let (changes, _) = watch::channel(None);
        let (mounted, _) = watch::channel(false);
        let inner = Arc::new(SyncInner {
            session_id: session_id.to_string(),
            mode,
            cache,
            remote,
            timings,
            view: Mutex::new(ViewState {
                session: None,
                status: SyncStatus::Loading,
                last_synced_at: None,
            }),
            pending: Mutex::new(PendingSave::default()),
            in_flight: AtomicUsize::new(0),
            changes,
            mounted,
        });

        let local = inner.cache.load(session_id);
        if let Some(local) = &local {
            inner.view.lock().session = Some(local.clone());
            inner.changes.send_replace(Some(local.clone()));
        } else {
            inner.mount_remote_only().await;
            if inner.view.lock().session.is_none() {
                return Err(SyncError::NotFound(session_id.to_string()));
            }
        }

        let cancel = CancellationToken::new();
        tokio::spawn(run_view(
            Arc::downgrade(&inner),
            local.is_some(),
            timings.poll,
            cancel.clone(),
        ));
        Ok(Self { inner, cancel })
    }

    /// Resolves once the remote copy has been reconciled with the cached one,
    /// or the view is closed.
    pub async fn wait_mounted(&self) {
        let mut mounted = self.inner.mounted.subscribe();
        tokio::select! {
            _ = mounted.wait_for(|done| *done) => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn mode(&self) -> AccessMode {
        self.inner.mode
    }

    pub fn snapshot(&self) -> Option<Session> {
        self.inner.view.lock().session.clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.view.lock().status
    }

    /// True while a remote write or fetch is outstanding.
    pub fn is_syncing(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        self.inner.view.lock().last_synced_at
    }

    /// Receives the session every time the in-memory copy changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.inner.changes.subscribe()
    }

    pub fn add_checkin(&self, input: CheckinInput) -> Result<CheckinEntry, SyncError> {
        self.mutate(|session, now| session.add_checkin(input, now).map(|e| (e, true)))
    }

    pub fn add_body_metric(&self, input: BodyMetricInput) -> Result<BodyMetric, SyncError> {
        self.mutate(|session, now| session.add_body_metric(input, now).map(|m| (m, true)))
    }

    pub fn add_note(
        &self,
        content: impl Into<String>,
        tags: Vec<String>,
    ) -> Result<JournalEntry, SyncError> {
        let content = content.into();
        self.mutate(|session, now| Ok((session.add_note(content, tags, now), true)))
    }

    /// Returns `false` if the fast had already ended; nothing is written then.
    pub fn end_fast(&self) -> Result<bool, SyncError> {
        self.mutate(|session, now| {
            let ended = session.end_fast(now);
            Ok((ended, ended))
        })
    }

    /// Sends a debounced write now instead of waiting for the timer. Also
    /// retries a write that failed earlier.
    pub async fn flush(&self) -> Result<(), SyncError> {
        if self.inner.mode == AccessMode::ReadOnly {
            return Ok(());
        }
        self.wait_mounted().await;
        let snapshot = {
            let view = self.inner.view.lock();
            let mut pending = self.inner.pending.lock();
            pending.generation += 1;
            if let Some(handle) = pending.handle.take() {
                handle.abort();
            }
            match pending.snapshot.take() {
                Some(snapshot) => Some(snapshot),
                None if view.status == SyncStatus::Dirty => view.session.clone(),
                None => None,
            }
        };
        if let Some(snapshot) = snapshot {
            self.inner.push(snapshot).await?;
        }
        Ok(())
    }

    /// Stops the poll loop and drops any write still waiting on the debounce.
    /// A write already sent is left to finish.
    pub fn close(&self) {
        self.cancel.cancel();
        let mut pending = self.inner.pending.lock();
        if let Some(handle) = pending.handle.take() {
            handle.abort();
            debug!(session_id = %self.inner.session_id, "pending save cancelled");
        }
        pending.snapshot = None;
    }

    fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut Session, DateTime<Utc>) -> Result<(T, bool), CoreError>,
    ) -> Result<T, SyncError> {
        if self.inner.mode == AccessMode::ReadOnly {
            return Err(SyncError::ReadOnly);
        }

        let mut view = self.inner.view.lock();
        let session = view
            .session
            .as_mut()
            .ok_or_else(|| SyncError::NotLoaded(self.inner.session_id.clone()))?;
        let (out, changed) = apply(session, now_millis())?;
        if !changed {
            return Ok(out);
        }

        let snapshot = session.clone();
        view.status = SyncStatus::Dirty;
        if let Err(err) = self.inner.cache.save(&snapshot) {
            warn!(session_id = %snapshot.id, error = %err, "failed to cache session");
        }
        self.inner.schedule_save(snapshot.clone());
        drop(view);

        self.inner.changes.send_replace(Some(snapshot));
        Ok(out)
    }
}

impl Drop for SessionSync {
    fn drop(&mut self) {
        self.close();
    }
}

impl SyncInner {
    /// Nothing cached: the remote copy is the only source.
    async fn mount_remote_only(&self) {
        match self.fetch().await {
            Ok(Some(remote)) => {
                if self.mode == AccessMode::Edit {
                    if let Err(err) = self.cache.save(&remote) {
                        warn!(session_id = %self.session_id, error = %err, "failed to cache session");
                    }
                }
                {
                    let mut view = self.view.lock();
                    view.session = Some(remote.clone());
                    view.status = SyncStatus::Synced;
                    view.last_synced_at = Some(now_millis());
                }
                self.changes.send_replace(Some(remote));
            }
            Ok(None) => debug!(session_id = %self.session_id, "session not found"),
            Err(err) => warn!(session_id = %self.session_id, error = %err, "remote fetch failed"),
        }
        self.mounted.send_replace(true);
    }

    /// Brings the cached copy shown at open in line with the remote store.
    async fn reconcile(&self) {
        match self.fetch().await {
            Ok(Some(remote)) => self.settle_mount(remote).await,
            Ok(None) if self.mode == AccessMode::Edit => {
                debug!(session_id = %self.session_id, "remote has no copy; pushing local session");
                self.resend_unless_pending().await;
            }
            Ok(None) => self.loaded(),
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "remote fetch failed; using local copy");
                self.loaded();
            }
        }
        self.mounted.send_replace(true);
    }

    async fn settle_mount(&self, remote: Session) {
        let adopt = {
            let mut view = self.view.lock();
            if view.status == SyncStatus::Dirty || self.pending.lock().is_waiting() {
                debug!(session_id = %self.session_id, "edited during mount; remote copy skipped");
                return;
            }
            let local_newer = matches!(
                &view.session,
                Some(local) if remote.revision < local.revision
            );
            if local_newer && self.mode == AccessMode::Edit {
                // Changes made while the remote store was unreachable.
                view.status = SyncStatus::Dirty;
                false
            } else {
                view.session = Some(remote.clone());
                view.status = SyncStatus::Synced;
                view.last_synced_at = Some(now_millis());
                true
            }
        };

        if adopt {
            if self.mode == AccessMode::Edit {
                if let Err(err) = self.cache.save(&remote) {
                    warn!(session_id = %self.session_id, error = %err, "failed to cache session");
                }
            }
            self.changes.send_replace(Some(remote));
        } else {
            debug!(
                session_id = %self.session_id,
                remote = remote.revision,
                "cached copy is newer; resending it"
            );
            self.resend_unless_pending().await;
        }
    }

    /// Pushes the current session unless a debounced write already carries it.
    async fn resend_unless_pending(&self) {
        let snapshot = {
            let mut view = self.view.lock();
            if self.pending.lock().is_waiting() {
                None
            } else {
                if view.status == SyncStatus::Loading {
                    view.status = SyncStatus::Dirty;
                }
                view.session.clone()
            }
        };
        if let Some(snapshot) = snapshot {
            if self.push(snapshot).await.is_err() {
                self.view.lock().status = SyncStatus::Dirty;
            }
        }
    }

    fn loaded(&self) {
        let mut view = self.view.lock();
        if view.status == SyncStatus::Loading {
            view.status = SyncStatus::Synced;
        }
    }

    fn schedule_save(self: &Arc<Self>, snapshot: Session) {
        let mut pending = self.pending.lock();
        if let Some(handle) = pending.handle.take() {
            handle.abort();
        }
        pending.generation += 1;
        pending.snapshot = Some(snapshot);

        let generation = pending.generation;
        let delay = self.timings.debounce;
        let inner = Arc::downgrade(self);
        pending.handle = Some(tokio::spawn(async move {
            sleep(delay).await;
            if let Some(inner) = inner.upgrade() {
                inner.fire_pending(generation).await;
            }
        }));
        debug!(session_id = %self.session_id, generation, "save scheduled");
    }

    async fn fire_pending(&self, generation: u64) {
        // Detach before sending so a later schedule or close cannot abort a
        // write that is already on the wire.
        let snapshot = {
            let mut pending = self.pending.lock();
            if pending.generation != generation {
                return;
            }
            pending.handle = None;
            pending.snapshot.take()
        };
        if let Some(snapshot) = snapshot {
            let _ = self.push(snapshot).await;
        }
    }

    async fn push(&self, snapshot: Session) -> Result<(), RemoteError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = self.remote.save(&snapshot).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(()) => {
                let mut view = self.view.lock();
                let newer_waiting = self.pending.lock().is_waiting();
                let current = view
                    .session
                    .as_ref()
                    .map_or(true, |s| s.revision == snapshot.revision);
                if current && !newer_waiting {
                    view.status = SyncStatus::Synced;
                }
                view.last_synced_at = Some(now_millis());
                debug!(session_id = %snapshot.id, revision = snapshot.revision, "session synced");
                Ok(())
            }
            Err(err) => {
                warn!(session_id = %snapshot.id, error = %err, "remote save failed; will retry");
                Err(err)
            }
        }
    }

    async fn fetch(&self) -> Result<Option<Session>, RemoteError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = self.remote.fetch(&self.session_id).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn refresh(&self) {
        if self.mode == AccessMode::Edit {
            let retry = {
                let view = self.view.lock();
                let pending = self.pending.lock();
                if view.status == SyncStatus::Dirty
                    && pending.handle.is_none()
                    && !pending.is_waiting()
                {
                    view.session.clone()
                } else {
                    None
                }
            };
            if let Some(snapshot) = retry {
                if self.push(snapshot).await.is_err() {
                    return;
                }
            }
        }

        match self.fetch().await {
            Ok(Some(remote)) => self.adopt(remote),
            Ok(None) => {
                warn!(session_id = %self.session_id, "remote copy disappeared");
                if self.mode == AccessMode::Edit {
                    // Re-seed it on the next tick.
                    let mut view = self.view.lock();
                    if view.session.is_some() {
                        view.status = SyncStatus::Dirty;
                    }
                }
            }
            Err(err) => warn!(session_id = %self.session_id, error = %err, "refresh failed"),
        }
    }

    fn adopt(&self, remote: Session) {
        let mut view = self.view.lock();
        if view.status == SyncStatus::Dirty || self.pending.lock().is_waiting() {
            debug!(session_id = %self.session_id, "local edits pending; refresh skipped");
            return;
        }
        if let Some(local) = &view.session {
            if remote.revision < local.revision {
                debug!(
                    session_id = %self.session_id,
                    remote = remote.revision,
                    local = local.revision,
                    "remote copy is older; refresh skipped"
                );
                return;
            }
            if *local == remote {
                view.last_synced_at = Some(now_millis());
                return;
            }
        }

        view.session = Some(remote.clone());
        view.status = SyncStatus::Synced;
        view.last_synced_at = Some(now_millis());
        if self.mode == AccessMode::Edit {
            if let Err(err) = self.cache.save(&remote) {
                warn!(session_id = %self.session_id, error = %err, "failed to cache session");
            }
        }
        drop(view);
        debug!(session_id = %self.session_id, revision = remote.revision, "adopted remote copy");
        self.changes.send_replace(Some(remote));
    }
}

async fn run_view(
    inner: Weak<SyncInner>,
    reconcile: bool,
    period: Duration,
    cancel: CancellationToken,
) {
    if reconcile {
        let Some(strong) = inner.upgrade() else { return };
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = strong.reconcile() => {}
        }
    }
    poll_loop(inner, period, cancel).await;
}

async fn poll_loop(inner: Weak<SyncInner>, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.refresh().await;
            }
        }
    }
    debug!("poll loop stopped");
}
