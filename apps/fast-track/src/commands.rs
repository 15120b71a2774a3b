use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _, Result};
use fast_track_core::timefmt::{now_millis, parse_iso};
use fast_track_core::{
    export_csv, export_file_name, export_json, import_json, is_valid_session_id, BodyMetricInput,
    CheckinInput, ExportFormat, Session,
};
use fast_track_sync::{
    AccessMode, GateOutcome, KeyValueStore, RemoteStore, Route, SessionSync, SyncStatus,
    SyncTimings, Tracker,
};
use tracing::{debug, warn};

use crate::cli::{
    CheckinArgs, Command, EmailLinksArgs, ExportArgs, FindArgs, ImportArgs, MetricArgs, NewArgs,
    NoteArgs, RouteArg, WatchArgs,
};
use crate::render::{link_line, session_line, session_summary};

const MAX_REDIRECTS: usize = 3;

pub struct Context {
    store: Arc<dyn KeyValueStore>,
    remote: Arc<dyn RemoteStore>,
    tracker: Tracker,
}

impl Context {
    pub fn new(store: Arc<dyn KeyValueStore>, remote: Arc<dyn RemoteStore>) -> Self {
        let tracker = Tracker::new(store.clone(), remote.clone(), SyncTimings::default());
        Self {
            store,
            remote,
            tracker,
        }
    }

    pub async fn run(&self, command: Command, out: &mut dyn Write) -> Result<()> {
        match command {
            Command::New(args) => self.new_session(args, out).await,
            Command::Open(args) => self.open(args, out).await,
            Command::Checkin(args) => self.checkin(args, out).await,
            Command::Metric(args) => self.metric(args, out).await,
            Command::Note(args) => self.note(args, out).await,
            Command::End(args) => self.end(args, out).await,
            Command::Export(args) => self.export(args, out).await,
            Command::Import(args) => self.import(args, out).await,
            Command::Delete(args) => self.delete(args, out).await,
            Command::Recent => self.recent(out),
            Command::Sessions => self.sessions(out),
            Command::Watch(args) => self.watch(args, out).await,
            Command::Find(args) => self.find(args, out).await,
            Command::EmailLinks(args) => self.email_links(args, out).await,
        }
    }

    async fn new_session(&self, args: NewArgs, out: &mut dyn Write) -> Result<()> {
        let start = match args.start.as_deref() {
            Some(raw) => parse_iso(raw).with_context(|| format!("invalid start time {raw:?}"))?,
            None => now_millis(),
        };
        let email = args.email.filter(|e| !e.trim().is_empty());
        let (session, route) = self
            .tracker
            .create_session(&args.name, start, args.target, email)
            .await?;
        writeln!(out, "{}", session_summary(&session, now_millis()))?;
        writeln!(out, "edit link: {route}")?;
        writeln!(out, "view link: {}", Route::view(&session.id))?;
        Ok(())
    }

    async fn open(&self, args: RouteArg, out: &mut dyn Write) -> Result<()> {
        let (session, mode) = self.access(&args.route, out).await?;
        let access = match mode {
            AccessMode::Edit => "editing",
            AccessMode::ReadOnly => "read-only",
        };
        writeln!(out, "{}", session_summary(&session, now_millis()))?;
        writeln!(out, "  access:    {access}")?;
        Ok(())
    }

    async fn checkin(&self, args: CheckinArgs, out: &mut dyn Write) -> Result<()> {
        let input = CheckinInput {
            sleep_quality: args.sleep_quality,
            water_intake: args.water_intake,
            electrolytes: args.electrolytes.then_some(true),
            ..CheckinInput::ratings(
                args.energy,
                args.hunger,
                args.mental_clarity,
                args.mood,
                args.physical_comfort,
            )
        };
        let sync = self.edit(&args.route.route, out).await?;
        let entry = sync.add_checkin(input);
        self.finish(&sync, out).await?;
        writeln!(out, "check-in {} recorded", entry?.id)?;
        Ok(())
    }

    async fn metric(&self, args: MetricArgs, out: &mut dyn Write) -> Result<()> {
        let input = BodyMetricInput {
            weight: args.weight,
            body_fat_percentage: args.body_fat,
        };
        input.validate()?;
        let sync = self.edit(&args.route.route, out).await?;
        let metric = sync.add_body_metric(input);
        self.finish(&sync, out).await?;
        writeln!(out, "body metric {} recorded", metric?.id)?;
        Ok(())
    }

    async fn note(&self, args: NoteArgs, out: &mut dyn Write) -> Result<()> {
        if args.text.trim().is_empty() {
            bail!("note text is empty");
        }
        let sync = self.edit(&args.route.route, out).await?;
        let note = sync.add_note(args.text, args.tags);
        self.finish(&sync, out).await?;
        writeln!(out, "note {} added", note?.id)?;
        Ok(())
    }

    async fn end(&self, args: RouteArg, out: &mut dyn Write) -> Result<()> {
        let sync = self.edit(&args.route, out).await?;
        let ended = sync.end_fast();
        self.finish(&sync, out).await?;
        if ended? {
            writeln!(out, "fast ended")?;
        } else {
            writeln!(out, "fast had already ended")?;
        }
        Ok(())
    }

    async fn export(&self, args: ExportArgs, out: &mut dyn Write) -> Result<()> {
        let (session, _) = self.access(&args.route.route, out).await?;
        let format = ExportFormat::from(args.format);
        let now = now_millis();
        let text = match format {
            ExportFormat::Json => export_json(&session, now)?,
            ExportFormat::Csv => export_csv(&session),
        };
        match args.out {
            None => writeln!(out, "{text}")?,
            Some(path) => {
                let path = if path.is_dir() {
                    path.join(export_file_name(format, now.date_naive()))
                } else {
                    path
                };
                std::fs::write(&path, text)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                writeln!(out, "exported to {}", path.display())?;
            }
        }
        Ok(())
    }

    async fn import(&self, args: ImportArgs, out: &mut dyn Write) -> Result<()> {
        let text = std::fs::read_to_string(&args.file)
            .with_context(|| format!("failed to read {}", args.file.display()))?;
        let session = import_json(&text)?;
        let (session, route) = self.tracker.import_session(session).await?;
        writeln!(out, "imported as {}", session.id)?;
        writeln!(out, "edit link: {route}")?;
        Ok(())
    }

    async fn delete(&self, args: RouteArg, out: &mut dyn Write) -> Result<()> {
        let (session, mode) = self.access(&args.route, out).await?;
        if mode != AccessMode::Edit {
            bail!("{} is read-only; deleting needs the editor link", args.route);
        }
        self.tracker.delete_session(&session.id).await?;
        writeln!(out, "deleted {}", session.id)?;
        Ok(())
    }

    fn recent(&self, out: &mut dyn Write) -> Result<()> {
        let links = self.tracker.recent_links();
        if links.is_empty() {
            writeln!(out, "no recent sessions")?;
        }
        for link in links {
            writeln!(out, "{}", link_line(&link))?;
        }
        Ok(())
    }

    fn sessions(&self, out: &mut dyn Write) -> Result<()> {
        let sessions = self.tracker.local_sessions()?;
        if sessions.is_empty() {
            writeln!(out, "no sessions on this machine")?;
        }
        let active = self.tracker.cache().active_session().map(|s| s.id);
        for session in sessions {
            let marker = if active.as_deref() == Some(session.id.as_str()) {
                '*'
            } else {
                ' '
            };
            writeln!(out, "{marker} {}", session_line(&session))?;
        }
        Ok(())
    }

    async fn watch(&self, args: WatchArgs, out: &mut dyn Write) -> Result<()> {
        let (_, mode) = self.access(&args.route.route, out).await?;
        let id = self.session_id_of(&args.route.route)?;
        let timings = SyncTimings {
            debounce: Duration::from_millis(args.debounce_ms),
            poll: Duration::from_secs(args.poll_secs.max(1)),
        };
        let tracker = Tracker::new(self.store.clone(), self.remote.clone(), timings);
        let sync = tracker.open(&id, mode).await?;
        let mut changes = sync.subscribe();
        let mut shown_revision = None;
        loop {
            let current = changes.borrow_and_update().clone();
            if let Some(session) = current {
                if shown_revision != Some(session.revision) {
                    shown_revision = Some(session.revision);
                    writeln!(out, "{}", session_summary(&session, now_millis()))?;
                    writeln!(out, "  synced:    {}", sync_label(&sync))?;
                    out.flush()?;
                }
            }
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    debug!(session_id = %id, "watch interrupted");
                    break;
                }
            }
        }
        sync.close();
        Ok(())
    }

    async fn find(&self, args: FindArgs, out: &mut dyn Write) -> Result<()> {
        let sessions = self.tracker.find_by_email(&args.email).await?;
        if sessions.is_empty() {
            writeln!(out, "no sessions found for {}", args.email.trim())?;
        }
        for session in sessions {
            writeln!(out, "{}", session_line(&session))?;
        }
        Ok(())
    }

    async fn email_links(&self, args: EmailLinksArgs, out: &mut dyn Write) -> Result<()> {
        let response = self.tracker.email_links(&args.email).await?;
        writeln!(out, "{}", response.message)?;
        Ok(())
    }

    /// Resolves a link through the access gate, following redirects.
    async fn access(&self, raw: &str, out: &mut dyn Write) -> Result<(Session, AccessMode)> {
        let mut route = self.parse_target(raw)?;
        let gate = self.tracker.gate();
        for _ in 0..MAX_REDIRECTS {
            match gate.resolve(&route).await? {
                GateOutcome::Edit { session } => return Ok((session, AccessMode::Edit)),
                GateOutcome::ReadOnly { session } => return Ok((session, AccessMode::ReadOnly)),
                GateOutcome::NotFound { id } => bail!("session {id} not found"),
                GateOutcome::Home | GateOutcome::Redirect(Route::Home) => {
                    bail!("{raw} is not a session link")
                }
                GateOutcome::Redirect(next) => {
                    writeln!(out, "-> {next}")?;
                    route = next;
                }
            }
        }
        Err(anyhow!("too many redirects resolving {raw}"))
    }

    async fn edit(&self, raw: &str, out: &mut dyn Write) -> Result<SessionSync> {
        let (session, mode) = self.access(raw, out).await?;
        if mode != AccessMode::Edit {
            bail!("{raw} is read-only; changing a session needs its editor link");
        }
        Ok(self.tracker.open(&session.id, AccessMode::Edit).await?)
    }

    /// Pushes the debounced write before the process exits.
    async fn finish(&self, sync: &SessionSync, out: &mut dyn Write) -> Result<()> {
        if let Err(err) = sync.flush().await {
            warn!(session_id = %sync.session_id(), error = %err, "flush failed");
            writeln!(
                out,
                "warning: session store unreachable; the change is saved on this machine only"
            )?;
        }
        sync.close();
        Ok(())
    }

    /// Paths and URLs parse as routes. A bare id stands for the editor link
    /// when this machine holds the session's token, the view link otherwise.
    fn parse_target(&self, raw: &str) -> Result<Route> {
        if let Some(route) = Route::parse(raw) {
            if route == Route::Home {
                bail!("{raw:?} is not a session link");
            }
            return Ok(route);
        }
        let id = raw.trim();
        if !is_valid_session_id(id) {
            bail!("{raw:?} is neither a session link nor a session id");
        }
        Ok(self
            .tracker
            .cache()
            .load(id)
            .and_then(|session| Route::editor(&session))
            .unwrap_or_else(|| Route::view(id)))
    }

    fn session_id_of(&self, raw: &str) -> Result<String> {
        let route = self.parse_target(raw)?;
        route
            .session_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("{raw} is not a session link"))
    }
}

fn sync_label(sync: &SessionSync) -> String {
    match (sync.status(), sync.last_synced_at()) {
        (SyncStatus::Loading, _) => "loading".to_string(),
        (SyncStatus::Dirty, _) => "pending changes".to_string(),
        (SyncStatus::Synced, Some(at)) => format!("up to date ({})", at.format("%H:%M:%S")),
        (SyncStatus::Synced, None) => "offline copy".to_string(),
    }
}

/// `<dir>/store.json`, the single file backing the local cache.
pub fn store_path(data_dir: &Path) -> std::path::PathBuf {
    data_dir.join("store.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use fast_track_sync::{MemoryRemoteStore, MemoryStore};

    use crate::cli::Cli;

    struct Harness {
        ctx: Context,
        remote: Arc<MemoryRemoteStore>,
    }

    impl Harness {
        fn new() -> Self {
            let remote = MemoryRemoteStore::new();
            let ctx = Context::new(Arc::new(MemoryStore::new()), remote.clone());
            Self { ctx, remote }
        }

        async fn run(&self, args: &[&str]) -> Result<String> {
            let mut argv = vec!["fast-track"];
            argv.extend_from_slice(args);
            let cli = Cli::try_parse_from(argv)?;
            let mut out = Vec::new();
            self.ctx.run(cli.command, &mut out).await?;
            Ok(String::from_utf8(out)?)
        }
    }

    fn edit_link(output: &str) -> String {
        output
            .lines()
            .find_map(|line| line.strip_prefix("edit link: "))
            .unwrap()
            .to_string()
    }

    #[test_timeout::tokio_timeout_test]
    async fn new_then_log_through_the_editor_link() {
        let h = Harness::new();
        let output = h
            .run(&["new", "--name", "Reset", "--target", "36", "--email", "me@example.com"])
            .await
            .unwrap();
        let link = edit_link(&output);
        let Some(Route::Editor { id, .. }) = Route::parse(&link) else {
            panic!("not an editor link: {link}");
        };

        h.run(&[
            "checkin", &link, "--energy", "7", "--hunger", "3", "--clarity", "8", "--mood", "6",
            "--comfort", "5",
        ])
        .await
        .unwrap();
        h.run(&["metric", &link, "--weight", "80.5"]).await.unwrap();
        h.run(&["note", &link, "Day one", "--tag", "start"]).await.unwrap();
        let ended = h.run(&["end", &link]).await.unwrap();
        assert!(ended.contains("fast ended"));
        let again = h.run(&["end", &link]).await.unwrap();
        assert!(again.contains("already ended"));

        let stored = h.remote.get(&id).unwrap();
        assert_eq!(stored.entries.len(), 1);
        assert_eq!(stored.body_metrics.len(), 1);
        assert_eq!(stored.notes[0].tags, vec!["start"]);
        assert!(!stored.is_active);
        assert_eq!(stored.email.as_deref(), Some("me@example.com"));
    }

    #[test_timeout::tokio_timeout_test]
    async fn view_links_cannot_mutate() {
        let h = Harness::new();
        let output = h.run(&["new", "--name", "Shared"]).await.unwrap();
        let Some(Route::Editor { id, .. }) = Route::parse(&edit_link(&output)) else {
            panic!("expected editor link");
        };
        let view = format!("/view/{id}");

        let err = h.run(&["end", &view]).await.unwrap_err();
        assert!(err.to_string().contains("read-only"));

        let wrong_token = format!("/session/0000/{id}");
        let token = h.remote.get(&id).unwrap().edit_token.unwrap();
        if token != "0000" {
            let output = h.run(&["open", &wrong_token]).await.unwrap();
            assert!(output.contains(&format!("-> /view/{id}")));
            assert!(output.contains("access:    read-only"));
        }
        assert!(h.remote.get(&id).unwrap().is_active);
    }

    #[test_timeout::tokio_timeout_test]
    async fn bare_ids_use_the_local_token() {
        let h = Harness::new();
        let output = h.run(&["new"]).await.unwrap();
        let Some(Route::Editor { id, .. }) = Route::parse(&edit_link(&output)) else {
            panic!("expected editor link");
        };
        let opened = h.run(&["open", &id]).await.unwrap();
        assert!(opened.contains("access:    editing"));
        assert!(opened.starts_with("Unnamed Session [ACTIVE]"));

        assert!(h.run(&["open", "/"]).await.is_err());
        assert!(h.run(&["open", "Not An Id"]).await.is_err());
    }

    #[test_timeout::tokio_timeout_test]
    async fn export_import_round_trip_gets_a_new_id() {
        let h = Harness::new();
        let dir = tempfile::tempdir().unwrap();
        let output = h.run(&["new", "--name", "Travel", "--target", "24"]).await.unwrap();
        let link = edit_link(&output);
        let Some(Route::Editor { id, .. }) = Route::parse(&link) else {
            panic!("expected editor link");
        };

        let out_dir = dir.path().to_str().unwrap();
        let exported = h.run(&["export", &link, "--out", out_dir]).await.unwrap();
        let file = exported.trim().strip_prefix("exported to ").unwrap().to_string();
        assert!(file.ends_with(".json"));

        let imported = h.run(&["import", &file]).await.unwrap();
        let new_id = imported
            .lines()
            .find_map(|line| line.strip_prefix("imported as "))
            .unwrap();
        assert_ne!(new_id, id);
        assert_eq!(h.remote.get(new_id).unwrap().name, "Travel");

        let csv = h.run(&["export", &link, "--format", "csv"]).await.unwrap();
        assert!(csv.contains("=== CHECK-IN DATA ==="));
    }

    #[test_timeout::tokio_timeout_test]
    async fn delete_sessions_and_lists() {
        let h = Harness::new();
        let first = h.run(&["new", "--name", "One"]).await.unwrap();
        h.run(&["new", "--name", "Two"]).await.unwrap();
        let link = edit_link(&first);
        h.run(&["open", &link]).await.unwrap();

        let listed = h.run(&["sessions"]).await.unwrap();
        assert_eq!(listed.lines().count(), 2);
        assert!(listed.contains("One") && listed.contains("Two"));
        let recent = h.run(&["recent"]).await.unwrap();
        assert!(recent.contains("One"));

        let Some(Route::Editor { id, .. }) = Route::parse(&link) else {
            panic!("expected editor link");
        };
        h.run(&["delete", &link]).await.unwrap();
        assert!(h.remote.get(&id).is_none());
        let listed = h.run(&["sessions"]).await.unwrap();
        assert!(!listed.contains("One"));
        assert!(!h.run(&["recent"]).await.unwrap().contains("One"));
    }

    #[test_timeout::tokio_timeout_test]
    async fn offline_changes_stay_local() {
        let h = Harness::new();
        let output = h.run(&["new", "--name", "Cabin"]).await.unwrap();
        let link = edit_link(&output);
        h.remote.set_offline(true);
        let noted = h.run(&["note", &link, "No signal"]).await.unwrap();
        assert!(noted.contains("saved on this machine only"));
        let Some(Route::Editor { id, .. }) = Route::parse(&link) else {
            panic!("expected editor link");
        };
        assert_eq!(h.ctx.tracker.cache().load(&id).unwrap().notes.len(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn offline_note_survives_the_next_online_command() {
        let h = Harness::new();
        let output = h.run(&["new", "--name", "Cabin"]).await.unwrap();
        let link = edit_link(&output);
        let Some(Route::Editor { id, .. }) = Route::parse(&link) else {
            panic!("expected editor link");
        };

        h.remote.set_offline(true);
        h.run(&["note", &link, "No signal"]).await.unwrap();
        h.remote.set_offline(false);
        let opened = h.run(&["open", &link]).await.unwrap();
        assert!(opened.contains("0 check-ins, 0 body metrics, 1 notes"));

        let checked = h
            .run(&[
                "checkin", &link, "--energy", "7", "--hunger", "3", "--clarity", "8", "--mood",
                "6", "--comfort", "5",
            ])
            .await
            .unwrap();
        assert!(!checked.contains("warning"));

        let local = h.ctx.tracker.cache().load(&id).unwrap();
        let stored = h.remote.get(&id).unwrap();
        for session in [&local, &stored] {
            assert_eq!(session.notes.len(), 1);
            assert_eq!(session.notes[0].content, "No signal");
            assert_eq!(session.entries.len(), 1);
        }
        assert_eq!(local, stored);
    }

    #[test_timeout::tokio_timeout_test]
    async fn absurd_targets_are_rejected() {
        let h = Harness::new();
        assert!(h.run(&["new", "--target", "1e300"]).await.is_err());
        assert!(h.run(&["new", "--target", "0"]).await.is_err());
        assert!(h.run(&["sessions"]).await.unwrap().contains("no sessions on this machine"));
        assert!(h.remote.saves().is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn find_by_email() {
        let h = Harness::new();
        h.run(&["new", "--name", "Mine", "--email", "Me@Example.com"])
            .await
            .unwrap();
        let found = h.run(&["find", "--email", "me@example.com"]).await.unwrap();
        assert!(found.contains("Mine"));
        let none = h.run(&["find", "--email", "other@example.com"]).await.unwrap();
        assert!(none.contains("no sessions found"));
        assert!(h.run(&["find", "--email", "nope"]).await.is_err());
    }
}
