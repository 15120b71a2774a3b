//! Plain-text views of sessions and links for the terminal.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use fast_track_core::timefmt::to_iso;
use fast_track_core::{LinkType, Session, SessionLink};

fn status_label(is_active: bool) -> &'static str {
    if is_active {
        "ACTIVE"
    } else {
        "ENDED"
    }
}

fn display_name(name: &str) -> &str {
    if name.trim().is_empty() {
        "Unnamed Session"
    } else {
        name
    }
}

pub fn session_summary(session: &Session, now: DateTime<Utc>) -> String {
    let progress = session.progress(now);
    let milestones = progress.milestones();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} [{}] ({})",
        display_name(&session.name),
        status_label(session.is_active),
        session.id
    );
    let _ = writeln!(out, "  started:   {}", to_iso(&session.start_time));
    if let Some(end) = &session.end_time {
        let _ = writeln!(out, "  ended:     {}", to_iso(end));
    }
    match session.target_end() {
        Some(end) => {
            let _ = writeln!(
                out,
                "  target:    {}h (until {})",
                session.target_duration,
                to_iso(&end)
            );
        }
        None => {
            let _ = writeln!(out, "  target:    {}h", session.target_duration);
        }
    }
    let _ = writeln!(
        out,
        "  elapsed:   {} ({:.1}%)",
        progress.formatted(),
        progress.percentage
    );
    let reached: Vec<&str> = [
        (milestones.h24, "24h"),
        (milestones.h48, "48h"),
        (milestones.h72, "72h"),
    ]
    .into_iter()
    .filter_map(|(hit, label)| hit.then_some(label))
    .collect();
    if !reached.is_empty() {
        let _ = writeln!(out, "  milestones: {}", reached.join(", "));
    }
    let _ = write!(
        out,
        "  entries:   {} check-ins, {} body metrics, {} notes",
        session.entries.len(),
        session.body_metrics.len(),
        session.notes.len()
    );
    out
}

/// One line per session, for lists.
pub fn session_line(session: &Session) -> String {
    format!(
        "{:<24} {:<7} {:>5}h  {}  {}",
        session.id,
        status_label(session.is_active),
        session.target_duration,
        to_iso(&session.start_time),
        display_name(&session.name)
    )
}

pub fn link_line(link: &SessionLink) -> String {
    let path = match (link.link_type, link.edit_token.as_deref()) {
        (LinkType::Editable, Some(token)) => format!("/session/{token}/{}", link.id),
        _ => format!("/view/{}", link.id),
    };
    let access = match link.link_type {
        LinkType::Editable => "edit",
        LinkType::Readonly => "view",
    };
    format!(
        "{:<4} {:<7} {}  {}  (last opened {})",
        access,
        status_label(link.is_active),
        path,
        display_name(&link.name),
        to_iso(&link.last_accessed)
    )
}
