//! Fast Track core: the fasting session aggregate and everything that can be
//! computed from it without touching storage or the network.
//!
//! Responsibilities:
//! - the session model and its append-only sub-collections
//! - human-readable session ids, edit tokens, and entry ids
//! - JSON/CSV export and JSON import
//! - elapsed-time and milestone calculations for display
//! - the HTTP API bodies shared by the session store and its clients

pub mod api;
pub mod error;
pub mod export;
pub mod ids;
pub mod model;
pub mod progress;
pub mod timefmt;

pub use error::CoreError;
pub use export::{export_csv, export_file_name, export_json, import_json, ExportFormat};
pub use ids::{
    generate_edit_token, generate_entry_id, generate_session_id, is_valid_email,
    is_valid_session_id, validate_edit_token,
};
pub use model::{
    validate_target_duration, BodyMetric, BodyMetricInput, CheckinEntry, CheckinInput,
    JournalEntry, LinkType, Session, SessionLink, MAX_TARGET_HOURS,
};
pub use progress::{format_elapsed, Milestones, Progress};
