use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use fast_track_core::ExportFormat;

pub const DEFAULT_SERVER: &str = "http://localhost:8080";

#[derive(Parser, Debug)]
#[command(
    name = "fast-track",
    about = "Track fasting sessions and keep them in sync with the session store",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "FAST_TRACK_SERVER",
        default_value = DEFAULT_SERVER,
        help = "Base URL of the Fast Track session store"
    )]
    pub server: String,

    #[arg(
        long = "data-dir",
        global = true,
        env = "FAST_TRACK_DATA_DIR",
        value_name = "DIR",
        help = "Directory for the local session cache (defaults to the platform data directory)"
    )]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a new fasting session
    New(NewArgs),
    /// Show a session by link
    Open(RouteArg),
    /// Log how you feel right now
    Checkin(CheckinArgs),
    /// Record weight and/or body fat
    Metric(MetricArgs),
    /// Add a journal entry
    Note(NoteArgs),
    /// End the fast
    End(RouteArg),
    /// Export a session as JSON or CSV
    Export(ExportArgs),
    /// Import a session from an exported JSON file
    Import(ImportArgs),
    /// Delete a session locally and from the session store
    Delete(RouteArg),
    /// Sessions visited from this machine, most recent first
    Recent,
    /// Sessions cached on this machine
    Sessions,
    /// Follow a session live until interrupted
    Watch(WatchArgs),
    /// Look up sessions by owner email
    Find(FindArgs),
    /// Email every session link for an address
    EmailLinks(EmailLinksArgs),
}

/// A session link: `/session/{token}/{id}`, `/view/{id}`, `/session/{id}`,
/// a full URL, or the bare id of a locally cached session.
#[derive(Args, Debug, Clone)]
pub struct RouteArg {
    #[arg(value_name = "LINK")]
    pub route: String,
}

#[derive(Args, Debug)]
pub struct NewArgs {
    #[arg(long, default_value = "", help = "Session name")]
    pub name: String,

    #[arg(long, default_value_t = 16.0, value_name = "HOURS", help = "Target duration in hours")]
    pub target: f64,

    #[arg(long, value_name = "ISO8601", help = "Start time (defaults to now)")]
    pub start: Option<String>,

    #[arg(long, help = "Owner email, used to recover links later")]
    pub email: Option<String>,
}

#[derive(Args, Debug)]
pub struct CheckinArgs {
    #[command(flatten)]
    pub route: RouteArg,

    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub energy: u8,
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub hunger: u8,
    #[arg(long = "clarity", value_parser = clap::value_parser!(u8).range(1..=10))]
    pub mental_clarity: u8,
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub mood: u8,
    #[arg(long = "comfort", value_parser = clap::value_parser!(u8).range(1..=10))]
    pub physical_comfort: u8,
    #[arg(long = "sleep", value_parser = clap::value_parser!(u8).range(1..=10))]
    pub sleep_quality: Option<u8>,
    #[arg(long = "water", value_name = "GLASSES", help = "Water intake, counted in glasses")]
    pub water_intake: Option<u32>,
    #[arg(long)]
    pub electrolytes: bool,
}

#[derive(Args, Debug)]
pub struct MetricArgs {
    #[command(flatten)]
    pub route: RouteArg,

    #[arg(long)]
    pub weight: Option<f64>,

    #[arg(long = "body-fat", value_name = "PERCENT")]
    pub body_fat: Option<f64>,
}

#[derive(Args, Debug)]
pub struct NoteArgs {
    #[command(flatten)]
    pub route: RouteArg,

    pub text: String,

    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Json,
    Csv,
}

impl From<FormatArg> for ExportFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Json => ExportFormat::Json,
            FormatArg::Csv => ExportFormat::Csv,
        }
    }
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[command(flatten)]
    pub route: RouteArg,

    #[arg(long, value_enum, default_value_t = FormatArg::Json)]
    pub format: FormatArg,

    #[arg(
        long,
        value_name = "PATH",
        help = "Write to a file; a directory gets fasting-session-<date>.<ext> (stdout when omitted)"
    )]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub route: RouteArg,

    #[arg(long = "debounce-ms", default_value_t = 2000)]
    pub debounce_ms: u64,

    #[arg(long = "poll-secs", default_value_t = 30)]
    pub poll_secs: u64,
}

#[derive(Args, Debug)]
pub struct FindArgs {
    #[arg(long)]
    pub email: String,
}

#[derive(Args, Debug)]
pub struct EmailLinksArgs {
    pub email: String,
}
