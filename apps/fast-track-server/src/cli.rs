use clap::Parser;

/// Flags override the matching environment variables.
#[derive(Parser, Debug, Default)]
#[command(name = "fast-track-server")]
#[command(about = "Fast Track session store")]
pub struct Cli {
    /// Port to listen on [env: FAST_TRACK_PORT]
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Redis connection URL; the in-memory store is used without one [env: REDIS_URL]
    #[arg(long)]
    pub redis_url: Option<String>,

    /// Seconds a session record lives after its last write [env: SESSION_TTL]
    #[arg(long)]
    pub session_ttl: Option<u64>,
}
