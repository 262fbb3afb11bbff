use clap::{Args, Parser, Subcommand};

use crate::ring::EventId;
use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "ringarchive-rs",
    version,
    about = "Archive a Ring camera's recorded event history to local storage"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub auth: AuthArgs,

    /// Log level (RUST_LOG takes precedence when set)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Walk a camera's history backward and download every recording
    Archive(ArchiveArgs),
    /// List the cameras available to this account
    ListDevices,
    /// Authenticate and write the token cache, without downloading
    Auth,
}

#[derive(Args, Debug, Clone)]
pub struct AuthArgs {
    /// Token cache written after authenticating and reused on later runs
    #[arg(long, env = "RING_TOKEN_CACHE", default_value = "~/.ringarchive-rs/token.json", global = true)]
    pub token_cache: String,

    /// Ring account email, only needed when there is no usable cached token
    #[arg(short = 'u', long, env = "RING_USERNAME", global = true)]
    pub username: Option<String>,

    /// Ring account password.
    /// WARNING: passing via --password is visible in process listings.
    /// Prefer the RING_PASSWORD environment variable instead.
    #[arg(short = 'p', long, env = "RING_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Two-factor code sent by Ring after a first attempt without one
    #[arg(long, env = "RING_OTP", global = true)]
    pub otp: Option<String>,

    /// Seconds before any single HTTP request (including a recording transfer) is abandoned
    #[arg(long = "timeout", env = "RING_TIMEOUT", default_value_t = 60, global = true)]
    pub timeout_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ArchiveArgs {
    /// Camera name, as shown by `list-devices`
    #[arg(long, env = "RING_DEVICE")]
    pub device: String,

    /// Oldest event id to archive (inclusive)
    #[arg(long, env = "RING_LOWER_BOUND", default_value = "0")]
    pub lower_bound: EventId,

    /// Start archiving events older than this id (exclusive). Defaults to the newest event.
    #[arg(long, env = "RING_INITIAL_CURSOR")]
    pub initial_cursor: Option<EventId>,

    /// Archive root; recordings land in <directory>/<device>/
    #[arg(short = 'd', long, env = "RING_DIRECTORY", default_value = "videos")]
    pub directory: String,

    /// Events requested per history page
    #[arg(long, env = "RING_PAGE_SIZE", default_value_t = 8192)]
    pub page_size: usize,

    /// Number of concurrent downloads
    #[arg(long, env = "RING_THREADS_NUM", default_value_t = 1)]
    pub threads_num: usize,

    /// Attempts per recording before giving up, including the first
    #[arg(long, env = "RING_MAX_RETRIES", default_value_t = 50)]
    pub max_retries: u32,

    /// Seconds to wait between attempts
    #[arg(long, env = "RING_RETRY_DELAY", default_value_t = 5)]
    pub retry_delay: u64,

    /// Milliseconds to pause after each download before handling the next
    #[arg(long, env = "RING_THROTTLE_MS", default_value_t = 1000)]
    pub throttle_ms: u64,

    /// Disable the progress spinner
    #[arg(long)]
    pub no_progress_bar: bool,
}
