use clap::Parser;
use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "replicate-rs",
    version,
    about = "Copy every item of one REST store to another, resuming where the last run stopped"
)]
pub struct Cli {
    /// Base URL of the store to copy from
    #[arg(value_name = "SOURCE_URL", required_unless_present = "status")]
    pub source: Option<String>,

    /// Base URL of the store to copy into
    #[arg(value_name = "TARGET_URL", required_unless_present = "status")]
    pub target: Option<String>,

    /// Progress snapshot file
    #[arg(long, default_value = "studies.list")]
    pub save: String,

    /// Username for HTTP basic auth on both stores
    #[arg(long, default_value = "orthanc")]
    pub username: String,

    /// Password for HTTP basic auth on both stores.
    /// WARNING: passing via --password is visible in process listings.
    /// Prefer the REPLICATE_PASSWORD environment variable instead.
    #[arg(long, env = "REPLICATE_PASSWORD", default_value = "orthanc", hide_env_values = true)]
    pub password: String,

    /// Number of concurrent transfer workers
    #[arg(long, default_value_t = 2)]
    pub threads: u16,

    /// Log failed listings and transfers and keep going
    #[arg(long)]
    pub ignore_errors: bool,

    /// Per-request HTTP timeout in seconds (no timeout when omitted)
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Max retries per fetch or push on transient errors (0 = no retries)
    #[arg(long, default_value_t = 0)]
    pub max_retries: u32,

    /// Initial retry delay in seconds
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,

    /// Scan both stores and report what would be transferred
    #[arg(long)]
    pub dry_run: bool,

    /// Print a summary of the snapshot file and exit
    #[arg(long)]
    pub status: bool,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Disable progress bars
    #[arg(long)]
    pub no_progress_bar: bool,
}
