use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::retry::RetryConfig;
use crate::store::Credentials;
use crate::sync::SyncConfig;

/// Validated settings for a replication run.
pub struct Config {
    pub source_url: String,
    pub target_url: String,
    pub credentials: Credentials,
    pub snapshot_path: PathBuf,
    pub timeout: Option<Duration>,
    pub retry: RetryConfig,
    pub threads: usize,
    pub ignore_errors: bool,
    pub dry_run: bool,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("source_url", &self.source_url)
            .field("target_url", &self.target_url)
            .field("username", &self.credentials.username)
            .field("password", &"<redacted>")
            .field("snapshot_path", &self.snapshot_path)
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check that `url` is an absolute http(s) URL and drop any trailing slash.
fn normalize_url(label: &str, url: &str) -> anyhow::Result<String> {
    let parsed = reqwest::Url::parse(url).with_context(|| format!("Invalid {label} URL: {url}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("{label} URL must use http or https: {url}");
    }
    Ok(url.trim_end_matches('/').to_string())
}

impl Config {
    pub fn from_cli(cli: crate::cli::Cli) -> anyhow::Result<Self> {
        let (Some(source), Some(target)) = (cli.source, cli.target) else {
            bail!("Both SOURCE_URL and TARGET_URL are required");
        };
        if cli.threads == 0 {
            bail!("--threads must be at least 1");
        }
        if cli.timeout == Some(0) {
            bail!("--timeout must be at least 1 second");
        }

        Ok(Self {
            source_url: normalize_url("Source", &source)?,
            target_url: normalize_url("Target", &target)?,
            credentials: Credentials {
                username: cli.username,
                password: cli.password,
            },
            snapshot_path: expand_tilde(&cli.save),
            timeout: cli.timeout.map(Duration::from_secs),
            retry: RetryConfig {
                max_retries: cli.max_retries,
                base_delay: Duration::from_secs(cli.retry_delay),
                ..RetryConfig::default()
            },
            threads: usize::from(cli.threads),
            ignore_errors: cli.ignore_errors,
            dry_run: cli.dry_run,
            no_progress_bar: cli.no_progress_bar,
        })
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            workers: self.threads,
            ignore_errors: self.ignore_errors,
            dry_run: self.dry_run,
            no_progress_bar: self.no_progress_bar,
            retry: self.retry,
        }
    }
}
