use std::path::PathBuf;
use std::time::Duration;

use crate::archive::{ArchiveConfig, ArchiveWindow};
use crate::cli::{ArchiveArgs, AuthArgs};
use crate::retry::RetryConfig;
use crate::ring::auth::Credentials;
use crate::ring::EventId;

/// Credentials and token cache location, shared by every subcommand.
pub struct AuthConfig {
    pub token_cache: PathBuf,
    pub timeout: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
    pub otp: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_cache", &self.token_cache)
            .field("timeout", &self.timeout)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("otp", &self.otp.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AuthConfig {
    pub fn from_cli(args: AuthArgs) -> anyhow::Result<Self> {
        if args.timeout_secs == 0 {
            anyhow::bail!("--timeout must be at least 1 second");
        }
        Ok(Self {
            token_cache: expand_tilde(&args.token_cache),
            timeout: Duration::from_secs(args.timeout_secs),
            username: args.username,
            password: args.password,
            otp: args.otp,
        })
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
            otp: self.otp.clone(),
        }
    }
}

/// Validated settings for the `archive` subcommand.
#[derive(Debug, Clone)]
pub struct Config {
    pub device: String,
    pub directory: PathBuf,
    pub window: ArchiveWindow,
    pub page_size: usize,
    pub threads_num: usize,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub throttle: Duration,
    pub no_progress_bar: bool,
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(args: ArchiveArgs) -> anyhow::Result<Self> {
        if args.device.trim().is_empty() {
            anyhow::bail!("--device must name a camera (see `list-devices`)");
        }
        if args.page_size == 0 {
            anyhow::bail!("--page-size must be at least 1");
        }
        if args.threads_num == 0 {
            anyhow::bail!("--threads-num must be at least 1");
        }
        if args.max_retries == 0 {
            anyhow::bail!("--max-retries must be at least 1 (it counts the first attempt)");
        }

        let initial_cursor = args.initial_cursor.unwrap_or(EventId::NEWEST);
        if args.lower_bound > initial_cursor {
            anyhow::bail!(
                "--lower-bound {} is newer than --initial-cursor {}; nothing to archive",
                args.lower_bound,
                initial_cursor
            );
        }

        Ok(Self {
            device: args.device,
            directory: expand_tilde(&args.directory),
            window: ArchiveWindow {
                lower_bound: args.lower_bound,
                initial_cursor,
            },
            page_size: args.page_size,
            threads_num: args.threads_num,
            max_retries: args.max_retries,
            retry_delay_secs: args.retry_delay,
            throttle: Duration::from_millis(args.throttle_ms),
            no_progress_bar: args.no_progress_bar,
        })
    }

    /// The subset of settings the archive engine consumes.
    pub fn archive_config(&self) -> ArchiveConfig {
        ArchiveConfig {
            directory: self.directory.clone(),
            page_size: self.page_size,
            concurrency: self.threads_num,
            retry: RetryConfig {
                max_retries: self.max_retries,
                delay_secs: self.retry_delay_secs,
            },
            throttle: self.throttle,
            no_progress_bar: self.no_progress_bar,
        }
    }
}
