//! ringarchive-rs: archive a Ring camera's recorded event history.
//!
//! Walks the camera's event log backward from a cursor, page by page, and
//! downloads every recording down to a lower bound. Files already on disk
//! are skipped, so an interrupted or partially failed run is finished by
//! simply running it again.

#![warn(clippy::all)]

mod archive;
mod cli;
mod config;
mod retry;
mod ring;
mod shutdown;
mod types;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Command;
use config::{AuthConfig, Config};
use ring::auth::{Authenticator, OAUTH_URL};
use ring::client::RingClient;
use ring::error::AuthError;

/// Load the token cache and produce an authenticated API client.
async fn connect(auth: &AuthConfig) -> anyhow::Result<RingClient> {
    let authenticator = Authenticator::load(&auth.token_cache, OAUTH_URL, auth.timeout).await?;
    let token = match authenticator.authenticate(&auth.credentials()).await {
        Ok(token) => token,
        Err(AuthError::TwoFactorRequired) => anyhow::bail!(
            "Ring sent a two-factor code to your account.\n\
             Rerun `ringarchive-rs auth` with --otp <code> (or RING_OTP) to finish logging in."
        ),
        Err(e) => return Err(e).context("Authentication failed"),
    };
    tracing::debug!(hardware_id = authenticator.hardware_id(), "Authenticated");
    Ok(RingClient::new(authenticator, token))
}

async fn run_auth(auth: AuthConfig) -> anyhow::Result<()> {
    connect(&auth).await?;
    tracing::info!("Authentication completed, token cached at {}", auth.token_cache.display());
    Ok(())
}

async fn run_list_devices(auth: AuthConfig) -> anyhow::Result<()> {
    let client = connect(&auth).await?;
    let devices = client.devices().await?;
    println!("Devices:");
    for device in devices {
        match device.kind {
            Some(kind) => println!("  {} ({}, id {})", device.description, kind, device.id),
            None => println!("  {} (id {})", device.description, device.id),
        }
    }
    Ok(())
}

async fn run_archive(auth: AuthConfig, config: Config) -> anyhow::Result<()> {
    tracing::debug!(?config, "Archive configuration");
    let client = connect(&auth).await?;
    let camera = client.find_device(&config.device).await?;
    tracing::info!(
        device_id = camera.device().id,
        "Archiving recordings from {}",
        config.device
    );

    let lock = archive::lock::ArchiveLock::acquire(&config.directory).await?;
    tracing::debug!("Holding archive lock {}", lock.path().display());
    let shutdown_token = shutdown::install_signal_handler()?;

    let summary = archive::archive(
        Arc::new(camera),
        config.window,
        &config.archive_config(),
        shutdown_token,
    )
    .await?;

    if !summary.failed.is_empty() {
        anyhow::bail!(
            "{} recordings failed to download; rerun the same command to retry them",
            summary.failed.len()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let auth = AuthConfig::from_cli(cli.auth)?;
    tracing::debug!(?auth, "Starting ringarchive-rs");

    match cli.command {
        Command::Auth => run_auth(auth).await,
        Command::ListDevices => run_list_devices(auth).await,
        Command::Archive(args) => {
            let config = Config::from_cli(args)?;
            run_archive(auth, config).await
        }
    }
}
