//! # orgpulse entry point
//!
//! Runs one ingestion for an organization and exits.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

use orgpulse::{
    config::ConfigLoader, db::StoreSession, forge::GitHubGateway, pipeline::Pipeline, telemetry,
};

#[derive(Debug, Parser)]
#[command(name = "orgpulse", version, about = "Snapshot recent activity of a code-forge organization")]
struct Cli {
    /// Organization login to ingest; defaults to ORGPULSE_DEFAULT_ORG
    org: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from layered env files and variables
    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config)?;

    info!(profile = %config.profile, "configuration loaded");
    if let Ok(redacted_json) = config.redacted_json() {
        debug!("configuration: {}", redacted_json);
    }

    let gateway = GitHubGateway::from_config(&config).context("building forge gateway")?;
    let session = StoreSession::open(&config)
        .await
        .context("opening store session")?;

    let org_name = cli.org.unwrap_or_else(|| config.default_org.clone());
    let pipeline = Pipeline::new(Arc::new(gateway), session, config.pipeline.clone());

    let org = pipeline
        .run(&org_name)
        .await
        .with_context(|| format!("ingesting organization {}", org_name))?;

    info!(
        login = %org.login,
        members = org.members.len(),
        recently_updated = org.recently_updated_repo_count.unwrap_or_default(),
        failures = org.failure_count(),
        "ingestion complete"
    );

    Ok(())
}
