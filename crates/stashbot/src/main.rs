use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use stashbot::Config;
use stashbot::coordinator::Coordinator;
use stashbot::sync::SyncRunner;
use stashbot_gateway_telegram::{TelegramGateway, TelegramGatewayConfig};
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "stashbot",
    version,
    about = "Save forwarded media and links, then sync them to the cloud"
)]
struct Cli {
    /// Path to the YAML config file. Missing file means defaults.
    #[arg(long, global = true, default_value = "stashbot.yaml")]
    config: PathBuf,

    /// Log filter, e.g. `debug` or `stashbot=trace`. Overrides RUST_LOG.
    #[arg(long, global = true, value_name = "FILTER")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the bot (default).
    Run,
    /// Sync the download folder once and exit.
    Sync {
        /// Replay the failure log instead of syncing the download folder.
        #[arg(long)]
        retry_failed: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let config = Config::load(&cli.config)
        .await
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;
    tokio::fs::create_dir_all(&config.download.dir)
        .await
        .with_context(|| {
            format!(
                "failed to create download dir {}",
                config.download.dir.display()
            )
        })?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Sync { retry_failed } => sync(config, retry_failed).await,
    }
}

fn init_tracing(filter: Option<&str>) {
    let env_filter = match filter {
        Some(filter) => tracing_subscriber::EnvFilter::new(filter),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

async fn run(config: Config) -> Result<()> {
    let token = config
        .telegram
        .resolve_token()
        .ok_or_else(|| anyhow!("no bot token: set TELEGRAM_BOT_TOKEN or telegram.token"))?;
    let gateway = TelegramGateway::new(TelegramGatewayConfig {
        token,
        allowed_user_ids: config.telegram.allowed_user_ids.clone(),
        api_url: config.telegram.api_url.clone(),
    })?;

    let coordinator = Coordinator::new(
        &config,
        Arc::new(gateway.reply_sink()),
        Arc::new(gateway.media_source()),
    );
    info!(
        download_dir = %config.download.dir.display(),
        max_concurrent = config.download.max_concurrent,
        max_file_size_mb = config.download.max_file_size_mb,
        "Stashbot starting"
    );
    gateway.run(Arc::new(coordinator)).await;
    Ok(())
}

async fn sync(config: Config, retry_failed: bool) -> Result<()> {
    let runner = SyncRunner::new(config.sync.clone(), config.sync_failure_log());
    if retry_failed {
        let tally = runner.retry_failed().await?;
        println!(
            "Sync retry: {} succeeded, {} still failed",
            tally.succeeded, tally.still_failed
        );
        for error in &tally.errors {
            println!("  {}", error);
        }
        return Ok(());
    }

    let report = runner.run(&config.download.dir).await?;
    println!(
        "Synced {} ({} local files removed)",
        report.folder.display(),
        report.files_removed
    );
    Ok(())
}
