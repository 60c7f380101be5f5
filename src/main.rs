use anyhow::Context as AnyhowContext;
use clap::{Parser, Subcommand};
use purgecord::archive::{ArchiveWriter, LOG_FILE};
use purgecord::config::Config;
use purgecord::db::Database;
use purgecord::discord::gateway::GatewaySession;
use purgecord::discord::{ChatService, HttpClient};
use purgecord::fetcher::HttpFetcher;
use purgecord::importer::Importer;
use purgecord::pause::PauseController;
use purgecord::purge::{Purger, Target};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Archive and bulk-delete your own Discord messages.
#[derive(Parser)]
#[command(name = "purgecord", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Archive, then delete, every message you wrote in a channel or guild
    Purge {
        /// Channel to purge (overrides TARGET_CHANNEL_ID)
        #[arg(long)]
        channel: Option<u64>,
        /// Guild to purge (overrides TARGET_GUILD_ID)
        #[arg(long)]
        guild: Option<u64>,
        /// Archive directory (overrides ARCHIVE_DIR)
        #[arg(long)]
        archive: Option<PathBuf>,
        /// Delete without archiving
        #[arg(long, conflicts_with = "archive")]
        no_archive: bool,
        /// Skip messages with ids below this one
        #[arg(long, default_value_t = 0)]
        from_id: u64,
    },
    /// Load the archive log into <archive>/messages.db
    Import {
        /// Archive directory (overrides ARCHIVE_DIR)
        #[arg(long)]
        archive: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    let result = match cli.command {
        Command::Purge {
            channel,
            guild,
            archive,
            no_archive,
            from_id,
        } => {
            config.channel_id = channel.or(config.channel_id);
            config.guild_id = guild.or(config.guild_id);
            if no_archive {
                config.archive_dir = None;
            } else if archive.is_some() {
                config.archive_dir = archive;
            }
            purge(config, from_id).await
        }
        Command::Import { archive } => {
            if archive.is_some() {
                config.archive_dir = archive;
            }
            import(config).await
        }
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

async fn purge(config: Config, from_id: u64) -> anyhow::Result<()> {
    config.validate_for_purge()?;
    info!("Starting purge with {:?}", config);

    let archive = match &config.archive_dir {
        Some(dir) => {
            let fetcher = Arc::new(HttpFetcher::new(config.http_timeout())?);
            let writer = ArchiveWriter::open(dir, fetcher)
                .await
                .with_context(|| format!("Error while opening archive directory {:?}", dir))?;
            Some(writer)
        }
        None => {
            warn!("Archiving disabled, messages will be deleted without a copy");
            None
        }
    };

    let client = Arc::new(HttpClient::new(&config)?);
    let me = client.current_user().await.context("Error fetching self")?;
    info!("Authenticated as {} ({})", me.username, me.id);
    let target = Target::resolve(client.as_ref(), config.guild_id, config.channel_id)
        .await
        .context("Error while fetching channel")?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let (pause, pause_handle) = PauseController::new(config.quiet_window());
    let gateway = if config.pause_on_self_activity {
        let session = GatewaySession::new(
            config.gateway_url.clone(),
            config.discord_token.clone(),
            me.id,
            pause_handle,
        );
        Some(tokio::spawn(session.run(cancel.clone())))
    } else {
        None
    };

    let mut purger = Purger::new(client, me.id, target, pause, cancel.clone()).starting_at(from_id);
    if let Some(archive) = archive {
        purger = purger.with_archive(archive);
    }
    let report = purger.run().await.context("Error occurred while searching messages");

    cancel.cancel();
    if let Some(gateway) = gateway {
        let _ = gateway.await;
    }

    let report = report?;
    info!("Resume point: --from-id {}", report.cursor);
    Ok(())
}

async fn import(config: Config) -> anyhow::Result<()> {
    let dir = config
        .archive_dir
        .context("an archive directory is required for import")?;
    let db = Database::open(dir.join("messages.db"))
        .with_context(|| format!("opening message store in {:?}", dir))?;
    db.execute_init()?;

    let log = dir.join(LOG_FILE);
    let report = db
        .run_blocking(move |db| Ok(Importer::new(db.clone()).import_file(&log)?))
        .await?;
    if report.torn_tail {
        warn!("The archive log ends in a partial line; it was left out");
    }
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = cancel.cancelled() => return,
    }
    info!("Shutdown requested, finishing the current message");
    cancel.cancel();
}
