use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tlsync_storage::PgStore;
use tlsync_sync::{SyncConfig, SyncError, SyncRunSummary};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tlsync-cli")]
#[command(about = "Synchronize the test lists into PostgreSQL")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one synchronization and exit.
    Sync {
        #[command(flatten)]
        target: Target,
        /// Print the run summary as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Apply database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        postgres: Option<String>,
    },
    /// Serve the test-list API, plus the cron scheduler when enabled.
    Serve {
        #[command(flatten)]
        target: Target,
        #[arg(long, env = "TLSYNC_WEB_PORT")]
        port: Option<u16>,
    },
    /// Run the synchronizer on the configured cron schedule until interrupted.
    Schedule {
        #[command(flatten)]
        target: Target,
    },
}

#[derive(Debug, Args)]
struct Target {
    /// Directory holding the `test-lists` checkout.
    #[arg(long, env = "TLSYNC_WORKING_DIR")]
    working_dir: Option<PathBuf>,
    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL")]
    postgres: Option<String>,
}

impl Target {
    fn apply(self, config: &mut SyncConfig) {
        if let Some(dir) = self.working_dir {
            config.working_dir = dir;
        }
        if let Some(url) = self.postgres {
            config.database_url = url;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = SyncConfig::from_env();
    let command = cli.command.unwrap_or(Commands::Sync {
        target: Target {
            working_dir: None,
            postgres: None,
        },
        json: false,
    });

    match run(command, &mut config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: &mut SyncConfig) -> Result<()> {
    match command {
        Commands::Sync { target, json } => {
            target.apply(config);
            let synchronizer = tlsync_sync::synchronizer_from_config(config).await?;
            match synchronizer.run().await {
                Ok(summary) => print_summary(&summary, json)?,
                Err(SyncError::Incomplete { failures, summary }) => {
                    print_summary(&summary, json)?;
                    anyhow::bail!("{} list file(s) failed: {}", failures.len(), failures.join("; "));
                }
                Err(err) => return Err(err).context("sync run failed"),
            }
        }
        Commands::Migrate { postgres } => {
            if let Some(url) = postgres {
                config.database_url = url;
            }
            let store = PgStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Serve { target, port } => {
            target.apply(config);
            if let Some(port) = port {
                config.web_port = port;
            }
            let synchronizer = Arc::new(tlsync_sync::synchronizer_from_config(config).await?);
            let store = synchronizer.store();
            let scheduler = tlsync_sync::maybe_build_scheduler(config, synchronizer).await?;
            if let Some(sched) = &scheduler {
                sched.start().await.context("starting scheduler")?;
            }
            tlsync_web::serve(store, config.web_port).await?;
        }
        Commands::Schedule { target } => {
            target.apply(config);
            let synchronizer = Arc::new(tlsync_sync::synchronizer_from_config(config).await?);
            let mut sched =
                tlsync_sync::schedule::build_scheduler(synchronizer, &config.sync_cron).await?;
            sched.start().await.context("starting scheduler")?;
            println!("scheduler running on '{}', ctrl-c to stop", config.sync_cron);
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }
    Ok(())
}

fn print_summary(summary: &SyncRunSummary, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(summary).context("serializing run summary")?
        );
    } else {
        println!(
            "sync complete: run_id={} mode={:?} revision={} inserted={} updated={} deactivated={} skipped={} warnings={} checkpoint={:?}",
            summary.run_id,
            summary.mode,
            summary.to_revision.short(),
            summary.inserted,
            summary.updated,
            summary.deactivated,
            summary.skipped_rows,
            summary.warnings,
            summary.checkpoint
        );
    }
    Ok(())
}
