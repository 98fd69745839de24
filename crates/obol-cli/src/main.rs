use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use obol_storage::{PgStore, Store};
use obol_sync::{build_orchestrator, maybe_build_scheduler, ProviderCatalog, SyncConfig};
use obol_web::AppState;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "obol")]
#[command(about = "Obol bill aggregator command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the sync pipeline once for one provider account.
    Sync { account_id: Uuid },
    /// Sync every connected account whose scheduled run has passed.
    SyncDue,
    /// Apply database migrations.
    Migrate,
    /// Serve the HTTP API, with the cron sweep when enabled.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Sync { account_id } => {
            let store: Arc<dyn Store> =
                Arc::new(PgStore::connect(&config.database_url).await?);
            let orchestrator = build_orchestrator(&config, store)?;
            let summary = orchestrator.sync_account(account_id).await?;
            println!(
                "sync complete: success={} found={} new={} updated={}{}",
                summary.success,
                summary.bills_found,
                summary.bills_new,
                summary.bills_updated,
                summary
                    .error_code
                    .map(|code| format!(" error={code}"))
                    .unwrap_or_default(),
            );
        }
        Commands::SyncDue => {
            let store: Arc<dyn Store> =
                Arc::new(PgStore::connect(&config.database_url).await?);
            let orchestrator = build_orchestrator(&config, store)?;
            let summary = orchestrator
                .sync_due_accounts(Duration::from_millis(config.sweep_delay_ms))
                .await?;
            println!(
                "sweep complete: processed={} succeeded={} failed={}",
                summary.accounts_processed, summary.success_count, summary.fail_count,
            );
        }
        Commands::Migrate => {
            let store = PgStore::connect(&config.database_url).await?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Serve => {
            let store: Arc<dyn Store> =
                Arc::new(PgStore::connect(&config.database_url).await?);
            let orchestrator = Arc::new(build_orchestrator(&config, store.clone())?);

            if let Some(scheduler) = maybe_build_scheduler(&config, orchestrator.clone()).await? {
                scheduler.start().await.context("starting scheduler")?;
            }

            let state = AppState {
                store,
                orchestrator,
                vault: config.vault()?,
                catalog: ProviderCatalog::load(&config.providers_file).await?,
            };
            obol_web::serve_app(state, config.web_port).await?;
        }
    }

    Ok(())
}
