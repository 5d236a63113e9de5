use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fundsync_core::AppConfig;
use fundsync_storage::{connect, run_migrations, FundStore, PgFundStore, PgPool};
use fundsync_sync::PreloadPipeline;
use fundsync_web::AppState;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "fundsync")]
#[command(about = "Fund data preloader: sync upstream fund feeds into Postgres and serve them")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Migrate (if enabled), start the preload scheduler (if enabled) and serve HTTP.
    Serve,
    /// Run one preload over every configured endpoint and print the run summary.
    Preload,
    /// Apply pending database migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("loading configuration")?;
    info!(database = %config.database.display_target(), "connecting to database");
    let pool = connect(&config.database).await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Migrate => {
            run_migrations(&pool).await?;
            info!("migrations applied");
        }
        Commands::Preload => {
            let store = prepare_store(&config, pool).await?;
            let pipeline = PreloadPipeline::from_config(&config, store)?;
            let summary = pipeline.run_once().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Serve => {
            let store = prepare_store(&config, pool).await?;
            let pipeline = Arc::new(PreloadPipeline::from_config(&config, Arc::clone(&store))?);
            let scheduler = pipeline.maybe_build_scheduler().await?;
            if let Some(sched) = &scheduler {
                sched.start().await.context("starting scheduler")?;
                info!(cron = %config.scheduler.preload_cron, "preload scheduler started");
            }
            fundsync_web::serve(AppState::new(store, pipeline), config.web.port).await?;
        }
    }

    Ok(())
}

async fn prepare_store(config: &AppConfig, pool: PgPool) -> Result<Arc<dyn FundStore>> {
    if config.auto_migrate {
        run_migrations(&pool).await?;
    }
    Ok(Arc::new(PgFundStore::new(pool)))
}
