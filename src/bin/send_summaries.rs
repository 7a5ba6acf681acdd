use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use community_manager::config;
use community_manager::db;
use community_manager::gateway::http::collaborators_from_config;
use community_manager::notifications::NotificationScheduler;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run a single notification summary pass and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let scheduler = NotificationScheduler::new(pool.clone(), collaborators_from_config(&cfg, &pool)?);
    match scheduler.run_once().await? {
        Some(outcome) => info!(?outcome, "summary pass finished"),
        None => info!("summary pass skipped"),
    }
    Ok(())
}
