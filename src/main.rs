use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use community_manager::config;
use community_manager::db;
use community_manager::gateway::http::collaborators_from_config;
use community_manager::notifications::NotificationScheduler;

#[derive(Debug, Parser)]
#[command(author, version, about)]
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

    let collaborators = collaborators_from_config(&cfg, &pool)?;

    let scheduler = NotificationScheduler::new(pool, collaborators);
    let every = Duration::from_secs(cfg.app.summary_interval_seconds);

    info!(interval_seconds = cfg.app.summary_interval_seconds, "starting notification scheduler");
    tokio::select! {
        _ = scheduler.run_forever(every) => {}
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("shutdown requested");
        }
    }

    Ok(())
}
