use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use community_manager::config;
use community_manager::db;
use community_manager::error::RequestError;
use community_manager::gateway::http::collaborators_from_config;
use community_manager::listener::MessageListener;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Replay queued dataset events (one JSON envelope per line) through the listener"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// JSONL file with one message envelope per line.
    #[arg(long)]
    input: PathBuf,

    /// Where rejected lines are appended. Defaults to `<data_dir>/dead-letter.jsonl`.
    #[arg(long)]
    dead_letter: Option<PathBuf>,
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
    let listener = MessageListener::new(pool.clone(), collaborators_from_config(&cfg, &pool)?);

    let content = fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let dead_letter_path = args
        .dead_letter
        .unwrap_or_else(|| PathBuf::from(&cfg.app.data_dir).join("dead-letter.jsonl"));
    let mut dead_letter = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&dead_letter_path)
        .await
        .with_context(|| format!("failed to open {}", dead_letter_path.display()))?;

    let (mut handled, mut rejected) = (0usize, 0usize);
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match listener.handle_raw(line).await {
            Ok(outcome) => {
                handled += 1;
                info!(line = idx + 1, ?outcome, "message handled");
            }
            Err(err) => {
                rejected += 1;
                match &err {
                    RequestError::MessageRejected(_) => {
                        warn!(line = idx + 1, %err, "message rejected")
                    }
                    _ => error!(line = idx + 1, %err, "message processing failed"),
                }
                // Never requeued; the line goes to the dead-letter file as-is.
                dead_letter.write_all(line.as_bytes()).await?;
                dead_letter.write_all(b"\n").await?;
            }
        }
    }
    dead_letter.flush().await?;

    info!(handled, rejected, dead_letter = %dead_letter_path.display(), "replay finished");
    Ok(())
}
