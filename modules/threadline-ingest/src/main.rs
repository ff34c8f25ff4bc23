use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use threadline_common::{Config, InMemoryMemoryStore, KvStore, MemoryKvStore, MemoryStore};
use threadline_ingest::replay::ReplayClient;
use threadline_ingest::{
    ClientRegistry, IngestConfig, IngestionLoop, QueueConfig, SilentResponder, SocialClient,
};
use threadline_store::{PgKvStore, PgMemoryStore};

#[derive(Parser, Debug)]
#[command(name = "threadline-ingest", about = "Poll mentions and tracked authors, resolve threads, respond")]
struct Args {
    /// Serve the social API from a JSON fixture (overrides THREADLINE_REPLAY_PATH).
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("threadline=info".parse()?))
        .init();

    let args = Args::parse();
    info!("Threadline ingest starting...");

    let config = Config::from_env()?;
    config.log_redacted();

    let (kv, memory): (Arc<dyn KvStore>, Arc<dyn MemoryStore>) = match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await?;
            let kv = PgKvStore::new(pool.clone());
            kv.migrate().await?;
            let memory = PgMemoryStore::new(pool);
            memory.migrate().await?;
            info!("Using Postgres storage");
            (Arc::new(kv), Arc::new(memory))
        }
        None => {
            warn!("DATABASE_URL not set, state will not survive a restart");
            (Arc::new(MemoryKvStore::new()), Arc::new(InMemoryMemoryStore::new()))
        }
    };

    let Some(replay_path) = args.replay.or(config.replay_path.clone()) else {
        bail!("No social client configured: pass --replay or set THREADLINE_REPLAY_PATH");
    };
    let client: Arc<dyn SocialClient> =
        Arc::new(ReplayClient::from_path(&replay_path, &config.username)?);

    let registry = ClientRegistry::new(QueueConfig::default().with_max_retries(config.max_retries));
    let ingest = IngestConfig::from_config(&config);
    let lane = registry.lane(&ingest.account, move || client);

    let mut ingestion = IngestionLoop::new(ingest, lane, kv, memory, Arc::new(SilentResponder));

    if args.once {
        let stats = ingestion.run_cycle().await?;
        info!("Single cycle finished. {stats}");
        return Ok(());
    }

    tokio::select! {
        result = ingestion.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
