//! catalog-resolver - listen import tool
//!
//! Reads newline-delimited JSON listen records (one `SubmitListenOpts` per
//! line) from a file or stdin and resolves each into the catalog database.

use anyhow::{Context, Result};
use catalog_resolver::authority::{DisabledAuthority, MetadataAuthority, MusicBrainzClient};
use catalog_resolver::images::{ImageChain, ImageSource};
use catalog_resolver::queue::RequestQueue;
use catalog_resolver::store::{ListenScope, SqliteStore, Store};
use catalog_resolver::{Catalog, SubmitListenOpts};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Command-line arguments for catalog-resolver
#[derive(Parser, Debug)]
#[command(name = "catalog-resolver")]
#[command(about = "Resolve listen records into the music catalog")]
#[command(version)]
struct Args {
    /// Bootstrap TOML file (overrides CATALOG_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// NDJSON listen records; stdin when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Database file (overrides database_path from the config)
    #[arg(short, long, env = "CATALOG_DATABASE")]
    database: Option<PathBuf>,

    /// Write the effective configuration to this file and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = catalog_common::config::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    catalog_common::logging::init_tracing(&config.logging)
        .context("Failed to initialize logging")?;

    info!("Starting catalog-resolver {}", env!("CARGO_PKG_VERSION"));

    if let Some(path) = &args.write_config {
        catalog_common::config::write_toml_config(&config, path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Configuration written to {}", path.display());
        return Ok(());
    }

    let db_path = args.database.unwrap_or_else(|| config.database_path.clone());
    info!("Database: {}", db_path.display());
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(&db_path, config.max_connections)
            .await
            .context("Failed to open catalog database")?,
    );

    let mut queues: Vec<Arc<RequestQueue>> = Vec::new();

    let authority: Arc<dyn MetadataAuthority> = if config.musicbrainz.enabled {
        let client = MusicBrainzClient::from_config(&config.musicbrainz)
            .context("Failed to build MusicBrainz client")?;
        queues.push(Arc::clone(client.queue()));
        info!("MusicBrainz lookups enabled: {}", config.musicbrainz.base_url);
        Arc::new(client)
    } else {
        info!("MusicBrainz lookups disabled");
        Arc::new(DisabledAuthority)
    };

    let (chain, image_queue) = ImageChain::from_config(&config.images, &config.musicbrainz.user_agent)
        .context("Failed to build image providers")?;
    queues.extend(image_queue);
    let images: Arc<dyn ImageSource> = Arc::new(chain);

    let catalog = Catalog::new(Arc::clone(&store), authority, images);

    let (submitted, failed) = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            import(&catalog, BufReader::new(file)).await?
        }
        None => import(&catalog, BufReader::new(tokio::io::stdin())).await?,
    };

    for queue in &queues {
        queue.shutdown().await;
    }

    let total = catalog.listen_count(ListenScope::All).await?;
    info!(submitted, failed, total_listens = total, "Import finished");
    Ok(())
}

/// Submit each NDJSON record in order; returns (submitted, failed)
async fn import<R>(catalog: &Catalog, reader: R) -> Result<(usize, usize)>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut submitted = 0;
    let mut failed = 0;
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let opts: SubmitListenOpts = match serde_json::from_str(&line) {
            Ok(opts) => opts,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed record");
                failed += 1;
                continue;
            }
        };

        match catalog.submit_listen(opts).await {
            Ok(outcome) => {
                submitted += 1;
                info!(
                    line = line_no,
                    artist = outcome.artists.first().map(|a| a.name.as_str()).unwrap_or(""),
                    release = %outcome.release.title,
                    track = %outcome.track.title,
                    "Resolved listen"
                );
            }
            Err(e) => {
                failed += 1;
                warn!(line = line_no, error = %e, "Listen rejected");
            }
        }
    }

    Ok((submitted, failed))
}
