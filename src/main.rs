use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use docent_core::bootstrap::{IndexContext, resolve_config_path};
use docent_core::config::Config;
use docent_index::retriever::format_for_tool;
use tokio_util::sync::CancellationToken;

/// Keep a vector index of a source tree in sync and query it.
#[derive(Parser, Debug)]
#[command(name = "docent", version, about, long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan a directory and reconcile the index with it
    Index {
        root: PathBuf,
    },
    /// Fetch chunks by query, by file, or both
    Retrieve {
        #[arg(long, short)]
        query: Option<String>,
        #[arg(long, short)]
        file: Option<String>,
    },
    /// Index a directory, then keep the index current as files change
    Watch {
        root: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    config.validate()?;
    tracing::debug!(path = %config_path.display(), ?config, "config loaded");

    let ctx = IndexContext::connect(config).await?;
    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let result = match cli.command {
        Command::Index { root } => ctx.index_root(&root, &cancel).await.map(|summary| {
            println!(
                "inserted {} chunks, deleted {}, {} files unchanged, {} rejected",
                summary.inserted_count,
                summary.deleted_count,
                summary.unchanged(),
                summary.rejected()
            );
        }),
        Command::Retrieve { query, file } => retrieve(&ctx, query.as_deref(), file.as_deref()).await,
        Command::Watch { root } => watch(&ctx, &root, &cancel).await,
    };

    ctx.close();
    result
}

async fn retrieve(
    ctx: &IndexContext,
    query: Option<&str>,
    file: Option<&str>,
) -> anyhow::Result<()> {
    let chunks = ctx
        .gateway()
        .retrieve(query, file)
        .await
        .context("retrieval failed")?;
    if chunks.is_empty() {
        tracing::info!("no matching chunks");
    }
    println!("{}", format_for_tool(&chunks));
    Ok(())
}

async fn watch(ctx: &IndexContext, root: &Path, cancel: &CancellationToken) -> anyhow::Result<()> {
    // Subscribe before the initial pass so edits made during it are not missed.
    let watcher = ctx.watcher(root)?;
    ctx.index_root(root, cancel).await?;
    watcher
        .run(&ctx.synchronizer(), &ctx.chunker(), cancel)
        .await;
    Ok(())
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal");
        cancel.cancel();
    });
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
