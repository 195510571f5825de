//! skillindex CLI — run the indexer + dispatcher, inspect its state.
//!
//! Usage:
//! ```bash
//! skillindex run    --config ./skillindex.json
//! skillindex status --config ./skillindex.json
//! skillindex info
//! ```

mod config;

use std::env;
use std::process;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use skillindex_core::{
    ChainClient, ChainIndexer, CheckpointStore, EventStore, PipelineMetrics,
    SkillContractsDecoder,
};
use skillindex_rpc::HttpChainClient;
use skillindex_storage::SqliteStorage;
use skillindex_webhook::{
    DeliveryStore, HttpWebhookTransport, SubscriptionStore, WebhookDispatcher, WebhookTransport,
};

use config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    match args[1].as_str() {
        "run" => cmd_run(&config_path(&args)?).await,
        "status" => cmd_status(&config_path(&args)?).await,
        "info" => {
            cmd_info();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("skillindex {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    }
}

fn config_path(args: &[String]) -> anyhow::Result<String> {
    args.iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("missing --config <path>"))
}

fn print_usage() {
    println!("skillindex {}", env!("CARGO_PKG_VERSION"));
    println!("Reorg-safe contract event indexer with signed webhook delivery\n");
    println!("USAGE:");
    println!("    skillindex <COMMAND> [--config <path>]\n");
    println!("COMMANDS:");
    println!("    run      Run the indexer loops and the webhook dispatcher");
    println!("    status   Show per-chain checkpoint state");
    println!("    info     Show built-in defaults");
    println!("    version  Print version");
    println!("    help     Print this help");
}

fn cmd_info() {
    println!("skillindex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default confirmation depth: 6 blocks");
    println!("  Default finalization depth: 64 additional blocks");
    println!("  Default fetch window: 2000 blocks/call");
    println!("  Default reorg scan step: 50 blocks (halt beyond 200)");
    println!("  Default delivery attempts: 8 (backoff 1s..10min)");
    println!("  Default dispatcher workers: 16");
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
}

async fn cmd_status(config_path: &str) -> anyhow::Result<()> {
    let app = AppConfig::from_file(config_path)?;
    let storage = SqliteStorage::open(&app.storage.path).await?;

    for chain in &app.chains {
        let chain_id = &chain.indexer.chain_id;
        match storage.load(chain_id).await? {
            Some(cp) => {
                let updated = chrono::DateTime::from_timestamp(cp.updated_at, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| cp.updated_at.to_string());
                println!(
                    "{chain_id}: block {} ({}) updated {updated}",
                    cp.block_number, cp.block_hash
                );
            }
            None => println!("{chain_id}: no checkpoint (will seed at block {})", chain.indexer.start_block),
        }
    }
    Ok(())
}

async fn cmd_run(config_path: &str) -> anyhow::Result<()> {
    let app = AppConfig::from_file(config_path)?;
    config::init_tracing(&app.logging);

    let storage = Arc::new(SqliteStorage::open(&app.storage.path).await?);
    let metrics = Arc::new(PipelineMetrics::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Per-chain indexer loops, all feeding one dispatcher intake.
    let (intake_tx, intake_rx) = mpsc::channel(1_024);
    let mut indexer_handles = Vec::new();
    for chain in app.chains {
        let client: Arc<dyn ChainClient> =
            Arc::new(HttpChainClient::default_for(&chain.rpc_url)?);
        let checkpoints: Arc<dyn CheckpointStore> = storage.clone();
        let events: Arc<dyn EventStore> = storage.clone();
        let chain_id = chain.indexer.chain_id.clone();

        let (indexer, mut chain_rx) = ChainIndexer::new(
            chain.indexer,
            client,
            checkpoints,
            events,
            Arc::new(SkillContractsDecoder::new()),
            metrics.clone(),
            shutdown_rx.clone(),
        );

        let forward = intake_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = chain_rx.recv().await {
                if forward.send(event).await.is_err() {
                    break;
                }
            }
        });

        indexer_handles.push((chain_id, tokio::spawn(indexer.run())));
    }
    drop(intake_tx);

    let subscriptions: Arc<dyn SubscriptionStore> = storage.clone();
    let deliveries: Arc<dyn DeliveryStore> = storage.clone();
    let events: Arc<dyn EventStore> = storage.clone();
    let transport: Arc<dyn WebhookTransport> = Arc::new(
        HttpWebhookTransport::new(app.dispatcher.request_timeout())
            .map_err(|e| anyhow::anyhow!(e))?,
    );
    let dispatcher = WebhookDispatcher::new(
        app.dispatcher.to_dispatcher_config(),
        subscriptions,
        deliveries,
        events,
        transport,
        metrics.clone(),
        shutdown_rx,
    );
    let dispatcher_handle = tokio::spawn(dispatcher.run(intake_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested, draining in-flight windows");
    let _ = shutdown_tx.send(true);

    for (chain_id, handle) in indexer_handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(chain_id = %chain_id, error = %e, "indexer exited with error"),
            Err(e) => tracing::error!(chain_id = %chain_id, error = %e, "indexer task panicked"),
        }
    }
    dispatcher_handle.await?;

    let snapshot = metrics.snapshot();
    tracing::info!(
        events_indexed = snapshot.events_indexed,
        delivered = snapshot.deliveries_delivered,
        dead_lettered = snapshot.deliveries_dead_lettered,
        "shutdown complete"
    );
    Ok(())
}
