//! Example: watch ERC-20 Transfer/Approval logs of one contract and print them.
//!
//! Usage: cargo run -p chainwatch --example evm_watch -- --http-url URL [--http-url URL2] --contract 0x... [--from-block N]

use chainwatch::evm::standards::{erc20, event_name};
use chainwatch::evm::{Address, EvmLogs, HttpEvmClient, Log};
use chainwatch::{BackoffConfig, ClientPool, JsonRpcProbe, PoolConfig, Watch, WatchConfig};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args: Vec<String> = std::env::args().collect();
    let mut http_urls = Vec::new();
    let mut contract = String::new();
    let mut from_block = 0u64;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--http-url" => {
                i += 1;
                http_urls.extend(args.get(i).cloned());
            }
            "--contract" => {
                i += 1;
                contract = args.get(i).cloned().unwrap_or_default();
            }
            "--from-block" => {
                i += 1;
                from_block = args.get(i).and_then(|s| s.parse().ok()).unwrap_or(0);
            }
            _ => {}
        }
        i += 1;
    }
    if http_urls.is_empty() || contract.is_empty() {
        eprintln!("Usage: evm_watch --http-url URL [--http-url URL2] --contract 0xADDR [--from-block N]");
        std::process::exit(1);
    }
    let address: Address = contract.parse()?;

    let pool = ClientPool::builder()
        .endpoints(http_urls)
        .dialer(HttpEvmClient::dial)
        .probe(JsonRpcProbe::evm(Duration::from_secs(1)))
        .config(PoolConfig::default())
        .build()
        .await?;
    let config = WatchConfig {
        chain_id: pool.chain_id(),
        chain: "evm".into(),
        deployed_block: from_block,
        ..Default::default()
    };
    let watch = Arc::new(Watch::with_pool(
        Arc::new(pool),
        EvmLogs::<HttpEvmClient>::new([address]),
        config,
    )?);

    let engine = watch.engine();
    engine.register_watched_events(erc20::events()).await?;
    for id in erc20::events() {
        engine
            .register_hook(id, |_client, log: Log| async move {
                let name = log.event_id().as_ref().and_then(event_name).unwrap_or("?");
                println!(
                    "{} block={} log_index={} tx={} topics={} data_len={}",
                    name,
                    log.block_number,
                    log.log_index,
                    log.transaction_hash,
                    log.topics.len(),
                    log.data.len()
                );
                Ok(())
            })
            .await?;
    }

    let runner = Arc::clone(&watch);
    let task = tokio::spawn(async move { runner.run(BackoffConfig::default()).await });
    tokio::signal::ctrl_c().await?;
    watch.close().await?;
    task.await??;
    Ok(())
}
