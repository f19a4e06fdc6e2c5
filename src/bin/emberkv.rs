/*!
 * emberkv Server Entry Point
 *
 * Wires the pieces together: logging, configuration, the store, replay of
 * the append-only file, and the listener. Replay always finishes before the
 * first connection is accepted.
 */

use anyhow::*;
use clap::Parser;
use emberkv::*;
use log::{error, info, warn};
use std::sync::Arc;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    // Respects RUST_LOG, e.g. RUST_LOG=debug
    env_logger::init();

    let config = Config::parse();
    let addr = config.socket_addr()?;
    let store = Arc::new(Store::new(config.shards));
    info!("keyspace split into {} shards", store.shard_count());

    let aof = if config.no_aof {
        warn!("append-only file disabled; data will not survive a restart");
        None
    } else {
        let (aof, report) = restore(&config.aof, config.appendfsync, store.clone())?;
        info!(
            "serving {} records from {}",
            report.applied + report.rejected,
            config.aof.display()
        );
        Some(Arc::new(aof))
    };

    let shutdown_aof = aof.clone();
    ctrlc::set_handler(move || {
        info!("shutting down");
        if let Some(aof) = &shutdown_aof {
            if let Err(e) = aof.sync() {
                error!("final fsync failed: {}", e);
            }
        }
        std::process::exit(0);
    })
    .context("installing signal handler")?;

    let dispatcher = Arc::new(Dispatcher::new(store, aof));
    let listener = bind_listener(addr)?;
    println!("emberkv running on {}", addr);

    serve(listener, dispatcher)
}
