//! Server configuration
//!
//! Every option can be given as a flag or through its `EMBERKV_*`
//! environment variable; flags win.

use crate::{DEFAULT_ADDR, DEFAULT_SHARDS};
use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

/// When appended records are forced to stable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FsyncPolicy {
    /// fsync inside every append, before the client is answered
    Always,
    /// fsync from a background thread once per second
    #[default]
    #[value(name = "everysec")]
    EverySec,
    /// leave flushing to the operating system
    No,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "emberkv", version, about = "Sharded key-value server with an append-only log")]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "EMBERKV_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// Number of keyspace shards (fixed for the life of the process)
    #[arg(
        long,
        env = "EMBERKV_SHARDS",
        default_value_t = DEFAULT_SHARDS,
        value_parser = parse_shards
    )]
    pub shards: usize,

    /// Path of the append-only file
    #[arg(long, env = "EMBERKV_AOF", default_value = "emberkv.aof")]
    pub aof: PathBuf,

    /// fsync policy for the append-only file
    #[arg(long, env = "EMBERKV_APPENDFSYNC", value_enum, default_value_t = FsyncPolicy::EverySec)]
    pub appendfsync: FsyncPolicy,

    /// Run purely in memory: no replay, no logging
    #[arg(long, env = "EMBERKV_NO_AOF")]
    pub no_aof: bool,
}

impl Config {
    /// Resolve `addr` to the first matching socket address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| anyhow!("address {} did not resolve", self.addr))
    }
}

fn parse_shards(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("shard count must be at least 1".into()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}
