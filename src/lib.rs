// Core modules for the emberkv key-value store
pub mod protocol; // Wire Value + blocking decoder + encoders
pub mod storage; // Dict: one shard's key/value map
pub mod glob; // KEYS pattern compiler + matcher
pub mod shard; // Shard: id + RwLock<Dict>
pub mod store; // Store: routing, batching, lock ordering
pub mod aof; // append-only durability log + replay
pub mod command; // Cmd parsing + Dispatcher
pub mod config; // CLI / env configuration
pub mod net; // listener + per-connection workers

// Re-export the public surface for easier access
pub use protocol::*;
pub use storage::*;
pub use glob::*;
pub use shard::*;
pub use store::*;
pub use aof::*;
pub use command::*;
pub use config::*;
pub use net::*;

// Default server address - Redis-compatible port 7379
pub const DEFAULT_ADDR: &str = "0.0.0.0:7379";

// Default number of keyspace shards
pub const DEFAULT_SHARDS: usize = 16;
