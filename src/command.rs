/*!
 * Command Parsing and Dispatch
 *
 * A request is an array of bulk strings whose first element names the
 * command (matched case-insensitively). `Cmd::parse` turns it into a typed
 * command with its arity already checked; `Dispatcher` executes it against
 * the store and, for successful mutations, appends the original request to
 * the durability log before the reply goes out.
 */

use crate::aof::Aof;
use crate::protocol::Value;
use crate::store::Store;
use bytes::Bytes;
use log::{debug, error};
use std::sync::Arc;
use thiserror::Error;

/// Reply text once the durability log can no longer record writes
pub const LOG_FAILED: &str = "ERR durability log write failed; refusing writes";

/// Request-level failures; `Display` is the client-facing error text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("ERR request must be an array of bulk strings")]
    InvalidRequest,
    #[error("ERR empty command")]
    Empty,
    #[error("ERR unknown command '{0}'")]
    Unknown(String),
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,
}

/// Commands understood by the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum Cmd {
    /// PING [message]
    Ping(Option<Bytes>),
    /// QUIT - reply OK, then the connection is closed
    Quit,
    /// COMMAND ... - client capability query, answered with an empty list
    Command,
    /// GET key
    Get(Bytes),
    /// MGET key [key ...]
    MGet(Vec<Bytes>),
    /// SET key value [ignored ...]
    Set(Bytes, Bytes),
    /// SETNX key value
    SetNx(Bytes, Bytes),
    /// MSET key value [key value ...]
    MSet(Vec<(Bytes, Bytes)>),
    /// DEL key [key ...]
    Del(Vec<Bytes>),
    /// EXISTS key [key ...]
    Exists(Vec<Bytes>),
    /// KEYS pattern
    Keys(Bytes),
    /// RENAME key newkey
    Rename(Bytes, Bytes),
    /// INCR / DECR / INCRBY / DECRBY, folded into a signed delta
    IncrBy(Bytes, i64),
    /// DBSIZE
    DbSize,
    /// FLUSHALL
    FlushAll,
}

impl Cmd {
    /// Parse a decoded request into a command
    pub fn parse(request: &Value) -> Result<Cmd, CommandError> {
        let items = match request {
            Value::Array(Some(items)) => items,
            _ => return Err(CommandError::InvalidRequest),
        };
        let mut parts = Vec::with_capacity(items.len());
        for it in items {
            parts.push(it.as_bulk().ok_or(CommandError::InvalidRequest)?.clone());
        }
        let (name, args) = match parts.split_first() {
            Some((name, args)) => (name, args),
            None => return Err(CommandError::Empty),
        };

        let upper = String::from_utf8_lossy(name).to_ascii_uppercase();
        let arity = |ok: bool| {
            if ok {
                Ok(())
            } else {
                Err(CommandError::WrongArity(upper.to_ascii_lowercase()))
            }
        };

        let cmd = match upper.as_str() {
            "PING" => {
                arity(args.len() <= 1)?;
                Cmd::Ping(args.first().cloned())
            }
            "QUIT" => Cmd::Quit,
            "COMMAND" => Cmd::Command,
            "GET" => {
                arity(args.len() == 1)?;
                Cmd::Get(args[0].clone())
            }
            "MGET" => {
                arity(!args.is_empty())?;
                Cmd::MGet(args.to_vec())
            }
            "SET" => {
                arity(args.len() >= 2)?;
                Cmd::Set(args[0].clone(), args[1].clone())
            }
            "SETNX" => {
                arity(args.len() == 2)?;
                Cmd::SetNx(args[0].clone(), args[1].clone())
            }
            "MSET" => {
                arity(!args.is_empty() && args.len() % 2 == 0)?;
                Cmd::MSet(
                    args.chunks_exact(2)
                        .map(|pair| (pair[0].clone(), pair[1].clone()))
                        .collect(),
                )
            }
            "DEL" => {
                arity(!args.is_empty())?;
                Cmd::Del(args.to_vec())
            }
            "EXISTS" => {
                arity(!args.is_empty())?;
                Cmd::Exists(args.to_vec())
            }
            "KEYS" => {
                arity(args.len() == 1)?;
                Cmd::Keys(args[0].clone())
            }
            "RENAME" => {
                arity(args.len() == 2)?;
                Cmd::Rename(args[0].clone(), args[1].clone())
            }
            "INCR" | "DECR" => {
                arity(args.len() == 1)?;
                let delta = if upper == "INCR" { 1 } else { -1 };
                Cmd::IncrBy(args[0].clone(), delta)
            }
            "INCRBY" | "DECRBY" => {
                arity(args.len() == 2)?;
                let n = parse_integer(&args[1])?;
                let delta = if upper == "INCRBY" {
                    n
                } else {
                    n.checked_neg().ok_or(CommandError::NotAnInteger)?
                };
                Cmd::IncrBy(args[0].clone(), delta)
            }
            "DBSIZE" => {
                arity(args.is_empty())?;
                Cmd::DbSize
            }
            "FLUSHALL" => {
                arity(args.is_empty())?;
                Cmd::FlushAll
            }
            _ => return Err(CommandError::Unknown(String::from_utf8_lossy(name).into_owned())),
        };
        Ok(cmd)
    }

    /// Whether a successful run of this command must reach the log
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Cmd::Set(..)
                | Cmd::SetNx(..)
                | Cmd::MSet(_)
                | Cmd::Del(_)
                | Cmd::Rename(..)
                | Cmd::IncrBy(..)
                | Cmd::FlushAll
        )
    }
}

fn parse_integer(b: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotAnInteger)
}

/// A reply plus whether the connection should close after sending it
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub value: Value,
    pub close: bool,
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply { value, close: false }
    }
}

/// Executes requests against a store, logging durable ones
///
/// The store and the optional log are injected; a dispatcher built without
/// a log (as during replay) never appends anything.
pub struct Dispatcher {
    store: Arc<Store>,
    aof: Option<Arc<Aof>>,
}

impl Dispatcher {
    pub fn new(store: Arc<Store>, aof: Option<Arc<Aof>>) -> Self {
        Self { store, aof }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Execute a request and return just the reply value
    pub fn handle(&self, request: &Value) -> Value {
        self.dispatch(request).value
    }

    /// Execute a request
    ///
    /// Order for a mutating command: refuse if the log has failed, apply to
    /// the store, and if the reply is not an error append `request` to the
    /// log. The reply is only returned once the append has succeeded.
    pub fn dispatch(&self, request: &Value) -> Reply {
        let cmd = match Cmd::parse(request) {
            Ok(cmd) => cmd,
            Err(e) => {
                debug!("rejected request: {}", e);
                return Value::error(e.to_string()).into();
            }
        };

        let durable = cmd.is_write();
        let log = if durable { self.aof.as_deref() } else { None };
        if log.is_some_and(Aof::is_failed) {
            return Value::error(LOG_FAILED).into();
        }

        let close = cmd == Cmd::Quit;
        let value = self.exec(cmd);

        if let Some(aof) = log {
            if !value.is_error() {
                if let Err(e) = aof.append(request) {
                    error!("write applied but not logged: {}", e);
                    return Value::error(LOG_FAILED).into();
                }
            }
        }
        Reply { value, close }
    }

    fn exec(&self, cmd: Cmd) -> Value {
        let store = &self.store;
        match cmd {
            Cmd::Ping(None) => Value::simple("PONG"),
            Cmd::Ping(Some(msg)) => Value::bulk(msg),
            Cmd::Quit => Value::ok(),
            Cmd::Command => Value::array(Vec::new()),

            Cmd::Get(k) => Value::Bulk(store.get(&k)),
            Cmd::MGet(keys) => {
                Value::array(store.get_many(&keys).into_iter().map(Value::Bulk).collect())
            }

            Cmd::Set(k, v) => {
                store.set(k, v);
                Value::ok()
            }
            Cmd::SetNx(k, v) => Value::Integer(store.set_if_absent(k, v) as i64),
            Cmd::MSet(pairs) => {
                store.set_many(pairs);
                Value::ok()
            }

            Cmd::Del(keys) => Value::Integer(store.delete(&keys) as i64),
            Cmd::Exists(keys) => Value::Integer(store.exists(&keys) as i64),

            Cmd::Keys(pattern) => match store.keys(&pattern) {
                Ok(keys) => Value::array(keys.into_iter().map(Value::bulk).collect()),
                Err(e) => Value::error(e.to_string()),
            },

            Cmd::Rename(from, to) => match store.rename(&from, to) {
                Ok(()) => Value::ok(),
                Err(e) => Value::error(e.to_string()),
            },

            Cmd::IncrBy(k, delta) => match store.incr_by(&k, delta) {
                Ok(n) => Value::Integer(n),
                Err(e) => Value::error(e.to_string()),
            },

            Cmd::DbSize => Value::Integer(store.len() as i64),
            Cmd::FlushAll => {
                store.flush_all();
                Value::ok()
            }
        }
    }
}
