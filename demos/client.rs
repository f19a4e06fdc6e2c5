//! Walk a running server through the multi-key and cross-shard commands.
//!
//! Start `emberkv`, then: `cargo run --example client [-- 127.0.0.1:7379]`

use anyhow::{bail, Context, Result};
use emberkv::{Decoder, Value};
use std::io::{BufReader, Write};
use std::net::TcpStream;

fn main() -> Result<()> {
    let addr = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:7379".into());
    let stream = TcpStream::connect(&addr).with_context(|| format!("connecting to {}", addr))?;
    let mut writer = stream.try_clone()?;
    let mut replies = Decoder::new(BufReader::new(stream));

    let script: &[&[&str]] = &[
        &["MSET", "user:1", "ada", "user:2", "grace", "visits", "0"],
        &["MGET", "user:1", "user:2", "user:3"],
        &["RENAME", "user:1", "admin:1"],
        &["INCRBY", "visits", "5"],
        &["KEYS", "*:1"],
        &["DBSIZE"],
        &["RENAME", "user:1", "admin:1"],
    ];

    // pipeline the whole script, then read the replies back in order
    for cmd in script {
        writer.write_all(&Value::from_args(cmd.iter().copied()).encode())?;
    }
    writer.flush()?;

    for cmd in script {
        let reply = replies.decode().context("reading reply")?;
        println!("{:<40} -> {}", cmd.join(" "), render(&reply));
    }

    writer.write_all(&Value::from_args(["QUIT"]).encode())?;
    match replies.decode()? {
        Value::Simple(s) if s == "OK" => Ok(()),
        other => bail!("unexpected QUIT reply: {:?}", other),
    }
}

fn render(v: &Value) -> String {
    match v {
        Value::Simple(s) => s.clone(),
        Value::Error(e) => format!("(error) {}", e),
        Value::Integer(i) => format!("(integer) {}", i),
        Value::Bulk(Some(b)) => format!("{:?}", String::from_utf8_lossy(b)),
        Value::Bulk(None) | Value::Array(None) => "(nil)".into(),
        Value::Array(Some(items)) => {
            let parts: Vec<String> = items.iter().map(render).collect();
            format!("[{}]", parts.join(", "))
        }
    }
}
