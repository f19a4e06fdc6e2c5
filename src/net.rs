/*!
 * Network Layer
 *
 * Thin I/O glue around the dispatcher: bind a listener, accept connections,
 * and give each connection its own worker thread. A worker decodes requests
 * off its socket, dispatches them and writes the encoded replies back.
 */

use crate::command::Dispatcher;
use crate::protocol::{write_error, DecodeError, Decoder};
use anyhow::*;
use bytes::BytesMut;
use log::{debug, error, info};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::result::Result::Ok;
use std::sync::Arc;

/// Size of per-connection read and write buffers
const CONN_BUF: usize = 16 * 1024;

/// Bind a blocking TCP listener with SO_REUSEADDR set
pub fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    #[cfg(unix)]
    socket.set_reuse_address(true)?;

    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}

/// Accept connections forever, one worker thread per connection
///
/// Returns only if accepting fails with a non-transient error.
pub fn serve(listener: TcpListener, dispatcher: Arc<Dispatcher>) -> Result<()> {
    info!("accepting connections on {}", listener.local_addr()?);
    let mut next_id: u64 = 0;

    for conn in listener.incoming() {
        let stream = match conn {
            Ok(s) => s,
            Err(e) if is_transient(&e) => {
                debug!("transient accept error: {}", e);
                continue;
            }
            Err(e) => return Err(e).context("accept failed"),
        };
        stream.set_nodelay(true).ok();
        next_id = next_id.wrapping_add(1);

        let dispatcher = dispatcher.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("conn-{}", next_id))
            .spawn(move || {
                let peer = stream.peer_addr().ok();
                if let Err(e) = handle_connection(stream, &dispatcher) {
                    debug!("connection {:?} ended with error: {:#}", peer, e);
                }
            });
        if let Err(e) = spawned {
            error!("failed to spawn connection worker: {}", e);
        }
    }
    Ok(())
}

/// Serve one client until it disconnects, sends QUIT, or breaks framing
///
/// Replies are flushed once no further pipelined request is already
/// buffered. A protocol error is answered with an error reply and then the
/// connection is closed; command errors never close the connection.
pub fn handle_connection(stream: TcpStream, dispatcher: &Dispatcher) -> Result<()> {
    let mut decoder = Decoder::new(BufReader::with_capacity(CONN_BUF, stream.try_clone()?));
    let mut writer = BufWriter::with_capacity(CONN_BUF, stream);
    let mut out = BytesMut::with_capacity(CONN_BUF);

    loop {
        let request = match decoder.decode() {
            Ok(v) => v,
            Err(DecodeError::EndOfInput) => break,
            Err(DecodeError::Io(e)) => return Err(e.into()),
            Err(e) => {
                debug!("protocol error: {}", e);
                out.clear();
                write_error(&format!("ERR Protocol error: {}", e), &mut out);
                writer.write_all(&out)?;
                writer.flush()?;
                break;
            }
        };

        let reply = dispatcher.dispatch(&request);
        out.clear();
        reply.value.encode_to(&mut out);
        writer.write_all(&out)?;

        if reply.close {
            writer.flush()?;
            break;
        }
        if decoder.get_mut().buffer().is_empty() {
            writer.flush()?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Accept errors worth retrying rather than giving up on the listener
#[inline]
fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
    )
}
