use emberkv::*;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

/// Start a server on an ephemeral port and return its address
fn start_server() -> SocketAddr {
    let listener = bind_listener("127.0.0.1:0".parse().unwrap()).expect("bind");
    let addr = listener.local_addr().unwrap();
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(Store::new(8)), None));
    std::thread::spawn(move || serve(listener, dispatcher));
    addr
}

fn get_client(addr: SocketAddr) -> BufReader<TcpStream> {
    let stream = TcpStream::connect(addr).expect("Failed to connect");
    stream.set_read_timeout(Some(Duration::from_secs(30))).expect("Failed to set read timeout");
    stream.set_write_timeout(Some(Duration::from_secs(30))).expect("Failed to set write timeout");
    BufReader::new(stream)
}

fn read_line(client: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    client.read_line(&mut line).expect("Failed to read reply line");
    line
}

// Helper to read a bulk string reply
fn read_bulk_string(client: &mut BufReader<TcpStream>) -> Vec<u8> {
    let line = read_line(client);
    if !line.starts_with('$') {
        panic!("Expected bulk string, got: {}", line);
    }
    let len: usize = line[1..].trim().parse().expect("Invalid length");
    let mut data = vec![0u8; len];
    client.read_exact(&mut data).expect("Failed to read body");
    let mut crlf = [0u8; 2];
    client.read_exact(&mut crlf).expect("Failed to read CRLF");
    data
}

fn set_and_get(size: usize, fill: u8) {
    let mut client = get_client(start_server());
    let key = format!("large_{}", size);
    let data = vec![fill; size];

    let header = format!("*3\r\n$3\r\nSET\r\n${}\r\n{}\r\n${}\r\n", key.len(), key, size);
    let stream = client.get_mut();
    stream.write_all(header.as_bytes()).expect("Failed to write header");
    for chunk in data.chunks(64 * 1024) {
        stream.write_all(chunk).expect("Failed to write chunk");
    }
    stream.write_all(b"\r\n").expect("Failed to write CRLF");
    assert_eq!(read_line(&mut client), "+OK\r\n");

    let cmd = format!("*2\r\n$3\r\nGET\r\n${}\r\n{}\r\n", key.len(), key);
    client.get_mut().write_all(cmd.as_bytes()).expect("Failed to write GET");
    let received = read_bulk_string(&mut client);
    assert_eq!(received.len(), size);
    assert_eq!(received, data);
}

#[test]
fn test_large_payload_100kb() {
    set_and_get(100 * 1024, b'x');
}

#[test]
fn test_large_payload_1mb() {
    set_and_get(1024 * 1024, b'a');
}

#[test]
fn test_large_payload_10mb() {
    set_and_get(10 * 1024 * 1024, b'z');
}

#[test]
fn pipelined_requests_each_get_a_reply() {
    let mut client = get_client(start_server());
    client
        .get_mut()
        .write_all(concat!(
            "*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n",
            "*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n",
            "*1\r\n$4\r\nPING\r\n"
        ).as_bytes())
        .unwrap();
    assert_eq!(read_line(&mut client), "+OK\r\n");
    assert_eq!(read_bulk_string(&mut client), b"bar");
    assert_eq!(read_line(&mut client), "+PONG\r\n");
}

#[test]
fn command_errors_keep_connection_open() {
    let mut client = get_client(start_server());
    client.get_mut().write_all(b"*1\r\n$5\r\nBOGUS\r\n").unwrap();
    assert_eq!(read_line(&mut client), "-ERR unknown command 'BOGUS'\r\n");
    client.get_mut().write_all(b"*1\r\n$4\r\nPING\r\n").unwrap();
    assert_eq!(read_line(&mut client), "+PONG\r\n");
}

#[test]
fn protocol_error_closes_connection() {
    let mut client = get_client(start_server());
    client.get_mut().write_all(b"!garbage\r\n").unwrap();
    assert!(read_line(&mut client).starts_with("-ERR Protocol error"));
    assert_eq!(read_line(&mut client), "");
}

#[test]
fn quit_replies_then_closes() {
    let mut client = get_client(start_server());
    client.get_mut().write_all(b"*1\r\n$4\r\nQUIT\r\n").unwrap();
    assert_eq!(read_line(&mut client), "+OK\r\n");
    assert_eq!(read_line(&mut client), "");
}
