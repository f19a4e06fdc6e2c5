use bytes::Bytes;
use emberkv::*;

fn round_trip(v: &Value) -> Value {
    let bytes = v.encode();
    Decoder::new(&bytes[..]).decode().unwrap()
}

#[test]
fn parse_pipelined_requests() {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"*1\r\n$4\r\nPING\r\n");
    buf.extend_from_slice(b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n");
    buf.extend_from_slice(b"*2\r\n$3\r\nGET\r\n$1\r\na\r\n");

    let mut decoder = Decoder::new(&buf[..]);
    let mut cmds = Vec::new();
    loop {
        match decoder.decode() {
            Ok(v) => cmds.push(Cmd::parse(&v).unwrap()),
            Err(DecodeError::EndOfInput) => break,
            Err(e) => panic!("decode failed: {}", e),
        }
    }
    assert!(matches!(cmds[0], Cmd::Ping(None)));
    assert!(matches!(cmds[1], Cmd::Set(_, _)));
    assert!(matches!(cmds[2], Cmd::Get(_)));
}

#[test]
fn values_survive_encode_decode() {
    let samples = vec![
        Value::simple("OK"),
        Value::simple(""),
        Value::error("ERR something"),
        Value::Integer(0),
        Value::Integer(i64::MIN),
        Value::bulk(""),
        Value::bulk(Bytes::from(vec![0u8, 13, 10, 255])),
        Value::null(),
        Value::array(vec![]),
        Value::array(vec![
            Value::Integer(1),
            Value::array(vec![Value::bulk("nested"), Value::null()]),
            Value::simple("x"),
        ]),
    ];
    for v in &samples {
        assert_eq!(&round_trip(v), v);
    }
}

#[test]
fn null_array_shares_the_bulk_sentinel() {
    assert_eq!(Value::Array(None).encode(), Value::Bulk(None).encode());
    assert_eq!(round_trip(&Value::Array(None)), Value::Bulk(None));
}

#[test]
fn declared_array_length_is_honoured() {
    let v = Decoder::new(&b"*2\r\n:1\r\n:2\r\n:3\r\n"[..]).decode().unwrap();
    assert_eq!(v, Value::array(vec![Value::Integer(1), Value::Integer(2)]));
}

#[test]
fn error_display_for_unknown_type() {
    let err = Decoder::new(&b"?\r\n"[..]).decode().unwrap_err();
    assert!(matches!(err, DecodeError::UnknownType(b'?')));
    assert_eq!(err.to_string(), "unknown type byte '?'");
}
