/*!
 * RESP Wire Protocol
 *
 * This module defines the wire-level data unit (`Value`), a blocking decoder
 * that pulls one complete value at a time off any buffered byte source, and
 * the encoders used for responses and for durability log records.
 */

use bytes::{BufMut, Bytes, BytesMut};
use std::io::{self, BufRead, Read};
use thiserror::Error;

const CRLF: &[u8] = b"\r\n";

/// Upper bound for a single bulk string payload (512 MiB, as in Redis)
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Upper bound for the number of elements announced by an array header
pub const MAX_ARRAY_LEN: i64 = 1024 * 1024;

/// Upper bound for a CRLF-terminated header or simple string line
const MAX_LINE_LEN: u64 = 64 * 1024;

/// Most memory reserved up front for a bulk payload before its bytes arrive
const BULK_PREALLOC: usize = 64 * 1024;

/// A single protocol datum
///
/// Bulk strings and arrays carry an `Option` so the null forms have to be
/// handled explicitly by every consumer. A null is never the same thing as an
/// empty string or an empty array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// `+<text>\r\n`
    Simple(String),
    /// `-<text>\r\n`
    Error(String),
    /// `:<decimal>\r\n`
    Integer(i64),
    /// `$<len>\r\n<bytes>\r\n`, or `$-1\r\n` for `None`
    Bulk(Option<Bytes>),
    /// `*<count>\r\n<elements>`, or `*-1\r\n` for `None` on decode
    Array(Option<Vec<Value>>),
}

impl Value {
    pub fn ok() -> Self {
        Value::Simple("OK".into())
    }

    pub fn simple(s: impl Into<String>) -> Self {
        Value::Simple(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        Value::Error(s.into())
    }

    pub fn bulk(b: impl Into<Bytes>) -> Self {
        Value::Bulk(Some(b.into()))
    }

    /// The null bulk string
    pub fn null() -> Self {
        Value::Bulk(None)
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Some(items))
    }

    /// Build a request the way clients send them: an array of bulk strings
    ///
    /// ```
    /// use emberkv::Value;
    /// let req = Value::from_args(["SET", "k", "v"]);
    /// assert_eq!(&req.encode()[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    /// ```
    pub fn from_args<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        Value::Array(Some(
            args.into_iter()
                .map(|a| Value::bulk(Bytes::copy_from_slice(a.as_ref())))
                .collect(),
        ))
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Payload of a non-null bulk string
    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            Value::Bulk(Some(b)) => Some(b),
            _ => None,
        }
    }

    /// Encode this value into a fresh buffer
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.encode_to(&mut out);
        out.freeze()
    }

    /// Encode this value onto the end of `out`
    ///
    /// The null array is written with the same `$-1\r\n` sentinel as the null
    /// bulk string, so both nulls look identical on the wire.
    pub fn encode_to(&self, out: &mut BytesMut) {
        match self {
            Value::Simple(s) => write_simple(s, out),
            Value::Error(e) => write_error(e, out),
            Value::Integer(i) => write_integer(*i, out),
            Value::Bulk(Some(b)) => write_bulk(b, out),
            Value::Bulk(None) | Value::Array(None) => write_null(out),
            Value::Array(Some(items)) => {
                write_array_len(items.len(), out);
                for it in items {
                    it.encode_to(out);
                }
            }
        }
    }
}

/// Failure to pull a complete value off the byte source
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Stream ended cleanly before the first byte of a value
    #[error("end of input")]
    EndOfInput,
    /// Stream ended part way through a value
    #[error("unexpected end of input inside a value")]
    TruncatedInput,
    #[error("unknown type byte '{}'", char::from(*.0).escape_default())]
    UnknownType(u8),
    #[error("invalid integer literal")]
    MalformedInteger,
    #[error("invalid length literal")]
    MalformedLength,
    #[error("line not terminated by CRLF")]
    MalformedLine,
    #[error("bulk payload not followed by CRLF")]
    MissingCrlf,
    #[error("{kind} length {len} exceeds limit")]
    TooLarge { kind: &'static str, len: i64 },
    #[error("invalid UTF-8 in status line")]
    InvalidUtf8,
    #[error("i/o error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for DecodeError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            DecodeError::TruncatedInput
        } else {
            DecodeError::Io(e)
        }
    }
}

/// Blocking RESP decoder over a buffered byte source
///
/// Each call to [`Decoder::decode`] either returns one complete value or
/// fails; no partial state is kept between calls. The decoder blocks only
/// inside the underlying reader while waiting for more bytes.
pub struct Decoder<R> {
    reader: R,
    line: Vec<u8>,
}

impl<R: BufRead> Decoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(64),
        }
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Decode the next value from the stream
    ///
    /// # Returns
    /// * `Ok(value)` - one complete value
    /// * `Err(DecodeError::EndOfInput)` - the stream ended between values
    /// * `Err(DecodeError::TruncatedInput)` - the stream ended mid-value
    /// * `Err(..)` - malformed framing
    pub fn decode(&mut self) -> Result<Value, DecodeError> {
        match self.read_tag()? {
            Some(tag) => self.decode_tagged(tag),
            None => Err(DecodeError::EndOfInput),
        }
    }

    fn decode_nested(&mut self) -> Result<Value, DecodeError> {
        match self.read_tag()? {
            Some(tag) => self.decode_tagged(tag),
            None => Err(DecodeError::TruncatedInput),
        }
    }

    fn decode_tagged(&mut self, tag: u8) -> Result<Value, DecodeError> {
        match tag {
            b'+' => Ok(Value::Simple(self.read_text()?)),
            b'-' => Ok(Value::Error(self.read_text()?)),
            b':' => {
                let line = self.read_line()?;
                parse_decimal(line)
                    .map(Value::Integer)
                    .ok_or(DecodeError::MalformedInteger)
            }
            b'$' => {
                let len = self.read_length()?;
                if len < 0 {
                    return Ok(Value::Bulk(None));
                }
                if len > MAX_BULK_LEN {
                    return Err(DecodeError::TooLarge { kind: "bulk", len });
                }
                // Grow with the bytes that actually arrive, not the announced length
                let mut payload = Vec::with_capacity((len as usize).min(BULK_PREALLOC));
                let got = (&mut self.reader).take(len as u64).read_to_end(&mut payload)?;
                if got as i64 != len {
                    return Err(DecodeError::TruncatedInput);
                }
                let mut tail = [0u8; 2];
                self.reader.read_exact(&mut tail)?;
                if tail != CRLF {
                    return Err(DecodeError::MissingCrlf);
                }
                Ok(Value::Bulk(Some(Bytes::from(payload))))
            }
            b'*' => {
                let count = self.read_length()?;
                if count < 0 {
                    return Ok(Value::Array(None));
                }
                if count > MAX_ARRAY_LEN {
                    return Err(DecodeError::TooLarge { kind: "array", len: count });
                }
                let mut items = Vec::with_capacity((count as usize).min(1024));
                for _ in 0..count {
                    items.push(self.decode_nested()?);
                }
                Ok(Value::Array(Some(items)))
            }
            other => Err(DecodeError::UnknownType(other)),
        }
    }

    /// Read the leading type byte, `None` on a clean end of stream
    fn read_tag(&mut self) -> Result<Option<u8>, DecodeError> {
        let tag = loop {
            match self.reader.fill_buf() {
                Ok(buf) => break buf.first().copied(),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        if tag.is_some() {
            self.reader.consume(1);
        }
        Ok(tag)
    }

    /// Read one CRLF-terminated line, returning it without the terminator
    fn read_line(&mut self) -> Result<&[u8], DecodeError> {
        self.line.clear();
        let n = (&mut self.reader)
            .take(MAX_LINE_LEN)
            .read_until(b'\n', &mut self.line)?;
        if self.line.last() != Some(&b'\n') {
            if n as u64 == MAX_LINE_LEN {
                return Err(DecodeError::TooLarge { kind: "line", len: n as i64 });
            }
            return Err(DecodeError::TruncatedInput);
        }
        let end = self.line.len() - 1;
        if end == 0 || self.line[end - 1] != b'\r' {
            return Err(DecodeError::MalformedLine);
        }
        Ok(&self.line[..end - 1])
    }

    fn read_text(&mut self) -> Result<String, DecodeError> {
        let line = self.read_line()?;
        std::str::from_utf8(line)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8)
    }

    fn read_length(&mut self) -> Result<i64, DecodeError> {
        let line = self.read_line()?;
        parse_decimal(line).ok_or(DecodeError::MalformedLength)
    }
}

/// Parse an optionally signed base-10 literal with no surrounding whitespace
fn parse_decimal(s: &[u8]) -> Option<i64> {
    std::str::from_utf8(s).ok()?.parse::<i64>().ok()
}

//
// RESP Response Encoders
//
// Low-level writers shared by `Value::encode_to`. Each appends the canonical
// byte form of one item to the output buffer.
//

/// Encode a simple string (+OK\r\n)
#[inline]
pub fn write_simple(s: &str, out: &mut BytesMut) {
    out.reserve(s.len() + 3);
    out.put_u8(b'+');
    out.put_slice(s.as_bytes());
    out.put_slice(CRLF);
}

/// Encode an error (-ERR message\r\n)
#[inline]
pub fn write_error(s: &str, out: &mut BytesMut) {
    out.reserve(s.len() + 3);
    out.put_u8(b'-');
    out.put_slice(s.as_bytes());
    out.put_slice(CRLF);
}

/// Encode a bulk string ($<len>\r\n<data>\r\n)
#[inline]
pub fn write_bulk(b: &[u8], out: &mut BytesMut) {
    let len_str = b.len().to_string();
    out.reserve(1 + len_str.len() + 2 + b.len() + 2);
    out.put_u8(b'$');
    out.put_slice(len_str.as_bytes());
    out.put_slice(CRLF);
    out.put_slice(b);
    out.put_slice(CRLF);
}

/// Encode the null sentinel ($-1\r\n)
#[inline]
pub fn write_null(out: &mut BytesMut) {
    out.put_slice(b"$-1\r\n");
}

/// Encode an integer (:<number>\r\n)
#[inline]
pub fn write_integer(i: i64, out: &mut BytesMut) {
    out.put_u8(b':');
    out.put_slice(i.to_string().as_bytes());
    out.put_slice(CRLF);
}

/// Encode an array header (*<count>\r\n); elements follow separately
#[inline]
pub fn write_array_len(n: usize, out: &mut BytesMut) {
    out.put_u8(b'*');
    out.put_slice(n.to_string().as_bytes());
    out.put_slice(CRLF);
}
