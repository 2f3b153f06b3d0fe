//! RESP2 reply values and the reply half of the wire codec.
//!
//! The parser is sans-IO: it looks at whatever bytes have been read so far and
//! either produces one complete reply together with the number of bytes it
//! consumed, or reports that more input is needed. The caller owns the socket
//! and the read buffer (see [`crate::connection`]).
//!
//! Reply prefixes understood:
//!
//! - `+` status line. `OK` and `QUEUED` collapse into [`RespValue::Ok`].
//! - `-` error line, with a leading `ERR ` stripped.
//! - `:` integer. Values that do not fit an `i64` are kept as the raw text.
//! - `$` bulk string, or [`RespValue::Null`] for a length of `-1`.
//! - `*` array, or [`RespValue::NullArray`] for a count of `-1`.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Nested arrays deeper than this are rejected.
pub const MAX_DEPTH: usize = 32;

/// Largest bulk string accepted, matching Redis' default `proto-max-bulk-len`.
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Errors produced while decoding a reply.
///
/// An incomplete reply is not an error; [`RespValue::parse`] returns
/// `Ok(None)` for it.
#[derive(Error, Debug, PartialEq)]
pub enum RespError {
    #[error("unknown response prefix {0:?}")]
    UnknownPrefix(char),
    #[error("invalid length header {0:?}")]
    InvalidLength(String),
    #[error("bulk string is not terminated by CRLF")]
    MissingTerminator,
    #[error("reply line is not valid UTF-8")]
    InvalidUtf8,
    #[error("reply nested deeper than {0} levels")]
    NestingTooDeep(usize),
}

/// A decoded server reply.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// `+OK` or `+QUEUED`.
    Ok,
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Array(Vec<RespValue>),
    /// `$-1`
    Null,
    /// `*-1`
    NullArray,
}

impl RespValue {
    /// Parses one reply from the front of `input`.
    ///
    /// Returns the reply and the number of bytes it occupied, or `None` when
    /// `input` does not yet hold a complete reply.
    pub fn parse(input: &[u8]) -> Result<Option<(RespValue, usize)>, RespError> {
        parse_at(input, 0, 0)
    }

    /// Appends the wire form of this value to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            RespValue::Ok => buf.put_slice(b"+OK\r\n"),
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Error(e) => {
                buf.put_slice(b"-ERR ");
                buf.put_slice(e.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                buf.put_slice(format!(":{}\r\n", n).as_bytes());
            }
            RespValue::BulkString(data) => {
                put_bulk(buf, data);
            }
            RespValue::Array(items) => {
                buf.put_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode(buf);
                }
            }
            RespValue::Null => buf.put_slice(b"$-1\r\n"),
            RespValue::NullArray => buf.put_slice(b"*-1\r\n"),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null | RespValue::NullArray)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Borrows the payload of a bulk or status reply.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(data) => Some(data),
            RespValue::SimpleString(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// Writes `$<len>\r\n<data>\r\n`.
pub(crate) fn put_bulk(buf: &mut BytesMut, data: &[u8]) {
    buf.put_slice(format!("${}\r\n", data.len()).as_bytes());
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
}

fn parse_at(
    input: &[u8],
    pos: usize,
    depth: usize,
) -> Result<Option<(RespValue, usize)>, RespError> {
    let Some((line, next)) = read_line(input, pos) else {
        return Ok(None);
    };

    let Some((&prefix, rest)) = line.split_first() else {
        return Err(RespError::UnknownPrefix('\0'));
    };

    match prefix {
        b'+' => {
            let status = line_to_string(rest)?;
            let value = match status.as_str() {
                "OK" | "QUEUED" => RespValue::Ok,
                _ => RespValue::SimpleString(status),
            };
            Ok(Some((value, next)))
        }
        b'-' => {
            let message = line_to_string(rest)?;
            let message = match message.strip_prefix("ERR ") {
                Some(stripped) => stripped.to_string(),
                None => message,
            };
            Ok(Some((RespValue::Error(message), next)))
        }
        b':' => {
            let raw = line_to_string(rest)?;
            let value = match raw.parse::<i64>() {
                Ok(n) => RespValue::Integer(n),
                Err(_) => RespValue::SimpleString(raw),
            };
            Ok(Some((value, next)))
        }
        b'$' => {
            let length = parse_length(rest)?;
            if length == -1 {
                return Ok(Some((RespValue::Null, next)));
            }
            let length = bulk_len(length, rest)?;

            let end = next + length;
            if input.len() < end + 2 {
                return Ok(None);
            }
            if &input[end..end + 2] != b"\r\n" {
                return Err(RespError::MissingTerminator);
            }

            let data = Bytes::copy_from_slice(&input[next..end]);
            Ok(Some((RespValue::BulkString(data), end + 2)))
        }
        b'*' => {
            let count = parse_length(rest)?;
            if count == -1 {
                return Ok(Some((RespValue::NullArray, next)));
            }
            let count = usize::try_from(count)
                .map_err(|_| RespError::InvalidLength(String::from_utf8_lossy(rest).into()))?;

            if depth + 1 > MAX_DEPTH {
                return Err(RespError::NestingTooDeep(MAX_DEPTH));
            }

            // the declared count is untrusted, so don't preallocate from it
            let mut items = Vec::with_capacity(count.min(64));
            let mut cursor = next;
            for _ in 0..count {
                match parse_at(input, cursor, depth + 1)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }

            Ok(Some((RespValue::Array(items), cursor)))
        }
        other => Err(RespError::UnknownPrefix(other as char)),
    }
}

/// Incremental completeness check for one reply.
///
/// Keeps its offset and the open array counts between calls, so a buffer
/// that grows read by read is only walked once. Checks framing only; decode
/// the reply with [`RespValue::parse`] once [`scan`](Self::scan) reports its
/// length.
#[derive(Debug, Default)]
pub struct FrameScanner {
    pos: usize,
    /// Elements still expected by each open array, innermost last.
    pending: Vec<usize>,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continues scanning `input`, which must start with the bytes given to
    /// earlier calls. Returns the length of the first reply once all of it
    /// is present.
    pub fn scan(&mut self, input: &[u8]) -> Result<Option<usize>, RespError> {
        loop {
            let Some((line, next)) = read_line(input, self.pos) else {
                return Ok(None);
            };
            let Some((&prefix, rest)) = line.split_first() else {
                return Err(RespError::UnknownPrefix('\0'));
            };

            match prefix {
                b'+' | b'-' | b':' => self.pos = next,
                b'$' => {
                    let length = parse_length(rest)?;
                    if length == -1 {
                        self.pos = next;
                    } else {
                        let end = next + bulk_len(length, rest)?;
                        if input.len() < end + 2 {
                            return Ok(None);
                        }
                        if &input[end..end + 2] != b"\r\n" {
                            return Err(RespError::MissingTerminator);
                        }
                        self.pos = end + 2;
                    }
                }
                b'*' => {
                    let count = parse_length(rest)?;
                    if count >= 0 && self.pending.len() + 1 > MAX_DEPTH {
                        return Err(RespError::NestingTooDeep(MAX_DEPTH));
                    }
                    self.pos = next;
                    if count > 0 {
                        self.pending.push(count as usize);
                        continue;
                    }
                }
                other => return Err(RespError::UnknownPrefix(other as char)),
            }

            // one element finished; close every array it completes
            loop {
                match self.pending.last_mut() {
                    None => return Ok(Some(self.pos)),
                    Some(remaining) if *remaining > 1 => {
                        *remaining -= 1;
                        break;
                    }
                    Some(_) => {
                        self.pending.pop();
                    }
                }
            }
        }
    }
}

/// Returns the line starting at `pos` without its `\r\n`, and the offset
/// just past the terminator.
fn read_line(input: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let window = input.get(pos..)?;
    let end = window.windows(2).position(|w| w == b"\r\n")?;
    Some((&window[..end], pos + end + 2))
}

fn line_to_string(line: &[u8]) -> Result<String, RespError> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|_| RespError::InvalidUtf8)
}

fn parse_length(line: &[u8]) -> Result<i64, RespError> {
    let text = std::str::from_utf8(line).map_err(|_| RespError::InvalidUtf8)?;
    let length = text
        .parse::<i64>()
        .map_err(|_| RespError::InvalidLength(text.to_string()))?;

    if length < -1 {
        return Err(RespError::InvalidLength(text.to_string()));
    }

    Ok(length)
}

fn bulk_len(length: i64, line: &[u8]) -> Result<usize, RespError> {
    usize::try_from(length)
        .ok()
        .filter(|&length| length <= MAX_BULK_LEN)
        .ok_or_else(|| RespError::InvalidLength(String::from_utf8_lossy(line).into()))
}
