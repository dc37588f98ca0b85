//! RESP2/RESP3 reply decoder.
//!
//! Error replies decode into [`Value::Error`]; the connection decides what
//! to do with them. A buffer that stops mid-reply yields
//! [`RedluaError::Incomplete`] so the caller can read more and retry.

use std::io::Cursor;

use bytes::Buf;

use crate::error::{RedluaError, RedluaResult};
use crate::value::Value;

/// Decode one reply from the front of `buf`.
///
/// Returns the value and the number of bytes it occupied.
pub fn decode(buf: &[u8]) -> RedluaResult<(Value, usize)> {
    if buf.is_empty() {
        return Err(RedluaError::Incomplete);
    }

    let mut cursor = Cursor::new(buf);
    let value = decode_value(&mut cursor)?;
    Ok((value, cursor.position() as usize))
}

fn decode_value(cursor: &mut Cursor<&[u8]>) -> RedluaResult<Value> {
    if !cursor.has_remaining() {
        return Err(RedluaError::Incomplete);
    }

    let type_byte = cursor.get_u8();

    match type_byte {
        // +OK\r\n
        b'+' => Ok(Value::Status(read_line(cursor)?)),

        // -ERR message\r\n
        b'-' => Ok(Value::Error(read_line(cursor)?)),

        // :1000\r\n
        b':' => Ok(Value::Integer(parse_line(cursor, "integer")?)),

        // $5\r\nhello\r\n
        b'$' => match read_blob(cursor)? {
            Some(data) => Ok(Value::Bulk(data)),
            None => Ok(Value::Null),
        },

        // !<len>\r\n<error>\r\n (RESP3 blob error)
        b'!' => {
            let data = read_blob(cursor)?.unwrap_or_default();
            Ok(Value::Error(String::from_utf8_lossy(&data).into_owned()))
        }

        // =<len>\r\ntxt:<text>\r\n (RESP3 verbatim string)
        b'=' => {
            let data = read_blob(cursor)?.unwrap_or_default();
            let text = data.get(4..).unwrap_or_default();
            Ok(Value::Bulk(text.to_vec()))
        }

        // (<big number>\r\n (RESP3)
        b'(' => Ok(Value::Bulk(read_line(cursor)?.into_bytes())),

        // *2\r\n... and RESP3 sets/pushes
        b'*' | b'~' | b'>' => {
            let count: i64 = parse_line(cursor, "array length")?;
            if count < 0 {
                return Ok(Value::Null);
            }
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(decode_value(cursor)?);
            }
            Ok(Value::Array(items))
        }

        // _\r\n (RESP3)
        b'_' => {
            read_line(cursor)?;
            Ok(Value::Null)
        }

        // #t\r\n or #f\r\n (RESP3)
        b'#' => {
            let line = read_line(cursor)?;
            match line.as_str() {
                "t" => Ok(Value::Boolean(true)),
                "f" => Ok(Value::Boolean(false)),
                _ => Err(RedluaError::Protocol(format!("Invalid boolean: {}", line))),
            }
        }

        // ,1.23\r\n (RESP3)
        b',' => {
            let line = read_line(cursor)?;
            let num = match line.as_str() {
                "inf" => f64::INFINITY,
                "-inf" => f64::NEG_INFINITY,
                other => other
                    .parse()
                    .map_err(|_| RedluaError::Protocol(format!("Invalid double: {}", line)))?,
            };
            Ok(Value::Double(num))
        }

        // %2\r\n... (RESP3)
        b'%' => {
            let count: i64 = parse_line(cursor, "map length")?;
            let mut pairs = Vec::with_capacity(count.max(0) as usize);
            for _ in 0..count {
                let key = decode_value(cursor)?;
                let value = decode_value(cursor)?;
                pairs.push((key, value));
            }
            Ok(Value::Map(pairs))
        }

        // |1\r\n<attributes><reply> (RESP3): attributes are skipped.
        b'|' => {
            let count: i64 = parse_line(cursor, "attribute length")?;
            for _ in 0..count {
                decode_value(cursor)?;
                decode_value(cursor)?;
            }
            decode_value(cursor)
        }

        _ => Err(RedluaError::Protocol(format!(
            "Unknown type byte: {}",
            type_byte as char
        ))),
    }
}

fn parse_line<T: std::str::FromStr>(cursor: &mut Cursor<&[u8]>, what: &str) -> RedluaResult<T> {
    let line = read_line(cursor)?;
    line.parse()
        .map_err(|_| RedluaError::Protocol(format!("Invalid {}: {}", what, line)))
}

/// Length-prefixed payload; a negative length is null.
fn read_blob(cursor: &mut Cursor<&[u8]>) -> RedluaResult<Option<Vec<u8>>> {
    let len: i64 = parse_line(cursor, "bulk length")?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    if cursor.remaining() < len + 2 {
        return Err(RedluaError::Incomplete);
    }
    let mut data = vec![0u8; len];
    cursor.copy_to_slice(&mut data);
    cursor.advance(2);
    Ok(Some(data))
}

/// Read a line up to \r\n.
fn read_line(cursor: &mut Cursor<&[u8]>) -> RedluaResult<String> {
    let start = cursor.position() as usize;
    let buf = *cursor.get_ref();
    let rest = buf.get(start..).unwrap_or_default();

    let Some(end) = rest.windows(2).position(|w| w == b"\r\n") else {
        return Err(RedluaError::Incomplete);
    };
    let line = std::str::from_utf8(&rest[..end])
        .map_err(|_| RedluaError::Protocol("Invalid UTF-8".into()))?;
    cursor.set_position((start + end + 2) as u64);
    Ok(line.to_string())
}
