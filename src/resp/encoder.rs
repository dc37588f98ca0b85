//! RESP encoder: every request is an array of bulk strings.

use bytes::BytesMut;

use crate::executor::Command;

/// Encode a command to wire bytes.
pub fn encode(command: &Command) -> BytesMut {
    let args = command.args();
    let size = 16 + args.iter().map(|a| a.len() + 16).sum::<usize>();
    let mut buf = BytesMut::with_capacity(size);
    encode_parts(&mut buf, command.name(), &args);
    buf
}

/// Encode `name arg...` into `buf`.
pub fn encode_parts(buf: &mut BytesMut, name: &str, args: &[Vec<u8>]) {
    encode_array_header(buf, args.len() + 1);
    encode_bulk_string(buf, name.as_bytes());
    for arg in args {
        encode_bulk_string(buf, arg);
    }
}

/// Encode HELLO for a protocol upgrade.
pub fn encode_hello(buf: &mut BytesMut, version: u8) {
    encode_parts(buf, "HELLO", &[version.to_string().into_bytes()]);
}

/// Encode RESP array header: *<count>\r\n
fn encode_array_header(buf: &mut BytesMut, count: usize) {
    buf.extend_from_slice(b"*");
    buf.extend_from_slice(count.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
}

/// Encode RESP bulk string: $<len>\r\n<data>\r\n
fn encode_bulk_string(buf: &mut BytesMut, data: &[u8]) {
    buf.extend_from_slice(b"$");
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyPrefix;
    use crate::query::Query;
    use crate::script::ScriptBuilder;

    #[test]
    fn test_encode_hgetall() {
        let cmd = Command::HGetAll {
            key: "customer:a:7".into(),
        };
        let expected = b"*2\r\n$7\r\nHGETALL\r\n$12\r\ncustomer:a:7\r\n";
        assert_eq!(&encode(&cmd)[..], expected);
    }

    #[test]
    fn test_encode_eval_has_zero_keys() {
        let program = ScriptBuilder::new(KeyPrefix::new("t", false))
            .build_count(&Query::new())
            .unwrap();
        let source = program.source();
        let bytes = encode(&Command::Eval { program });
        let expected_head = format!("*3\r\n$4\r\nEVAL\r\n${}\r\n", source.len());
        assert!(bytes.starts_with(expected_head.as_bytes()));
        assert!(bytes.ends_with(b"\r\n$1\r\n0\r\n"));
    }

    #[test]
    fn test_encode_hello() {
        let mut buf = BytesMut::new();
        encode_hello(&mut buf, 3);
        assert_eq!(&buf[..], b"*2\r\n$5\r\nHELLO\r\n$1\r\n3\r\n");
    }
}
