use super::value::Value;
use bytes::{BufMut, Bytes, BytesMut};

/// Encodes a value in canonical bencode form (dictionary keys sorted).
///
/// Encoding into memory cannot fail, so unlike decoding this returns the
/// buffer directly.
pub fn encode(value: &Value) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(value));
    encode_value(value, &mut buf);
    buf.freeze()
}

fn encode_value(value: &Value, buf: &mut BytesMut) {
    match value {
        Value::Integer(i) => {
            buf.put_u8(b'i');
            buf.put_slice(i.to_string().as_bytes());
            buf.put_u8(b'e');
        }
        Value::Bytes(b) => encode_bytes(b, buf),
        Value::List(items) => {
            buf.put_u8(b'l');
            for item in items {
                encode_value(item, buf);
            }
            buf.put_u8(b'e');
        }
        Value::Dict(entries) => {
            buf.put_u8(b'd');
            for (key, val) in entries {
                encode_bytes(key, buf);
                encode_value(val, buf);
            }
            buf.put_u8(b'e');
        }
    }
}

fn encode_bytes(b: &[u8], buf: &mut BytesMut) {
    buf.put_slice(b.len().to_string().as_bytes());
    buf.put_u8(b':');
    buf.put_slice(b);
}

fn digits(n: usize) -> usize {
    n.checked_ilog10().map_or(1, |d| d as usize + 1)
}

fn encoded_len(value: &Value) -> usize {
    match value {
        Value::Integer(i) => 2 + i.to_string().len(),
        Value::Bytes(b) => digits(b.len()) + 1 + b.len(),
        Value::List(items) => 2 + items.iter().map(encoded_len).sum::<usize>(),
        Value::Dict(entries) => {
            2 + entries
                .iter()
                .map(|(k, v)| digits(k.len()) + 1 + k.len() + encoded_len(v))
                .sum::<usize>()
        }
    }
}
