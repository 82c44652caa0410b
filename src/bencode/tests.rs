use bytes::Bytes;

use super::*;

#[test]
fn test_decode_integer() {
    assert_eq!(decode(b"i42e").unwrap(), Value::Integer(42));
    assert_eq!(decode(b"i-42e").unwrap(), Value::Integer(-42));
    assert_eq!(decode(b"i0e").unwrap(), Value::Integer(0));
}

#[test]
fn test_decode_integer_invalid() {
    assert!(decode(b"i-0e").is_err());
    assert!(decode(b"i03e").is_err());
    assert!(decode(b"ie").is_err());
    assert!(decode(b"i-e").is_err());
    assert!(matches!(decode(b"i12"), Err(BencodeError::UnexpectedEof(_))));
}

#[test]
fn test_decode_bytes() {
    assert_eq!(decode(b"4:spam").unwrap(), Value::bytes(&b"spam"[..]));
    assert_eq!(decode(b"0:").unwrap(), Value::bytes(Bytes::new()));
    assert!(matches!(decode(b"5:spam"), Err(BencodeError::UnexpectedEof(_))));
    assert!(matches!(
        decode(b"x:spam"),
        Err(BencodeError::UnexpectedChar('x', 0))
    ));
}

#[test]
fn test_decode_binary_string() {
    let mut data = b"3:".to_vec();
    data.extend_from_slice(&[0x00, 0xff, 0x80]);
    let value = decode(&data).unwrap();
    assert_eq!(value.as_bytes().unwrap().as_ref(), &[0x00, 0xff, 0x80]);
    assert_eq!(value.as_str(), None);
}

#[test]
fn test_decode_krpc_query() {
    let data = b"d1:ad2:id20:abcdefghij0123456789e1:q4:ping1:t2:aa1:y1:qe";
    let value = decode(data).unwrap();

    assert_eq!(value.get(b"y").and_then(Value::as_str), Some("q"));
    assert_eq!(value.get(b"q").and_then(Value::as_str), Some("ping"));
    let id = value.get(b"a").and_then(|a| a.get(b"id")).unwrap();
    assert_eq!(id.as_bytes().unwrap().len(), 20);
}

#[test]
fn test_decode_error_list() {
    let value = decode(b"d1:eli201e23:A Generic Error Ocurrede1:t2:aa1:y1:ee").unwrap();
    let list = value.get(b"e").and_then(Value::as_list).unwrap();
    assert_eq!(list[0].as_integer(), Some(201));
    assert_eq!(list[1].as_str(), Some("A Generic Error Ocurred"));
}

#[test]
fn test_decode_dict_rejects_integer_key() {
    assert_eq!(decode(b"di1e3:fooe"), Err(BencodeError::InvalidKey));
}

#[test]
fn test_encode_matches_bep5_example() {
    let msg = Value::dict([
        ("t", Value::string("aa")),
        ("y", Value::string("q")),
        ("q", Value::string("ping")),
        ("a", Value::dict([("id", Value::string("abcdefghij0123456789"))])),
    ]);
    assert_eq!(
        &encode(&msg)[..],
        b"d1:ad2:id20:abcdefghij0123456789e1:q4:ping1:t2:aa1:y1:qe"
    );
}

#[test]
fn test_encode_scalars() {
    assert_eq!(&encode(&Value::Integer(-42))[..], b"i-42e");
    assert_eq!(&encode(&Value::Integer(0))[..], b"i0e");
    assert_eq!(&encode(&Value::string("spam"))[..], b"4:spam");
    let list = Value::List(vec![Value::string("spam"), Value::Integer(42)]);
    assert_eq!(&encode(&list)[..], b"l4:spami42ee");
}

#[test]
fn test_reencode_is_canonical() {
    let original = b"d1:rd2:id20:mnopqrstuvwxyz1234565:nodes0:e1:t2:aa1:y1:re";
    let decoded = decode(original).unwrap();
    assert_eq!(&encode(&decoded)[..], original);
}

#[test]
fn test_trailing_data_error() {
    assert_eq!(decode(b"i42eextra"), Err(BencodeError::TrailingData));
}

#[test]
fn test_nesting_limit() {
    let mut data = vec![b'l'; 100];
    data.extend(vec![b'e'; 100]);
    assert_eq!(decode(&data), Err(BencodeError::NestingTooDeep));
}

#[test]
fn test_value_accessors() {
    let value = Value::Integer(42);
    assert_eq!(value.as_integer(), Some(42));
    assert!(value.as_bytes().is_none());
    assert_eq!(value.kind(), "integer");

    let value = Value::string("test");
    assert_eq!(value.as_str(), Some("test"));
    assert_eq!(value.kind(), "string");

    let value = Value::List(vec![]);
    assert!(value.as_list().is_some());
    assert!(value.as_dict().is_none());
}
