use std::io::{BufRead, BufReader};

use bytes::Bytes;
use serde::Deserialize;
use spark_rpc_core::Value;

use crate::error::CodecError;
use crate::protocol::{ByteSource, DecodedStream, Protocol};

const NAME: &str = "messagepack";

/// MessagePack 紧凑二进制协议。
///
/// 记录自定界，流式模式没有分隔符：读取器在每条记录前检查是否已到达输入末尾，
/// 然后只消费恰好一条记录的字节。
#[derive(Clone, Copy, Debug, Default)]
pub struct MessagePackProtocol;

impl Protocol for MessagePackProtocol {
    fn name(&self) -> &str {
        NAME
    }

    fn serialize(&self, value: &Value) -> Result<Bytes, CodecError> {
        rmp_serde::to_vec(value)
            .map(Bytes::from)
            .map_err(|err| CodecError::encode(NAME, err))
    }

    fn deserialize(&self, data: &[u8]) -> Result<Value, CodecError> {
        rmp_serde::from_slice(data).map_err(|err| CodecError::decode(NAME, err))
    }

    fn deserialize_stream(&self, source: ByteSource) -> Result<DecodedStream, CodecError> {
        Ok(Box::new(MessagePackRecords {
            reader: BufReader::new(source),
            done: false,
        }))
    }

    fn record_separator(&self) -> Result<&'static [u8], CodecError> {
        Ok(b"")
    }

    fn mime_type(&self) -> &str {
        "application/x-msgpack"
    }
}

struct MessagePackRecords {
    reader: BufReader<ByteSource>,
    done: bool,
}

impl Iterator for MessagePackRecords {
    type Item = Result<Value, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.fill_buf() {
            Ok([]) => {
                self.done = true;
                return None;
            }
            Ok(_) => {}
            Err(err) => {
                self.done = true;
                return Some(Err(CodecError::io(NAME, err)));
            }
        }
        let mut de = rmp_serde::Deserializer::new(&mut self.reader);
        let decoded = Value::deserialize(&mut de).map_err(|err| CodecError::decode(NAME, err));
        self.done = decoded.is_err();
        Some(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn concatenated_records_decode_in_order() {
        let mut wire = Vec::new();
        let records = [
            Value::Int(-7),
            Value::from("x"),
            Value::Bytes(Bytes::from_static(b"\x00\x01")),
        ];
        for item in records {
            wire.extend_from_slice(&MessagePackProtocol.serialize(&item).expect("encode"));
        }
        let source: ByteSource = Box::new(Cursor::new(wire));
        let items: Vec<_> = MessagePackProtocol
            .deserialize_stream(source)
            .expect("stream")
            .collect::<Result<_, _>>()
            .expect("decode");
        assert_eq!(
            items,
            vec![
                Value::Int(-7),
                Value::from("x"),
                Value::Bytes(Bytes::from_static(b"\x00\x01"))
            ]
        );
    }

    #[test]
    fn truncated_record_is_an_error() {
        let wire = MessagePackProtocol
            .serialize(&Value::from("a longer string"))
            .expect("encode");
        let source: ByteSource = Box::new(Cursor::new(wire[..wire.len() - 3].to_vec()));
        let mut stream = MessagePackProtocol.deserialize_stream(source).expect("stream");
        assert!(matches!(stream.next(), Some(Err(CodecError::Decode { .. }))));
        assert!(stream.next().is_none());
    }
}
