use std::io::{BufRead, BufReader};

use bytes::Bytes;
use spark_rpc_core::Value;

use crate::error::CodecError;
use crate::protocol::{ByteSource, DecodedStream, Protocol};

const NAME: &str = "json";
const NEWLINE: u8 = b'\n';

/// 换行分隔的 JSON 文本协议。
///
/// # 行为概览（How）
/// - `serialize` 输出紧凑 JSON（字符串中的换行会被转义，因此记录内部不会出现裸 `\n`）；
/// - `deserialize_stream` 逐行读取并解码，跳过空白行；首个错误之后流结束。
///
/// # 权衡与风险（Trade-offs）
/// - 字节串按整数数组编码，解码后成为列表；需要保留字节语义时应选择紧凑二进制或原生协议。
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonProtocol;

impl Protocol for JsonProtocol {
    fn name(&self) -> &str {
        NAME
    }

    fn serialize(&self, value: &Value) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|err| CodecError::encode(NAME, err))
    }

    fn deserialize(&self, data: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(data).map_err(|err| CodecError::decode(NAME, err))
    }

    fn deserialize_stream(&self, source: ByteSource) -> Result<DecodedStream, CodecError> {
        Ok(Box::new(JsonLines {
            reader: BufReader::new(source),
            done: false,
        }))
    }

    fn record_separator(&self) -> Result<&'static [u8], CodecError> {
        Ok(b"\n")
    }

    fn mime_type(&self) -> &str {
        "application/json"
    }
}

struct JsonLines {
    reader: BufReader<ByteSource>,
    done: bool,
}

impl Iterator for JsonLines {
    type Item = Result<Value, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let mut line = Vec::new();
            match self.reader.read_until(NEWLINE, &mut line) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    let decoded = JsonProtocol.deserialize(&line);
                    self.done = decoded.is_err();
                    return Some(decoded);
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(CodecError::io(NAME, err)));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn stream_skips_blank_lines_and_stops_after_errors() {
        let source: ByteSource = Box::new(Cursor::new(b"{\"a\":1}\n\n[2]\nnot-json\n3\n".to_vec()));
        let items: Vec<_> = JsonProtocol
            .deserialize_stream(source)
            .expect("stream")
            .collect();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], Ok(Value::from_iter([("a", 1)])));
        assert_eq!(items[1], Ok(Value::List(vec![Value::Int(2)])));
        assert!(items[2].is_err());
    }

    #[test]
    fn last_record_may_omit_the_separator() {
        let source: ByteSource = Box::new(Cursor::new(b"1\n2".to_vec()));
        let items: Vec<_> = JsonProtocol
            .deserialize_stream(source)
            .expect("stream")
            .collect::<Result<_, _>>()
            .expect("all valid");
        assert_eq!(items, vec![Value::Int(1), Value::Int(2)]);
    }
}
