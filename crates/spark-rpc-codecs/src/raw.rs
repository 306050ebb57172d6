use std::io::Read;

use bytes::Bytes;
use spark_rpc_core::Value;

use crate::error::CodecError;
use crate::protocol::{ByteSource, DecodedStream, Protocol};

const NAME: &str = "raw";
const CHUNK: usize = 8 * 1024;

/// 原始透传协议：不包裹信封，结果字节原样写出。
///
/// - 只接受字节串、字符串（按 UTF-8）与空值（空载荷）；
/// - 流式模式下各项直接拼接，读取端按固定大小分块交付，因此块边界不对应写入端的记录边界。
#[derive(Clone, Copy, Debug, Default)]
pub struct RawProtocol;

impl Protocol for RawProtocol {
    fn name(&self) -> &str {
        NAME
    }

    fn serialize(&self, value: &Value) -> Result<Bytes, CodecError> {
        match value {
            Value::Bytes(bytes) => Ok(bytes.clone()),
            Value::Str(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Value::Null => Ok(Bytes::new()),
            other => Err(CodecError::encode(
                NAME,
                format!("only bytes or str can be sent raw, got {}", other.type_name()),
            )),
        }
    }

    fn deserialize(&self, data: &[u8]) -> Result<Value, CodecError> {
        Ok(Value::Bytes(Bytes::copy_from_slice(data)))
    }

    fn deserialize_bytes(&self, data: Bytes) -> Result<Value, CodecError> {
        Ok(Value::Bytes(data))
    }

    fn deserialize_stream(&self, source: ByteSource) -> Result<DecodedStream, CodecError> {
        Ok(Box::new(RawChunks {
            source,
            done: false,
        }))
    }

    fn record_separator(&self) -> Result<&'static [u8], CodecError> {
        Ok(b"")
    }

    fn mime_type(&self) -> &str {
        "application/octet-stream"
    }

    fn should_wrap(&self) -> bool {
        false
    }
}

struct RawChunks {
    source: ByteSource,
    done: bool,
}

impl Iterator for RawChunks {
    type Item = Result<Value, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut chunk = Vec::with_capacity(CHUNK);
        match (&mut self.source).take(CHUNK as u64).read_to_end(&mut chunk) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => Some(Ok(Value::Bytes(Bytes::from(chunk)))),
            Err(err) => {
                self.done = true;
                Some(Err(CodecError::io(NAME, err)))
            }
        }
    }
}
