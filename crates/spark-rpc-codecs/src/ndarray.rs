//! 数组分帧协议。
//!
//! # 教案式说明
//! - **意图（Why）**：数值数组若按元素编码成 JSON 会膨胀数倍且丢失元素类型；本协议把数组的原始字节
//!   直接追加在文本头之后，头中只保留占位描述；
//! - **线格式（What）**：`<JSON 头> '\n' <各数组原始字节依次拼接>`。头中每个数组叶子被替换为
//!   `{"__kind__": "array", "shape": [..], "dtype": <元素类型描述>, "length": n, "offset": k}`，
//!   其中 `offset` 为此前已收集缓冲的累计长度；
//! - **不变量**：按深度优先顺序，各帧 `offset` 严格递增且互不重叠，长度之和恰好等于尾部字节数；
//!   每帧长度等于形状元素个数 × 元素宽度。违反任何一条都是普通的解码失败；
//! - **执行逻辑（How）**：解码时先收集全部占位符并校验分帧，再以 `Bytes::slice` 零拷贝地还原数组；
//! - **风险提示（Trade-offs）**：头部使用 JSON，因此头部中的字节串值会退化为整数列表；不支持流式。

use bytes::Bytes;
use spark_rpc_core::{DType, Map, NdArray, Value};

use crate::error::CodecError;
use crate::json::JsonProtocol;
use crate::protocol::{ByteSource, DecodedStream, Protocol};

const NAME: &str = "ndarray";
const KIND_KEY: &str = "__kind__";
const KIND_ARRAY: &str = "array";

/// 头部中的一个数组占位描述。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub offset: usize,
    pub length: usize,
    pub shape: Vec<usize>,
    pub dtype: DType,
}

/// 数组分帧协议。
#[derive(Clone, Copy, Debug, Default)]
pub struct NdArrayProtocol;

impl NdArrayProtocol {
    /// 解析头部并校验分帧，不还原数组。
    pub fn frames(data: &[u8]) -> Result<Vec<Frame>, CodecError> {
        let (header, trailer) = split(data)?;
        let frames = collect_frames(&header)?;
        check_framing(&frames, trailer.len())?;
        Ok(frames)
    }
}

fn split(data: &[u8]) -> Result<(Value, &[u8]), CodecError> {
    let pos = data
        .iter()
        .position(|byte| *byte == b'\n')
        .ok_or_else(|| CodecError::decode(NAME, "missing header terminator"))?;
    let header = JsonProtocol
        .deserialize(&data[..pos])
        .map_err(|err| CodecError::decode(NAME, format!("bad header: {err}")))?;
    Ok((header, &data[pos + 1..]))
}

fn placeholder(node: &Value) -> Option<&Map> {
    let map = node.as_map()?;
    (map.get(KIND_KEY).and_then(Value::as_str) == Some(KIND_ARRAY)).then_some(map)
}

fn size_field(map: &Map, key: &str) -> Result<usize, CodecError> {
    map.get(key)
        .and_then(Value::as_i64)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| CodecError::decode(NAME, format!("array placeholder has invalid `{key}`")))
}

fn parse_frame(map: &Map) -> Result<Frame, CodecError> {
    let shape = map
        .get("shape")
        .and_then(Value::as_slice)
        .ok_or_else(|| CodecError::decode(NAME, "array placeholder has invalid `shape`"))?
        .iter()
        .map(|dim| {
            dim.as_i64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| CodecError::decode(NAME, format!("invalid dimension {dim}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let spec = map
        .get("dtype")
        .ok_or_else(|| CodecError::decode(NAME, "array placeholder has no `dtype`"))?;
    let dtype = DType::from_spec(spec).map_err(|err| CodecError::decode(NAME, err))?;
    Ok(Frame {
        offset: size_field(map, "offset")?,
        length: size_field(map, "length")?,
        shape,
        dtype,
    })
}

fn collect_frames(header: &Value) -> Result<Vec<Frame>, CodecError> {
    let mut frames = Vec::new();
    let mut failure = None;
    header.visit(&mut |node| {
        if failure.is_some() {
            return;
        }
        if let Some(map) = placeholder(node) {
            match parse_frame(map) {
                Ok(frame) => frames.push(frame),
                Err(err) => failure = Some(err),
            }
        }
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(frames),
    }
}

fn check_framing(frames: &[Frame], trailer_len: usize) -> Result<(), CodecError> {
    let mut end = 0usize;
    for frame in frames {
        if frame.offset < end {
            return Err(CodecError::decode(
                NAME,
                format!(
                    "frame at offset {} overlaps the previous frame ending at {end}",
                    frame.offset
                ),
            ));
        }
        end = frame
            .offset
            .checked_add(frame.length)
            .filter(|stop| *stop <= trailer_len)
            .ok_or_else(|| {
                CodecError::decode(
                    NAME,
                    format!(
                        "frame [{}, +{}) exceeds the {trailer_len}-byte trailer",
                        frame.offset, frame.length
                    ),
                )
            })?;
    }
    let total: usize = frames.iter().map(|frame| frame.length).sum();
    if total != trailer_len {
        return Err(CodecError::decode(
            NAME,
            format!("frames cover {total} bytes but the trailer holds {trailer_len}"),
        ));
    }
    Ok(())
}

impl Protocol for NdArrayProtocol {
    fn name(&self) -> &str {
        NAME
    }

    fn serialize(&self, value: &Value) -> Result<Bytes, CodecError> {
        let mut buffers: Vec<Bytes> = Vec::new();
        let mut offset = 0usize;
        let header = value.rewrite(&mut |node| {
            let array = node.as_array()?;
            let length = array.data().len();
            let placeholder = Value::from_iter([
                (KIND_KEY, Value::from(KIND_ARRAY)),
                (
                    "shape",
                    Value::List(array.shape().iter().map(|d| Value::from(*d)).collect()),
                ),
                ("dtype", array.dtype().to_spec()),
                ("length", Value::from(length)),
                ("offset", Value::from(offset)),
            ]);
            offset += length;
            buffers.push(array.data().clone());
            Some(placeholder)
        });
        let head = JsonProtocol
            .serialize(&header)
            .map_err(|err| CodecError::encode(NAME, err))?;
        let mut out = Vec::with_capacity(head.len() + 1 + offset);
        out.extend_from_slice(&head);
        out.push(b'\n');
        for buffer in &buffers {
            out.extend_from_slice(buffer);
        }
        Ok(Bytes::from(out))
    }

    fn deserialize(&self, data: &[u8]) -> Result<Value, CodecError> {
        self.deserialize_bytes(Bytes::copy_from_slice(data))
    }

    fn deserialize_bytes(&self, data: Bytes) -> Result<Value, CodecError> {
        let (header, trailer) = split(&data)?;
        let trailer = data.slice_ref(trailer);
        let frames = collect_frames(&header)?;
        check_framing(&frames, trailer.len())?;

        let mut frames = frames.into_iter();
        header.try_rewrite(&mut |node| {
            if placeholder(node).is_none() {
                return Ok(None);
            }
            let frame = frames
                .next()
                .ok_or_else(|| CodecError::decode(NAME, "placeholder without frame"))?;
            let slice = trailer.slice(frame.offset..frame.offset + frame.length);
            NdArray::new(frame.dtype, frame.shape, slice)
                .map(|array| Some(Value::Array(array)))
                .map_err(|err| CodecError::decode(NAME, err))
        })
    }

    fn deserialize_stream(&self, _source: ByteSource) -> Result<DecodedStream, CodecError> {
        Err(CodecError::StreamingNotSupported(NAME.to_owned()))
    }

    fn record_separator(&self) -> Result<&'static [u8], CodecError> {
        Err(CodecError::StreamingNotSupported(NAME.to_owned()))
    }

    fn mime_type(&self) -> &str {
        "application/x-ndarray"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        let a = NdArray::from_slice(vec![2, 2], &[1.0f64, 2.0, 3.0, 4.0]).expect("a");
        let b = NdArray::from_vec(vec![7u8, 8, 9]).expect("b");
        Value::from_iter([
            ("first", Value::Array(a)),
            ("rest", Value::List(vec![Value::Int(1), Value::Array(b)])),
        ])
    }

    #[test]
    fn wire_layout_is_header_newline_buffers() {
        let wire = NdArrayProtocol.serialize(&sample()).expect("encode");
        let split = wire.iter().position(|b| *b == b'\n').expect("newline");
        assert_eq!(wire.len() - split - 1, 32 + 3);
        assert_eq!(&wire[wire.len() - 3..], &[7, 8, 9]);

        let frames = NdArrayProtocol::frames(&wire).expect("frames");
        assert_eq!(frames.len(), 2);
        assert_eq!((frames[0].offset, frames[0].length), (0, 32));
        assert_eq!((frames[1].offset, frames[1].length), (32, 3));
        assert_eq!(frames[1].dtype, DType::uint8());
    }

    #[test]
    fn decoded_arrays_share_the_input_buffer() {
        let wire = NdArrayProtocol.serialize(&sample()).expect("encode");
        let decoded = NdArrayProtocol.deserialize_bytes(wire.clone()).expect("decode");
        assert_eq!(decoded, sample());
        let first = decoded.get("first").and_then(Value::as_array).expect("array");
        let range = wire.as_ptr_range();
        assert!(range.contains(&first.data().as_ptr()));
    }

    #[test]
    fn missing_terminator_is_rejected() {
        assert!(NdArrayProtocol.deserialize(b"{\"a\": 1}").is_err());
    }
}
