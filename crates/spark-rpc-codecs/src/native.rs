use std::fmt;

use bytes::Bytes;
use serde::Serialize;
use serde::de::{self, DeserializeSeed, EnumAccess, SeqAccess, Unexpected, VariantAccess, Visitor};
use spark_rpc_core::{DType, NdArray, Value};

use crate::error::CodecError;
use crate::protocol::{ByteSource, DecodedStream, Protocol};

const NAME: &str = "native";

/// 解码时允许的最大嵌套层数；数组的元素类型描述也计入层数。
const MAX_DEPTH: usize = 128;

/// 按长度前缀预分配的上限，长度前缀来自线上，不可信。
const PREALLOC_LIMIT: usize = 4096;

/// 原生对象协议：以 postcard 编码值模型的带标签镜像。
///
/// 与自描述协议不同，它完整保留元组、字节串与数组（元素类型、形状、原始字节），
/// 适合两端都使用本框架的场景。记录不自定界，因此不支持流式。
/// 解码按层计数，超过 128 层即为普通的解码失败。
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeProtocol;

#[derive(Serialize)]
enum Native {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Native>),
    Tuple(Vec<Native>),
    Map(Vec<(String, Native)>),
    Array {
        /// [`DType::to_spec`] 的镜像。
        dtype: Box<Native>,
        shape: Vec<u64>,
        data: Vec<u8>,
    },
}

const VARIANTS: &[&str] = &[
    "Null", "Bool", "Int", "Float", "Str", "Bytes", "List", "Tuple", "Map", "Array",
];
const ARRAY_FIELDS: &[&str] = &["dtype", "shape", "data"];

/// 带层数的解码种子，与 `#[derive(Serialize)]` 产生的枚举布局一一对应。
#[derive(Clone, Copy)]
struct NativeSeed {
    depth: usize,
}

impl NativeSeed {
    fn nested<E: de::Error>(self) -> Result<Self, E> {
        if self.depth >= MAX_DEPTH {
            return Err(E::custom(format_args!("nesting deeper than {MAX_DEPTH} levels")));
        }
        Ok(Self {
            depth: self.depth + 1,
        })
    }
}

impl<'de> DeserializeSeed<'de> for NativeSeed {
    type Value = Native;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<Native, D::Error> {
        deserializer.deserialize_enum("Native", VARIANTS, self)
    }
}

impl<'de> Visitor<'de> for NativeSeed {
    type Value = Native;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a native value")
    }

    fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> Result<Native, A::Error> {
        let (tag, variant) = data.variant::<u32>()?;
        Ok(match tag {
            0 => {
                variant.unit_variant()?;
                Native::Null
            }
            1 => Native::Bool(variant.newtype_variant()?),
            2 => Native::Int(variant.newtype_variant()?),
            3 => Native::Float(variant.newtype_variant()?),
            4 => Native::Str(variant.newtype_variant()?),
            5 => Native::Bytes(variant.newtype_variant()?),
            6 => Native::List(variant.newtype_variant_seed(Items(self.nested()?))?),
            7 => Native::Tuple(variant.newtype_variant_seed(Items(self.nested()?))?),
            8 => Native::Map(variant.newtype_variant_seed(Entries(self.nested()?))?),
            9 => variant.struct_variant(ARRAY_FIELDS, ArrayFields(self.nested()?))?,
            other => {
                return Err(de::Error::invalid_value(
                    Unexpected::Unsigned(u64::from(other)),
                    &self,
                ));
            }
        })
    }
}

/// 列表与元组的元素序列。
struct Items(NativeSeed);

impl<'de> DeserializeSeed<'de> for Items {
    type Value = Vec<Native>;

    fn deserialize<D: de::Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for Items {
    type Value = Vec<Native>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a sequence of native values")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(PREALLOC_LIMIT));
        while let Some(item) = seq.next_element_seed(self.0)? {
            items.push(item);
        }
        Ok(items)
    }
}

/// 映射的键值对序列。
struct Entries(NativeSeed);

impl<'de> DeserializeSeed<'de> for Entries {
    type Value = Vec<(String, Native)>;

    fn deserialize<D: de::Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for Entries {
    type Value = Vec<(String, Native)>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a sequence of entries")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(PREALLOC_LIMIT));
        while let Some(entry) = seq.next_element_seed(Entry(self.0))? {
            entries.push(entry);
        }
        Ok(entries)
    }
}

struct Entry(NativeSeed);

impl<'de> DeserializeSeed<'de> for Entry {
    type Value = (String, Native);

    fn deserialize<D: de::Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_tuple(2, self)
    }
}

impl<'de> Visitor<'de> for Entry {
    type Value = (String, Native);

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a key/value pair")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let key: String = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let value = seq
            .next_element_seed(self.0)?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        Ok((key, value))
    }
}

/// 数组变体的三个字段。
struct ArrayFields(NativeSeed);

impl<'de> Visitor<'de> for ArrayFields {
    type Value = Native;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("array fields")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Native, A::Error> {
        let dtype = seq
            .next_element_seed(self.0)?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let shape = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        let data = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(2, &self))?;
        Ok(Native::Array {
            dtype: Box::new(dtype),
            shape,
            data,
        })
    }
}

impl From<&Value> for Native {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Native::Null,
            Value::Bool(v) => Native::Bool(*v),
            Value::Int(v) => Native::Int(*v),
            Value::Float(v) => Native::Float(*v),
            Value::Str(v) => Native::Str(v.clone()),
            Value::Bytes(v) => Native::Bytes(v.to_vec()),
            Value::List(items) => Native::List(items.iter().map(Native::from).collect()),
            Value::Tuple(items) => Native::Tuple(items.iter().map(Native::from).collect()),
            Value::Map(map) => Native::Map(
                map.iter()
                    .map(|(key, value)| (key.clone(), Native::from(value)))
                    .collect(),
            ),
            Value::Array(array) => Native::Array {
                dtype: Box::new(Native::from(&array.dtype().to_spec())),
                shape: array.shape().iter().map(|d| *d as u64).collect(),
                data: array.data().to_vec(),
            },
        }
    }
}

impl TryFrom<Native> for Value {
    type Error = CodecError;

    fn try_from(native: Native) -> Result<Self, Self::Error> {
        Ok(match native {
            Native::Null => Value::Null,
            Native::Bool(v) => Value::Bool(v),
            Native::Int(v) => Value::Int(v),
            Native::Float(v) => Value::Float(v),
            Native::Str(v) => Value::Str(v),
            Native::Bytes(v) => Value::Bytes(Bytes::from(v)),
            Native::List(items) => Value::List(convert_all(items)?),
            Native::Tuple(items) => Value::Tuple(convert_all(items)?),
            Native::Map(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| Value::try_from(value).map(|v| (key, v)))
                    .collect::<Result<_, _>>()?,
            ),
            Native::Array { dtype, shape, data } => {
                let dtype = DType::from_spec(&Value::try_from(*dtype)?)
                    .map_err(|err| CodecError::decode(NAME, err))?;
                let shape = shape
                    .into_iter()
                    .map(|d| usize::try_from(d).map_err(|err| CodecError::decode(NAME, err)))
                    .collect::<Result<Vec<_>, _>>()?;
                let array = NdArray::new(dtype, shape, Bytes::from(data))
                    .map_err(|err| CodecError::decode(NAME, err))?;
                Value::Array(array)
            }
        })
    }
}

fn convert_all(items: Vec<Native>) -> Result<Vec<Value>, CodecError> {
    items.into_iter().map(Value::try_from).collect()
}

impl Protocol for NativeProtocol {
    fn name(&self) -> &str {
        NAME
    }

    fn serialize(&self, value: &Value) -> Result<Bytes, CodecError> {
        postcard::to_allocvec(&Native::from(value))
            .map(Bytes::from)
            .map_err(|err| CodecError::encode(NAME, err))
    }

    fn deserialize(&self, data: &[u8]) -> Result<Value, CodecError> {
        let mut deserializer = postcard::Deserializer::from_bytes(data);
        let native = NativeSeed { depth: 0 }
            .deserialize(&mut deserializer)
            .map_err(|err| CodecError::decode(NAME, err))?;
        Value::try_from(native)
    }

    fn deserialize_stream(&self, _source: ByteSource) -> Result<DecodedStream, CodecError> {
        Err(CodecError::StreamingNotSupported(NAME.to_owned()))
    }

    fn record_separator(&self) -> Result<&'static [u8], CodecError> {
        Err(CodecError::StreamingNotSupported(NAME.to_owned()))
    }

    fn mime_type(&self) -> &str {
        "application/x-postcard"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuples_bytes_and_arrays_survive() {
        let array = NdArray::from_slice(vec![2], &[1.5f32, -2.0]).expect("array");
        let value = Value::from_iter([
            ("t", Value::Tuple(vec![Value::Int(1), Value::from("a")])),
            ("b", Value::Bytes(Bytes::from_static(b"\xff\x00"))),
            ("arr", Value::Array(array)),
        ]);
        let wire = NativeProtocol.serialize(&value).expect("encode");
        assert_eq!(NativeProtocol.deserialize(&wire).expect("decode"), value);
    }

    fn nested(depth: usize) -> Value {
        (0..depth).fold(Value::Int(0), |inner, _| Value::List(vec![inner]))
    }

    #[test]
    fn nesting_within_the_limit_round_trips() {
        let value = nested(MAX_DEPTH);
        let wire = NativeProtocol.serialize(&value).expect("encode");
        assert_eq!(NativeProtocol.deserialize(&wire).expect("decode"), value);
    }

    #[test]
    fn excessive_nesting_is_a_decode_error() {
        let wire = NativeProtocol.serialize(&nested(MAX_DEPTH + 1)).expect("encode");
        assert!(matches!(NativeProtocol.deserialize(&wire), Err(CodecError::Decode { .. })));

        // 单元素列表的标签与长度反复出现，末尾为 Null。
        let mut hostile = [6u8, 1].repeat(200_000);
        hostile.push(0);
        assert!(matches!(NativeProtocol.deserialize(&hostile), Err(CodecError::Decode { .. })));
    }

    #[test]
    fn overflowing_array_shapes_are_decode_errors() {
        let wire = postcard::to_allocvec(&Native::Array {
            dtype: Box::new(Native::Str("float64".to_owned())),
            shape: vec![1 << 32, 1 << 32],
            data: Vec::new(),
        })
        .expect("encode");
        assert!(matches!(NativeProtocol.deserialize(&wire), Err(CodecError::Decode { .. })));
    }

    #[test]
    fn streaming_is_declined() {
        assert!(!NativeProtocol.supports_streaming());
        let source: ByteSource = Box::new(std::io::empty());
        assert!(matches!(
            NativeProtocol.deserialize_stream(source),
            Err(CodecError::StreamingNotSupported(_))
        ));
    }
}
