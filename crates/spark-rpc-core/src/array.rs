//! 数值数组值。
//!
//! # 教案式说明
//! - **意图（Why）**：数组分帧协议需要把数组的原始字节原样搬运到线上，避免逐元素编码；
//!   因此数组在值模型中以“元素类型 + 形状 + 连续字节”的形式存在，而不是嵌套列表；
//! - **契约（What）**：
//!   - 字节长度恒等于元素个数 × 元素字节宽度，构造时校验，此后不可变；
//!   - 元素类型既支持标量，也支持由有序 (字段名, 字段类型[, 子形状]) 组成的复合类型；
//!   - [`DType::to_spec`] / [`DType::from_spec`] 定义了元素类型在线上的文本描述，两者互逆；
//! - **风险提示（Trade-offs）**：只做存储与转换，不提供任何数值运算；`=`（本机字节序）按小端解释。

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::Value;

/// 数组构造与元素类型解析错误。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ArrayError {
    #[error("array buffer holds {actual} bytes but shape {shape:?} of {dtype} needs {expected}")]
    LengthMismatch {
        dtype: String,
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("invalid dtype spec: {0}")]
    InvalidDType(String),

    #[error("array of {actual} cannot be read as {requested}")]
    ElementMismatch { actual: String, requested: String },

    #[error("array size overflows: {0}")]
    Overflow(String),
}

/// 多字节元素的字节序。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ByteOrder {
    Little,
    Big,
    /// 单字节元素或字节串，字节序无意义（`|`）。
    NotApplicable,
}

impl ByteOrder {
    fn symbol(self) -> char {
        match self {
            ByteOrder::Little => '<',
            ByteOrder::Big => '>',
            ByteOrder::NotApplicable => '|',
        }
    }
}

/// 标量元素的种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Bool,
    Int,
    UInt,
    Float,
    Complex,
    /// 定长字节串（`S`）。
    Bytes,
    /// 定长 UCS-4 字符串（`U`），每个字符 4 字节。
    Unicode,
}

impl ScalarKind {
    fn code(self) -> char {
        match self {
            ScalarKind::Bool => 'b',
            ScalarKind::Int => 'i',
            ScalarKind::UInt => 'u',
            ScalarKind::Float => 'f',
            ScalarKind::Complex => 'c',
            ScalarKind::Bytes => 'S',
            ScalarKind::Unicode => 'U',
        }
    }

    fn from_code(code: char) -> Option<Self> {
        Some(match code {
            'b' | '?' => ScalarKind::Bool,
            'i' => ScalarKind::Int,
            'u' => ScalarKind::UInt,
            'f' => ScalarKind::Float,
            'c' => ScalarKind::Complex,
            'S' | 'a' => ScalarKind::Bytes,
            'U' => ScalarKind::Unicode,
            _ => return None,
        })
    }
}

/// 标量元素类型，`size` 为单个元素的字节宽度。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScalarType {
    pub kind: ScalarKind,
    pub size: usize,
    pub order: ByteOrder,
}

impl ScalarType {
    /// 构造并校验种类与宽度的组合。
    pub fn new(kind: ScalarKind, size: usize, order: ByteOrder) -> Result<Self, ArrayError> {
        let valid = match kind {
            ScalarKind::Bool => size == 1,
            ScalarKind::Int | ScalarKind::UInt => matches!(size, 1 | 2 | 4 | 8),
            ScalarKind::Float => matches!(size, 2 | 4 | 8),
            ScalarKind::Complex => matches!(size, 8 | 16),
            ScalarKind::Bytes => size > 0,
            ScalarKind::Unicode => size > 0 && size % 4 == 0,
        };
        if !valid {
            return Err(ArrayError::InvalidDType(format!(
                "{}{} is not a supported element type",
                kind.code(),
                size
            )));
        }
        let order = if kind == ScalarKind::Bytes || (size <= 1 && kind != ScalarKind::Unicode) {
            ByteOrder::NotApplicable
        } else if order == ByteOrder::NotApplicable {
            ByteOrder::Little
        } else {
            order
        };
        Ok(Self { kind, size, order })
    }

    pub const fn little(kind: ScalarKind, size: usize) -> Self {
        Self {
            kind,
            size,
            order: if size <= 1 || matches!(kind, ScalarKind::Bytes) {
                ByteOrder::NotApplicable
            } else {
                ByteOrder::Little
            },
        }
    }

    /// 数组协议字符串，例如 `<f8`、`>i4`、`|S5`、`<U3`。
    pub fn typestr(&self) -> String {
        let count = match self.kind {
            ScalarKind::Unicode => self.size / 4,
            _ => self.size,
        };
        format!("{}{}{}", self.order.symbol(), self.kind.code(), count)
    }

    /// 小端数值类型的规范名称，例如 `float64`；其余返回 `None`。
    pub fn canonical_name(&self) -> Option<&'static str> {
        if self.order == ByteOrder::Big {
            return None;
        }
        Some(match (self.kind, self.size) {
            (ScalarKind::Bool, 1) => "bool",
            (ScalarKind::Int, 1) => "int8",
            (ScalarKind::Int, 2) => "int16",
            (ScalarKind::Int, 4) => "int32",
            (ScalarKind::Int, 8) => "int64",
            (ScalarKind::UInt, 1) => "uint8",
            (ScalarKind::UInt, 2) => "uint16",
            (ScalarKind::UInt, 4) => "uint32",
            (ScalarKind::UInt, 8) => "uint64",
            (ScalarKind::Float, 2) => "float16",
            (ScalarKind::Float, 4) => "float32",
            (ScalarKind::Float, 8) => "float64",
            (ScalarKind::Complex, 8) => "complex64",
            (ScalarKind::Complex, 16) => "complex128",
            _ => return None,
        })
    }

    fn from_name(name: &str) -> Option<Self> {
        let (kind, size) = match name {
            "bool" => (ScalarKind::Bool, 1),
            "int8" => (ScalarKind::Int, 1),
            "int16" => (ScalarKind::Int, 2),
            "int32" => (ScalarKind::Int, 4),
            "int64" | "int" => (ScalarKind::Int, 8),
            "uint8" => (ScalarKind::UInt, 1),
            "uint16" => (ScalarKind::UInt, 2),
            "uint32" => (ScalarKind::UInt, 4),
            "uint64" => (ScalarKind::UInt, 8),
            "float16" => (ScalarKind::Float, 2),
            "float32" => (ScalarKind::Float, 4),
            "float64" | "float" => (ScalarKind::Float, 8),
            "complex64" => (ScalarKind::Complex, 8),
            "complex128" | "complex" => (ScalarKind::Complex, 16),
            _ => return None,
        };
        Some(Self::little(kind, size))
    }

    fn from_typestr(text: &str) -> Result<Self, ArrayError> {
        let invalid = || ArrayError::InvalidDType(text.to_owned());
        let mut chars = text.chars().peekable();
        let order = match chars.peek() {
            Some('<') | Some('=') => {
                chars.next();
                ByteOrder::Little
            }
            Some('>') | Some('!') => {
                chars.next();
                ByteOrder::Big
            }
            Some('|') => {
                chars.next();
                ByteOrder::NotApplicable
            }
            _ => ByteOrder::Little,
        };
        let kind = chars
            .next()
            .and_then(ScalarKind::from_code)
            .ok_or_else(invalid)?;
        let digits: String = chars.collect();
        let count: usize = if digits.is_empty() && kind == ScalarKind::Bool {
            1
        } else {
            digits.parse().map_err(|_| invalid())?
        };
        let size = if kind == ScalarKind::Unicode {
            count.checked_mul(4).ok_or_else(invalid)?
        } else {
            count
        };
        ScalarType::new(kind, size, order)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.canonical_name() {
            Some(name) => f.write_str(name),
            None => f.write_str(&self.typestr()),
        }
    }
}

/// 复合元素类型中的一个字段。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub dtype: DType,
    /// 字段自身的子数组形状，空表示标量字段。
    pub shape: Vec<usize>,
}

impl Field {
    pub fn new(name: impl Into<String>, dtype: impl Into<DType>) -> Self {
        Self {
            name: name.into(),
            dtype: dtype.into(),
            shape: Vec::new(),
        }
    }

    pub fn with_shape(mut self, shape: Vec<usize>) -> Self {
        self.shape = shape;
        self
    }

    fn itemsize(&self) -> Result<usize, ArrayError> {
        let inner = self.dtype.itemsize()?;
        if inner == 0 && !self.shape.is_empty() {
            return Err(ArrayError::InvalidDType(format!(
                "field {} repeats zero-width elements",
                self.name
            )));
        }
        sized(&self.shape, inner).ok_or_else(|| {
            ArrayError::Overflow(format!("field {} of shape {:?}", self.name, self.shape))
        })
    }
}

/// 数组元素类型。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    Scalar(ScalarType),
    /// 紧凑排列（无对齐填充）的复合类型。
    Struct(Vec<Field>),
}

impl From<ScalarType> for DType {
    fn from(value: ScalarType) -> Self {
        DType::Scalar(value)
    }
}

impl DType {
    pub const fn float64() -> Self {
        DType::Scalar(ScalarType::little(ScalarKind::Float, 8))
    }

    pub const fn float32() -> Self {
        DType::Scalar(ScalarType::little(ScalarKind::Float, 4))
    }

    pub const fn int64() -> Self {
        DType::Scalar(ScalarType::little(ScalarKind::Int, 8))
    }

    pub const fn int32() -> Self {
        DType::Scalar(ScalarType::little(ScalarKind::Int, 4))
    }

    pub const fn uint8() -> Self {
        DType::Scalar(ScalarType::little(ScalarKind::UInt, 1))
    }

    pub const fn bool() -> Self {
        DType::Scalar(ScalarType::little(ScalarKind::Bool, 1))
    }

    /// 单个元素的字节宽度；复合类型的宽度超出 `usize` 时返回 [`ArrayError::Overflow`]。
    pub fn itemsize(&self) -> Result<usize, ArrayError> {
        match self {
            DType::Scalar(scalar) => Ok(scalar.size),
            DType::Struct(fields) => fields.iter().try_fold(0usize, |total, field| {
                total
                    .checked_add(field.itemsize()?)
                    .ok_or_else(|| ArrayError::Overflow(format!("fields of {self}")))
            }),
        }
    }

    /// 线上描述：标量为字符串，复合类型为 `[[name, spec], [name, spec, [shape..]], ..]`。
    pub fn to_spec(&self) -> Value {
        match self {
            DType::Scalar(scalar) => Value::Str(scalar.to_string()),
            DType::Struct(fields) => Value::List(
                fields
                    .iter()
                    .map(|field| {
                        let spec = match &field.dtype {
                            DType::Scalar(scalar) => Value::Str(scalar.typestr()),
                            nested => nested.to_spec(),
                        };
                        let mut entry = vec![Value::Str(field.name.clone()), spec];
                        if !field.shape.is_empty() {
                            entry.push(Value::List(
                                field.shape.iter().map(|d| Value::from(*d)).collect(),
                            ));
                        }
                        Value::List(entry)
                    })
                    .collect(),
            ),
        }
    }

    /// 解析 [`DType::to_spec`] 的输出，同时接受数组协议字符串（`<f4`、`|S3` 等）。
    pub fn from_spec(spec: &Value) -> Result<Self, ArrayError> {
        match spec {
            Value::Str(text) => DType::parse(text),
            Value::List(entries) | Value::Tuple(entries) => {
                if entries.is_empty() {
                    return Err(ArrayError::InvalidDType("empty field list".into()));
                }
                entries
                    .iter()
                    .map(parse_field)
                    .collect::<Result<Vec<_>, _>>()
                    .map(DType::Struct)
            }
            other => Err(ArrayError::InvalidDType(other.to_string())),
        }
    }

    /// 解析标量类型名称或数组协议字符串。
    pub fn parse(text: &str) -> Result<Self, ArrayError> {
        let text = text.trim();
        ScalarType::from_name(text)
            .map(Ok)
            .unwrap_or_else(|| ScalarType::from_typestr(text))
            .map(DType::Scalar)
    }
}

fn parse_field(entry: &Value) -> Result<Field, ArrayError> {
    let parts = entry
        .as_slice()
        .ok_or_else(|| ArrayError::InvalidDType(format!("field entry {entry}")))?;
    let (name, spec, shape) = match parts {
        [name, spec] => (name, spec, None),
        [name, spec, shape] => (name, spec, Some(shape)),
        _ => return Err(ArrayError::InvalidDType(format!("field entry {entry}"))),
    };
    let name = name
        .as_str()
        .ok_or_else(|| ArrayError::InvalidDType(format!("field name {name}")))?;
    let shape = match shape {
        None => Vec::new(),
        Some(Value::Int(dim)) => vec![to_dim(*dim)?],
        Some(other) => other
            .as_slice()
            .ok_or_else(|| ArrayError::InvalidDType(format!("field shape {other}")))?
            .iter()
            .map(|dim| {
                dim.as_i64()
                    .ok_or_else(|| ArrayError::InvalidDType(dim.to_string()))
                    .and_then(to_dim)
            })
            .collect::<Result<_, _>>()?,
    };
    Ok(Field {
        name: name.to_owned(),
        dtype: DType::from_spec(spec)?,
        shape,
    })
}

fn to_dim(dim: i64) -> Result<usize, ArrayError> {
    usize::try_from(dim).map_err(|_| ArrayError::InvalidDType(format!("negative dimension {dim}")))
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::Scalar(scalar) => write!(f, "{scalar}"),
            DType::Struct(_) => write!(f, "{}", self.to_spec()),
        }
    }
}

/// 可直接与数组字节互转的 Rust 标量。
pub trait Element: Copy {
    fn scalar_type() -> ScalarType;
    fn write_le(self, out: &mut Vec<u8>);
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty => $kind:expr),* $(,)?) => {
        $(
            impl Element for $ty {
                fn scalar_type() -> ScalarType {
                    ScalarType::little($kind, std::mem::size_of::<$ty>())
                }

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_element!(
    i8 => ScalarKind::Int,
    i16 => ScalarKind::Int,
    i32 => ScalarKind::Int,
    i64 => ScalarKind::Int,
    u8 => ScalarKind::UInt,
    u16 => ScalarKind::UInt,
    u32 => ScalarKind::UInt,
    u64 => ScalarKind::UInt,
    f32 => ScalarKind::Float,
    f64 => ScalarKind::Float,
);

impl Element for bool {
    fn scalar_type() -> ScalarType {
        ScalarType::little(ScalarKind::Bool, 1)
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(u8::from(self));
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// 带形状与元素类型的连续字节数组。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NdArray {
    dtype: DType,
    shape: Vec<usize>,
    data: Bytes,
    itemsize: usize,
    len: usize,
}

impl NdArray {
    /// 校验尺寸与字节长度后构造。
    ///
    /// # 契约说明（What）
    /// - 形状与元素宽度的任何乘积（含含零维度时各后缀的乘积）溢出 `usize` 都返回
    ///   [`ArrayError::Overflow`]，因此构造成功后按形状切片不会越界或回绕；
    /// - 字节长度必须等于元素个数乘以元素宽度。
    pub fn new(dtype: DType, shape: Vec<usize>, data: Bytes) -> Result<Self, ArrayError> {
        let itemsize = dtype.itemsize()?;
        let expected = sized(&shape, itemsize)
            .ok_or_else(|| ArrayError::Overflow(format!("shape {shape:?} of {dtype}")))?;
        if expected != data.len() {
            return Err(ArrayError::LengthMismatch {
                dtype: dtype.to_string(),
                shape,
                expected,
                actual: data.len(),
            });
        }
        let len = element_count(&shape).unwrap_or_default();
        if itemsize == 0 && len > 0 {
            return Err(ArrayError::InvalidDType(format!("{dtype} has zero-width elements")));
        }
        Ok(Self {
            dtype,
            shape,
            data,
            itemsize,
            len,
        })
    }

    /// 由 Rust 标量切片构造。
    pub fn from_slice<T: Element>(shape: Vec<usize>, values: &[T]) -> Result<Self, ArrayError> {
        let mut out = Vec::with_capacity(values.len() * T::scalar_type().size);
        for value in values {
            value.write_le(&mut out);
        }
        Self::new(DType::Scalar(T::scalar_type()), shape, Bytes::from(out))
    }

    /// 一维数组。
    pub fn from_vec<T: Element>(values: Vec<T>) -> Result<Self, ArrayError> {
        Self::from_slice(vec![values.len()], &values)
    }

    pub fn dtype(&self) -> &DType {
        &self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// 元素个数。
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_parts(self) -> (DType, Vec<usize>, Bytes) {
        (self.dtype, self.shape, self.data)
    }

    /// 按 Rust 标量读取全部元素，元素类型必须完全一致。
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, ArrayError> {
        let wanted = T::scalar_type();
        if self.dtype != DType::Scalar(wanted) {
            return Err(ArrayError::ElementMismatch {
                actual: self.dtype.to_string(),
                requested: wanted.to_string(),
            });
        }
        Ok(self.data.chunks_exact(wanted.size).map(T::read_le).collect())
    }

    /// 转换为纯值：按形状嵌套的列表，复合元素为元组，复数为 `[re, im]`。
    pub fn to_value(&self) -> Value {
        nest(&self.shape, &self.data, self.itemsize, &|chunk: &[u8]| {
            element_value(&self.dtype, chunk)
        })
    }
}

fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
}

/// 形状的总字节数；零维度按 1 计入上界检查，保证任一后缀的跨度也不溢出。
fn sized(shape: &[usize], itemsize: usize) -> Option<usize> {
    shape
        .iter()
        .try_fold(itemsize, |acc, dim| acc.checked_mul((*dim).max(1)))?;
    element_count(shape)?.checked_mul(itemsize)
}

// 以下辅助函数只处理已由 `NdArray::new` 校验过尺寸的数据。
fn nest(shape: &[usize], data: &[u8], itemsize: usize, leaf: &dyn Fn(&[u8]) -> Value) -> Value {
    match shape.split_first() {
        None => leaf(data),
        Some((&dim, rest)) => {
            let stride = sized(rest, itemsize).unwrap_or_default();
            Value::List(
                (0..dim)
                    .map(|idx| {
                        let start = idx * stride;
                        nest(rest, &data[start..start + stride], itemsize, leaf)
                    })
                    .collect(),
            )
        }
    }
}

fn element_value(dtype: &DType, chunk: &[u8]) -> Value {
    match dtype {
        DType::Scalar(scalar) => scalar_value(scalar, chunk),
        DType::Struct(fields) => {
            let mut offset = 0;
            let mut items = Vec::with_capacity(fields.len());
            for field in fields {
                let width = field.itemsize().unwrap_or_default();
                let slice = &chunk[offset..offset + width];
                let inner = field.dtype.itemsize().unwrap_or_default();
                items.push(nest(&field.shape, slice, inner, &|c: &[u8]| {
                    element_value(&field.dtype, c)
                }));
                offset += width;
            }
            Value::Tuple(items)
        }
    }
}

fn read_unsigned(chunk: &[u8], order: ByteOrder) -> u64 {
    let fold = |acc: u64, byte: &u8| (acc << 8) | u64::from(*byte);
    match order {
        ByteOrder::Big | ByteOrder::NotApplicable => chunk.iter().fold(0, fold),
        ByteOrder::Little => chunk.iter().rev().fold(0, fold),
    }
}

fn read_float(chunk: &[u8], order: ByteOrder) -> f64 {
    let bits = read_unsigned(chunk, order);
    match chunk.len() {
        2 => half_to_f64(bits as u16),
        4 => f64::from(f32::from_bits(bits as u32)),
        _ => f64::from_bits(bits),
    }
}

fn half_to_f64(bits: u16) -> f64 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = i32::from((bits >> 10) & 0x1f);
    let mantissa = f64::from(bits & 0x03ff);
    match exponent {
        0 => sign * mantissa * 2f64.powi(-24),
        0x1f if mantissa == 0.0 => sign * f64::INFINITY,
        0x1f => f64::NAN,
        _ => sign * (1.0 + mantissa / 1024.0) * 2f64.powi(exponent - 15),
    }
}

fn scalar_value(scalar: &ScalarType, chunk: &[u8]) -> Value {
    match scalar.kind {
        ScalarKind::Bool => Value::Bool(chunk.iter().any(|b| *b != 0)),
        ScalarKind::Int => {
            let raw = read_unsigned(chunk, scalar.order);
            let shift = 64 - 8 * chunk.len() as u32;
            Value::Int(((raw << shift) as i64) >> shift)
        }
        ScalarKind::UInt => Value::from(read_unsigned(chunk, scalar.order) as usize),
        ScalarKind::Float => Value::Float(read_float(chunk, scalar.order)),
        ScalarKind::Complex => {
            let half = chunk.len() / 2;
            Value::List(vec![
                Value::Float(read_float(&chunk[..half], scalar.order)),
                Value::Float(read_float(&chunk[half..], scalar.order)),
            ])
        }
        ScalarKind::Bytes => {
            let end = chunk.iter().rposition(|b| *b != 0).map_or(0, |idx| idx + 1);
            Value::Bytes(Bytes::copy_from_slice(&chunk[..end]))
        }
        ScalarKind::Unicode => {
            let text: String = chunk
                .chunks_exact(4)
                .map(|unit| read_unsigned(unit, scalar.order) as u32)
                .filter(|code| *code != 0)
                .map(|code| char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect();
            Value::Str(text)
        }
    }
}
