//! 远程函数定义：构建器、处理器与调用参数。
//!
//! # 教案式说明
//! - **意图（Why）**：描述符在注册时通过显式构建器给出（参数名、声明类型、默认值、返回类型、文档），
//!   不依赖任何运行期签名反射；
//! - **契约（What）**：
//!   - [`Handler::Unary`] 返回单个值，[`Handler::Stream`] 返回一个 [`ValueProducer`] 游标；
//!   - 游标的 [`ValueProducer::close`] 必须幂等，执行引擎在提前终止（客户端断开、取消）时调用它释放资源；
//!   - 处理器接收 [`Invocation`]：已绑定的关键字参数、可选的流式参数与可选的实时请求对象；
//! - **风险提示（Trade-offs）**：处理器为 `Fn + Send + Sync`，可被多个工作线程同时调用，可变状态需由业务自行同步。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::array::NdArray;
use crate::error::CallError;
use crate::request::RequestHandle;
use crate::schema::ParamSpec;
use crate::types::TypeSpec;
use crate::value::{Map, Value};

/// 惰性产出值的游标。
pub trait ValueProducer: Send {
    /// 取下一个值；`None` 表示正常结束。
    fn next_value(&mut self) -> Option<Result<Value, CallError>>;

    /// 释放底层资源。默认实现什么也不做。
    fn close(&mut self) {}
}

struct IterProducer<I> {
    inner: Option<I>,
}

impl<I> ValueProducer for IterProducer<I>
where
    I: Iterator<Item = Result<Value, CallError>> + Send,
{
    fn next_value(&mut self) -> Option<Result<Value, CallError>> {
        self.inner.as_mut()?.next()
    }

    fn close(&mut self) {
        self.inner = None;
    }
}

/// 以迭代器构造游标，`close` 时丢弃迭代器。
pub fn producer_from_iter<I>(iter: I) -> Box<dyn ValueProducer>
where
    I: IntoIterator<Item = Result<Value, CallError>>,
    I::IntoIter: Send + 'static,
{
    Box::new(IterProducer {
        inner: Some(iter.into_iter()),
    })
}

/// 从请求体惰性解码的值序列。
pub type InboundStream = Box<dyn Iterator<Item = Result<Value, CallError>> + Send>;

/// 从 [`Value`] 提取具体类型。
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, CallError>;
}

fn type_error(expected: &str, value: &Value) -> CallError {
    CallError::new(
        "TypeError",
        format!("expected {expected}, got {}", value.type_name()),
    )
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, CallError> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, CallError> {
        value.as_i64().ok_or_else(|| type_error("int", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, CallError> {
        value.as_f64().ok_or_else(|| type_error("float", value))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, CallError> {
        value.as_bool().ok_or_else(|| type_error("bool", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, CallError> {
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| type_error("str", value))
    }
}

impl FromValue for Bytes {
    fn from_value(value: &Value) -> Result<Self, CallError> {
        match value {
            Value::Bytes(bytes) => Ok(bytes.clone()),
            other => Err(type_error("bytes", other)),
        }
    }
}

impl FromValue for Map {
    fn from_value(value: &Value) -> Result<Self, CallError> {
        value.as_map().cloned().ok_or_else(|| type_error("dict", value))
    }
}

impl FromValue for NdArray {
    fn from_value(value: &Value) -> Result<Self, CallError> {
        value
            .as_array()
            .cloned()
            .ok_or_else(|| type_error("ndarray", value))
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, CallError> {
        value
            .as_slice()
            .ok_or_else(|| type_error("list", value))?
            .iter()
            .map(T::from_value)
            .collect()
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, CallError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// 已绑定的关键字参数与可选的流式参数。
#[derive(Default)]
pub struct Arguments {
    values: BTreeMap<String, Value>,
    stream: Option<(String, InboundStream)>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name) || self.stream_name() == Some(name)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn into_values(self) -> BTreeMap<String, Value> {
        self.values
    }

    pub fn set_stream(&mut self, name: impl Into<String>, stream: InboundStream) {
        self.stream = Some((name.into(), stream));
    }

    pub fn stream_name(&self) -> Option<&str> {
        self.stream.as_ref().map(|(name, _)| name.as_str())
    }

    /// 取走流式参数，只能取一次。
    pub fn take_stream(&mut self) -> Option<InboundStream> {
        self.stream.take().map(|(_, stream)| stream)
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arguments")
            .field("values", &self.values)
            .field("stream", &self.stream_name())
            .finish()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut args = Arguments::new();
        for (name, value) in iter {
            args.insert(name, value);
        }
        args
    }
}

/// 一次调用的全部输入。
#[derive(Debug, Default)]
pub struct Invocation {
    pub args: Arguments,
    pub request: Option<RequestHandle>,
}

impl Invocation {
    pub fn new(args: Arguments) -> Self {
        Self {
            args,
            request: None,
        }
    }

    /// 按名称读取并转换参数。
    pub fn arg<T: FromValue>(&self, name: &str) -> Result<T, CallError> {
        let value = self
            .args
            .get(name)
            .ok_or_else(|| CallError::new("KeyError", format!("missing argument `{name}`")))?;
        T::from_value(value).map_err(|err| {
            CallError::new(err.kind(), format!("argument `{name}`: {}", err.message()))
        })
    }

    /// 取走流式参数。
    pub fn take_stream(&mut self) -> Result<InboundStream, CallError> {
        self.args
            .take_stream()
            .ok_or_else(|| CallError::new("KeyError", "no streamed argument was bound"))
    }
}

type UnaryFn = dyn Fn(Invocation) -> Result<Value, CallError> + Send + Sync;
type StreamFn = dyn Fn(Invocation) -> Result<Box<dyn ValueProducer>, CallError> + Send + Sync;

/// 可调用体。
#[derive(Clone)]
pub enum Handler {
    Unary(Arc<UnaryFn>),
    Stream(Arc<StreamFn>),
}

impl Handler {
    pub fn gives_stream(&self) -> bool {
        matches!(self, Handler::Stream(_))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Unary(_) => f.write_str("Handler::Unary"),
            Handler::Stream(_) => f.write_str("Handler::Stream"),
        }
    }
}

/// 远程函数的声明与实现。
///
/// ```
/// use spark_rpc_core::{FunctionDef, Value};
///
/// let add = FunctionDef::unary("add", |call| {
///     Ok(Value::Int(call.arg::<i64>("a")? + call.arg::<i64>("b")?))
/// })
/// .param("a", "int")
/// .param("b", "int")
/// .returns("int")
/// .doc("Adds two integers.");
/// assert_eq!(add.name(), "add");
/// ```
#[derive(Clone, Debug)]
pub struct FunctionDef {
    name: String,
    params: Vec<ParamSpec>,
    returns: Option<TypeSpec>,
    doc: Option<String>,
    handler: Handler,
}

impl FunctionDef {
    pub fn unary<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Invocation) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        Self::with_handler(name, Handler::Unary(Arc::new(handler)))
    }

    pub fn stream<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Invocation) -> Result<Box<dyn ValueProducer>, CallError> + Send + Sync + 'static,
    {
        Self::with_handler(name, Handler::Stream(Arc::new(handler)))
    }

    pub fn with_handler(name: impl Into<String>, handler: Handler) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: None,
            doc: None,
            handler,
        }
    }

    /// 追加必填参数。
    pub fn param(mut self, name: impl Into<String>, type_spec: impl Into<TypeSpec>) -> Self {
        self.params.push(ParamSpec::required(name, type_spec.into()));
        self
    }

    /// 追加带默认值的可选参数。
    pub fn param_default(
        mut self,
        name: impl Into<String>,
        type_spec: impl Into<TypeSpec>,
        default: impl Into<Value>,
    ) -> Self {
        self.params
            .push(ParamSpec::optional(name, type_spec.into(), default.into()));
        self
    }

    /// 追加未声明类型的参数，注册时会被拒绝。
    pub fn untyped_param(mut self, name: impl Into<String>) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            type_spec: None,
            required: true,
            default: None,
        });
        self
    }

    /// 在首位声明接收实时请求对象的参数。
    pub fn request_param(mut self, name: impl Into<String>) -> Self {
        self.params
            .insert(0, ParamSpec::required(name, TypeSpec::Request));
        self
    }

    pub fn returns(mut self, type_spec: impl Into<TypeSpec>) -> Self {
        self.returns = Some(type_spec.into());
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn return_type(&self) -> Option<&TypeSpec> {
        self.returns.as_ref()
    }

    pub fn documentation(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}

/// 一组可注册的函数。
pub trait ApiCollection {
    fn functions(&self) -> Vec<FunctionDef>;
}

impl ApiCollection for Vec<FunctionDef> {
    fn functions(&self) -> Vec<FunctionDef> {
        self.clone()
    }
}

/// 以构建器方式聚合函数的集合。
#[derive(Clone, Debug, Default)]
pub struct ApiFragment {
    functions: Vec<FunctionDef>,
}

impl ApiFragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(mut self, def: FunctionDef) -> Self {
        self.functions.push(def);
        self
    }
}

impl ApiCollection for ApiFragment {
    fn functions(&self) -> Vec<FunctionDef> {
        self.functions.clone()
    }
}
