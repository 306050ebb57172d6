//! 抽象请求契约与鉴权边界。
//!
//! # 教案式说明
//! - **意图（Why）**：宿主 Web 框架的适配层负责把平台请求转换为 [`RpcRequest`]，核心只面向这一抽象，
//!   不感知具体的 HTTP 实现；
//! - **契约（What）**：
//!   - 请求头按名称大小写不敏感匹配；
//!   - 请求体既可以是完整字节，也可以是惰性读取器（流式参数依赖后者）；
//!   - 业务函数通过 [`RequestHandle`] 看到的是请求的只读元数据与鉴权结果，请求体已被执行引擎接管；
//! - **风险提示（Trade-offs）**：请求体读取器要求 `Send`，以便整个调用单元可以移交给工作线程池。

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::RpcError;
use crate::value::Map;

/// HTTP 方法。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Other(String),
}

impl Method {
    pub fn parse(text: &str) -> Self {
        match text.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "PATCH" => Method::Patch,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            other => Method::Other(other.to_owned()),
        }
    }

    /// 该方法的请求体是否承载参数。
    pub fn has_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Other(other) => other,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 大小写不敏感、保留插入顺序的头部集合。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 设置头部，替换同名的已有条目。
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// 请求体。
#[derive(Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Bytes(Bytes),
    /// 惰性读取的请求体，例如分块上传的流式参数。
    Reader(Box<dyn Read + Send>),
}

impl RequestBody {
    pub fn reader<R: Read + Send + 'static>(reader: R) -> Self {
        RequestBody::Reader(Box::new(reader))
    }

    /// 转换为读取器，供流式解码使用。
    pub fn into_reader(self) -> Box<dyn Read + Send> {
        match self {
            RequestBody::Empty => Box::new(io::empty()),
            RequestBody::Bytes(bytes) => Box::new(io::Cursor::new(bytes)),
            RequestBody::Reader(reader) => reader,
        }
    }

    /// 读出全部字节。
    pub fn read_all(self) -> io::Result<Bytes> {
        match self {
            RequestBody::Empty => Ok(Bytes::new()),
            RequestBody::Bytes(bytes) => Ok(bytes),
            RequestBody::Reader(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("RequestBody::Empty"),
            RequestBody::Bytes(bytes) => write!(f, "RequestBody::Bytes({} bytes)", bytes.len()),
            RequestBody::Reader(_) => f.write_str("RequestBody::Reader"),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(value: Bytes) -> Self {
        RequestBody::Bytes(value)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(value: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(value))
    }
}

/// 宿主适配层交给执行引擎的抽象请求。
#[derive(Debug)]
pub struct RpcRequest {
    pub method: Method,
    /// 原始请求目标（路径 + 可选查询串）。
    pub target: String,
    pub headers: Headers,
    pub body: RequestBody,
}

impl RpcRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: Headers::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::Get, target)
    }

    pub fn post(target: impl Into<String>, body: impl Into<RequestBody>) -> Self {
        Self::new(Method::Post, target).with_body(body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    pub fn path(&self) -> &str {
        split_target(&self.target).0
    }

    pub fn query(&self) -> &str {
        split_target(&self.target).1
    }

    /// 拆出请求体，剩余部分成为只读元数据。
    pub fn into_parts(self, id: impl Into<String>) -> (RequestParts, RequestBody) {
        let parts = RequestParts {
            method: self.method,
            target: self.target,
            headers: self.headers,
            id: id.into(),
            auth: None,
        };
        (parts, self.body)
    }
}

fn split_target(target: &str) -> (&str, &str) {
    target.split_once('?').unwrap_or((target, ""))
}

/// 请求的只读元数据，业务函数通过 [`RequestHandle`] 访问。
#[derive(Clone, Debug)]
pub struct RequestParts {
    pub method: Method,
    pub target: String,
    pub headers: Headers,
    /// 本次请求的标识（上游关联值 + 本地短标识）。
    pub id: String,
    pub auth: Option<AuthInfo>,
}

impl RequestParts {
    pub fn path(&self) -> &str {
        split_target(&self.target).0
    }

    pub fn query(&self) -> &str {
        split_target(&self.target).1
    }
}

/// 实时请求对象。
pub type RequestHandle = Arc<RequestParts>;

/// 鉴权结果。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuthInfo {
    /// 小写的鉴权方案名，例如 `basic`、`bearer`。
    pub scheme: String,
    pub is_authenticated: bool,
    /// 用户名或令牌。
    pub principal: Option<String>,
    /// 用户存储或令牌存储中附带的额外信息。
    pub attributes: Map,
}

impl AuthInfo {
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            ..Self::default()
        }
    }
}

/// 鉴权边界：返回鉴权信息，或在请求未携带凭证时返回 `None`。
///
/// # 契约说明（What）
/// - 凭证方案与实现不匹配、凭证格式错误时返回 [`RpcError::Authentication`]；
/// - 凭证格式正确但未通过校验时返回 `is_authenticated == false` 的 [`AuthInfo`]，由业务函数决定如何处理。
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(&self, request: &RequestParts) -> Result<Option<AuthInfo>, RpcError>;
}
