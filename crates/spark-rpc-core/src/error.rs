//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义注册期与请求期的错误语义，每个变体都对应一个稳定的数值错误码，
//!   客户端据此区分“函数不存在”“参数名错误”等情形而不必解析消息文本；
//! - 注册期错误（[`RegistryError`]）同步返回给启动代码，请求期错误（[`RpcError`]）由执行引擎
//!   转换为统一的错误信封。
//!
//! ## 设计要求（What）
//! - 所有错误派生 `thiserror::Error`，`Send + Sync + 'static`；
//! - `code()` 返回稳定错误码，`kind()` 返回稳定的类别名（出现在信封的 `error` 字段中）；
//! - 业务函数失败统一为 [`CallError`]，未显式给出错误码时落到通用服务端错误码。

use std::fmt;

use thiserror::Error;

/// 稳定错误码表。
pub mod codes {
    /// 未归类的服务端错误，包括业务函数失败的默认码。
    pub const SERVER_ERROR: i64 = 50000;
    pub const DUPLICATE_API_FUNCTION: i64 = 50001;
    pub const UNKNOWN_API_FUNCTION: i64 = 50002;
    pub const PROTOCOL_ALREADY_EXISTS: i64 = 50003;
    pub const UNKNOWN_PROTOCOL: i64 = 50004;
    pub const UNKNOWN_VERSION: i64 = 50005;
    pub const UNSUPPORTED_TYPE: i64 = 50006;
    pub const TYPE_NOT_SPECIFIED: i64 = 50007;
    pub const UNKNOWN_VERSION_OR_NAMESPACE: i64 = 50008;
    pub const STREAMING_NOT_SUPPORTED: i64 = 50009;
    pub const KEYWORD_ARGUMENT_ERROR: i64 = 50010;
    pub const AUTHENTICATION_ERROR: i64 = 50011;
    pub const NON_KEYWORD_ARGUMENTS_ERROR: i64 = 50012;
    pub const MALFORMED_PAYLOAD: i64 = 50013;
}

/// 注册期错误。
///
/// # 教案式说明
/// - **意图 (Why)**：注册发生在启动阶段，任何描述符问题都应阻止服务上线，而不是在首个请求时暴露；
/// - **契约 (What)**：注册失败时注册表保持调用前的状态，不会出现“部分合并”；
/// - **风险 (Trade-offs)**：以字符串携带上下文，换取可读性。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// 同一 (version, namespace, name) 已被占用。
    #[error(
        "\"{name}\" API function already exists in the version \"{version}\"{}",
        namespace_suffix(.namespace)
    )]
    DuplicateApiFunction {
        version: String,
        namespace: Option<String>,
        name: String,
    },

    /// 参数或返回值缺少类型声明。
    #[error("Please specify type for the argument \"{argument}\" of \"{function}\"")]
    TypeNotSpecified { function: String, argument: String },

    /// 声明的类型不在允许的词汇表内，或出现在不被允许的位置。
    #[error("\"{type_name}\" type is not supported ({function}: {position})")]
    UnsupportedType {
        function: String,
        position: String,
        type_name: String,
    },
}

fn namespace_suffix(namespace: &Option<String>) -> String {
    namespace
        .as_deref()
        .map(|ns| format!(" and namespace \"{ns}\""))
        .unwrap_or_default()
}

impl RegistryError {
    pub fn code(&self) -> i64 {
        match self {
            RegistryError::DuplicateApiFunction { .. } => codes::DUPLICATE_API_FUNCTION,
            RegistryError::TypeNotSpecified { .. } => codes::TYPE_NOT_SPECIFIED,
            RegistryError::UnsupportedType { .. } => codes::UNSUPPORTED_TYPE,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::DuplicateApiFunction { .. } => "DuplicateAPIFunction",
            RegistryError::TypeNotSpecified { .. } => "TypeNotSpecified",
            RegistryError::UnsupportedType { .. } => "UnsupportedType",
        }
    }
}

/// 业务函数（或其产出的流）报告的失败。
///
/// `kind` 为业务自定义的类别名（例如 `"ValueError"`），`code` 缺省时按
/// [`codes::SERVER_ERROR`] 处理。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallError {
    kind: String,
    message: String,
    code: Option<i64>,
}

impl CallError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            code: None,
        }
    }

    /// 以通用类别 `Exception` 构造。
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new("Exception", message)
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> i64 {
        self.code.unwrap_or(codes::SERVER_ERROR)
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CallError {}

/// 请求期错误。
///
/// # 教案式说明
/// - **意图 (Why)**：请求处理链上的每一步（协商、解析、绑定、调用、编码）都用同一个枚举表达失败，
///   执行引擎只需一处把它转换为错误信封；
/// - **契约 (What)**：
///   - `code()` 与错误码表一一对应，[`RpcError::Call`] 透传业务码；
///   - `message()` 为面向调用方的自然语言描述，必须包含足以定位问题的标识（函数名、协议名等）；
/// - **执行逻辑 (How)**：编解码错误经 `From` 转换为 [`RpcError::MalformedPayload`] 或
///   [`RpcError::StreamingNotSupported`]，使 `?` 可跨 crate 传播。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("Unknown API Function: \"{name}\"")]
    UnknownApiFunction { name: String },

    /// 参数名未知、缺少必填参数等绑定错误。
    #[error("{0}")]
    KeywordArgument(String),

    #[error("\"{0}\" protocol does not exist")]
    UnknownProtocol(String),

    #[error("\"{0}\" protocol already exists")]
    ProtocolAlreadyExists(String),

    #[error("\"{0}\" There are no methods associated with this version")]
    UnknownVersion(String),

    #[error("No methods associated with this version \"{version}\" or namespace \"{namespace}\".")]
    UnknownVersionOrNamespace { version: String, namespace: String },

    #[error("Streaming not supported for \"{0}\" protocol")]
    StreamingNotSupported(String),

    #[error("Invalid auth type: {0}")]
    Authentication(String),

    /// 请求体解码后不是映射。
    #[error("Found non keyword arguments: {0}")]
    NonKeywordArguments(String),

    /// 请求体或数组分帧尾部无法解码。
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl RpcError {
    pub fn code(&self) -> i64 {
        match self {
            RpcError::UnknownApiFunction { .. } => codes::UNKNOWN_API_FUNCTION,
            RpcError::KeywordArgument(_) => codes::KEYWORD_ARGUMENT_ERROR,
            RpcError::UnknownProtocol(_) => codes::UNKNOWN_PROTOCOL,
            RpcError::ProtocolAlreadyExists(_) => codes::PROTOCOL_ALREADY_EXISTS,
            RpcError::UnknownVersion(_) => codes::UNKNOWN_VERSION,
            RpcError::UnknownVersionOrNamespace { .. } => codes::UNKNOWN_VERSION_OR_NAMESPACE,
            RpcError::StreamingNotSupported(_) => codes::STREAMING_NOT_SUPPORTED,
            RpcError::Authentication(_) => codes::AUTHENTICATION_ERROR,
            RpcError::NonKeywordArguments(_) => codes::NON_KEYWORD_ARGUMENTS_ERROR,
            RpcError::MalformedPayload(_) => codes::MALFORMED_PAYLOAD,
            RpcError::Call(err) => err.code(),
            RpcError::Registry(err) => err.code(),
            RpcError::Internal(_) => codes::SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            RpcError::UnknownApiFunction { .. } => "UnknownAPIFunction",
            RpcError::KeywordArgument(_) => "KeywordArgumentError",
            RpcError::UnknownProtocol(_) => "UnknownProtocol",
            RpcError::ProtocolAlreadyExists(_) => "ProtocolAlreadyExists",
            RpcError::UnknownVersion(_) => "UnknownVersion",
            RpcError::UnknownVersionOrNamespace { .. } => "UnknownVersionOrNamespace",
            RpcError::StreamingNotSupported(_) => "StreamingNotSupported",
            RpcError::Authentication(_) => "AuthenticationError",
            RpcError::NonKeywordArguments(_) => "NonKeywordArgumentsError",
            RpcError::MalformedPayload(_) => "MalformedPayload",
            RpcError::Call(err) => err.kind(),
            RpcError::Registry(err) => err.kind(),
            RpcError::Internal(_) => "InternalError",
        }
    }

    /// 信封中的 `message` 字段。
    pub fn message(&self) -> String {
        match self {
            RpcError::Call(err) => err.message().to_owned(),
            other => other.to_string(),
        }
    }
}
