use spark_rpc_codecs::CodecError;
use thiserror::Error;

/// 服务端返回的错误信封。
///
/// `error` 形如 `[<server>] <Kind>`，`code` 与服务端错误码表一致。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{error} ({code}): {message}")]
pub struct ResponseError {
    pub message: String,
    pub code: i64,
    pub error: String,
}

impl ResponseError {
    /// 去掉 `[<server>] ` 前缀后的错误类别名。
    pub fn kind(&self) -> &str {
        match self.error.split_once("] ") {
            Some((_, kind)) if self.error.starts_with('[') => kind,
            _ => &self.error,
        }
    }
}

/// 客户端调用失败。
///
/// # 教案式说明
/// - **意图 (Why)**：区分“请求根本没发出去”（地址、编码、传输）与“服务端明确拒绝”（[`ResponseError`]），
///   调用方通常只对后者按错误码分支；
/// - **契约 (What)**：服务端错误信封总是落在 [`ClientError::Response`]，其余变体都表示本地或链路问题。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("invalid url: {0}")]
    Url(String),

    #[error("\"{0}\" protocol does not exist")]
    UnknownProtocol(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("transport failed: {0}")]
    Transport(String),

    #[error("unexpected response shape: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Response(#[from] ResponseError),
}

impl ClientError {
    /// 服务端错误码；非服务端错误返回 `None`。
    pub fn code(&self) -> Option<i64> {
        match self {
            ClientError::Response(err) => Some(err.code),
            _ => None,
        }
    }
}
