use spark_rpc_core::{CallError, RpcError, codes};
use thiserror::Error;

/// 编解码失败。
///
/// # 教案式说明
/// - **意图 (Why)**：编解码器之间共享同一错误类型，执行引擎与路由层只需一处转换；
/// - **契约 (What)**：`protocol` 字段为出错的协议名；流式解码拒绝统一使用
///   [`CodecError::StreamingNotSupported`]，其余解码失败（包括数组尾部截断、分帧越界）都是普通的
///   [`CodecError::Decode`]；
/// - **执行逻辑 (How)**：`From` 转换到 [`RpcError`] 时，流式拒绝映射到 `StreamingNotSupported`，
///   其余映射到 `MalformedPayload`。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("{protocol}: failed to encode value: {detail}")]
    Encode { protocol: String, detail: String },

    #[error("{protocol}: malformed payload: {detail}")]
    Decode { protocol: String, detail: String },

    #[error("{protocol}: failed to read payload: {detail}")]
    Io { protocol: String, detail: String },

    #[error("Streaming not supported for \"{0}\" protocol")]
    StreamingNotSupported(String),
}

impl CodecError {
    pub(crate) fn encode(protocol: &str, detail: impl ToString) -> Self {
        CodecError::Encode {
            protocol: protocol.to_owned(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn decode(protocol: &str, detail: impl ToString) -> Self {
        CodecError::Decode {
            protocol: protocol.to_owned(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn io(protocol: &str, detail: impl ToString) -> Self {
        CodecError::Io {
            protocol: protocol.to_owned(),
            detail: detail.to_string(),
        }
    }
}

impl From<CodecError> for RpcError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::StreamingNotSupported(protocol) => {
                RpcError::StreamingNotSupported(protocol)
            }
            CodecError::Encode { .. } => RpcError::Internal(err.to_string()),
            other => RpcError::MalformedPayload(other.to_string()),
        }
    }
}

/// 流式参数的逐项解码错误以业务错误的形式交给函数体。
impl From<CodecError> for CallError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::StreamingNotSupported(_) => {
                CallError::new("StreamingNotSupported", err.to_string())
                    .with_code(codes::STREAMING_NOT_SUPPORTED)
            }
            other => CallError::new("MalformedPayload", other.to_string())
                .with_code(codes::MALFORMED_PAYLOAD),
        }
    }
}
