use bytes::Bytes;
use spark_rpc_core::{Headers, RpcRequest};
use url::Url;

use crate::error::ClientError;

/// 构建完成、尚未发送的调用。
#[derive(Clone, Debug)]
pub struct PreparedCall {
    pub url: Url,
    pub headers: Headers,
    pub body: Bytes,
    /// 请求体使用的协议名。
    pub protocol: String,
}

impl PreparedCall {
    /// `path[?query]` 形式的请求目标。
    pub fn target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{query}", self.url.path()),
            None => self.url.path().to_owned(),
        }
    }

    /// 转换为服务端的抽象请求，供进程内回环使用。
    pub fn into_request(self) -> RpcRequest {
        let mut request = RpcRequest::post(self.target(), self.body);
        request.headers = self.headers;
        request
    }
}

/// 传输层返回的原始响应。
#[derive(Clone, Debug, Default)]
pub struct TransportResponse {
    pub headers: Headers,
    pub body: Bytes,
}

/// 把 [`PreparedCall`] 送达服务端的传输层。
///
/// 实现可以是 HTTP 客户端，也可以直接在进程内调用执行引擎。
pub trait Transport {
    fn send(&self, call: PreparedCall) -> Result<TransportResponse, ClientError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, call: PreparedCall) -> Result<TransportResponse, ClientError> {
        (**self).send(call)
    }
}
