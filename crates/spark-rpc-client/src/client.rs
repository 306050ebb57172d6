//! 调用构建器。
//!
//! # 教案式说明
//! - **意图（Why）**：调用方只关心“调用哪个版本、哪个命名空间下的哪个函数、传什么关键字参数”，
//!   地址拼接、协议头、关联标识透传与签名都应由客户端统一完成；
//! - **执行逻辑（How）**：
//!   1. [`Client::call`] 用选定协议编码参数映射，拼出 `<base>/<version>/<namespace...>/<function>`；
//!   2. 透传实时请求上带指定前缀的头部，并把其请求标识写入关联头；
//!   3. 写入协议头，最后交给签名器；
//!   4. [`Client::invoke`] 经 [`Transport`] 发送，按响应协议头解码并解包信封；
//! - **契约（What）**：参数只能以映射传入，位置参数在类型层面不存在；
//!   服务端错误信封转换为 [`ClientError::Response`]；
//! - **风险提示（Trade-offs）**：地址按 URL 相对解析规则拼接，基地址应以 `/` 结尾，
//!   否则其最后一段会被替换。

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use spark_rpc_codecs::{Protocol, ProtocolSet};
use spark_rpc_core::{Headers, KeyValue, Logger, Map, NoopLogger, RequestHandle, Value};
use url::Url;

use crate::error::{ClientError, ResponseError};
use crate::signer::RequestSigner;
use crate::transport::{PreparedCall, Transport, TransportResponse};

/// 客户端缺省使用的协议。
pub const DEFAULT_PROTOCOL: &str = "messagepack";
pub const DEFAULT_PROTOCOL_HEADER: &str = "x-rpc-protocol";
pub const DEFAULT_REQUEST_ID_HEADER: &str = "x-rpc-request-id";
/// 从实时请求透传到下游调用的头部前缀。
pub const DEFAULT_PROPAGATED_PREFIX: &str = "x-rpc-";

#[derive(Clone)]
pub struct Client {
    base: Url,
    version: Option<String>,
    protocols: ProtocolSet,
    protocol: Arc<dyn Protocol>,
    headers: Headers,
    signer: Option<Arc<dyn RequestSigner>>,
    request: Option<RequestHandle>,
    protocol_header: String,
    request_id_header: String,
    propagated_prefix: String,
    logger: Arc<dyn Logger>,
}

impl Client {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base =
            Url::parse(base_url).map_err(|err| ClientError::Url(format!("{base_url}: {err}")))?;
        let protocols = ProtocolSet::with_defaults();
        let protocol = protocols
            .get(DEFAULT_PROTOCOL)
            .ok_or_else(|| ClientError::UnknownProtocol(DEFAULT_PROTOCOL.to_owned()))?;
        Ok(Self {
            base,
            version: None,
            protocols,
            protocol,
            headers: Headers::new(),
            signer: None,
            request: None,
            protocol_header: DEFAULT_PROTOCOL_HEADER.to_owned(),
            request_id_header: DEFAULT_REQUEST_ID_HEADER.to_owned(),
            propagated_prefix: DEFAULT_PROPAGATED_PREFIX.to_owned(),
            logger: Arc::new(NoopLogger),
        })
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// 选择请求体协议；名称必须已在协议集合中登记。
    pub fn with_protocol(mut self, name: &str) -> Result<Self, ClientError> {
        self.protocol = self
            .protocols
            .get(name)
            .ok_or_else(|| ClientError::UnknownProtocol(name.to_owned()))?;
        Ok(self)
    }

    /// 替换可用协议集合；当前协议名不在新集合中时改用其缺省协议。
    pub fn with_protocols(mut self, protocols: ProtocolSet) -> Self {
        self.protocol = protocols
            .get(self.protocol.name())
            .unwrap_or_else(|| protocols.default_protocol());
        self.protocols = protocols;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// 在服务端函数内部发起下游调用时，绑定当前的实时请求以透传关联信息。
    pub fn with_request(mut self, request: RequestHandle) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_header_names(
        mut self,
        protocol: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        self.protocol_header = protocol.into();
        self.request_id_header = request_id.into();
        self
    }

    pub fn with_propagated_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.propagated_prefix = prefix.into();
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn protocol(&self) -> &str {
        self.protocol.name()
    }

    /// 构建一次调用。
    pub fn call(
        &self,
        namespace: Option<&str>,
        function: &str,
        arguments: Map,
    ) -> Result<PreparedCall, ClientError> {
        let body = self.protocol.serialize(&Value::Map(arguments))?;

        let mut headers = self.headers.clone();
        if let Some(request) = &self.request {
            let prefix = self.propagated_prefix.to_ascii_lowercase();
            for (name, value) in request.headers.iter() {
                if name.to_ascii_lowercase().starts_with(&prefix) {
                    headers.insert(name, value);
                }
            }
            headers.insert(self.request_id_header.as_str(), request.id.as_str());
        }
        headers.insert(self.protocol_header.as_str(), self.protocol.name());

        let url = self.url_for(namespace, function)?;
        if let Some(signer) = &self.signer {
            signer.sign(&url, &mut headers, &body);
        }

        self.logger.debug_with_fields(
            "rpc client call prepared",
            &[
                KeyValue::new("rpc.url", url.as_str()),
                KeyValue::new("rpc.protocol", self.protocol.name()),
                KeyValue::new("rpc.bytes_out", body.len()),
            ],
        );
        Ok(PreparedCall {
            url,
            headers,
            body,
            protocol: self.protocol.name().to_owned(),
        })
    }

    fn url_for(&self, namespace: Option<&str>, function: &str) -> Result<Url, ClientError> {
        let path = self
            .version
            .as_deref()
            .into_iter()
            .chain(namespace.into_iter().flat_map(|ns| ns.split('/')))
            .chain(std::iter::once(function))
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        self.base
            .join(&path)
            .map_err(|err| ClientError::Url(format!("{path}: {err}")))
    }

    /// 发送并解包单值响应。
    pub fn invoke<T: Transport>(
        &self,
        transport: T,
        namespace: Option<&str>,
        function: &str,
        arguments: Map,
    ) -> Result<Value, ClientError> {
        let call = self.call(namespace, function, arguments)?;
        let response = transport.send(call)?;
        let protocol = self.response_protocol(&response)?;
        let decoded = protocol.deserialize_bytes(response.body)?;
        if protocol.should_wrap() {
            extract_response(decoded)
        } else {
            Ok(decoded)
        }
    }

    /// 发送并逐项解包流式响应；遇到错误信封时产出一次错误。
    pub fn invoke_stream<T: Transport>(
        &self,
        transport: T,
        namespace: Option<&str>,
        function: &str,
        arguments: Map,
    ) -> Result<impl Iterator<Item = Result<Value, ClientError>> + use<T>, ClientError> {
        let call = self.call(namespace, function, arguments)?;
        let response = transport.send(call)?;
        let protocol = self.response_protocol(&response)?;
        let wrapped = protocol.should_wrap();
        let items = protocol.deserialize_stream(Box::new(Cursor::new(response.body)))?;
        Ok(items.map(move |item| {
            let value = item?;
            if wrapped { extract_response(value) } else { Ok(value) }
        }))
    }

    /// 服务端在协议头中回写实际使用的协议；缺失时沿用请求协议。
    fn response_protocol(
        &self,
        response: &TransportResponse,
    ) -> Result<Arc<dyn Protocol>, ClientError> {
        match response.headers.get(&self.protocol_header) {
            Some(name) => self
                .protocols
                .get(name.trim())
                .ok_or_else(|| ClientError::UnknownProtocol(name.to_owned())),
            None => Ok(Arc::clone(&self.protocol)),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base", &self.base.as_str())
            .field("version", &self.version)
            .field("protocol", &self.protocol.name())
            .field("signed", &self.signer.is_some())
            .finish()
    }
}

/// 解包 `{success, result}` / `{success: false, message, code, error}` 信封。
pub fn extract_response(value: Value) -> Result<Value, ClientError> {
    let Value::Map(mut envelope) = value else {
        return Err(ClientError::UnexpectedResponse(format!(
            "expected an envelope mapping, got {}",
            value.type_name()
        )));
    };
    match envelope.get("success").and_then(Value::as_bool) {
        Some(true) => Ok(envelope.remove("result").unwrap_or(Value::Null)),
        Some(false) => {
            let text = |envelope: &mut Map, key: &str| match envelope.remove(key) {
                Some(Value::Str(text)) => text,
                Some(other) => other.to_string(),
                None => String::new(),
            };
            let code = envelope.get("code").and_then(Value::as_i64).unwrap_or(50000);
            Err(ResponseError {
                message: text(&mut envelope, "message"),
                code,
                error: text(&mut envelope, "error"),
            }
            .into())
        }
        None => Err(ClientError::UnexpectedResponse(
            "envelope lacks a boolean `success` field".to_owned(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use spark_rpc_core::RpcRequest;

    use super::*;
    use crate::signer::BearerSigner;

    #[test]
    fn urls_join_version_namespace_and_function() {
        let client = Client::new("http://localhost:8818/api/").expect("client").with_version("v1");
        let call = client.call(Some("math/int"), "add", Map::new()).expect("call");
        assert_eq!(call.url.as_str(), "http://localhost:8818/api/v1/math/int/add");
        assert_eq!(call.target(), "/api/v1/math/int/add");

        let call = client.call(None, "ping", Map::new()).expect("call");
        assert_eq!(call.url.path(), "/api/v1/ping");
    }

    #[test]
    fn headers_carry_protocol_correlation_and_signature() {
        let live = RpcRequest::get("/api/v1/outer")
            .with_header("X-RPC-Tenant", "acme")
            .with_header("Accept", "*/*")
            .into_parts("up-1.abcd1234")
            .0;
        let client = Client::new("http://svc/api/")
            .expect("client")
            .with_version("v1")
            .with_protocol("json")
            .expect("json")
            .with_request(Arc::new(live))
            .with_signer(Arc::new(BearerSigner::new("tok")));

        let arguments = Map::from([("a".to_owned(), Value::Int(1))]);
        let call = client.call(None, "inner", arguments).expect("call");
        assert_eq!(call.headers.get("x-rpc-tenant"), Some("acme"));
        assert_eq!(call.headers.get("accept"), None);
        assert_eq!(call.headers.get(DEFAULT_REQUEST_ID_HEADER), Some("up-1.abcd1234"));
        assert_eq!(call.headers.get(DEFAULT_PROTOCOL_HEADER), Some("json"));
        assert_eq!(call.headers.get("authorization"), Some("Bearer tok"));
        assert_eq!(call.body.as_ref(), b"{\"a\":1}");
    }

    #[test]
    fn envelopes_unwrap_into_results_or_errors() {
        let ok = Value::from_iter([("success", Value::Bool(true)), ("result", Value::Int(3))]);
        assert_eq!(extract_response(ok), Ok(Value::Int(3)));

        let failed = Value::from_iter([
            ("success", Value::Bool(false)),
            ("message", Value::from("Unknown API Function: \"mul\"")),
            ("code", Value::Int(50002)),
            ("error", Value::from("[spark-rpc] UnknownAPIFunction")),
        ]);
        let err = extract_response(failed).expect_err("error envelope");
        assert_eq!(err.code(), Some(50002));
        let ClientError::Response(response) = err else {
            panic!("expected a response error");
        };
        assert_eq!(response.kind(), "UnknownAPIFunction");

        assert!(matches!(
            extract_response(Value::Int(1)),
            Err(ClientError::UnexpectedResponse(_))
        ));
        assert!(Client::new("http://svc/").expect("client").with_protocol("pickle").is_err());
    }
}
