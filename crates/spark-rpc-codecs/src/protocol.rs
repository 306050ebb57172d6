use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;
use spark_rpc_core::{RpcError, Value};

use crate::error::CodecError;
use crate::{JsonProtocol, MessagePackProtocol, NativeProtocol, NdArrayProtocol, RawProtocol};

/// 流式解码的字节来源。
pub type ByteSource = Box<dyn Read + Send>;

/// 流式解码结果：按到达顺序逐项产出。
pub type DecodedStream = Box<dyn Iterator<Item = Result<Value, CodecError>> + Send>;

/// 线协议编解码契约。
///
/// # 设计背景（Why）
/// - 执行引擎按请求头协商出一个实现，请求体解码、响应编码、流式记录分隔都委托给它；
/// - 实现必须无状态，`Arc<dyn Protocol>` 在所有工作线程间共享。
///
/// # 契约说明（What）
/// - `deserialize(serialize(v))` 在该协议能表达的值域内还原 `v`；
/// - 支持流式的协议满足：逐项 `serialize` 后以 `record_separator()` 连接，交给
///   `deserialize_stream` 可按原顺序得到同样的各项；
/// - 不支持流式的协议在 `record_separator` 与 `deserialize_stream` 上返回
///   [`CodecError::StreamingNotSupported`]；
/// - `should_wrap() == false` 的协议直接写出结果本身，不包裹成功信封。
///
/// # 风险提示（Trade-offs）
/// - 文本与紧凑二进制协议不区分元组与列表、也不保留数组的原始字节，这些值按纯值形式传输。
pub trait Protocol: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn serialize(&self, value: &Value) -> Result<Bytes, CodecError>;

    fn deserialize(&self, data: &[u8]) -> Result<Value, CodecError>;

    /// 以拥有所有权的缓冲解码；允许实现对其做零拷贝切片。
    fn deserialize_bytes(&self, data: Bytes) -> Result<Value, CodecError> {
        self.deserialize(&data)
    }

    fn deserialize_stream(&self, source: ByteSource) -> Result<DecodedStream, CodecError>;

    fn record_separator(&self) -> Result<&'static [u8], CodecError>;

    fn mime_type(&self) -> &str;

    fn should_wrap(&self) -> bool {
        true
    }

    fn supports_streaming(&self) -> bool {
        self.record_separator().is_ok()
    }
}

/// 按名称登记的协议集合，带一个缺省协议。
///
/// # 教案级注释
/// - **目标 (Why)**：集中管理可协商的协议，名称冲突在启动阶段即被发现；
/// - **设计要点 (How)**：`BTreeMap` 保证遍历顺序稳定；缺省协议以名称保存，`set_default` 只能指向已登记的协议；
/// - **契约 (What)**：`negotiate(None)` 返回缺省协议，`negotiate(Some(name))` 未命中时返回 `UnknownProtocol`。
#[derive(Clone)]
pub struct ProtocolSet {
    protocols: BTreeMap<String, Arc<dyn Protocol>>,
    default: String,
}

impl ProtocolSet {
    /// 以单个协议作为缺省协议创建集合。
    pub fn new(default: Arc<dyn Protocol>) -> Self {
        let name = default.name().to_owned();
        let mut protocols = BTreeMap::new();
        protocols.insert(name.clone(), default);
        Self {
            protocols,
            default: name,
        }
    }

    /// 内置的五种协议，缺省为 `json`。
    pub fn with_defaults() -> Self {
        let mut set = Self::new(Arc::new(JsonProtocol));
        let builtin: [Arc<dyn Protocol>; 4] = [
            Arc::new(MessagePackProtocol),
            Arc::new(NativeProtocol),
            Arc::new(RawProtocol),
            Arc::new(NdArrayProtocol),
        ];
        for protocol in builtin {
            let name = protocol.name().to_owned();
            set.protocols.entry(name).or_insert(protocol);
        }
        set
    }

    pub fn register(&mut self, protocol: Arc<dyn Protocol>) -> Result<(), RpcError> {
        let name = protocol.name().to_owned();
        if self.protocols.contains_key(&name) {
            return Err(RpcError::ProtocolAlreadyExists(name));
        }
        self.protocols.insert(name, protocol);
        Ok(())
    }

    pub fn set_default(&mut self, name: &str) -> Result<(), RpcError> {
        if !self.protocols.contains_key(name) {
            return Err(RpcError::UnknownProtocol(name.to_owned()));
        }
        self.default = name.to_owned();
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Protocol>> {
        self.protocols.get(name).cloned()
    }

    pub fn default_protocol(&self) -> Arc<dyn Protocol> {
        // `default` 只能通过 `new`/`set_default` 设置，二者都保证其已登记。
        match self.protocols.get(&self.default) {
            Some(protocol) => Arc::clone(protocol),
            None => Arc::new(JsonProtocol),
        }
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    /// 按请求头给出的名称选择协议；空值视为未指定。
    pub fn negotiate(&self, requested: Option<&str>) -> Result<Arc<dyn Protocol>, RpcError> {
        match requested.map(str::trim).filter(|name| !name.is_empty()) {
            None => Ok(self.default_protocol()),
            Some(name) => self
                .get(name)
                .ok_or_else(|| RpcError::UnknownProtocol(name.to_owned())),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.protocols.keys().map(String::as_str)
    }
}

impl Default for ProtocolSet {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for ProtocolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolSet")
            .field("protocols", &self.protocols.keys().collect::<Vec<_>>())
            .field("default", &self.default)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_set_negotiates_by_name() {
        let set = ProtocolSet::with_defaults();
        assert_eq!(
            set.names().collect::<Vec<_>>(),
            vec!["json", "messagepack", "native", "ndarray", "raw"]
        );
        assert_eq!(set.negotiate(None).expect("default").name(), "json");
        assert_eq!(set.negotiate(Some("  ")).expect("blank").name(), "json");
        assert_eq!(
            set.negotiate(Some("messagepack")).expect("known").name(),
            "messagepack"
        );
        let err = set.negotiate(Some("pickle")).err().expect("unknown protocol");
        assert_eq!(err.code(), 50004);
    }

    #[test]
    fn register_and_default_are_checked() {
        let mut set = ProtocolSet::new(Arc::new(JsonProtocol));
        assert_eq!(
            set.register(Arc::new(JsonProtocol)).map_err(|e| e.code()),
            Err(50003)
        );
        assert_eq!(set.set_default("raw").map_err(|e| e.code()), Err(50004));
        set.register(Arc::new(RawProtocol)).expect("new protocol");
        set.set_default("raw").expect("registered");
        assert_eq!(set.default_protocol().name(), "raw");
    }
}
