//! 请求执行引擎。
//!
//! # 教案式说明
//! - **意图（Why）**：宿主适配层（HTTP 服务器、测试回环）只负责搬运字节，协商、解析、调用、编码、
//!   错误信封与日志全部收敛在这里，任何宿主都得到一致的行为；
//! - **执行逻辑（How）**：
//!   1. 由入站关联值与本地短标识组成请求标识；
//!   2. 按协议头协商编解码器，未指定时使用缺省协议；
//!   3. 可选鉴权，结果挂到实时请求对象上；
//!   4. [`PathResolver`] 定位函数并绑定参数；
//!   5. 执行前钩子、调用业务函数（panic 被转换为错误）、执行后钩子；
//!   6. 单值结果按需包裹成功信封后一次性编码，流式结果交给 [`EnvelopeStream`] 惰性编码；
//!   7. 任何一步失败都转换为错误信封，用协商出的协议编码（协商失败时用缺省协议），并记录完整上下文；
//! - **契约（What）**：[`Engine::process`] 从不返回错误也不 panic，失败一律体现在响应体中；
//!   响应头总是包含内容类型、实际使用的协议名、请求标识与耗时（秒）。

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use spark_rpc_codecs::{JsonProtocol, Protocol, ProtocolSet};
use spark_rpc_core::{
    Authenticator, Handler, Headers, KeyValue, Logger, NoopLogger, Registry, RequestBody,
    RequestHandle, RpcError, RpcRequest, Value, ValueProducer,
};
use spark_rpc_router::{PathResolver, ResolvedCall};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{ConfigError, EngineConfig};
use crate::context::{CallContext, CallState};
use crate::envelope;
use crate::guard::catch_call;
use crate::hooks::{CallHook, HookChain, HookContext, HookOutcome};
use crate::pool::{WorkerPermit, WorkerPool};
use crate::response::{ResponseBody, RpcResponse};
use crate::stream::EnvelopeStream;

/// 本地短标识的长度。
const SHORT_ID_LEN: usize = 8;

pub const CONTENT_TYPE: &str = "content-type";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Protocol(#[from] RpcError),
}

/// [`Engine`] 的构建器。
///
/// # 教案式说明
/// - **意图（Why）**：注册表、协议集合、日志、钩子、鉴权器都是启动期一次性装配的协作者；
/// - **契约（What）**：`build` 先校验配置，再把配置中的缺省协议设置到协议集合上，
///   缺省协议未登记时返回 [`BuildError::Protocol`]；
/// - **风险提示（Trade-offs）**：构建后所有协作者只读共享，运行期无法增删函数或协议。
pub struct EngineBuilder {
    registry: Arc<Registry>,
    protocols: ProtocolSet,
    logger: Arc<dyn Logger>,
    hooks: HookChain,
    authenticator: Option<Arc<dyn Authenticator>>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            protocols: ProtocolSet::with_defaults(),
            logger: Arc::new(NoopLogger),
            hooks: HookChain::new(),
            authenticator: None,
            config: EngineConfig::default(),
        }
    }

    pub fn protocols(mut self, protocols: ProtocolSet) -> Self {
        self.protocols = protocols;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn hook(mut self, hook: Arc<dyn CallHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Engine, BuildError> {
        self.config.validate()?;
        let mut protocols = self.protocols;
        protocols.set_default(&self.config.default_protocol)?;
        let resolver = PathResolver::new(self.registry, self.config.resolver.clone());
        let pool = WorkerPool::new(self.config.worker_threads);
        let server_name = Arc::from(self.config.server_name.as_str());
        Ok(Engine {
            inner: Arc::new(Inner {
                resolver,
                protocols,
                logger: self.logger,
                hooks: self.hooks,
                authenticator: self.authenticator,
                server_name,
                pool,
                config: self.config,
            }),
        })
    }
}

/// 请求执行引擎；克隆代价为一次引用计数递增。
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

struct Inner {
    resolver: PathResolver,
    protocols: ProtocolSet,
    logger: Arc<dyn Logger>,
    hooks: HookChain,
    authenticator: Option<Arc<dyn Authenticator>>,
    server_name: Arc<str>,
    pool: WorkerPool,
    config: EngineConfig,
}

enum Produced {
    Value(Value),
    Stream(Box<dyn ValueProducer>),
}

impl Engine {
    pub fn builder(registry: Arc<Registry>) -> EngineBuilder {
        EngineBuilder::new(registry)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.inner.resolver.registry()
    }

    pub fn protocols(&self) -> &ProtocolSet {
        &self.inner.protocols
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// 在当前线程同步处理一个请求。
    pub fn process(&self, request: RpcRequest) -> RpcResponse {
        self.inner.process(request)
    }

    /// 当前空闲的工作池名额。
    pub fn available_workers(&self) -> usize {
        self.inner.pool.available()
    }

    /// 经有界工作池处理一个请求；必须在 tokio 运行时内调用。
    ///
    /// 流式响应持有许可直到序列结束、失败或被取消，记录应经
    /// [`EnvelopeStream::next_blocking`] 读取。
    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        let engine = self.clone();
        let job = move |permit: WorkerPermit| engine.process(request).holding(permit);
        match self.inner.pool.run_with_permit(job).await {
            Ok(response) => response,
            Err(err) => {
                let mut ctx = CallContext::new(self.inner.request_id(None));
                let protocol = self.inner.protocols.default_protocol();
                self.inner
                    .fail(&mut ctx, protocol, RpcError::Internal(err.to_string()))
            }
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("protocols", &self.inner.protocols)
            .field("hooks", &self.inner.hooks)
            .field("workers", &self.inner.pool.size())
            .field("server_name", &self.inner.server_name)
            .finish()
    }
}

fn step(ctx: &mut CallContext, next: CallState) -> Result<(), RpcError> {
    ctx.advance(next)
        .map_err(|err| RpcError::Internal(err.to_string()))
}

impl Inner {
    fn request_id(&self, inbound: Option<&str>) -> String {
        let mut local = Uuid::new_v4().simple().to_string();
        local.truncate(SHORT_ID_LEN);
        match inbound.map(str::trim).filter(|value| !value.is_empty()) {
            Some(upstream) => format!("{upstream}.{local}"),
            None => local,
        }
    }

    fn process(&self, request: RpcRequest) -> RpcResponse {
        let headers = &self.config.headers;
        let mut ctx = CallContext::new(self.request_id(request.headers.get(&headers.request_id)));

        let protocol = match self.protocols.negotiate(request.headers.get(&headers.protocol)) {
            Ok(protocol) => protocol,
            Err(err) => {
                let fallback = self.protocols.default_protocol();
                ctx.set_protocol(fallback.name());
                return self.fail(&mut ctx, fallback, err);
            }
        };
        ctx.set_protocol(protocol.name());

        match self.execute(&mut ctx, &protocol, request) {
            Ok(response) => response,
            Err(err) => self.fail(&mut ctx, protocol, err),
        }
    }

    fn execute(
        &self,
        ctx: &mut CallContext,
        protocol: &Arc<dyn Protocol>,
        request: RpcRequest,
    ) -> Result<RpcResponse, RpcError> {
        step(ctx, CallState::Negotiated)?;
        let started = Instant::now();

        let (mut parts, body) = request.into_parts(ctx.id());
        if let RequestBody::Bytes(bytes) = &body {
            ctx.bytes_in = bytes.len();
        }
        if let Some(authenticator) = &self.authenticator {
            parts.auth = authenticator.authenticate(&parts)?;
        }
        let parts: RequestHandle = Arc::new(parts);

        let ResolvedCall {
            descriptor,
            invocation,
        } = catch_call(|| Ok(self.resolver.resolve(&parts, body, protocol.as_ref())))
            .map_err(RpcError::Call)??;
        ctx.timings.deserialize = started.elapsed();
        ctx.set_function(descriptor.key().to_string());
        ctx.set_params(invocation.args.values());
        step(ctx, CallState::Resolved)?;

        let separator = if descriptor.gives_stream() {
            Some(protocol.record_separator()?)
        } else {
            None
        };

        let request_id = ctx.id().to_owned();
        let hook_ctx = HookContext {
            request_id: &request_id,
            function: descriptor.key(),
            protocol: protocol.name(),
        };
        self.hooks
            .run_before(&hook_ctx, &invocation.args, self.logger.as_ref());

        step(ctx, CallState::Executing)?;
        let computing = Instant::now();
        let produced = match descriptor.handler() {
            Handler::Unary(handler) => catch_call(|| handler(invocation)).map(Produced::Value),
            Handler::Stream(handler) => catch_call(|| handler(invocation)).map(Produced::Stream),
        };
        ctx.timings.compute = computing.elapsed();
        let produced = produced.map_err(RpcError::Call);

        let outcome = match &produced {
            Ok(Produced::Value(value)) => HookOutcome::Value(value),
            Ok(Produced::Stream(_)) => HookOutcome::Stream,
            Err(err) => HookOutcome::Failed(err),
        };
        self.hooks
            .run_after(&hook_ctx, &outcome, self.logger.as_ref());
        let produced = produced?;

        step(ctx, CallState::Serializing)?;
        match (produced, separator) {
            (Produced::Value(value), _) => {
                let serializing = Instant::now();
                let body = if protocol.should_wrap() {
                    protocol.serialize(&envelope::success(value))?
                } else {
                    protocol.serialize(&value)?
                };
                ctx.timings.serialize = serializing.elapsed();
                ctx.bytes_out = body.len();
                step(ctx, CallState::Flushed)?;
                self.logger
                    .info_with_fields("rpc call completed", &ctx.attributes());
                Ok(self.response(ctx, protocol.as_ref(), ResponseBody::Full(body)))
            }
            (Produced::Stream(producer), Some(separator)) => {
                let stream = EnvelopeStream::new(
                    producer,
                    Arc::clone(protocol),
                    separator,
                    Arc::clone(&self.logger),
                    Arc::clone(&self.server_name),
                    request_id,
                    descriptor.key().to_string(),
                );
                step(ctx, CallState::Flushed)?;
                self.logger
                    .info_with_fields("rpc stream started", &ctx.attributes());
                Ok(self.response(ctx, protocol.as_ref(), ResponseBody::Stream(stream)))
            }
            (Produced::Stream(mut producer), None) => {
                producer.close();
                Err(RpcError::Internal(format!(
                    "{} returned a stream but was not declared as streaming",
                    descriptor.key()
                )))
            }
        }
    }

    fn fail(
        &self,
        ctx: &mut CallContext,
        protocol: Arc<dyn Protocol>,
        err: RpcError,
    ) -> RpcResponse {
        ctx.fail();
        let envelope = envelope::failure(&err, &self.server_name);
        let (protocol, body) = match protocol.serialize(&envelope) {
            Ok(body) => (protocol, body),
            Err(encode_err) => {
                self.logger.warn_with_fields(
                    "error envelope not encodable, falling back to json",
                    &[
                        KeyValue::new("rpc.request_id", ctx.id()),
                        KeyValue::new("rpc.protocol", protocol.name()),
                        KeyValue::new("rpc.error", encode_err.to_string()),
                    ],
                );
                let json: Arc<dyn Protocol> = Arc::new(JsonProtocol);
                let body = json.serialize(&envelope).unwrap_or_default();
                (json, body)
            }
        };
        ctx.bytes_out = body.len();

        let mut fields = ctx.attributes();
        fields.push(KeyValue::new("rpc.error.code", err.code()));
        fields.push(KeyValue::new("rpc.error.kind", err.kind()));
        self.logger
            .error_with_fields("rpc call failed", Some(&err), &fields);

        self.response(ctx, protocol.as_ref(), ResponseBody::Full(body))
    }

    fn response(
        &self,
        ctx: &CallContext,
        protocol: &dyn Protocol,
        body: ResponseBody,
    ) -> RpcResponse {
        let names = &self.config.headers;
        let mut headers = Headers::new();
        headers.insert(CONTENT_TYPE, protocol.mime_type());
        headers.insert(names.protocol.as_str(), protocol.name());
        headers.insert(names.request_id.as_str(), ctx.id());
        headers.insert(
            names.timing.as_str(),
            format!("{:.6}", ctx.timings.total().as_secs_f64()),
        );
        RpcResponse::new(headers, body)
    }
}
