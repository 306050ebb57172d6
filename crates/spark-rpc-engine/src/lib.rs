#![deny(unsafe_code)]
#![doc = "spark-rpc-engine: 单个请求从协商到写出的执行状态机。"]
#![doc = ""]
#![doc = "引擎按协议头协商编解码器，经路径解析定位函数并绑定参数，执行钩子与业务函数，"]
#![doc = "再把结果（或逐项产出的流）编码为成功信封；任何一步失败都转换为统一的错误信封。"]
#![doc = "同步入口为 [`Engine::process`]，异步入口 [`Engine::handle`] 经有界工作池执行。"]

pub mod auth;
pub mod config;
pub mod context;
mod engine;
pub mod envelope;
mod guard;
pub mod hooks;
pub mod logging;
mod pool;
mod response;
mod stream;

pub use auth::{BasicAuthenticator, BearerAuthenticator};
pub use config::{ConfigError, EngineConfig, HeaderNames};
pub use context::{CallContext, CallState, Timings, TransitionError, loggable_params};
pub use engine::{BuildError, CONTENT_TYPE, Engine, EngineBuilder};
pub use guard::{PANIC_KIND, catch_call};
pub use hooks::{CallHook, HookChain, HookContext, HookOutcome};
pub use logging::{InstallError, TracingLogger, install_tracing};
pub use pool::{PoolError, WorkerPermit, WorkerPool};
pub use response::{ResponseBody, RpcResponse};
pub use stream::EnvelopeStream;
