#![deny(unsafe_code)]
#![doc = "spark-rpc-core: 将宿主函数暴露为按版本、命名空间寻址的远程过程所需的核心契约。"]
#![doc = ""]
#![doc = "本 crate 只承载与传输、编码无关的部分：值模型、类型词汇与校验、函数描述符与注册表、"]
#![doc = "错误码体系、抽象请求与鉴权边界，以及显式传递的日志协作者。"]

pub mod array;
pub mod error;
pub mod function;
pub mod logging;
pub mod registry;
pub mod request;
pub mod schema;
pub mod types;
pub mod value;

pub use array::{ArrayError, ByteOrder, DType, Element, Field, NdArray, ScalarKind, ScalarType};
pub use error::{CallError, RegistryError, RpcError, codes};
pub use function::{
    ApiCollection, ApiFragment, Arguments, FromValue, FunctionDef, Handler, InboundStream,
    Invocation, ValueProducer, producer_from_iter,
};
pub use logging::{
    AttributeValue, CapturedRecord, KeyValue, LogRecord, LogSeverity, Logger, MemoryLogger,
    NoopLogger,
};
pub use registry::{FunctionDescriptor, FunctionKey, Registry};
pub use request::{
    AuthInfo, Authenticator, Headers, Method, RequestBody, RequestHandle, RequestParts,
    RpcRequest,
};
pub use schema::{ParamSpec, Position, validate_type};
pub use types::{ContainerKind, Primitive, TypeSpec};
pub use value::{Map, Value};
