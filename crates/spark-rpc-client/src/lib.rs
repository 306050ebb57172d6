#![deny(unsafe_code)]
#![doc = "spark-rpc-client: 以 `call(namespace, function, arguments)` 形式发起远程调用。"]
#![doc = ""]
#![doc = "[`Client`] 负责编码参数、拼接地址、写入协议头与关联头、签名；[`Transport`] 负责送达；"]
#![doc = "响应按服务端回写的协议解码后解包成功/错误信封。"]

mod client;
mod error;
pub mod signer;
mod transport;

pub use client::{
    Client, DEFAULT_PROPAGATED_PREFIX, DEFAULT_PROTOCOL, DEFAULT_PROTOCOL_HEADER,
    DEFAULT_REQUEST_ID_HEADER, extract_response,
};
pub use error::{ClientError, ResponseError};
pub use signer::{BasicSigner, BearerSigner, RequestSigner};
pub use transport::{PreparedCall, Transport, TransportResponse};
