#![deny(unsafe_code)]
#![doc = "spark-rpc-codecs: 远程调用的线协议编解码器集合。"]
#![doc = ""]
#![doc = "每个编解码器都是无状态的 [`Protocol`] 实现，可在任意线程间共享；[`ProtocolSet`] 负责按名称协商。"]
#![doc = "数组分帧协议（[`NdArrayProtocol`]）以 `<JSON 头>\\n<原始缓冲拼接>` 的形式传输数值数组。"]

mod error;
mod json;
mod msgpack;
mod native;
pub mod ndarray;
mod protocol;
mod raw;

pub use error::CodecError;
pub use json::JsonProtocol;
pub use msgpack::MessagePackProtocol;
pub use native::NativeProtocol;
pub use ndarray::{Frame, NdArrayProtocol};
pub use protocol::{ByteSource, DecodedStream, Protocol, ProtocolSet};
pub use raw::RawProtocol;
