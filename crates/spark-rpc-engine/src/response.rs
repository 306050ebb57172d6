use bytes::Bytes;
use spark_rpc_core::Headers;

use crate::pool::WorkerPermit;
use crate::stream::EnvelopeStream;

/// 响应体：一次性写出的字节，或惰性产出的记录序列。
#[derive(Debug)]
pub enum ResponseBody {
    Full(Bytes),
    Stream(EnvelopeStream),
}

/// 引擎交还给宿主适配层的响应。
///
/// 错误同样以信封形式写在响应体中，`status` 恒为 200；宿主层只需原样写出头部与响应体。
#[derive(Debug)]
pub struct RpcResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: ResponseBody,
}

impl RpcResponse {
    pub(crate) fn new(headers: Headers, body: ResponseBody) -> Self {
        Self {
            status: 200,
            headers,
            body,
        }
    }

    /// 流式响应接管许可，单值响应立即归还。
    pub(crate) fn holding(mut self, permit: WorkerPermit) -> Self {
        if let ResponseBody::Stream(stream) = &mut self.body {
            stream.hold(permit);
        }
        self
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.body, ResponseBody::Stream(_))
    }

    /// 汇总全部响应字节；流式响应会被完整消费。
    pub fn into_bytes(self) -> Bytes {
        match self.body {
            ResponseBody::Full(bytes) => bytes,
            ResponseBody::Stream(stream) => {
                let mut out = Vec::new();
                for record in stream {
                    out.extend_from_slice(&record);
                }
                Bytes::from(out)
            }
        }
    }
}
