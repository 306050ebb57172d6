//! 流式响应：把业务游标逐项编码为带分隔符的记录。
//!
//! # 教案式说明
//! - **意图（Why）**：流式函数的结果在响应写出期间才逐项产生，编码与错误处理必须跟随写出节奏惰性进行；
//! - **契约（What）**：
//!   - 每一项编码为 `serialize(item 或其成功信封) + record_separator`；
//!   - 游标报告错误（或 panic）时，写出恰好一条错误信封后结束，不再向游标取值；
//!   - 正常结束、失败、取消（[`EnvelopeStream::cancel`] 或提前丢弃）都会调用游标的 `close`，且只调用一次；
//! - **执行位置**：经 `Engine::handle` 得到的流持有一个工作池许可，直到结束、失败或取消；
//!   异步宿主应使用 [`EnvelopeStream::next_blocking`] 取记录，使游标只在阻塞线程上运行；
//! - **风险提示（Trade-offs）**：错误信封本身也可能编码失败（例如原始字节协议无法表达映射），
//!   此时只记录日志并结束序列，客户端只能从连接提前结束得知失败。

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use spark_rpc_codecs::Protocol;
use spark_rpc_core::{KeyValue, Logger, RpcError, Value, ValueProducer};

use crate::envelope;
use crate::guard::catch_call;
use crate::pool::WorkerPermit;

/// 流式响应体。
pub struct EnvelopeStream {
    producer: Option<Box<dyn ValueProducer>>,
    protocol: Arc<dyn Protocol>,
    separator: &'static [u8],
    logger: Arc<dyn Logger>,
    server_name: Arc<str>,
    request_id: String,
    function: String,
    items: usize,
    bytes_out: usize,
    permit: Option<WorkerPermit>,
}

impl EnvelopeStream {
    /// `separator` 由调用方事先从协议取得；不支持流式的协议不会走到这里。
    pub(crate) fn new(
        producer: Box<dyn ValueProducer>,
        protocol: Arc<dyn Protocol>,
        separator: &'static [u8],
        logger: Arc<dyn Logger>,
        server_name: Arc<str>,
        request_id: String,
        function: String,
    ) -> Self {
        Self {
            producer: Some(producer),
            protocol,
            separator,
            logger,
            server_name,
            request_id,
            function,
            items: 0,
            bytes_out: 0,
            permit: None,
        }
    }

    /// 占用工作池名额直到序列结束；已结束的流立即归还。
    pub(crate) fn hold(&mut self, permit: WorkerPermit) {
        if !self.is_finished() {
            self.permit = Some(permit);
        }
    }

    /// 在阻塞线程上取下一条记录。
    ///
    /// 返回 `None` 表示序列已结束（阻塞任务异常退出时流在该线程上被丢弃，游标同样会被关闭）。
    pub async fn next_blocking(self) -> Option<(Self, Bytes)> {
        if self.is_finished() {
            return None;
        }
        let task = tokio::task::spawn_blocking(move || {
            let mut stream = self;
            stream.next().map(|record| (stream, record))
        });
        task.await.ok().flatten()
    }

    /// 已写出的成功项数。
    pub fn items(&self) -> usize {
        self.items
    }

    pub fn bytes_out(&self) -> usize {
        self.bytes_out
    }

    /// 游标是否已关闭（正常结束、失败或取消）。
    pub fn is_finished(&self) -> bool {
        self.producer.is_none()
    }

    /// 提前终止：关闭游标并记录取消事件。已结束的流上调用无效果。
    pub fn cancel(&mut self) {
        if self.producer.is_some() {
            self.close_producer();
            self.logger.info_with_fields("stream cancelled", &self.fields());
        }
    }

    fn fields(&self) -> [KeyValue<'_>; 5] {
        [
            KeyValue::new("rpc.request_id", self.request_id.as_str()),
            KeyValue::new("rpc.function", self.function.as_str()),
            KeyValue::new("rpc.protocol", self.protocol.name()),
            KeyValue::new("rpc.stream.items", self.items),
            KeyValue::new("rpc.bytes_out", self.bytes_out),
        ]
    }

    fn close_producer(&mut self) {
        let _permit = self.permit.take();
        if let Some(mut producer) = self.producer.take() {
            let closed = catch_call(|| {
                producer.close();
                Ok(())
            });
            if let Err(err) = closed {
                self.logger.warn_with_fields(
                    "stream producer close failed",
                    &[KeyValue::new("rpc.error", err.to_string())],
                );
            }
        }
    }

    fn record(&self, value: &Value) -> Result<Bytes, RpcError> {
        let encoded = if self.protocol.should_wrap() {
            self.protocol.serialize(&envelope::success(value.clone()))?
        } else {
            self.protocol.serialize(value)?
        };
        let mut out = Vec::with_capacity(encoded.len() + self.separator.len());
        out.extend_from_slice(&encoded);
        out.extend_from_slice(self.separator);
        Ok(Bytes::from(out))
    }

    fn fail(&mut self, err: RpcError) -> Option<Bytes> {
        self.close_producer();
        self.logger
            .error_with_fields("stream failed", Some(&err), &self.fields());
        let envelope = envelope::failure(&err, &self.server_name);
        match self.protocol.serialize(&envelope) {
            Ok(encoded) => {
                let mut out = encoded.to_vec();
                out.extend_from_slice(self.separator);
                self.bytes_out += out.len();
                Some(Bytes::from(out))
            }
            Err(encode_err) => {
                self.logger.error_with_fields(
                    "failed to encode stream error envelope",
                    Some(&encode_err),
                    &self.fields(),
                );
                None
            }
        }
    }
}

impl Iterator for EnvelopeStream {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        let producer = self.producer.as_mut()?;
        let next = catch_call(|| Ok(producer.next_value()));
        match next {
            Ok(None) => {
                self.close_producer();
                self.logger.info_with_fields("stream completed", &self.fields());
                None
            }
            Ok(Some(Ok(value))) => match self.record(&value) {
                Ok(bytes) => {
                    self.items += 1;
                    self.bytes_out += bytes.len();
                    Some(bytes)
                }
                Err(err) => self.fail(err),
            },
            Ok(Some(Err(err))) | Err(err) => self.fail(RpcError::Call(err)),
        }
    }
}

impl Drop for EnvelopeStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for EnvelopeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeStream")
            .field("protocol", &self.protocol.name())
            .field("request_id", &self.request_id)
            .field("items", &self.items)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use spark_rpc_codecs::{JsonProtocol, RawProtocol};
    use spark_rpc_core::{CallError, LogSeverity, MemoryLogger};

    use super::*;

    struct Tracked {
        left: usize,
        closes: Arc<AtomicUsize>,
    }

    impl ValueProducer for Tracked {
        fn next_value(&mut self) -> Option<Result<Value, CallError>> {
            if self.left == 0 {
                return None;
            }
            self.left -= 1;
            Some(Ok(Value::Int(self.left as i64)))
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn stream(
        producer: Box<dyn ValueProducer>,
        protocol: Arc<dyn Protocol>,
        logger: Arc<MemoryLogger>,
    ) -> EnvelopeStream {
        let separator = protocol.record_separator().expect("streaming protocol");
        EnvelopeStream::new(
            producer,
            protocol,
            separator,
            logger,
            Arc::from("test"),
            "r1".to_owned(),
            "v1/count".to_owned(),
        )
    }

    #[test]
    fn completion_closes_the_producer_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let logger = Arc::new(MemoryLogger::new());
        let producer = Box::new(Tracked {
            left: 2,
            closes: closes.clone(),
        });
        let records: Vec<Bytes> =
            stream(producer, Arc::new(JsonProtocol), logger.clone()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].as_ref(), b"{\"result\":1,\"success\":true}\n");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(logger.records().last().map(|r| r.message.as_str()), Some("stream completed"));
    }

    #[test]
    fn cancellation_closes_and_logs() {
        let closes = Arc::new(AtomicUsize::new(0));
        let logger = Arc::new(MemoryLogger::new());
        let producer = Box::new(Tracked {
            left: 10,
            closes: closes.clone(),
        });
        let mut out = stream(producer, Arc::new(JsonProtocol), logger.clone());
        assert!(out.next().is_some());
        out.cancel();
        assert!(out.next().is_none());
        drop(out);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(logger.records().last().map(|r| r.message.as_str()), Some("stream cancelled"));
    }

    #[test]
    fn unencodable_error_envelope_ends_the_stream() {
        let logger = Arc::new(MemoryLogger::new());
        let producer = spark_rpc_core::producer_from_iter(vec![Err(CallError::msg("gone"))]);
        let records: Vec<Bytes> = stream(producer, Arc::new(RawProtocol), logger.clone()).collect();
        assert!(records.is_empty());
        assert_eq!(logger.count(LogSeverity::Error), 2);
    }
}
