//! 把 [`Logger`] 记录桥接到 `tracing`。
//!
//! # 教案式说明
//! - **意图（Why）**：核心 crate 只定义日志契约，生产部署通常已经使用 `tracing` 生态，
//!   [`TracingLogger`] 让引擎的结构化记录直接进入宿主已有的订阅器；
//! - **逻辑（How）**：按级别映射到 `tracing` 事件宏，属性拼接为 `key=value` 文本放入 `attributes` 字段，
//!   根因错误放入 `error` 字段；
//! - **契约（What）**：[`install_tracing`] 只应在进程入口调用一次；外部已设置全局订阅器时返回
//!   [`InstallError::SubscriberAlreadySet`]，不会覆盖宿主配置。

use std::fmt::Write as _;

use spark_rpc_core::{LogRecord, LogSeverity, Logger};
use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, fmt};

/// 以 `tracing` 事件输出日志记录。
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl TracingLogger {
    pub fn new() -> Self {
        Self
    }
}

fn join_attributes(record: &LogRecord<'_>) -> String {
    let mut joined = String::new();
    for (idx, kv) in record.attributes.iter().enumerate() {
        if idx > 0 {
            joined.push(' ');
        }
        let _ = write!(&mut joined, "{}={}", kv.key, kv.value);
    }
    joined
}

impl Logger for TracingLogger {
    fn log(&self, record: &LogRecord<'_>) {
        let attributes = join_attributes(record);
        let error = record.error.map(ToString::to_string).unwrap_or_default();
        let message = record.message.as_ref();
        match record.severity {
            LogSeverity::Trace => {
                tracing::trace!(attributes = %attributes, error = %error, "{message}")
            }
            LogSeverity::Debug => {
                tracing::debug!(attributes = %attributes, error = %error, "{message}")
            }
            LogSeverity::Info => {
                tracing::info!(attributes = %attributes, error = %error, "{message}")
            }
            LogSeverity::Warn => {
                tracing::warn!(attributes = %attributes, error = %error, "{message}")
            }
            LogSeverity::Error => {
                tracing::error!(attributes = %attributes, error = %error, "{message}")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,

    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装 `fmt + EnvFilter` 订阅器。
///
/// `RUST_LOG` 存在时优先生效，否则使用 `default_filter`（例如 `"info"`）。
pub fn install_tracing(default_filter: &str) -> Result<(), InstallError> {
    if dispatcher::has_been_set() {
        return Err(InstallError::SubscriberAlreadySet);
    }
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = tracing_subscriber::registry().with(filter).with(fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use spark_rpc_core::KeyValue;
    use tracing_test::traced_test;

    use super::*;

    #[traced_test]
    #[test]
    fn records_become_tracing_events() {
        let logger = TracingLogger::new();
        logger.info_with_fields(
            "rpc call completed",
            &[KeyValue::new("rpc.function", "v1/add"), KeyValue::new("rpc.bytes_out", 12_i64)],
        );
        let cause = std::io::Error::other("socket closed");
        logger.error("rpc call failed", Some(&cause));

        assert!(logs_contain("rpc call completed"));
        assert!(logs_contain("rpc.function=v1/add rpc.bytes_out=12"));
        assert!(logs_contain("socket closed"));
    }
}
