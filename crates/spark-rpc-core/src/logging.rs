//! 显式传递的结构化日志协作者。
//!
//! 各组件（注册表、路由、执行引擎）不依赖全局日志门面，而是在构造时接收一个
//! `Arc<dyn Logger>`；未提供时使用 [`NoopLogger`]。桥接到 `tracing` 的实现位于执行引擎 crate。

use std::borrow::Cow;
use std::error::Error;
use std::sync::Mutex;

/// 日志级别。
///
/// # 契约说明（What）
/// - `Info` 表示常规事件，`Warn` 表示潜在风险（例如钩子失败），`Error` 表示请求失败；
/// - 导出端可依据级别映射到目标系统。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogSeverity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            LogSeverity::Trace => "TRACE",
            LogSeverity::Debug => "DEBUG",
            LogSeverity::Info => "INFO",
            LogSeverity::Warn => "WARN",
            LogSeverity::Error => "ERROR",
        }
    }
}

/// 日志属性值：布尔、整数、浮点与文本四种标量。
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue<'a> {
    Text(Cow<'a, str>),
    Bool(bool),
    F64(f64),
    I64(i64),
}

impl std::fmt::Display for AttributeValue<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::Text(text) => f.write_str(text),
            AttributeValue::Bool(value) => write!(f, "{value}"),
            AttributeValue::F64(value) => write!(f, "{value}"),
            AttributeValue::I64(value) => write!(f, "{value}"),
        }
    }
}

impl<'a> From<&'a str> for AttributeValue<'a> {
    fn from(value: &'a str) -> Self {
        Self::Text(Cow::Borrowed(value))
    }
}

impl From<String> for AttributeValue<'_> {
    fn from(value: String) -> Self {
        Self::Text(Cow::Owned(value))
    }
}

impl<'a> From<Cow<'a, str>> for AttributeValue<'a> {
    fn from(value: Cow<'a, str>) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for AttributeValue<'_> {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for AttributeValue<'_> {
    fn from(value: f64) -> Self {
        Self::F64(value)
    }
}

impl From<i64> for AttributeValue<'_> {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<u64> for AttributeValue<'_> {
    fn from(value: u64) -> Self {
        Self::I64(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for AttributeValue<'_> {
    fn from(value: usize) -> Self {
        Self::I64(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

/// 结构化键值对。
///
/// # 契约说明（What）
/// - 键应为低基数的蛇形命名（`rpc.function`、`rpc.protocol` 等）；
/// - 值可借用调用方数据，生命周期只需覆盖一次 [`Logger::log`] 调用。
#[derive(Clone, Debug, PartialEq)]
pub struct KeyValue<'a> {
    pub key: Cow<'a, str>,
    pub value: AttributeValue<'a>,
}

impl<'a> KeyValue<'a> {
    pub fn new(key: impl Into<Cow<'a, str>>, value: impl Into<AttributeValue<'a>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// 单条结构化日志记录。
///
/// # 逻辑解析（How）
/// - `message` 使用 `Cow`，静态消息零分配；
/// - `error` 以引用携带根因，导出端自行决定是否展开错误链；
/// - `attributes` 为借用切片，提交后视为不可变。
#[derive(Debug)]
pub struct LogRecord<'a> {
    pub message: Cow<'a, str>,
    pub severity: LogSeverity,
    pub target: Option<Cow<'a, str>>,
    pub error: Option<&'a (dyn Error + 'a)>,
    pub attributes: &'a [KeyValue<'a>],
}

impl<'a> LogRecord<'a> {
    pub fn new(
        message: impl Into<Cow<'a, str>>,
        severity: LogSeverity,
        error: Option<&'a (dyn Error + 'a)>,
        attributes: &'a [KeyValue<'a>],
    ) -> Self {
        Self {
            message: message.into(),
            severity,
            target: None,
            error,
            attributes,
        }
    }

    pub fn with_target(mut self, target: impl Into<Cow<'a, str>>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// 日志接口契约。
///
/// # 设计背景（Why）
/// - 组件只依赖此 trait，宿主可以接入 `tracing`、文件或测试用的内存实现。
///
/// # 逻辑解析（How）
/// - `log` 为唯一必需方法；便捷方法内部构造 [`LogRecord`] 后统一走 `log`。
///
/// # 契约说明（What）
/// - 实现应尽量非阻塞，且不得 panic。
pub trait Logger: Send + Sync + 'static {
    /// 提交结构化日志。
    fn log(&self, record: &LogRecord<'_>);

    fn debug_with_fields(&self, message: &str, attributes: &[KeyValue<'_>]) {
        self.log(&LogRecord::new(message, LogSeverity::Debug, None, attributes));
    }

    fn info(&self, message: &str) {
        self.info_with_fields(message, &[]);
    }

    fn info_with_fields(&self, message: &str, attributes: &[KeyValue<'_>]) {
        self.log(&LogRecord::new(message, LogSeverity::Info, None, attributes));
    }

    fn warn(&self, message: &str) {
        self.warn_with_fields(message, &[]);
    }

    fn warn_with_fields(&self, message: &str, attributes: &[KeyValue<'_>]) {
        self.log(&LogRecord::new(message, LogSeverity::Warn, None, attributes));
    }

    fn error(&self, message: &str, error: Option<&dyn Error>) {
        self.error_with_fields(message, error, &[]);
    }

    fn error_with_fields(
        &self,
        message: &str,
        error: Option<&dyn Error>,
        attributes: &[KeyValue<'_>],
    ) {
        self.log(&LogRecord::new(message, LogSeverity::Error, error, attributes));
    }
}

/// 丢弃一切记录的默认实现。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _record: &LogRecord<'_>) {}
}

/// 拥有所有权的日志快照，由 [`MemoryLogger`] 产出。
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedRecord {
    pub severity: LogSeverity,
    pub message: String,
    pub error: Option<String>,
    pub attributes: Vec<(String, String)>,
}

impl CapturedRecord {
    /// 按键查找属性的文本形式。
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// 把记录保存在内存中的实现，供诊断与测试断言使用。
#[derive(Debug, Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<CapturedRecord>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// 指定级别的记录条数。
    pub fn count(&self, severity: LogSeverity) -> usize {
        self.records()
            .iter()
            .filter(|record| record.severity == severity)
            .count()
    }
}

impl Logger for MemoryLogger {
    fn log(&self, record: &LogRecord<'_>) {
        let captured = CapturedRecord {
            severity: record.severity,
            message: record.message.to_string(),
            error: record.error.map(ToString::to_string),
            attributes: record
                .attributes
                .iter()
                .map(|kv| (kv.key.to_string(), kv.value.to_string()))
                .collect(),
        };
        if let Ok(mut guard) = self.records.lock() {
            guard.push(captured);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_logger_keeps_fields_in_order() {
        let logger = MemoryLogger::new();
        logger.info_with_fields(
            "call completed",
            &[KeyValue::new("rpc.function", "add"), KeyValue::new("rpc.items", 3_i64)],
        );
        logger.warn("hook failed");

        let records = logger.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].attribute("rpc.function"), Some("add"));
        assert_eq!(records[0].attribute("rpc.items"), Some("3"));
        assert_eq!(logger.count(LogSeverity::Warn), 1);
    }

    #[test]
    fn error_records_carry_the_cause() {
        let logger = MemoryLogger::new();
        let cause = std::io::Error::other("disk gone");
        logger.error("request failed", Some(&cause));
        assert_eq!(logger.records()[0].error.as_deref(), Some("disk gone"));
    }
}
