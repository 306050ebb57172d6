//! 单次调用的上下文与状态机。
//!
//! # 教案式说明
//! - **意图（Why）**：一次调用跨越协商、解析、执行、编码多个阶段，任何阶段都可能失败；把阶段显式建模为
//!   状态机，日志与测试都能准确说出“失败发生在哪一步”；
//! - **状态（What）**：`Received → Negotiated → Resolved → Executing → Serializing → Flushed`，
//!   任一非终止状态都可进入 `Failed`；`Flushed` 与 `Failed` 为终止状态；
//! - **执行逻辑（How）**：[`CallContext::advance`] 只接受沿主链前进一步或进入 `Failed`，其余迁移返回
//!   [`TransitionError`]，由引擎以内部错误处理。

use std::fmt;
use std::time::Duration;

use spark_rpc_core::{AttributeValue, KeyValue, Map, Value};
use thiserror::Error;

/// 日志参数快照中字符串的长度上限（字符数）。
pub const MAX_LOGGED_STR: usize = 250;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallState {
    Received,
    Negotiated,
    Resolved,
    Executing,
    Serializing,
    Flushed,
    Failed,
}

impl CallState {
    pub fn as_str(self) -> &'static str {
        match self {
            CallState::Received => "RECEIVED",
            CallState::Negotiated => "NEGOTIATED",
            CallState::Resolved => "RESOLVED",
            CallState::Executing => "EXECUTING",
            CallState::Serializing => "SERIALIZING",
            CallState::Flushed => "FLUSHED",
            CallState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Flushed | CallState::Failed)
    }

    fn successor(self) -> Option<CallState> {
        match self {
            CallState::Received => Some(CallState::Negotiated),
            CallState::Negotiated => Some(CallState::Resolved),
            CallState::Resolved => Some(CallState::Executing),
            CallState::Executing => Some(CallState::Serializing),
            CallState::Serializing => Some(CallState::Flushed),
            CallState::Flushed | CallState::Failed => None,
        }
    }

    pub fn can_advance_to(self, next: CallState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == CallState::Failed || self.successor() == Some(next)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("illegal call state transition {from} -> {to}")]
pub struct TransitionError {
    pub from: CallState,
    pub to: CallState,
}

/// 各阶段耗时。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timings {
    pub deserialize: Duration,
    pub compute: Duration,
    pub serialize: Duration,
}

impl Timings {
    pub fn total(&self) -> Duration {
        self.deserialize + self.compute + self.serialize
    }
}

/// 单次调用的上下文：请求到达时创建，响应写出后丢弃。
#[derive(Clone, Debug)]
pub struct CallContext {
    id: String,
    state: CallState,
    protocol: Option<String>,
    function: Option<String>,
    params: Vec<(String, Value)>,
    pub timings: Timings,
    pub bytes_in: usize,
    pub bytes_out: usize,
}

impl CallContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: CallState::Received,
            protocol: None,
            function: None,
            params: Vec::new(),
            timings: Timings::default(),
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn advance(&mut self, next: CallState) -> Result<(), TransitionError> {
        if !self.state.can_advance_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// 进入 `Failed`；已处于终止状态时保持不变并返回 `false`。
    pub fn fail(&mut self) -> bool {
        self.advance(CallState::Failed).is_ok()
    }

    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn set_protocol(&mut self, name: impl Into<String>) {
        self.protocol = Some(name.into());
    }

    pub fn function(&self) -> Option<&str> {
        self.function.as_deref()
    }

    pub fn set_function(&mut self, name: impl Into<String>) {
        self.function = Some(name.into());
    }

    /// 记录可写入日志的参数快照。
    pub fn set_params(&mut self, args: &Map) {
        self.params = loggable_params(args);
    }

    pub fn params(&self) -> &[(String, Value)] {
        &self.params
    }

    /// 以日志属性的形式导出上下文；参数以 `rpc.param.<name>` 为键。
    pub fn attributes(&self) -> Vec<KeyValue<'_>> {
        let mut fields = vec![
            KeyValue::new("rpc.request_id", self.id.as_str()),
            KeyValue::new("rpc.state", self.state.as_str()),
            KeyValue::new("rpc.protocol", self.protocol().unwrap_or("-")),
            KeyValue::new("rpc.function", self.function().unwrap_or("-")),
            KeyValue::new("rpc.deserialize_secs", self.timings.deserialize.as_secs_f64()),
            KeyValue::new("rpc.compute_secs", self.timings.compute.as_secs_f64()),
            KeyValue::new("rpc.serialize_secs", self.timings.serialize.as_secs_f64()),
            KeyValue::new("rpc.bytes_in", self.bytes_in),
            KeyValue::new("rpc.bytes_out", self.bytes_out),
        ];
        for (name, value) in &self.params {
            let value = match value {
                Value::Bool(v) => AttributeValue::Bool(*v),
                Value::Int(v) => AttributeValue::I64(*v),
                Value::Float(v) => AttributeValue::F64(*v),
                other => AttributeValue::from(other.as_str().unwrap_or_default()),
            };
            fields.push(KeyValue::new(format!("rpc.param.{name}"), value));
        }
        fields
    }
}

/// 只保留数字、布尔与不超过 [`MAX_LOGGED_STR`] 个字符的字符串。
pub fn loggable_params(args: &Map) -> Vec<(String, Value)> {
    args.iter()
        .filter(|(_, value)| match value {
            Value::Bool(_) | Value::Int(_) | Value::Float(_) => true,
            Value::Str(text) => text.chars().count() <= MAX_LOGGED_STR,
            _ => false,
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [CallState; 7] = [
        CallState::Received,
        CallState::Negotiated,
        CallState::Resolved,
        CallState::Executing,
        CallState::Serializing,
        CallState::Flushed,
        CallState::Failed,
    ];

    #[test]
    fn happy_path_reaches_flushed() {
        let mut ctx = CallContext::new("r1");
        for next in &ALL[1..6] {
            ctx.advance(*next).expect("forward step");
        }
        assert_eq!(ctx.state(), CallState::Flushed);
        assert!(!ctx.fail());
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        let mut ctx = CallContext::new("r1");
        let err = ctx.advance(CallState::Executing).expect_err("skip");
        assert_eq!(err.from, CallState::Received);
        assert_eq!(ctx.state(), CallState::Received);
    }

    #[test]
    fn snapshot_drops_unloggable_values() {
        let args: Map = [
            ("n".to_owned(), Value::Int(3)),
            ("ok".to_owned(), Value::Bool(true)),
            ("short".to_owned(), Value::from("hi")),
            ("long".to_owned(), Value::from("x".repeat(MAX_LOGGED_STR + 1))),
            ("list".to_owned(), Value::List(vec![Value::Int(1)])),
        ]
        .into_iter()
        .collect();
        let names: Vec<String> = loggable_params(&args).into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["n", "ok", "short"]);
    }

    proptest! {
        #[test]
        fn random_walks_only_follow_legal_edges(
            steps in proptest::collection::vec(0usize..7, 0..20)
        ) {
            let mut ctx = CallContext::new("walk");
            for step in steps {
                let before = ctx.state();
                let next = ALL[step];
                let legal = before.can_advance_to(next);
                prop_assert_eq!(ctx.advance(next).is_ok(), legal);
                prop_assert_eq!(ctx.state(), if legal { next } else { before });
                if before.is_terminal() {
                    prop_assert_eq!(ctx.state(), before);
                }
            }
        }
    }
}
