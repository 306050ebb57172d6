//! 调用前后钩子。
//!
//! # 教案式说明
//! - **意图（Why）**：审计、限流统计、参数改写前的观察等横切逻辑不应写进每个业务函数，
//!   引擎在调用前后各留一个挂载点；
//! - **契约（What）**：
//!   - 钩子在工作单元内同步执行，按注册顺序依次调用；
//!   - 钩子返回的错误与 panic 都被捕获并以 `Warn` 记录，绝不改变调用结果；
//! - **风险提示（Trade-offs）**：钩子与业务函数共享同一个工作线程，耗时钩子会直接拉长请求延迟。

use std::sync::Arc;

use spark_rpc_core::{Arguments, CallError, FunctionKey, KeyValue, Logger, RpcError, Value};

use crate::guard::catch_call;

const ATTR_HOOK_STAGE: &str = "rpc.hook.stage";
const ATTR_HOOK_INDEX: &str = "rpc.hook.index";

/// 钩子可见的调用身份。
#[derive(Clone, Copy, Debug)]
pub struct HookContext<'a> {
    pub request_id: &'a str,
    pub function: &'a FunctionKey,
    pub protocol: &'a str,
}

/// 调用结果的只读视图。
#[derive(Clone, Copy, Debug)]
pub enum HookOutcome<'a> {
    Value(&'a Value),
    /// 流式结果：此时只代表游标已创建，逐项产出尚未开始。
    Stream,
    Failed(&'a RpcError),
}

/// 钩子契约；两个方法都有空的默认实现。
pub trait CallHook: Send + Sync + 'static {
    fn before_call(&self, _ctx: &HookContext<'_>, _args: &Arguments) -> Result<(), CallError> {
        Ok(())
    }

    fn after_call(
        &self,
        _ctx: &HookContext<'_>,
        _outcome: &HookOutcome<'_>,
    ) -> Result<(), CallError> {
        Ok(())
    }
}

/// 按注册顺序执行的钩子列表。
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn CallHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: Arc<dyn CallHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn run_before(&self, ctx: &HookContext<'_>, args: &Arguments, logger: &dyn Logger) {
        for (index, hook) in self.hooks.iter().enumerate() {
            let result = catch_call(|| hook.before_call(ctx, args));
            report("before", index, ctx, result, logger);
        }
    }

    pub fn run_after(&self, ctx: &HookContext<'_>, outcome: &HookOutcome<'_>, logger: &dyn Logger) {
        for (index, hook) in self.hooks.iter().enumerate() {
            let result = catch_call(|| hook.after_call(ctx, outcome));
            report("after", index, ctx, result, logger);
        }
    }
}

impl std::fmt::Debug for HookChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookChain").field("len", &self.hooks.len()).finish()
    }
}

fn report(
    stage: &'static str,
    index: usize,
    ctx: &HookContext<'_>,
    result: Result<(), CallError>,
    logger: &dyn Logger,
) {
    let Err(err) = result else {
        return;
    };
    let function = ctx.function.to_string();
    let message = if err.kind() == crate::guard::PANIC_KIND {
        "call hook panicked"
    } else {
        "call hook failed"
    };
    logger.warn_with_fields(
        message,
        &[
            KeyValue::new(ATTR_HOOK_STAGE, stage),
            KeyValue::new(ATTR_HOOK_INDEX, index),
            KeyValue::new("rpc.request_id", ctx.request_id),
            KeyValue::new("rpc.function", function),
            KeyValue::new("rpc.hook.error", err.to_string()),
        ],
    );
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use spark_rpc_core::{LogSeverity, MemoryLogger};

    use super::*;

    struct Counting(AtomicUsize);

    impl CallHook for Counting {
        fn before_call(&self, _ctx: &HookContext<'_>, _args: &Arguments) -> Result<(), CallError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(CallError::msg("audit store offline"))
        }
    }

    struct Exploding;

    impl CallHook for Exploding {
        fn after_call(
            &self,
            _ctx: &HookContext<'_>,
            _outcome: &HookOutcome<'_>,
        ) -> Result<(), CallError> {
            panic!("hook exploded");
        }
    }

    #[test]
    fn failures_are_logged_and_later_hooks_still_run() {
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let mut chain = HookChain::new();
        chain.push(counting.clone());
        chain.push(Arc::new(Exploding));
        chain.push(counting.clone());

        let key = FunctionKey::new("v1", None, "add");
        let ctx = HookContext {
            request_id: "r1",
            function: &key,
            protocol: "json",
        };
        let logger = MemoryLogger::new();
        chain.run_before(&ctx, &Arguments::new(), &logger);
        chain.run_after(&ctx, &HookOutcome::Value(&Value::Int(1)), &logger);

        assert_eq!(counting.0.load(Ordering::SeqCst), 2);
        let records = logger.records();
        assert_eq!(logger.count(LogSeverity::Warn), 3);
        assert_eq!(records[2].message, "call hook panicked");
        assert_eq!(records[2].attribute("rpc.hook.index"), Some("1"));
    }
}
