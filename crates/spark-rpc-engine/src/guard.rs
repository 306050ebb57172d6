//! 把业务代码中的 panic 转换为普通错误。

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use spark_rpc_core::CallError;

/// panic 转换得到的错误类别名。
pub const PANIC_KIND: &str = "Panic";

/// 在 `catch_unwind` 中执行 `job`；panic 被转换为类别为 [`PANIC_KIND`] 的 [`CallError`]。
///
/// 业务闭包只借用本次调用独占的数据，panic 后这些数据随即被丢弃，不会以破损状态被再次观察到。
pub fn catch_call<T>(job: impl FnOnce() -> Result<T, CallError>) -> Result<T, CallError> {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(result) => result,
        Err(payload) => Err(CallError::new(PANIC_KIND, panic_message(payload.as_ref()))),
    }
}

/// 提取 panic 载荷中的文本。
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}
