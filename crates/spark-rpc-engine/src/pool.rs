//! 有界工作池。
//!
//! # 教案式说明
//! - **意图（Why）**：业务函数是同步代码，可能阻塞；直接在异步执行器线程上运行会拖垮其它连接，
//!   无上限地丢给阻塞线程池又会在突发流量下耗尽内存；
//! - **执行逻辑（How）**：`Semaphore` 限制同时执行的工作单元数，拿到许可后经 `spawn_blocking` 执行，
//!   许可随任务结束自动归还；
//! - **契约（What）**：必须在 tokio 运行时内调用 [`WorkerPool::run`]；工作单元 panic 时返回
//!   [`PoolError::Panicked`]，池本身继续可用；
//!   [`WorkerPool::run_with_permit`] 把许可交给工作单元，流式响应借此在整个写出期间占用名额。

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinError;

use crate::guard::panic_message;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool is closed")]
    Closed,

    #[error("worker panicked: {0}")]
    Panicked(String),

    #[error("worker task was cancelled")]
    Cancelled,
}

/// 一个执行名额；丢弃即归还。
#[derive(Debug)]
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Clone, Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// 当前空闲的许可数。
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn run<T, F>(&self, job: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.run_with_permit(move |_permit| job()).await
    }

    /// 与 [`WorkerPool::run`] 相同，但许可交给工作单元，归还时机由其决定。
    pub async fn run_with_permit<T, F>(&self, job: F) -> Result<T, PoolError>
    where
        F: FnOnce(WorkerPermit) -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        let task = tokio::task::spawn_blocking(move || job(WorkerPermit { _permit: permit }));
        task.await.map_err(joined)
    }
}

fn joined(err: JoinError) -> PoolError {
    if err.is_panic() {
        PoolError::Panicked(panic_message(err.into_panic().as_ref()))
    } else {
        PoolError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrency_never_exceeds_the_pool_size() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for task in tasks {
            task.await.expect("join").expect("run");
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn panics_do_not_poison_the_pool() {
        let pool = WorkerPool::new(1);
        let err = pool
            .run::<(), _>(|| panic!("worker down"))
            .await
            .expect_err("panic");
        assert_eq!(err, PoolError::Panicked("worker down".to_owned()));
        assert_eq!(pool.run(|| 5).await, Ok(5));
    }

    #[tokio::test]
    async fn handed_over_permits_are_held_until_dropped() {
        let pool = WorkerPool::new(2);
        let permit = pool.run_with_permit(|permit| permit).await.expect("run");
        assert_eq!(pool.available(), 1);
        drop(permit);
        assert_eq!(pool.available(), 2);
    }
}
