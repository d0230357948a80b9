use std::future::Future;
use std::pin::Pin;

use tokio::task::JoinHandle;

use crate::{AppError, AppResult};

pub type LoopTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Seam every background job of the looper goes through: scan sessions, back-off timers,
/// transfer processes and the controller task itself.
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, task_name: &'static str, task: LoopTask) -> AppResult<JoinHandle<()>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTaskSpawner;

impl TaskSpawner for TokioTaskSpawner {
    fn spawn(&self, task_name: &'static str, task: LoopTask) -> AppResult<JoinHandle<()>> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(
                AppError::new("task_runtime_unavailable", "Background task runtime unavailable")
                    .with_context("task", task_name),
            );
        }

        tracing::trace!(event = "loop_task_spawned", task = task_name);
        Ok(tokio::spawn(task))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTaskSpawner;

impl TaskSpawner for NoopTaskSpawner {
    fn spawn(&self, task_name: &'static str, _task: LoopTask) -> AppResult<JoinHandle<()>> {
        Err(
            AppError::new("task_runtime_unavailable", "Background task runtime unavailable")
                .with_context("task", task_name),
        )
    }
}

#[cfg(test)]
#[path = "../../tests/runtime/task_spawner_tests.rs"]
mod tests;
