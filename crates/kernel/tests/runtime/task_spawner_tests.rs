use super::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[tokio::test]
async fn tokio_spawner_should_run_task() {
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    let handle = TokioTaskSpawner
        .spawn(
            "flag",
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
            }),
        )
        .expect("spawn inside runtime");

    handle.await.expect("task should finish");
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn tokio_spawner_should_fail_outside_runtime() {
    let error = TokioTaskSpawner
        .spawn("outside", Box::pin(async {}))
        .expect_err("no runtime available");

    assert_eq!(error.code, "task_runtime_unavailable");
    assert_eq!(error.context_value("task"), Some("outside"));
}

#[tokio::test]
async fn noop_spawner_should_reject_every_task() {
    let error = NoopTaskSpawner
        .spawn("noop", Box::pin(async {}))
        .expect_err("noop never spawns");

    assert_eq!(error.code, "task_runtime_unavailable");
}
