//! Group run integration tests
//!
//! Runs actions across groups of local hosts and checks fan-out, error
//! routing, timeouts and closing.

#![cfg(unix)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;

use herd_core::local::LocalHost;
use herd_core::traits::Host;
use herd_core::vars::{int_var, Var};
use herd_orchestrator::{from_fn, handlers, ErrorHandler, Group, Task, TaskError};

fn local_hosts(n: usize) -> Vec<Arc<dyn Host>> {
    (0..n)
        .map(|i| Arc::new(LocalHost::new(format!("host-{}", i))) as Arc<dyn Host>)
        .collect()
}

/// Handler that records every failure it sees
fn recording() -> (ErrorHandler, Arc<Mutex<Vec<TaskError>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: ErrorHandler = Arc::new(move |err: TaskError| sink.lock().unwrap().push(err));
    (handler, seen)
}

#[tokio::test]
async fn test_every_host_reports_once() {
    for n in [0usize, 1, 5] {
        let (handler, seen) = recording();
        let group = Group::new(local_hosts(n)).with_error_handler(handler);
        let summary = group
            .run(
                "count",
                from_fn(|_cancel: CancellationToken, host: Arc<dyn Host>| async move {
                    host.set_var("runs", Var::Int(int_var(host.as_ref(), "runs") + 1));
                    Ok(())
                }),
            )
            .await;

        assert_eq!(summary.hosts, n);
        assert_eq!(summary.succeeded, n);
        assert!(summary.is_success());
        assert!(seen.lock().unwrap().is_empty());
        for host in group.hosts() {
            assert_eq!(int_var(host.as_ref(), "runs"), 1);
        }
    }
}

#[tokio::test]
async fn test_empty_group_completes_immediately() {
    let group = Group::new(Vec::new()).with_timeout(Duration::from_secs(3600));
    let started = Instant::now();
    let summary = group
        .run(
            "noop",
            from_fn(|_c: CancellationToken, _h: Arc<dyn Host>| async { Ok(()) }),
        )
        .await;
    assert_eq!(summary.hosts, 0);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_failing_host_does_not_block_siblings() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (handler, seen) = recording();
    let group = Group::new(local_hosts(4)).with_error_handler(handler);
    let summary = group
        .run(
            "flaky",
            from_fn(|_cancel: CancellationToken, host: Arc<dyn Host>| async move {
                if host.name() == "host-2" {
                    return Err(anyhow!("boom"));
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                host.set_var("done", Var::Bool(true));
                Ok(())
            }),
        )
        .await;

    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, vec!["host-2".to_string()]);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].host, "host-2");
    assert_eq!(seen[0].task, "flaky");
    assert_eq!(seen[0].to_string(), "(host-2) flaky: boom");

    for host in group.hosts() {
        let done = host.var("done").is_some();
        assert_eq!(done, host.name() != "host-2");
    }
}

#[tokio::test]
async fn test_timeout_cancels_all_hosts() {
    let (handler, seen) = recording();
    let group = Group::new(local_hosts(3))
        .with_error_handler(handler)
        .with_timeout(Duration::from_millis(50));

    let started = Instant::now();
    let summary = group
        .run(
            "wait",
            from_fn(|cancel: CancellationToken, _host: Arc<dyn Host>| async move {
                cancel.cancelled().await;
                Err(anyhow!("cancelled"))
            }),
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(summary.failed.len(), 3);
    assert_eq!(seen.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_task_overrides_group_settings() {
    let (group_handler, group_seen) = recording();
    let (task_handler, task_seen) = recording();
    let group = Group::new(local_hosts(2))
        .with_error_handler(group_handler)
        .with_timeout(Duration::from_secs(3600));

    let task = Task::new(
        "override",
        from_fn(|cancel: CancellationToken, _host: Arc<dyn Host>| async move {
            cancel.cancelled().await;
            Err(anyhow!("timed out"))
        }),
    )
    .with_error_handler(task_handler)
    .with_timeout(Duration::from_millis(20));

    let summary = group.run_task(task).await;
    assert_eq!(summary.task, "override");
    assert_eq!(summary.failed.len(), 2);
    assert!(group_seen.lock().unwrap().is_empty());
    assert_eq!(task_seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancelled_command_reports_cancellation() {
    let (handler, seen) = recording();
    let group = Group::new(local_hosts(2))
        .with_error_handler(handler)
        .with_timeout(Duration::from_millis(100));

    let started = Instant::now();
    group
        .run(
            "sleep",
            from_fn(|cancel: CancellationToken, host: Arc<dyn Host>| async move {
                let mut cmd = host.new_command().await?;
                cmd.run_with_cancel(&cancel, "sleep 30").await?;
                Ok(())
            }),
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(10));
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    for err in seen.iter() {
        assert!(matches!(
            err.source.downcast_ref::<herd_core::CommandError>(),
            Some(herd_core::CommandError::Cancelled)
        ));
    }
}

#[tokio::test]
#[should_panic(expected = "(host-0) fatal: nope")]
async fn test_default_handler_panics() {
    let group = Group::new(local_hosts(1));
    group
        .run(
            "fatal",
            from_fn(|_c: CancellationToken, _h: Arc<dyn Host>| async { Err(anyhow!("nope")) }),
        )
        .await;
}

#[tokio::test]
async fn test_ignore_handler_continues() {
    let group = Group::new(local_hosts(2)).with_error_handler(handlers::ignore());
    let summary = group
        .run(
            "ignored",
            from_fn(|_c: CancellationToken, _h: Arc<dyn Host>| async { Err(anyhow!("nope")) }),
        )
        .await;
    assert_eq!(summary.failed.len(), 2);
}

#[tokio::test]
async fn test_close_all_hosts() {
    let hosts: Vec<Arc<LocalHost>> = (0..3)
        .map(|i| Arc::new(LocalHost::new(format!("h{}", i))))
        .collect();
    let group = Group::new(
        hosts
            .iter()
            .map(|h| Arc::clone(h) as Arc<dyn Host>)
            .collect(),
    );
    group.close().await.unwrap();
    assert!(hosts.iter().all(|h| h.is_closed()));
    // closing twice is harmless
    group.close().await.unwrap();
}
