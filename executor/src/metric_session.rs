//! The execution-side half of `MetricWriteSession`: a watcher that turns the
//! session's first reported write error into cancellation of the enclosing
//! job, per the "first error cancels execution" policy.

use std::sync::Arc;

use exec_common::interfaces::{MetricSink, MetricWriteSession};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Opens a write session scoped to `org`, with the job's `(task_id,
/// submission_id)` pair naming the bucket, and spawns the watcher task.
/// Returns the session (for `Write`/`Flush`/`Close`, shared across every
/// task that writes points for the job) and the watcher's join handle.
pub fn open(
    sink: &dyn MetricSink,
    org: &str,
    task_id: Uuid,
    submission_id: Uuid,
    cancel: CancellationToken,
) -> (Arc<dyn MetricWriteSession>, tokio::task::JoinHandle<Option<String>>) {
    let bucket = format!("{task_id}-{submission_id}");
    let (session, error_rx) = sink.write_session(org, &bucket);
    let watcher = tokio::spawn(watch(error_rx, cancel));
    (session, watcher)
}

async fn watch(mut error_rx: mpsc::Receiver<String>, cancel: CancellationToken) -> Option<String> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        err = error_rx.recv() => {
            if let Some(err) = &err {
                cancel.cancel();
                tracing::warn!("metric sink write session failed, cancelling execution: {err}");
            }
            err
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::test_support::FakeMetricSink;

    use super::*;

    #[tokio::test]
    async fn opens_a_session_scoped_to_org_and_job_bucket() {
        let sink = FakeMetricSink;
        let cancel = CancellationToken::new();
        let task_id = Uuid::new_v4();
        let submission_id = Uuid::new_v4();

        let (session, watcher) = open(&sink, "my-org", task_id, submission_id, cancel.clone());
        session.write(exec_common::interfaces::MetricPoint::new("label"));
        session.close().await;

        cancel.cancel();
        watcher.await.expect("watcher task does not panic");
    }

    #[tokio::test]
    async fn an_error_from_the_session_cancels_the_token() {
        let (error_tx, error_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let watcher = tokio::spawn(watch(error_rx, cancel.clone()));
        error_tx.send("write failed".to_owned()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .expect("watcher must observe the error promptly")
            .expect("watcher task does not panic");

        assert!(cancel.is_cancelled());
    }
}
