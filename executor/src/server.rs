//! The outer run loop: poll the job queue, execute, ack, publish the
//! outcome. Runs forever until the process is killed; the health/metrics
//! router is served from a sibling task in `main`.

use std::time::Instant;

use exec_common::health::HealthHandle;
use exec_common::interfaces::{EventPublisher, JobQueue, PollError};
use exec_common::model::TestEvent;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::executor::Executor;

/// Polls forever. A queue error or an empty queue both back off by
/// `poll_interval` before trying again; only a queue error is logged.
pub async fn run(
    queue: &dyn JobQueue,
    events: &dyn EventPublisher,
    executor: &Executor,
    poll_interval: std::time::Duration,
    liveness: HealthHandle,
) -> ! {
    loop {
        liveness.report_healthy().await;

        let (ack_id, job) = match queue.poll().await {
            Ok(polled) => polled,
            Err(PollError::Empty) => {
                tokio::time::sleep(poll_interval).await;
                continue;
            }
            Err(PollError::Other(err)) => {
                warn!("polling job queue: {err}");
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        let submission_id = job.submission.id;
        let started = Instant::now();
        let result = executor.execute(job).await;
        let took = started.elapsed();

        if let Err(err) = queue.mark_as_done(&ack_id).await {
            warn!("acking job {ack_id}: {err}");
        }

        let event = to_event(submission_id, took, result);
        if let Err(err) = events.publish(event).await {
            error!("publishing test event for job {submission_id}: {err}");
        }
    }
}

fn to_event(
    submission_id: Uuid,
    took: std::time::Duration,
    result: Result<(), exec_common::error::JobError>,
) -> TestEvent {
    match result {
        Ok(()) => {
            info!("job {submission_id} completed in {took:?}");
            TestEvent {
                id: submission_id,
                success: true,
                took,
                extra: String::new(),
            }
        }
        Err(err) => {
            warn!("job {submission_id} failed after {took:?}: {err}");
            TestEvent {
                id: submission_id,
                success: false,
                took,
                extra: err.message(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use exec_common::health::HealthRegistry;
    use exec_common::model::{Job, Submission};

    use crate::test_support::{FakeEventPublisher, FakeJobQueue, FakeMetricSink, FakeRuntime, FakeWorkStorage};

    use super::*;

    fn executor() -> Executor {
        Executor {
            runtime: Arc::new(FakeRuntime::default()),
            storage: Arc::new(FakeWorkStorage::default()),
            metric_sink: Arc::new(FakeMetricSink),
            http_client: reqwest::Client::new(),
            resource_manager: crate::resource_manager::ResourceManager::new(
                Arc::new(FakeRuntime::default()),
                "exec-net".to_owned(),
                "test-net".to_owned(),
                "docker.io".to_owned(),
                "acme".to_owned(),
            ),
            worker_count: 1,
            metric_sink_org: "org".to_owned(),
        }
    }

    /// A job with no resources fails setup immediately, which is enough to
    /// exercise the poll/execute/ack/publish cycle without standing up
    /// containers or an HTTP target.
    fn unrunnable_job() -> Job {
        Job {
            task_id: Uuid::new_v4(),
            submission: Submission {
                id: Uuid::new_v4(),
                repository: "org/repo".to_owned(),
                commit_hash: "abc123".to_owned(),
            },
            resources: Vec::new(),
            sections: Vec::new(),
        }
    }

    #[tokio::test]
    async fn polls_executes_acks_and_publishes_each_job() {
        let job = unrunnable_job();
        let submission_id = job.submission.id;
        let queue = FakeJobQueue::with_jobs(vec![job]);
        let events = Arc::new(FakeEventPublisher::default());
        let executor = executor();
        let liveness = HealthRegistry::new("liveness")
            .register("server".to_string(), time::Duration::seconds(60))
            .await;

        let events_for_task = events.clone();
        let handle = tokio::spawn(async move {
            run(&queue, events_for_task.as_ref(), &executor, Duration::from_millis(10), liveness).await
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if !events.published.lock().unwrap().is_empty() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("the job should be polled, executed and its event published");

        handle.abort();

        let published = events.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, submission_id);
        assert!(!published[0].success);
    }

    #[test]
    fn to_event_reports_the_job_error_message() {
        let submission_id = Uuid::new_v4();
        let err = exec_common::error::JobError::Setup(exec_common::error::ExecError::Setup(
            "no resource in job is marked as primary".to_owned(),
        ));
        let event = to_event(submission_id, Duration::from_millis(5), Err(err));
        assert!(!event.success);
        assert!(event.extra.contains("no resource in job is marked as primary"));
    }
}
