//! Sequential driver for a SCENARIO section: pull one work item, run it,
//! record its latency, repeat. The first evaluation failure aborts the
//! section; an exhausted work stream is success.

use exec_common::error::ExecError;
use exec_common::interfaces::{FieldValue, MetricPoint, MetricWriteSession};
use exec_common::model::Work;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::worker::Worker;

pub async fn run(
    cancel: CancellationToken,
    mut work_rx: mpsc::Receiver<Work>,
    mut work_err_rx: mpsc::Receiver<String>,
    worker: &Worker,
    session: &dyn MetricWriteSession,
    section_id: Uuid,
) -> Result<(), ExecError> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(ExecError::Cancelled),

            err = work_err_rx.recv() => {
                if let Some(err) = err {
                    return Err(ExecError::Storage(err));
                }
            }

            item = work_rx.recv() => {
                let Some(work) = item else {
                    return Ok(());
                };

                let deadline = Instant::now() + work.timeout;
                let start = Instant::now();
                worker.do_work(&work, deadline).await?;
                let latency_ns = start.elapsed().as_nanos() as u64;

                session.write(
                    MetricPoint::new("response")
                        .tag("section-id", section_id.to_string())
                        .field("latency", FieldValue::UInt(latency_ns)),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use exec_common::http_method::HttpMethod;
    use exec_common::model::{ExpectedValue, Input, Process};
    use httpmock::{Method, MockServer};

    use crate::test_support::FakeMetricWriteSession;
    use crate::worker::CompiledTemplate;

    use super::*;

    fn make_work(path: &str, expect_status: u16) -> Work {
        Work {
            id: Uuid::new_v4(),
            input: Input {
                method: HttpMethod::Get,
                path: path.to_owned(),
                headers: HashMap::new(),
                body: Vec::new(),
            },
            timeout: Duration::from_secs(5),
            template_id: None,
            expected_value: Some(ExpectedValue {
                status: expect_status,
                headers: HashMap::new(),
                body: Vec::new(),
            }),
        }
    }

    #[tokio::test]
    async fn runs_every_item_and_records_a_latency_point_each() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(Method::GET).path("/a");
            then.status(200);
        });
        server.mock(|when, then| {
            when.method(Method::GET).path("/b");
            then.status(200);
        });

        let target = Process {
            id: "primary".to_owned(),
            hostname: server.address().ip().to_string(),
            port: server.port(),
            image: "n/a".to_owned(),
        };
        let templates: Arc<HashMap<Uuid, CompiledTemplate>> = Arc::new(HashMap::new());
        let worker = Worker::new(reqwest::Client::new(), target, templates);

        let (work_tx, work_rx) = mpsc::channel(2);
        let (_work_err_tx, work_err_rx) = mpsc::channel(1);
        work_tx.try_send(make_work("/a", 200)).unwrap();
        work_tx.try_send(make_work("/b", 200)).unwrap();
        drop(work_tx);

        let session = FakeMetricWriteSession::default();
        let section_id = Uuid::new_v4();
        run(CancellationToken::new(), work_rx, work_err_rx, &worker, &session, section_id)
            .await
            .expect("scenario completes once the work stream is exhausted");

        let points = session.points.lock().unwrap();
        assert_eq!(points.len(), 2);
        assert!(points.iter().all(|p| p.measurement == "response"));
    }

    #[tokio::test]
    async fn aborts_on_the_first_evaluation_mismatch() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(Method::GET).path("/a");
            then.status(500);
        });

        let target = Process {
            id: "primary".to_owned(),
            hostname: server.address().ip().to_string(),
            port: server.port(),
            image: "n/a".to_owned(),
        };
        let templates: Arc<HashMap<Uuid, CompiledTemplate>> = Arc::new(HashMap::new());
        let worker = Worker::new(reqwest::Client::new(), target, templates);

        let (work_tx, work_rx) = mpsc::channel(1);
        let (_work_err_tx, work_err_rx) = mpsc::channel(1);
        work_tx.try_send(make_work("/a", 200)).unwrap();
        drop(work_tx);

        let session = FakeMetricWriteSession::default();
        let result = run(
            CancellationToken::new(),
            work_rx,
            work_err_rx,
            &worker,
            &session,
            Uuid::new_v4(),
        )
        .await;

        assert!(result.is_err());
        assert!(session.points.lock().unwrap().is_empty());
    }
}
