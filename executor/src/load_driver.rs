//! Paces requests at a target requests-per-minute rate through a bounded
//! worker pool, without dropping work and without letting missed ticks
//! compound unboundedly.
//!
//! The state machine is a single `tokio::select!` loop: `pending_work` and
//! `free_workers` are the two halves of a dispatch, `latest_miss` marks the
//! most recent tick the driver could not act on. `work_rx` is read only when
//! the driver has room for more pending work — `select!`'s `if` guard there is
//! the direct analogue of a nilled Go channel. `pool.ready_rx` has no such
//! guard: a worker can finish at any time regardless of whether there is
//! pending work to hand it, and every ready signal must be drained to retire
//! its `in_flight` count, so the arm always runs. The two error channels get
//! their own guards once their sender drops: an unguarded `recv()` on a
//! closed channel resolves to `None` on every poll, which would spin the
//! loop instead of blocking on the arms that still matter.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use exec_common::error::ExecError;
use exec_common::interfaces::{FieldValue, MetricPoint, MetricWriteSession};
use exec_common::model::Work;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::pool::WorkerPool;

/// Below 60 requests/minute the driver prefers a steady 1-second cadence
/// over a longer interval.
pub fn compute_interval(rpm: u32) -> Duration {
    if rpm <= 60 {
        Duration::from_secs(1)
    } else {
        Duration::from_secs_f64(60.0 / rpm as f64)
    }
}

/// Bounds how aggressively a missed tick is made up: at most 10µs sooner
/// than the next regular tick would have landed anyway.
fn catchup_duration(interval: Duration, since_miss: Duration) -> Duration {
    interval
        .saturating_sub(since_miss)
        .min(Duration::from_micros(10))
}

pub struct LoadDriverOutcome {
    pub due_missed: u64,
}

/// Runs one LOAD section to completion: `work_rx`/`work_err_rx` are the
/// section's work stream and its sibling error channel (see
/// `WorkStorage::stream`); `pool` is the already-spawned worker pool shared
/// for the section's duration.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    cancel: CancellationToken,
    rpm: u32,
    mut work_rx: mpsc::Receiver<Work>,
    mut work_err_rx: mpsc::Receiver<String>,
    pool: &mut WorkerPool,
    session: &dyn MetricWriteSession,
    section_id: Uuid,
) -> Result<LoadDriverOutcome, ExecError> {
    let interval_duration = compute_interval(rpm);
    let mut timer = tokio::time::interval_at(Instant::now() + interval_duration, interval_duration);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut pending_work: Option<Work> = None;
    let mut free_workers: VecDeque<usize> = VecDeque::new();
    let mut latest_miss: Option<Instant> = None;
    let mut dispatch_start: HashMap<usize, Instant> = HashMap::new();

    let mut work_stream_open = true;
    let mut pool_errors_open = true;
    let mut work_errors_open = true;
    let mut in_flight: usize = 0;
    let mut due_missed: u64 = 0;

    loop {
        let want_work = pending_work.is_none() && work_stream_open;

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ExecError::Cancelled);
            }

            err = pool.error_rx.recv(), if pool_errors_open => {
                match err {
                    Some(err) => return Err(err),
                    None => pool_errors_open = false,
                }
            }

            err = work_err_rx.recv(), if work_errors_open => {
                match err {
                    Some(err) => return Err(ExecError::Storage(err)),
                    None => work_errors_open = false,
                }
            }

            _ = timer.tick() => {
                if pending_work.is_some() && !free_workers.is_empty() {
                    dispatch(
                        pool,
                        &mut pending_work,
                        &mut free_workers,
                        &mut latest_miss,
                        &mut dispatch_start,
                        &mut timer,
                        interval_duration,
                    ).await;
                    in_flight += 1;
                } else if !work_stream_open && pending_work.is_none() && in_flight == 0 {
                    return Ok(LoadDriverOutcome { due_missed });
                } else {
                    let now = Instant::now();
                    if latest_miss.is_some() {
                        due_missed += 1;
                    }
                    latest_miss = Some(now);
                    timer = tokio::time::interval_at(now + interval_duration, interval_duration);
                    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                }
            }

            idx = pool.ready_rx.recv() => {
                let Some(idx) = idx else {
                    // A worker task exited without reporting an error; treat
                    // it as exhausted input, nothing left to dispatch to it.
                    continue;
                };
                if let Some(start) = dispatch_start.remove(&idx) {
                    let latency_ns = Instant::now().saturating_duration_since(start).as_nanos() as u64;
                    session.write(
                        MetricPoint::new("response")
                            .tag("section-id", section_id.to_string())
                            .field("latency", FieldValue::UInt(latency_ns)),
                    );
                    in_flight = in_flight.saturating_sub(1);
                }
                free_workers.push_back(idx);

                if latest_miss.is_some() && pending_work.is_some() {
                    dispatch(
                        pool,
                        &mut pending_work,
                        &mut free_workers,
                        &mut latest_miss,
                        &mut dispatch_start,
                        &mut timer,
                        interval_duration,
                    ).await;
                    in_flight += 1;
                }
            }

            item = work_rx.recv(), if want_work => {
                match item {
                    Some(work) => {
                        pending_work = Some(work);
                        if latest_miss.is_some() && !free_workers.is_empty() {
                            dispatch(
                                pool,
                                &mut pending_work,
                                &mut free_workers,
                                &mut latest_miss,
                                &mut dispatch_start,
                                &mut timer,
                                interval_duration,
                            ).await;
                            in_flight += 1;
                        }
                    }
                    None => {
                        work_stream_open = false;
                    }
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
    pool: &mut WorkerPool,
    pending_work: &mut Option<Work>,
    free_workers: &mut VecDeque<usize>,
    latest_miss: &mut Option<Instant>,
    dispatch_start: &mut HashMap<usize, Instant>,
    timer: &mut tokio::time::Interval,
    interval_duration: Duration,
) {
    let worker = free_workers.pop_front().expect("dispatch requires a free worker");
    let work = pending_work.take().expect("dispatch requires pending work");
    let now = Instant::now();
    let deadline = now + work.timeout;
    dispatch_start.insert(worker, now);

    pool.dispatch(worker, work, deadline).await;

    match latest_miss.take() {
        Some(miss) => {
            let catchup = catchup_duration(interval_duration, now.saturating_duration_since(miss));
            *timer = tokio::time::interval_at(now + catchup, interval_duration);
        }
        None => {
            *timer = tokio::time::interval_at(now + interval_duration, interval_duration);
        }
    }
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_prefers_one_second_below_60_rpm() {
        assert_eq!(compute_interval(1), Duration::from_secs(1));
        assert_eq!(compute_interval(60), Duration::from_secs(1));
    }

    #[test]
    fn interval_scales_above_60_rpm() {
        assert_eq!(compute_interval(120), Duration::from_millis(500));
        assert_eq!(compute_interval(600), Duration::from_millis(100));
    }

    #[test]
    fn catchup_is_bounded_to_ten_micros() {
        let interval = Duration::from_secs(1);
        assert_eq!(
            catchup_duration(interval, Duration::from_millis(1)),
            Duration::from_micros(10)
        );
    }

    #[test]
    fn catchup_uses_remaining_interval_when_smaller() {
        let interval = Duration::from_micros(5);
        assert_eq!(
            catchup_duration(interval, Duration::from_micros(2)),
            Duration::from_micros(3)
        );
    }

    use std::collections::HashMap;
    use std::sync::Arc;

    use exec_common::http_method::HttpMethod;
    use exec_common::model::{ExpectedValue, Input, Process};
    use httpmock::{Method, MockServer};

    use crate::pool::WorkerPool;
    use crate::test_support::FakeMetricWriteSession;
    use crate::worker::{CompiledTemplate, Worker};

    fn ping_work() -> Work {
        Work {
            id: Uuid::new_v4(),
            input: Input {
                method: HttpMethod::Get,
                path: "/ping".to_owned(),
                headers: HashMap::new(),
                body: Vec::new(),
            },
            timeout: Duration::from_secs(5),
            template_id: None,
            expected_value: Some(ExpectedValue {
                status: 200,
                headers: HashMap::new(),
                body: Vec::new(),
            }),
        }
    }

    /// With 3 workers and 6 items, the work stream exhausts while 2+ workers
    /// are still in flight: the driver must drain every worker's ready signal
    /// before it is allowed to see `in_flight == 0` and return, or it hangs
    /// forever re-arming the timer on every tick.
    #[tokio::test(flavor = "multi_thread")]
    async fn drains_every_in_flight_completion_after_the_work_stream_closes() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(Method::GET).path("/ping");
            then.status(200);
        });

        let target = Process {
            id: "primary".to_owned(),
            hostname: server.address().ip().to_string(),
            port: server.port(),
            image: "n/a".to_owned(),
        };
        let templates: Arc<HashMap<Uuid, CompiledTemplate>> = Arc::new(HashMap::new());
        let client = reqwest::Client::new();
        let worker_count = 3;
        let workers: Vec<Worker> = (0..worker_count)
            .map(|_| Worker::new(client.clone(), target.clone(), templates.clone()))
            .collect();
        let mut pool = WorkerPool::spawn(workers, CancellationToken::new());

        let work_count = 6;
        let (work_tx, work_rx) = mpsc::channel(work_count);
        let (_work_err_tx, work_err_rx) = mpsc::channel(1);
        for _ in 0..work_count {
            work_tx.try_send(ping_work()).expect("channel sized for work_count");
        }
        drop(work_tx);

        let session = FakeMetricWriteSession::default();
        let _outcome = tokio::time::timeout(
            Duration::from_secs(5),
            run(
                CancellationToken::new(),
                6000,
                work_rx,
                work_err_rx,
                &mut pool,
                &session,
                Uuid::new_v4(),
            ),
        )
        .await
        .expect("load driver must not hang once its work stream is exhausted")
        .expect("load driver completes without error");

        pool.close().await;

        let responses = session
            .points
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.measurement == "response")
            .count();
        assert_eq!(responses, work_count);
    }
}
