//! Fake collaborators shared by unit tests across this crate, so each
//! module's test can drive the orchestration logic without Docker, a real
//! queue, or a real metric sink.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use exec_common::interfaces::{
    ContainerRuntime, ContainerSpec, ContainerStat, EventPublisher, JobQueue, MetricPoint,
    MetricSink, MetricWriteSession, PollError, PruneReport, WorkStorage,
};
use exec_common::model::{Job, Template, TestEvent, Work};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A `ContainerRuntime` that never talks to Docker: every call succeeds, and
/// `stats` yields no frames (its receivers close as soon as they're built).
#[derive(Default)]
pub struct FakeRuntime {
    pub created: Mutex<Vec<ContainerSpec>>,
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn pull_image(&self, _image: &str) -> Result<(), String> {
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, String> {
        self.created.lock().unwrap().push(spec.clone());
        Ok(format!("container-{}", spec.name))
    }

    async fn start_container(&self, _id: &str) -> Result<(), String> {
        Ok(())
    }

    async fn connect_network(&self, _network: &str, _container_id: &str) -> Result<(), String> {
        Ok(())
    }

    async fn inspect_running(&self, _id: &str) -> Result<bool, String> {
        Ok(true)
    }

    async fn stop_container(&self, _id: &str) -> Result<(), String> {
        Ok(())
    }

    async fn prune_containers(&self) -> Result<PruneReport, String> {
        Ok(PruneReport::default())
    }

    async fn prune_images(&self) -> Result<PruneReport, String> {
        Ok(PruneReport::default())
    }

    fn stats(
        &self,
        _cancel: CancellationToken,
        _container_id: &str,
    ) -> (mpsc::Receiver<ContainerStat>, mpsc::Receiver<String>) {
        let (_stat_tx, stat_rx) = mpsc::channel(1);
        let (_err_tx, err_rx) = mpsc::channel(1);
        (stat_rx, err_rx)
    }
}

/// A `WorkStorage` backed by in-memory vectors, configured per `(task_id, section_id)`.
#[derive(Default)]
pub struct FakeWorkStorage {
    templates: HashMap<(Uuid, Uuid), HashMap<Uuid, Template>>,
    work: HashMap<(Uuid, Uuid), Vec<Work>>,
}

impl FakeWorkStorage {
    pub fn with_work(mut self, task_id: Uuid, section_id: Uuid, work: Vec<Work>) -> Self {
        self.work.insert((task_id, section_id), work);
        self
    }
}

#[async_trait]
impl WorkStorage for FakeWorkStorage {
    async fn fetch_templates(
        &self,
        task_id: Uuid,
        section_id: Uuid,
    ) -> Result<HashMap<Uuid, Template>, String> {
        Ok(self
            .templates
            .get(&(task_id, section_id))
            .cloned()
            .unwrap_or_default())
    }

    fn stream(
        &self,
        _cancel: CancellationToken,
        task_id: Uuid,
        section_id: Uuid,
    ) -> (mpsc::Receiver<Work>, mpsc::Receiver<String>) {
        let items = self.work.get(&(task_id, section_id)).cloned().unwrap_or_default();
        let (work_tx, work_rx) = mpsc::channel(items.len().max(1));
        let (_err_tx, err_rx) = mpsc::channel(1);
        for item in items {
            let _ = work_tx.try_send(item);
        }
        (work_rx, err_rx)
    }
}

/// Buffers written points in memory; `flush`/`close` just record that they ran.
#[derive(Default)]
pub struct FakeMetricWriteSession {
    pub points: Mutex<Vec<MetricPoint>>,
    pub flush_count: Mutex<u32>,
    pub closed: Mutex<bool>,
}

#[async_trait]
impl MetricWriteSession for FakeMetricWriteSession {
    fn write(&self, point: MetricPoint) {
        self.points.lock().unwrap().push(point);
    }

    async fn flush(&self) {
        *self.flush_count.lock().unwrap() += 1;
    }

    async fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

/// Hands out the same session for every `(org, bucket)`, with no write errors.
#[derive(Default)]
pub struct FakeMetricSink;

impl MetricSink for FakeMetricSink {
    fn write_session(
        &self,
        _org: &str,
        _bucket: &str,
    ) -> (std::sync::Arc<dyn MetricWriteSession>, mpsc::Receiver<String>) {
        let (_err_tx, err_rx) = mpsc::channel(1);
        (std::sync::Arc::new(FakeMetricWriteSession::default()), err_rx)
    }
}

/// Hands out a fixed sequence of jobs, then `PollError::Empty` forever.
#[derive(Default)]
pub struct FakeJobQueue {
    jobs: Mutex<VecDeque<Job>>,
    pub acked: Mutex<Vec<String>>,
}

impl FakeJobQueue {
    pub fn with_jobs(jobs: Vec<Job>) -> Self {
        Self {
            jobs: Mutex::new(jobs.into()),
            acked: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl JobQueue for FakeJobQueue {
    async fn poll(&self) -> Result<(String, Job), PollError> {
        match self.jobs.lock().unwrap().pop_front() {
            Some(job) => Ok((job.submission.id.to_string(), job)),
            None => Err(PollError::Empty),
        }
    }

    async fn mark_as_done(&self, id: &str) -> Result<(), PollError> {
        self.acked.lock().unwrap().push(id.to_owned());
        Ok(())
    }
}

/// Records every published event for later inspection.
#[derive(Default)]
pub struct FakeEventPublisher {
    pub published: Mutex<Vec<TestEvent>>,
}

#[async_trait]
impl EventPublisher for FakeEventPublisher {
    async fn publish(&self, event: TestEvent) -> Result<(), String> {
        self.published.lock().unwrap().push(event);
        Ok(())
    }
}
