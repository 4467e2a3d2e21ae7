//! Traits for every external collaborator the core depends on: job queue
//! ingress, event egress, work/template storage, the container runtime, and
//! the time-series metric sink. Concrete implementations live in the
//! `executor` crate (`executor::adapters`).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::model::{Job, Template, TestEvent, Work};

/// Errors from job-queue ingress. `Empty` is the sentinel meaning "no job is
/// currently available", which the polling loop must not treat as a failure.
#[derive(Error, Debug)]
pub enum PollError {
    #[error("jobs are empty")]
    Empty,
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Returns the next available job and an opaque id used to acknowledge it.
    async fn poll(&self) -> Result<(String, Job), PollError>;
    /// Removes a job from the queue after it has been executed, whatever the outcome.
    async fn mark_as_done(&self, id: &str) -> Result<(), PollError>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: TestEvent) -> Result<(), String>;
}

#[async_trait]
pub trait WorkStorage: Send + Sync {
    /// Eagerly loads every template declared for a section.
    async fn fetch_templates(
        &self,
        task_id: Uuid,
        section_id: Uuid,
    ) -> Result<HashMap<Uuid, Template>, String>;

    /// Lazily streams work items in on-disk order. The returned receiver
    /// closes when the stream is exhausted; the error receiver yields at most
    /// one error before the work stream is abandoned.
    fn stream(
        &self,
        cancel: CancellationToken,
        task_id: Uuid,
        section_id: Uuid,
    ) -> (mpsc::Receiver<Work>, mpsc::Receiver<String>);
}

/// Spec for one container the resource manager asks the runtime to create.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub hostname: String,
    pub port: u16,
    pub cpu_quota: i64,
    pub cpu_period: i64,
    pub memory: i64,
    pub network: String,
}

#[derive(Debug, Clone, Default)]
pub struct PruneReport {
    pub deleted: Vec<String>,
    pub space_reclaimed: u64,
}

/// One decoded container-stats frame, already reduced to the fields the
/// metric collector emits.
#[derive(Debug, Clone, Default)]
pub struct ContainerStat {
    pub container: String,
    pub cpu_total: f64,
    pub cpu_per_core: Vec<f64>,
    pub memory: f64,
    pub net_read: u64,
    pub net_write: u64,
    pub block_read: u64,
    pub block_write: u64,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Fully drains the pull progress stream; the pull is complete only once
    /// the stream ends.
    async fn pull_image(&self, image: &str) -> Result<(), String>;
    /// Creates the container on `spec.network` and returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, String>;
    async fn start_container(&self, id: &str) -> Result<(), String>;
    /// Connects an already-created container to an additional network, used
    /// to put the primary resource on the Executor's test network.
    async fn connect_network(&self, network: &str, container_id: &str) -> Result<(), String>;
    /// Best-effort liveness probe used in place of a blind startup sleep.
    async fn inspect_running(&self, id: &str) -> Result<bool, String>;
    async fn stop_container(&self, id: &str) -> Result<(), String>;
    async fn prune_containers(&self) -> Result<PruneReport, String>;
    async fn prune_images(&self) -> Result<PruneReport, String>;
    /// Streams decoded stats frames for one container until `cancel` fires or
    /// the runtime closes the underlying response.
    fn stats(
        &self,
        cancel: CancellationToken,
        container_id: &str,
    ) -> (mpsc::Receiver<ContainerStat>, mpsc::Receiver<String>);
}

#[derive(Debug, Clone)]
pub enum FieldValue {
    Float(f64),
    UInt(u64),
    Str(String),
}

/// One point written to the time-series sink.
#[derive(Debug, Clone)]
pub struct MetricPoint {
    pub measurement: &'static str,
    pub tags: HashMap<String, String>,
    pub fields: HashMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl MetricPoint {
    pub fn new(measurement: &'static str) -> Self {
        Self {
            measurement,
            tags: HashMap::new(),
            fields: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn tag(mut self, key: &str, value: impl Into<String>) -> Self {
        self.tags.insert(key.to_owned(), value.into());
        self
    }

    pub fn field(mut self, key: &str, value: FieldValue) -> Self {
        self.fields.insert(key.to_owned(), value);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A single buffered writer to the sink, scoped to one `(org, bucket)` pair.
/// Shared as `Arc<dyn MetricWriteSession>` across every task that writes
/// points for a job, so `close` takes `&self` rather than consuming a `Box`
/// and is expected to be idempotent.
#[async_trait]
pub trait MetricWriteSession: Send + Sync {
    /// Non-blocking: buffers `point` for the background drain task.
    fn write(&self, point: MetricPoint);
    async fn flush(&self);
    /// Flushes, then releases the underlying client. Safe to call more than once.
    async fn close(&self);
}

pub trait MetricSink: Send + Sync {
    /// Opens a write session for `(org, bucket)`, plus a channel that yields
    /// the first error encountered by the session's background writer.
    fn write_session(
        &self,
        org: &str,
        bucket: &str,
    ) -> (Arc<dyn MetricWriteSession>, mpsc::Receiver<String>);
}
