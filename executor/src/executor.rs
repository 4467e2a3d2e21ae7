//! The core orchestrator: sequences resource setup, metric collection, and
//! each section's scenario/load driver for one job, then tears down
//! unconditionally.

use std::collections::HashMap;
use std::sync::Arc;

use exec_common::error::{ExecError, JobError};
use exec_common::interfaces::{
    ContainerRuntime, FieldValue, MetricPoint, MetricSink, MetricWriteSession, WorkStorage,
};
use exec_common::model::{Job, Process, Section, SectionType, Template};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::metric_collector;
use crate::metric_session;
use crate::pool::WorkerPool;
use crate::resource_manager::{ResourceManager, ResourceSetup};
use crate::worker::{compile_template, CompiledTemplate, Worker};
use crate::{load_driver, scenario};

pub struct Executor {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub storage: Arc<dyn WorkStorage>,
    pub metric_sink: Arc<dyn MetricSink>,
    pub http_client: reqwest::Client,
    pub resource_manager: ResourceManager,
    pub worker_count: usize,
    pub metric_sink_org: String,
}

impl Executor {
    /// Runs one job end to end: setup, section-by-section execution,
    /// teardown. Teardown always runs, even when setup or a section fails.
    pub async fn execute(&self, job: Job) -> Result<(), JobError> {
        let cancel = CancellationToken::new();

        let setup = self
            .resource_manager
            .setup(job.task_id, &job.submission, &job.resources)
            .await
            .map_err(JobError::Setup)?;

        let result = self.run_job(&job, &setup, cancel).await;

        self.resource_manager.teardown(&setup.container_ids).await;

        result
    }

    async fn run_job(
        &self,
        job: &Job,
        setup: &ResourceSetup,
        cancel: CancellationToken,
    ) -> Result<(), JobError> {
        let (session, session_watcher) = metric_session::open(
            self.metric_sink.as_ref(),
            &self.metric_sink_org,
            job.task_id,
            job.submission.id,
            cancel.clone(),
        );

        let (collector_handles, collector_err_rx) = metric_collector::start(
            cancel.clone(),
            self.runtime.clone(),
            setup.container_ids.clone(),
            session.clone(),
        );
        let collector_watcher = tokio::spawn(cancel_on_first_error(collector_err_rx, cancel.clone()));

        let job_result = self
            .run_sections(job, &setup.primary, session.as_ref(), cancel.clone())
            .await;

        cancel.cancel();
        for handle in collector_handles {
            let _ = handle.await;
        }
        collector_watcher.abort();
        session_watcher.abort();
        session.close().await;

        job_result
    }

    async fn run_sections(
        &self,
        job: &Job,
        primary: &Process,
        session: &dyn MetricWriteSession,
        cancel: CancellationToken,
    ) -> Result<(), JobError> {
        for section in &job.sections {
            self.run_section(job.task_id, section, primary, session, cancel.clone())
                .await
                .map_err(|source| JobError::Section {
                    section_id: section.id,
                    phase: phase_name(source.phase_hint(), section.kind),
                    source: source.error,
                })?;
        }
        Ok(())
    }

    async fn run_section(
        &self,
        task_id: Uuid,
        section: &Section,
        primary: &Process,
        session: &dyn MetricWriteSession,
        cancel: CancellationToken,
    ) -> Result<(), SectionFailure> {
        label(session, section.id, "start-exec");

        let templates = self
            .storage
            .fetch_templates(task_id, section.id)
            .await
            .map_err(|e| SectionFailure::setup(ExecError::Storage(e)))?;
        let compiled = compile_templates(&templates).map_err(SectionFailure::compile)?;
        let templates = Arc::new(compiled);

        let (work_rx, work_err_rx) = self.storage.stream(cancel.clone(), task_id, section.id);

        label(session, section.id, "start-request");

        let result = match section.kind {
            SectionType::Scenario => {
                let worker = Worker::new(self.http_client.clone(), primary.clone(), templates);
                scenario::run(cancel.clone(), work_rx, work_err_rx, &worker, session, section.id).await
            }
            SectionType::Load => {
                self.run_load_section(section, primary, templates, work_rx, work_err_rx, session, cancel)
                    .await
            }
        };

        label(session, section.id, "request-done");
        session.flush().await;

        result.map_err(SectionFailure::run)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_load_section(
        &self,
        section: &Section,
        primary: &Process,
        templates: Arc<HashMap<Uuid, CompiledTemplate>>,
        work_rx: mpsc::Receiver<exec_common::model::Work>,
        work_err_rx: mpsc::Receiver<String>,
        session: &dyn MetricWriteSession,
        cancel: CancellationToken,
    ) -> Result<(), ExecError> {
        let pool_cancel = cancel.child_token();
        let workers: Vec<Worker> = (0..self.worker_count.max(1))
            .map(|_| Worker::new(self.http_client.clone(), primary.clone(), templates.clone()))
            .collect();
        let mut pool = WorkerPool::spawn(workers, pool_cancel);

        let outcome = load_driver::run(
            cancel,
            section.rpm,
            work_rx,
            work_err_rx,
            &mut pool,
            session,
            section.id,
        )
        .await;

        pool.close().await;

        match outcome {
            Ok(outcome) => {
                tracing::info!(
                    section_id = %section.id,
                    due_missed = outcome.due_missed,
                    "load section complete"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

fn label(session: &dyn MetricWriteSession, section_id: Uuid, label: &'static str) {
    session.write(
        MetricPoint::new("label")
            .tag("section-id", section_id.to_string())
            .field("label", FieldValue::Str(label.to_owned())),
    );
}

fn compile_templates(
    templates: &HashMap<Uuid, Template>,
) -> Result<HashMap<Uuid, CompiledTemplate>, ExecError> {
    let mut compiled = HashMap::with_capacity(templates.len());
    for (id, template) in templates {
        compiled.insert(*id, compile_template(template)?);
    }
    Ok(compiled)
}

async fn cancel_on_first_error(mut error_rx: mpsc::Receiver<String>, cancel: CancellationToken) {
    if let Some(err) = error_rx.recv().await {
        tracing::warn!("metric collector failed, cancelling execution: {err}");
        cancel.cancel();
    }
}

/// Which phase within a section produced the failure, for `JobError::Section`'s `phase` field.
enum Phase {
    FetchTemplates,
    CompileTemplates,
    Run,
}

struct SectionFailure {
    phase: Phase,
    error: ExecError,
}

impl SectionFailure {
    fn setup(error: ExecError) -> Self {
        Self {
            phase: Phase::FetchTemplates,
            error,
        }
    }
    fn compile(error: ExecError) -> Self {
        Self {
            phase: Phase::CompileTemplates,
            error,
        }
    }
    fn run(error: ExecError) -> Self {
        Self {
            phase: Phase::Run,
            error,
        }
    }
    fn phase_hint(&self) -> &Phase {
        &self.phase
    }
}

fn phase_name(phase: &Phase, kind: SectionType) -> &'static str {
    match phase {
        Phase::FetchTemplates => "fetch_templates",
        Phase::CompileTemplates => "compile_templates",
        Phase::Run => match kind {
            SectionType::Scenario => "scenario",
            SectionType::Load => "load",
        },
    }
}
