//! Error kinds surfaced by the core, per the error-handling design.
//!
//! `ExecError` is the fine-grained taxonomy a section (scenario or load) can
//! fail with; `JobError` is what `Executor::execute` returns to its caller,
//! which is always either a setup failure or a section failure wrapped with
//! the section that produced it.

use thiserror::Error;
use uuid::Uuid;

/// A single evaluator mismatch, folded into `ExecError::Mismatch`.
#[derive(Error, Debug)]
pub enum MismatchKind {
    #[error("unmatching status code. expected: {expected}, actual: {actual}")]
    Status { expected: u16, actual: u16 },
    #[error("unmatching header value for key: {key}. expected: {expected}, actual: {actual}")]
    Header {
        key: String,
        expected: String,
        actual: String,
    },
    #[error("unmatching response body. expected: {expected:?}, actual: {actual:?}")]
    Body { expected: Vec<u8>, actual: Vec<u8> },
    #[error("schema not provided, but non-empty body was given")]
    UnexpectedBody,
    #[error("failed to validate body with schema. errors: {0:?}")]
    JsonSchema(Vec<String>),
}

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("setting up resources: {0}")]
    Setup(String),

    #[error("compiling template {template_id}: {source}")]
    TemplateMalformed {
        template_id: Uuid,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("deadline exceeded while waiting for response")]
    Deadline,

    #[error("sending request: {0}")]
    Transport(String),

    #[error("evaluation mismatch: {0}")]
    Mismatch(#[from] MismatchKind),

    #[error("untemplated status code: {0}")]
    UntemplatedStatus(u16),

    #[error("metric sink error: {0}")]
    MetricSink(String),

    #[error("worker pool error: {0}")]
    Worker(String),

    #[error("execution cancelled")]
    Cancelled,

    #[error("template {0} not found")]
    TemplateNotFound(Uuid),
}

/// Error returned from a full job execution, naming the section (if any) that failed.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("setting up resources: {0}")]
    Setup(#[source] ExecError),

    #[error("section {section_id} ({phase}) failed: {source}")]
    Section {
        section_id: Uuid,
        phase: &'static str,
        #[source]
        source: ExecError,
    },
}

impl JobError {
    pub fn message(&self) -> String {
        self.to_string()
    }
}
