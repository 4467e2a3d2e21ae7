//! Process-fatal errors: failures that abort the server loop itself, as
//! opposed to `exec_common::error::JobError`, which is recovered from by
//! publishing a failed `TestEvent` and moving on to the next job.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("job queue error: {0}")]
    Queue(String),

    #[error("failed to start serving health/metrics: {0}")]
    Serve(#[source] std::io::Error),
}
