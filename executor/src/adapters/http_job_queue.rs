//! `JobQueue` over a reqwest long-poll against a submissions endpoint.

use async_trait::async_trait;
use exec_common::interfaces::{JobQueue, PollError};
use exec_common::model::Job;
use serde::Deserialize;

pub struct HttpJobQueue {
    client: reqwest::Client,
    base_url: String,
}

impl HttpJobQueue {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[derive(Deserialize)]
struct JobEnvelope {
    id: String,
    job: Job,
}

#[async_trait]
impl JobQueue for HttpJobQueue {
    async fn poll(&self) -> Result<(String, Job), PollError> {
        let url = format!("{}/next", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PollError::Other(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Err(PollError::Empty);
        }

        let response = response
            .error_for_status()
            .map_err(|e| PollError::Other(e.to_string()))?;
        let envelope: JobEnvelope = response
            .json()
            .await
            .map_err(|e| PollError::Other(e.to_string()))?;

        Ok((envelope.id, envelope.job))
    }

    async fn mark_as_done(&self, id: &str) -> Result<(), PollError> {
        let url = format!("{}/{}/ack", self.base_url, id);
        self.client
            .post(&url)
            .send()
            .await
            .map_err(|e| PollError::Other(e.to_string()))?
            .error_for_status()
            .map_err(|e| PollError::Other(e.to_string()))?;
        Ok(())
    }
}
