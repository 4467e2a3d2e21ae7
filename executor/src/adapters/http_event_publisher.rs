//! `EventPublisher` over a reqwest POST of a `TestEvent`.

use async_trait::async_trait;
use exec_common::interfaces::EventPublisher;
use exec_common::model::TestEvent;

pub struct HttpEventPublisher {
    client: reqwest::Client,
    url: String,
}

impl HttpEventPublisher {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl EventPublisher for HttpEventPublisher {
    async fn publish(&self, event: TestEvent) -> Result<(), String> {
        self.client
            .post(&self.url)
            .json(&event)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}
