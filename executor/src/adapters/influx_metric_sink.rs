//! `MetricSink` over a buffered async line-protocol writer, matching an
//! InfluxDB-backed write session: points are buffered non-blocking and
//! drained by a background task on `Flush`/`Close`/buffer pressure.

use std::sync::Arc;

use exec_common::interfaces::{FieldValue, MetricPoint, MetricSink, MetricWriteSession};
use tokio::sync::{mpsc, oneshot};

/// Points are buffered until this many are pending, at which point the
/// writer flushes proactively rather than waiting for an explicit `Flush`.
const AUTO_FLUSH_THRESHOLD: usize = 500;

pub struct InfluxMetricSink {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl InfluxMetricSink {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            token,
        }
    }
}

impl MetricSink for InfluxMetricSink {
    fn write_session(
        &self,
        org: &str,
        bucket: &str,
    ) -> (Arc<dyn MetricWriteSession>, mpsc::Receiver<String>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(1024);
        let (error_tx, error_rx) = mpsc::channel(4);

        let url = format!(
            "{}/api/v2/write?org={}&bucket={}",
            self.base_url, org, bucket
        );
        tokio::spawn(run_writer(cmd_rx, self.client.clone(), url, self.token.clone(), error_tx));

        (Arc::new(InfluxWriteSession { cmd_tx }), error_rx)
    }
}

enum Command {
    Write(MetricPoint),
    Flush(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

struct InfluxWriteSession {
    cmd_tx: mpsc::Sender<Command>,
}

#[async_trait::async_trait]
impl MetricWriteSession for InfluxWriteSession {
    fn write(&self, point: MetricPoint) {
        // Non-blocking by design: a full buffer drops the point rather than
        // stalling the caller, matching the "buffers for the background
        // drain task" contract.
        let _ = self.cmd_tx.try_send(Command::Write(point));
    }

    async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Close(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

async fn run_writer(
    mut cmd_rx: mpsc::Receiver<Command>,
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    error_tx: mpsc::Sender<String>,
) {
    let mut buffer: Vec<MetricPoint> = Vec::new();

    while let Some(command) = cmd_rx.recv().await {
        match command {
            Command::Write(point) => {
                buffer.push(point);
                if buffer.len() >= AUTO_FLUSH_THRESHOLD {
                    if let Err(err) = send_batch(&client, &url, token.as_deref(), &mut buffer).await {
                        let _ = error_tx.send(err).await;
                    }
                }
            }
            Command::Flush(ack) => {
                if let Err(err) = send_batch(&client, &url, token.as_deref(), &mut buffer).await {
                    let _ = error_tx.send(err).await;
                }
                let _ = ack.send(());
            }
            Command::Close(ack) => {
                if let Err(err) = send_batch(&client, &url, token.as_deref(), &mut buffer).await {
                    let _ = error_tx.send(err).await;
                }
                let _ = ack.send(());
                return;
            }
        }
    }
}

async fn send_batch(
    client: &reqwest::Client,
    url: &str,
    token: Option<&str>,
    buffer: &mut Vec<MetricPoint>,
) -> Result<(), String> {
    if buffer.is_empty() {
        return Ok(());
    }

    let body = buffer
        .iter()
        .map(to_line_protocol)
        .collect::<Vec<_>>()
        .join("\n");

    let mut request = client.post(url).body(body);
    if let Some(token) = token {
        request = request.header("Authorization", format!("Token {token}"));
    }

    request
        .send()
        .await
        .map_err(|e| e.to_string())?
        .error_for_status()
        .map_err(|e| e.to_string())?;

    buffer.clear();
    Ok(())
}

fn to_line_protocol(point: &MetricPoint) -> String {
    let tags: String = point
        .tags
        .iter()
        .map(|(k, v)| format!(",{}={}", escape(k), escape(v)))
        .collect();
    let fields = point
        .fields
        .iter()
        .map(|(k, v)| format!("{}={}", escape(k), field_value(v)))
        .collect::<Vec<_>>()
        .join(",");

    format!(
        "{}{} {} {}",
        escape(point.measurement),
        tags,
        fields,
        point.timestamp.timestamp_nanos_opt().unwrap_or_default()
    )
}

fn field_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Float(f) => format!("{f}"),
        FieldValue::UInt(u) => format!("{u}u"),
        FieldValue::Str(s) => format!("\"{}\"", s.replace('"', "\\\"")),
    }
}

fn escape(s: &str) -> String {
    s.replace(' ', "\\ ").replace(',', "\\,").replace('=', "\\=")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn line_protocol_escapes_tag_values() {
        let point = MetricPoint {
            measurement: "resource-usage",
            tags: HashMap::from([("container".to_owned(), "a b".to_owned())]),
            fields: HashMap::from([("memory".to_owned(), FieldValue::Float(0.5))]),
            timestamp: chrono::Utc::now(),
        };
        let line = to_line_protocol(&point);
        assert!(line.contains("container=a\\ b"));
        assert!(line.contains("memory=0.5"));
    }

    #[test]
    fn uint_fields_get_the_influx_unsigned_suffix() {
        let point = MetricPoint::new("response").field("latency", FieldValue::UInt(42));
        let line = to_line_protocol(&point);
        assert!(line.contains("latency=42u"));
    }
}
