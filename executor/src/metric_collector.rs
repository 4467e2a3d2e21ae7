//! Fans in one per-container stats stream per resource and translates each
//! decoded frame into a `resource-usage` point. The derived CPU/memory/net/
//! block formulas themselves live in the `ContainerRuntime` implementation,
//! since computing them requires the raw Docker stats frame; this module
//! only shapes the already-derived `ContainerStat` into the sink's point
//! format.

use std::sync::Arc;

use exec_common::interfaces::{ContainerRuntime, ContainerStat, FieldValue, MetricPoint, MetricWriteSession};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Spawns one forwarding task per container. The returned error receiver
/// yields one message per container that ended with an error; it closes once
/// every forwarder has exited (cancelled or otherwise).
pub fn start(
    cancel: CancellationToken,
    runtime: Arc<dyn ContainerRuntime>,
    containers: Vec<String>,
    session: Arc<dyn MetricWriteSession>,
) -> (Vec<tokio::task::JoinHandle<()>>, mpsc::Receiver<String>) {
    let (error_tx, error_rx) = mpsc::channel(containers.len().max(1));
    let mut handles = Vec::with_capacity(containers.len());

    for container in containers {
        let (mut stat_rx, mut stat_err_rx) = runtime.stats(cancel.clone(), &container);
        let session = session.clone();
        let error_tx = error_tx.clone();
        let container_name = container.clone();

        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    stat = stat_rx.recv() => {
                        match stat {
                            Some(stat) => session.write(to_point(&stat)),
                            None => return,
                        }
                    }
                    err = stat_err_rx.recv() => {
                        if let Some(err) = err {
                            let _ = error_tx
                                .send(format!("container {container_name}: {err}"))
                                .await;
                        }
                        return;
                    }
                }
            }
        }));
    }

    (handles, error_rx)
}

fn to_point(stat: &ContainerStat) -> MetricPoint {
    let mut point = MetricPoint::new("resource-usage")
        .tag("container", stat.container.clone())
        .field("memory", FieldValue::Float(stat.memory))
        .field("cpu", FieldValue::Float(stat.cpu_total))
        .field("net_read", FieldValue::UInt(stat.net_read))
        .field("net_write", FieldValue::UInt(stat.net_write))
        .field("block_read", FieldValue::UInt(stat.block_read))
        .field("block_write", FieldValue::UInt(stat.block_write));

    for (core, usage) in stat.cpu_per_core.iter().enumerate() {
        point = point.field(&format!("cpu_core_{core}"), FieldValue::Float(*usage));
    }

    point
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_carries_every_per_core_field() {
        let stat = ContainerStat {
            container: "primary".to_owned(),
            cpu_total: 0.5,
            cpu_per_core: vec![0.1, 0.2],
            memory: 0.3,
            net_read: 1,
            net_write: 2,
            block_read: 3,
            block_write: 4,
        };
        let point = to_point(&stat);
        assert!(point.fields.contains_key("cpu_core_0"));
        assert!(point.fields.contains_key("cpu_core_1"));
        assert_eq!(point.tags.get("container"), Some(&"primary".to_owned()));
    }
}
