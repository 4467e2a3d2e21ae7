//! `ContainerRuntime` over `bollard`, the async Docker Engine API client,
//! connected to the local daemon socket.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    Stats, StatsOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::network::ConnectNetworkOptions;
use bollard::Docker;
use exec_common::interfaces::{ContainerRuntime, ContainerSpec, ContainerStat, PruneReport};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct BollardRuntime {
    docker: Docker,
}

impl BollardRuntime {
    pub fn connect_local() -> Result<Self, String> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| e.to_string())?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for BollardRuntime {
    async fn pull_image(&self, image: &str) -> Result<(), String> {
        let options = CreateImageOptions {
            from_image: image.to_owned(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, String> {
        let port_key = format!("{}/tcp", spec.port);
        let exposed_ports = HashMap::from([(port_key.clone(), HashMap::new())]);
        let port_bindings = HashMap::from([(
            port_key,
            Some(vec![PortBinding {
                host_ip: None,
                host_port: None,
            }]),
        )]);

        let host_config = HostConfig {
            cpu_quota: Some(spec.cpu_quota),
            cpu_period: Some(spec.cpu_period),
            memory: Some(spec.memory),
            network_mode: Some(spec.network.clone()),
            port_bindings: Some(port_bindings),
            ..Default::default()
        };

        let config = ContainerConfig {
            image: Some(spec.image.clone()),
            hostname: Some(spec.hostname.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| e.to_string())?;
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), String> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| e.to_string())
    }

    async fn connect_network(&self, network: &str, container_id: &str) -> Result<(), String> {
        let config = ConnectNetworkOptions {
            container: container_id.to_owned(),
            ..Default::default()
        };
        self.docker
            .connect_network(network, config)
            .await
            .map_err(|e| e.to_string())
    }

    async fn inspect_running(&self, id: &str) -> Result<bool, String> {
        let inspect = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| e.to_string())?;
        Ok(inspect
            .state
            .and_then(|state| state.running)
            .unwrap_or(false))
    }

    async fn stop_container(&self, id: &str) -> Result<(), String> {
        let stop_result = self
            .docker
            .stop_container(id, None::<StopContainerOptions>)
            .await
            .map_err(|e| e.to_string());
        let remove_result = self
            .docker
            .remove_container(id, None::<RemoveContainerOptions>)
            .await
            .map_err(|e| e.to_string());
        stop_result.and(remove_result)
    }

    async fn prune_containers(&self) -> Result<PruneReport, String> {
        let response = self
            .docker
            .prune_containers(None::<bollard::container::PruneContainersOptions<String>>)
            .await
            .map_err(|e| e.to_string())?;
        Ok(PruneReport {
            deleted: response.containers_deleted.unwrap_or_default(),
            space_reclaimed: response.space_reclaimed.unwrap_or(0) as u64,
        })
    }

    async fn prune_images(&self) -> Result<PruneReport, String> {
        let response = self
            .docker
            .prune_images(None::<bollard::image::PruneImagesOptions<String>>)
            .await
            .map_err(|e| e.to_string())?;
        let deleted = response
            .images_deleted
            .unwrap_or_default()
            .into_iter()
            .filter_map(|item| item.deleted)
            .collect();
        Ok(PruneReport {
            deleted,
            space_reclaimed: response.space_reclaimed.unwrap_or(0) as u64,
        })
    }

    fn stats(
        &self,
        cancel: CancellationToken,
        container_id: &str,
    ) -> (mpsc::Receiver<ContainerStat>, mpsc::Receiver<String>) {
        let (stat_tx, stat_rx) = mpsc::channel(16);
        let (err_tx, err_rx) = mpsc::channel(1);

        let docker = self.docker.clone();
        let container_id = container_id.to_owned();

        tokio::spawn(async move {
            let options = StatsOptions {
                stream: true,
                one_shot: false,
            };
            let mut stream = docker.stats(&container_id, Some(options));

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    frame = stream.next() => {
                        match frame {
                            Some(Ok(stats)) => {
                                let stat = to_container_stat(&container_id, &stats);
                                if stat_tx.send(stat).await.is_err() {
                                    return;
                                }
                            }
                            Some(Err(e)) => {
                                let _ = err_tx.send(e.to_string()).await;
                                return;
                            }
                            None => return,
                        }
                    }
                }
            }
        });

        (stat_rx, err_rx)
    }
}

/// Implements the derived-metric formulas: memory uses usage minus page
/// cache over the configured limit, CPU usage is the delta over one
/// accounting period, and per-core figures are normalised against the
/// default 100ms CPU period.
fn to_container_stat(container_id: &str, stats: &Stats) -> ContainerStat {
    let memory = {
        let usage = stats.memory_stats.usage.unwrap_or(0);
        let limit = stats.memory_stats.limit.unwrap_or(0);
        let cache = stats
            .memory_stats
            .stats
            .as_ref()
            .and_then(|s| s.cache)
            .unwrap_or(0);
        if limit == 0 {
            0.0
        } else {
            (usage.saturating_sub(cache)) as f64 / limit as f64
        }
    };

    let cpu_delta = stats.cpu_stats.cpu_usage.total_usage as f64
        - stats.precpu_stats.cpu_usage.total_usage as f64;
    let system_delta = stats.cpu_stats.system_cpu_usage.unwrap_or(0) as f64
        - stats.precpu_stats.system_cpu_usage.unwrap_or(0) as f64;
    let cpu_total = if system_delta > 0.0 {
        cpu_delta / system_delta
    } else {
        0.0
    };

    let cpu_per_core = stats
        .cpu_stats
        .cpu_usage
        .percpu_usage
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|usage| usage as f64 / 100_000.0)
        .collect();

    let (net_read, net_write) = stats
        .networks
        .as_ref()
        .map(|nets| {
            nets.values()
                .fold((0u64, 0u64), |(r, w), n| (r + n.rx_bytes, w + n.tx_bytes))
        })
        .unwrap_or((0, 0));

    let (block_read, block_write) = stats
        .blkio_stats
        .io_service_bytes_recursive
        .as_ref()
        .map(|entries| {
            entries.iter().fold((0u64, 0u64), |(r, w), entry| {
                match entry.op.to_ascii_lowercase().as_str() {
                    "read" => (r + entry.value, w),
                    "write" => (r, w + entry.value),
                    _ => (r, w),
                }
            })
        })
        .unwrap_or((0, 0));

    ContainerStat {
        container: container_id.to_owned(),
        cpu_total,
        cpu_per_core,
        memory,
        net_read,
        net_write,
        block_read,
        block_write,
    }
}
