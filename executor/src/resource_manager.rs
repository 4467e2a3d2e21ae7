//! Brings up every container a job needs on an isolated network, connects
//! the primary resource to the test network so the Executor can reach it,
//! and tears everything down unconditionally on exit.

use std::sync::Arc;
use std::time::Duration;

use exec_common::error::ExecError;
use exec_common::interfaces::{ContainerRuntime, ContainerSpec};
use exec_common::model::{make_custom_image_name, Process, Resource, Submission};
use uuid::Uuid;

/// Docker's CPU accounting period, in microseconds; `Resource.cpu` fractional
/// cores are expressed against this period as `cpu_quota`.
const CPU_PERIOD_US: i64 = 100_000;

/// How many times to poll `inspect_running` after starting a container
/// before falling back to treating it as up.
const STARTUP_PROBE_ATTEMPTS: u32 = 10;
const STARTUP_PROBE_INTERVAL: Duration = Duration::from_millis(200);

pub struct ResourceSetup {
    pub container_ids: Vec<String>,
    pub primary: Process,
}

pub struct ResourceManager {
    runtime: Arc<dyn ContainerRuntime>,
    exec_network: String,
    test_network: String,
    image_registry: String,
    image_registry_user: String,
}

impl ResourceManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        exec_network: String,
        test_network: String,
        image_registry: String,
        image_registry_user: String,
    ) -> Self {
        Self {
            runtime,
            exec_network,
            test_network,
            image_registry,
            image_registry_user,
        }
    }

    pub async fn setup(
        &self,
        task_id: Uuid,
        submission: &Submission,
        resources: &[Resource],
    ) -> Result<ResourceSetup, ExecError> {
        let mut container_ids = Vec::with_capacity(resources.len());
        let mut primary: Option<Process> = None;

        for resource in resources {
            match self
                .bring_up(task_id, submission, resource, &mut container_ids)
                .await
            {
                Ok(process) => {
                    if resource.is_primary {
                        primary = Some(process);
                    }
                }
                Err(err) => {
                    self.teardown(&container_ids).await;
                    return Err(err);
                }
            }
        }

        let primary = primary.ok_or_else(|| {
            ExecError::Setup("no resource in job is marked as primary".to_owned())
        })?;

        Ok(ResourceSetup {
            container_ids,
            primary,
        })
    }

    async fn bring_up(
        &self,
        task_id: Uuid,
        submission: &Submission,
        resource: &Resource,
        container_ids: &mut Vec<String>,
    ) -> Result<Process, ExecError> {
        let image = if resource.is_primary {
            make_custom_image_name(
                &self.image_registry,
                &self.image_registry_user,
                task_id,
                &submission.repository,
                &submission.commit_hash,
            )
        } else {
            resource.image.clone()
        };

        self.runtime
            .pull_image(&image)
            .await
            .map_err(|e| ExecError::Setup(format!("pulling image {image}: {e}")))?;

        let spec = ContainerSpec {
            name: resource.name.clone(),
            image: image.clone(),
            hostname: resource.name.clone(),
            port: resource.port,
            cpu_quota: (resource.cpu * CPU_PERIOD_US as f64) as i64,
            cpu_period: CPU_PERIOD_US,
            memory: resource.memory as i64,
            network: self.exec_network.clone(),
        };

        let id = self
            .runtime
            .create_container(&spec)
            .await
            .map_err(|e| ExecError::Setup(format!("creating container {}: {e}", resource.name)))?;
        container_ids.push(id.clone());

        if resource.is_primary {
            self.runtime
                .connect_network(&self.test_network, &id)
                .await
                .map_err(|e| ExecError::Setup(format!("connecting primary to test network: {e}")))?;
        }

        self.runtime
            .start_container(&id)
            .await
            .map_err(|e| ExecError::Setup(format!("starting container {}: {e}", resource.name)))?;

        self.wait_until_running(&id).await;

        Ok(Process {
            id,
            hostname: resource.name.clone(),
            port: resource.port,
            image,
        })
    }

    /// Polls briefly instead of a blind startup sleep; falls through if the
    /// runtime never reports the container running, leaving the first
    /// request to surface any real startup failure.
    async fn wait_until_running(&self, id: &str) {
        for _ in 0..STARTUP_PROBE_ATTEMPTS {
            if matches!(self.runtime.inspect_running(id).await, Ok(true)) {
                return;
            }
            tokio::time::sleep(STARTUP_PROBE_INTERVAL).await;
        }
    }

    /// Best-effort: stops every created container, then prunes stopped
    /// containers and dangling images. Runs unconditionally on exit.
    pub async fn teardown(&self, container_ids: &[String]) {
        for id in container_ids {
            if let Err(err) = self.runtime.stop_container(id).await {
                tracing::warn!("failed to stop container {id}: {err}");
            }
        }

        match self.runtime.prune_containers().await {
            Ok(report) => tracing::debug!("pruned {} stopped containers", report.deleted.len()),
            Err(err) => tracing::warn!("failed to prune containers: {err}"),
        }

        match self.runtime.prune_images().await {
            Ok(report) => tracing::debug!(
                "pruned {} dangling images, reclaimed {} bytes",
                report.deleted.len(),
                report.space_reclaimed
            ),
            Err(err) => tracing::warn!("failed to prune images: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::test_support::FakeRuntime;

    use super::*;

    fn manager(runtime: Arc<FakeRuntime>) -> ResourceManager {
        ResourceManager::new(
            runtime,
            "exec-net".to_owned(),
            "test-net".to_owned(),
            "docker.io".to_owned(),
            "acme".to_owned(),
        )
    }

    fn submission() -> Submission {
        Submission {
            id: Uuid::new_v4(),
            repository: "org/repo".to_owned(),
            commit_hash: "abc123".to_owned(),
        }
    }

    #[tokio::test]
    async fn sets_up_every_resource_and_returns_the_primary() {
        let runtime = Arc::new(FakeRuntime::default());
        let manager = manager(runtime.clone());

        let resources = vec![
            Resource {
                name: "db".to_owned(),
                image: "postgres:16".to_owned(),
                port: 5432,
                cpu: 0.5,
                memory: 1 << 20,
                is_primary: false,
            },
            Resource {
                name: "under-test".to_owned(),
                image: "ignored".to_owned(),
                port: 8080,
                cpu: 1.0,
                memory: 1 << 20,
                is_primary: true,
            },
        ];

        let setup = manager
            .setup(Uuid::new_v4(), &submission(), &resources)
            .await
            .expect("every resource bringing up successfully should yield a setup");

        assert_eq!(setup.container_ids.len(), 2);
        assert_eq!(setup.primary.hostname, "under-test");
        assert_eq!(setup.primary.port, 8080);
        assert_eq!(runtime.created.lock().unwrap().len(), 2);

        manager.teardown(&setup.container_ids).await;
    }

    #[tokio::test]
    async fn fails_when_no_resource_is_marked_primary() {
        let manager = manager(Arc::new(FakeRuntime::default()));
        let resources = vec![Resource {
            name: "db".to_owned(),
            image: "postgres:16".to_owned(),
            port: 5432,
            cpu: 0.5,
            memory: 1 << 20,
            is_primary: false,
        }];

        let result = manager.setup(Uuid::new_v4(), &submission(), &resources).await;
        assert!(result.is_err());
    }
}
