//! Poll a job queue for scenario/load test jobs, run each against the
//! containers it stands up, and publish the outcome.
use std::future::ready;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;

use exec_common::health::HealthRegistry;
use exec_common::metrics::{serve, setup_metrics_router};
use executor::adapters::{
    BollardRuntime, FileWorkStorage, HttpEventPublisher, HttpJobQueue, InfluxMetricSink,
};
use executor::config::Config;
use executor::error::ServerError;
use executor::executor::Executor;
use executor::resource_manager::ResourceManager;

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().map_err(|e| ServerError::Config(e.to_string()))?;

    let liveness = HealthRegistry::new("liveness");
    let server_liveness = liveness
        .register("server".to_string(), time::Duration::seconds(60))
        .await;

    let client = reqwest::Client::builder()
        .timeout(config.request_timeout.0)
        .build()
        .map_err(|e| ServerError::Config(e.to_string()))?;

    let runtime = Arc::new(
        BollardRuntime::connect_local().map_err(|e| ServerError::Config(e.to_string()))?,
    );
    let storage = Arc::new(FileWorkStorage::new(config.work_storage_root.as_str()));
    let metric_sink = Arc::new(InfluxMetricSink::new(
        client.clone(),
        config.metric_sink_url.as_str(),
        config.metric_sink_token.clone(),
    ));
    let queue = HttpJobQueue::new(client.clone(), config.job_queue_url.as_str());
    let events = HttpEventPublisher::new(client.clone(), config.event_queue_url.as_str());

    let resource_manager = ResourceManager::new(
        runtime.clone(),
        config.exec_network_name.as_str().to_owned(),
        config.test_network_name.as_str().to_owned(),
        config.image_registry.as_str().to_owned(),
        config.image_registry_user.as_str().to_owned(),
    );

    let executor = Executor {
        runtime,
        storage,
        metric_sink,
        http_client: client,
        resource_manager,
        worker_count: config.pool.resolved_worker_count(),
        metric_sink_org: config.metric_sink_org.as_str().to_owned(),
    };

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .merge(setup_metrics_router());
    let bind = config.bind();
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving health/metrics");
    });

    let poll_interval = config.poll_interval.0;
    executor::server::run(&queue, &events, &executor, poll_interval, server_liveness).await
}

pub async fn index() -> &'static str {
    "executor"
}
