//! Concrete implementations of every `exec_common::interfaces` trait, so the
//! crate is runnable end to end against a real queue, storage root, metric
//! sink, and Docker daemon.

pub mod bollard_runtime;
pub mod file_work_storage;
pub mod http_event_publisher;
pub mod http_job_queue;
pub mod influx_metric_sink;

pub use bollard_runtime::BollardRuntime;
pub use file_work_storage::FileWorkStorage;
pub use http_event_publisher::HttpEventPublisher;
pub use http_job_queue::HttpJobQueue;
pub use influx_metric_sink::InfluxMetricSink;
