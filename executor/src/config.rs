//! Process-wide configuration, loaded once from the environment and read-only thereafter.

use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3301")]
    pub port: u16,

    #[envconfig(default = "10000")]
    pub poll_interval: EnvMsDuration,

    #[envconfig(default = "30000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(default = "./work-storage")]
    pub work_storage_root: NonEmptyString,

    #[envconfig(default = "http://localhost:8086")]
    pub metric_sink_url: NonEmptyString,

    pub metric_sink_token: Option<String>,

    #[envconfig(default = "executor")]
    pub metric_sink_org: NonEmptyString,

    #[envconfig(default = "http://localhost:8080/submissions")]
    pub job_queue_url: NonEmptyString,

    #[envconfig(default = "http://localhost:8080/events")]
    pub event_queue_url: NonEmptyString,

    #[envconfig(default = "docker.io")]
    pub image_registry: NonEmptyString,

    #[envconfig(default = "acme")]
    pub image_registry_user: NonEmptyString,

    #[envconfig(default = "exec-net")]
    pub exec_network_name: NonEmptyString,

    #[envconfig(default = "test-net")]
    pub test_network_name: NonEmptyString,

    #[envconfig(nested = true)]
    pub pool: PoolConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Envconfig, Clone)]
pub struct PoolConfig {
    /// Overrides the CPU-core default worker count, mainly used by tests.
    pub worker_count: Option<usize>,
}

impl PoolConfig {
    pub fn resolved_worker_count(&self) -> usize {
        self.worker_count.unwrap_or_else(num_cpus::get)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_duration_parses_milliseconds() {
        assert_eq!(
            EnvMsDuration::from_str("1500").unwrap().0,
            time::Duration::from_millis(1500)
        );
        assert!(EnvMsDuration::from_str("not-a-number").is_err());
    }

    #[test]
    fn non_empty_string_rejects_empty() {
        assert!(NonEmptyString::from_str("").is_err());
        assert_eq!(NonEmptyString::from_str("x").unwrap().as_str(), "x");
    }

    #[test]
    fn resolved_worker_count_defaults_to_cpu_count() {
        let pool = PoolConfig { worker_count: None };
        assert!(pool.resolved_worker_count() > 0);
        let pool = PoolConfig {
            worker_count: Some(3),
        };
        assert_eq!(pool.resolved_worker_count(), 3);
    }
}
