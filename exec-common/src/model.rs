//! The job/work/template data model consumed by the Executor.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::http_method::HttpMethod;

/// One submission to test, with the resources it needs and the ordered sections
/// the Executor will run against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub task_id: Uuid,
    pub submission: Submission,
    pub resources: Vec<Resource>,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub repository: String,
    pub commit_hash: String,
}

/// One container to stand up. Exactly one `Resource` in a `Job` has `is_primary = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub image: String,
    pub port: u16,
    /// Fractional CPU cores, e.g. `0.5` for half a core.
    pub cpu: f64,
    /// Memory cap in bytes.
    pub memory: u64,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SectionType {
    Scenario,
    Load,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: SectionType,
    /// Only meaningful when `kind == SectionType::Load`.
    pub rpm: u32,
}

/// One request to issue, and how to judge the response.
///
/// Exactly one of `template_id` or `expected_value` is populated: a non-empty
/// `template_id` means evaluate against the referenced `Template`, otherwise
/// evaluate against `expected_value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Work {
    pub id: Uuid,
    pub input: Input,
    pub timeout: Duration,
    pub template_id: Option<Uuid>,
    pub expected_value: Option<ExpectedValue>,
}

impl Work {
    pub fn uses_template(&self) -> bool {
        self.template_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Input {
    pub method: HttpMethod,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedValue {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// A status-keyed schema set, as read from storage (JSON schemas are not yet compiled).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub schema_table: HashMap<u16, TemplatedSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatedSchema {
    pub headers: HashMap<String, String>,
    /// Raw JSON schema bytes. Empty means "the body must be empty".
    pub body_schema: Vec<u8>,
}

/// Runtime record for a container the resource manager created.
#[derive(Debug, Clone)]
pub struct Process {
    pub id: String,
    pub hostname: String,
    pub port: u16,
    pub image: String,
}

/// Notification published after a job finishes executing, success or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestEvent {
    pub id: Uuid,
    pub success: bool,
    pub took: Duration,
    pub extra: String,
}

/// `docker.io/acme/<task-id>:<repo-with-dashes>-<commit>`, the image tag the
/// primary resource's image name is overridden with.
///
/// Only the first `/` in `repository` is replaced.
pub fn make_custom_image_name(
    registry: &str,
    user: &str,
    task_id: Uuid,
    repository: &str,
    commit_hash: &str,
) -> String {
    format!(
        "{}/{}/{}:{}-{}",
        registry,
        user,
        task_id,
        repository.replacen('/', "-", 1),
        commit_hash,
    )
}
