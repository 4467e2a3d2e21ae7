//! Issues one HTTP request against the primary resource and evaluates the
//! response, either against a compiled template or an exact expected value.

use std::collections::HashMap;
use std::sync::Arc;

use exec_common::error::ExecError;
use exec_common::evaluator::{eval_body_exact, eval_body_json_schema, eval_header_at_least, eval_status};
use exec_common::model::{Process, Template, Work};
use jsonschema::Validator;
use uuid::Uuid;

/// One status code's worth of a compiled template: the original `Template`
/// carries raw schema bytes, this is the in-memory form with the schema
/// already parsed once per section.
pub struct CompiledSchema {
    pub headers: HashMap<String, String>,
    pub body_schema: Option<Validator>,
}

pub struct CompiledTemplate {
    pub schema_table: HashMap<u16, CompiledSchema>,
}

/// Compiles every non-empty `body_schema` in `template`, keyed by status code.
/// A status whose `body_schema` is empty keeps `body_schema: None`, meaning
/// the evaluator requires an empty body for that status.
pub fn compile_template(template: &Template) -> Result<CompiledTemplate, ExecError> {
    let mut schema_table = HashMap::with_capacity(template.schema_table.len());
    for (status, templated) in &template.schema_table {
        let body_schema = if templated.body_schema.is_empty() {
            None
        } else {
            let value: serde_json::Value = serde_json::from_slice(&templated.body_schema)
                .map_err(|e| ExecError::TemplateMalformed {
                    template_id: template.id,
                    source: Box::new(e),
                })?;
            let validator = jsonschema::validator_for(&value).map_err(|e| ExecError::TemplateMalformed {
                template_id: template.id,
                source: Box::new(e),
            })?;
            Some(validator)
        };
        schema_table.insert(
            *status,
            CompiledSchema {
                headers: templated.headers.clone(),
                body_schema,
            },
        );
    }
    Ok(CompiledTemplate { schema_table })
}

/// Single-use per call: holds only the injected target, template map, and
/// HTTP client, all shared read-only across a worker pool.
pub struct Worker {
    client: reqwest::Client,
    target: Process,
    templates: Arc<HashMap<Uuid, CompiledTemplate>>,
}

impl Worker {
    pub fn new(
        client: reqwest::Client,
        target: Process,
        templates: Arc<HashMap<Uuid, CompiledTemplate>>,
    ) -> Self {
        Self {
            client,
            target,
            templates,
        }
    }

    /// Runs `work` to completion. `deadline` is the parent context's
    /// deadline; the effective per-request timeout is `min(deadline, work.timeout)`.
    pub async fn do_work(&self, work: &Work, deadline: tokio::time::Instant) -> Result<(), ExecError> {
        let now = tokio::time::Instant::now();
        let remaining = deadline.saturating_duration_since(now);
        let effective_timeout = remaining.min(work.timeout);

        let url = format!(
            "http://{}:{}{}",
            self.target.hostname, self.target.port, work.input.path
        );
        let mut request = self
            .client
            .request((&work.input.method).into(), &url)
            .body(work.input.body.clone());
        for (key, value) in &work.input.headers {
            request = request.header(key, value);
        }

        let response = tokio::time::timeout(effective_timeout, request.send())
            .await
            .map_err(|_| ExecError::Deadline)?
            .map_err(|e| ExecError::Transport(e.to_string()))?;

        match work.template_id {
            Some(template_id) => self.evaluate_templated(template_id, response).await,
            None => {
                let expected = work.expected_value.as_ref().ok_or_else(|| {
                    ExecError::Setup(format!("work {} has neither template_id nor expected_value", work.id))
                })?;
                eval_status(response.status().as_u16(), expected.status)?;
                eval_header_at_least(response.headers(), &expected.headers)?;
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| ExecError::Transport(e.to_string()))?;
                eval_body_exact(&body, &expected.body)?;
                Ok(())
            }
        }
    }

    async fn evaluate_templated(
        &self,
        template_id: Uuid,
        response: reqwest::Response,
    ) -> Result<(), ExecError> {
        let compiled = self
            .templates
            .get(&template_id)
            .ok_or(ExecError::TemplateNotFound(template_id))?;
        let status = response.status().as_u16();
        let schema = compiled
            .schema_table
            .get(&status)
            .ok_or(ExecError::UntemplatedStatus(status))?;

        eval_header_at_least(response.headers(), &schema.headers)?;
        let body = response
            .bytes()
            .await
            .map_err(|e| ExecError::Transport(e.to_string()))?;
        eval_body_json_schema(&body, schema.body_schema.as_ref())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exec_common::model::TemplatedSchema;

    #[test]
    fn compile_template_keeps_empty_schema_as_none() {
        let mut schema_table = HashMap::new();
        schema_table.insert(
            200u16,
            TemplatedSchema {
                headers: HashMap::new(),
                body_schema: Vec::new(),
            },
        );
        let template = Template {
            id: Uuid::nil(),
            schema_table,
        };
        let compiled = compile_template(&template).unwrap();
        assert!(compiled.schema_table.get(&200).unwrap().body_schema.is_none());
    }

    #[test]
    fn compile_template_parses_non_empty_schema() {
        let mut schema_table = HashMap::new();
        schema_table.insert(
            200u16,
            TemplatedSchema {
                headers: HashMap::new(),
                body_schema: br#"{"type":"object"}"#.to_vec(),
            },
        );
        let template = Template {
            id: Uuid::nil(),
            schema_table,
        };
        let compiled = compile_template(&template).unwrap();
        assert!(compiled.schema_table.get(&200).unwrap().body_schema.is_some());
    }

    #[test]
    fn compile_template_rejects_malformed_json() {
        let mut schema_table = HashMap::new();
        schema_table.insert(
            200u16,
            TemplatedSchema {
                headers: HashMap::new(),
                body_schema: b"not json".to_vec(),
            },
        );
        let template = Template {
            id: Uuid::nil(),
            schema_table,
        };
        assert!(compile_template(&template).is_err());
    }
}
