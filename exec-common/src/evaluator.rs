//! Compares an HTTP response to either an exact-match expectation or a
//! compiled, status-keyed JSON schema. Each function fully consumes (and, for
//! the caller, is meant to be the last thing done with) the body it is given.

use std::collections::HashMap;

use jsonschema::Validator;

use crate::error::MismatchKind;

pub fn eval_status(actual: u16, expected: u16) -> Result<(), MismatchKind> {
    if actual != expected {
        return Err(MismatchKind::Status { expected, actual });
    }
    Ok(())
}

/// "At least" header matching: every `(key, value)` in `expected` must have a
/// matching first value in `headers` (canonicalized case-insensitively by
/// `http::HeaderMap`); headers not named in `expected` are ignored.
pub fn eval_header_at_least(
    headers: &http::HeaderMap,
    expected: &HashMap<String, String>,
) -> Result<(), MismatchKind> {
    for (key, val) in expected {
        let got = headers
            .get(key.as_str())
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if got != val {
            return Err(MismatchKind::Header {
                key: key.clone(),
                expected: val.clone(),
                actual: got.to_owned(),
            });
        }
    }
    Ok(())
}

/// Bytewise equality; nil/empty bodies are equal to each other.
pub fn eval_body_exact(body: &[u8], expected: &[u8]) -> Result<(), MismatchKind> {
    if body != expected {
        return Err(MismatchKind::Body {
            expected: expected.to_vec(),
            actual: body.to_vec(),
        });
    }
    Ok(())
}

/// `schema` of `None` means the template declared no `bodySchema` for this
/// status: the body must then be empty. Otherwise the body is validated
/// against the compiled schema and every violation is aggregated.
pub fn eval_body_json_schema(body: &[u8], schema: Option<&Validator>) -> Result<(), MismatchKind> {
    let Some(schema) = schema else {
        if !body.is_empty() {
            return Err(MismatchKind::UnexpectedBody);
        }
        return Ok(());
    };

    let value: serde_json::Value = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(body).map_err(|e| MismatchKind::JsonSchema(vec![e.to_string()]))?
    };

    let errors: Vec<String> = schema.iter_errors(&value).map(|e| e.to_string()).collect();
    if !errors.is_empty() {
        return Err(MismatchKind::JsonSchema(errors));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_matches() {
        assert!(eval_status(200, 200).is_ok());
        let err = eval_status(500, 200).unwrap_err();
        assert!(matches!(err, MismatchKind::Status { expected: 200, actual: 500 }));
    }

    #[test]
    fn header_at_least_ignores_extra_headers() {
        let mut headers = http::HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("x-extra", "whatever".parse().unwrap());

        let mut expected = HashMap::new();
        expected.insert("Content-Type".to_owned(), "application/json".to_owned());

        assert!(eval_header_at_least(&headers, &expected).is_ok());
    }

    #[test]
    fn header_at_least_fails_on_mismatch() {
        let headers = http::HeaderMap::new();
        let mut expected = HashMap::new();
        expected.insert("Content-Type".to_owned(), "application/json".to_owned());

        assert!(eval_header_at_least(&headers, &expected).is_err());
    }

    #[test]
    fn body_exact_treats_empty_as_equal() {
        assert!(eval_body_exact(&[], &[]).is_ok());
        assert!(eval_body_exact(b"{}", b"{}").is_ok());
        assert!(eval_body_exact(b"{}", b"{\"a\":1}").is_err());
    }

    #[test]
    fn json_schema_nil_requires_empty_body() {
        assert!(eval_body_json_schema(&[], None).is_ok());
        assert!(eval_body_json_schema(b"{}", None).is_err());
    }

    #[test]
    fn json_schema_validates_body() {
        let schema_json = serde_json::json!({
            "type": "object",
            "required": ["id"],
        });
        let schema = jsonschema::validator_for(&schema_json).unwrap();

        assert!(eval_body_json_schema(br#"{"id":1}"#, Some(&schema)).is_ok());
        assert!(eval_body_json_schema(br#"{}"#, Some(&schema)).is_err());
    }
}
