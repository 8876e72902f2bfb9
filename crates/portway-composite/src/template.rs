//! Template expression resolution for composite steps.
//!
//! Steps share a scratch context: `$guid` is a per-request UUID stable
//! across every step and sub-request, and `$prev.{step}.{path}` performs a
//! deep lookup into a prior step's response, with numeric segments indexing
//! array sub-results. Any other expression is a literal.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{CompositeError, CompositeResult};

/// Shared evaluation context for one composite request.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    guid: String,
    results: Map<String, Value>,
}

impl TemplateContext {
    /// Context with a fresh request UUID.
    #[must_use]
    pub fn new(guid: String) -> Self {
        Self {
            guid,
            results: Map::new(),
        }
    }

    /// The per-request UUID.
    #[must_use]
    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// Record a completed step's response.
    pub fn record(&mut self, step: &str, result: Value) {
        self.results.insert(step.to_string(), result);
    }

    /// Completed step responses, keyed by step name.
    #[must_use]
    pub const fn results(&self) -> &Map<String, Value> {
        &self.results
    }

    /// Evaluate one template expression.
    ///
    /// # Errors
    ///
    /// Returns [`CompositeError::TemplateError`] for unknown steps or paths.
    pub fn resolve(&self, expression: &str) -> CompositeResult<Value> {
        if expression == "$guid" {
            return Ok(Value::String(self.guid.clone()));
        }
        if let Some(reference) = expression.strip_prefix("$prev.") {
            return self.resolve_prev(expression, reference);
        }
        Ok(Value::String(expression.to_string()))
    }

    fn resolve_prev(&self, expression: &str, reference: &str) -> CompositeResult<Value> {
        let mut segments = reference.split('.');
        let step = segments.next().filter(|step| !step.is_empty()).ok_or_else(|| {
            CompositeError::TemplateError {
                expression: expression.to_string(),
                reason: "missing step name after $prev.".to_string(),
            }
        })?;
        let mut current =
            self.results
                .get(step)
                .ok_or_else(|| CompositeError::TemplateError {
                    expression: expression.to_string(),
                    reason: format!("step '{step}' has not produced a result"),
                })?;

        for segment in segments {
            current = match current {
                Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| items.get(index)),
                Value::Object(object) => object.get(segment),
                _ => None,
            }
            .ok_or_else(|| CompositeError::TemplateError {
                expression: expression.to_string(),
                reason: format!("path segment '{segment}' not found"),
            })?;
        }
        Ok(current.clone())
    }

    /// Overwrite fields of a step body with evaluated expressions.
    ///
    /// Dotted field paths create intermediate objects as needed.
    ///
    /// # Errors
    ///
    /// Returns the first expression that fails to resolve.
    pub fn apply(
        &self,
        body: &mut Value,
        transformations: &BTreeMap<String, String>,
    ) -> CompositeResult<()> {
        for (field_path, expression) in transformations {
            let resolved = self.resolve(expression)?;
            set_path(body, field_path, resolved);
        }
        Ok(())
    }
}

fn set_path(target: &mut Value, path: &str, value: Value) {
    let mut current = target;
    let segments: Vec<&str> = path.split('.').collect();
    for (index, segment) in segments.iter().enumerate() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let object = current
            .as_object_mut()
            .unwrap_or_else(|| unreachable!("just coerced to an object"));
        if index == segments.len() - 1 {
            object.insert((*segment).to_string(), value);
            return;
        }
        current = object
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn guid_is_stable_within_a_context() {
        let context = TemplateContext::new("U-1".to_string());
        assert_eq!(context.resolve("$guid").expect("guid"), json!("U-1"));
        assert_eq!(context.resolve("$guid").expect("guid"), json!("U-1"));
    }

    #[test]
    fn prev_lookup_walks_objects_and_array_indices() {
        let mut context = TemplateContext::new("U".to_string());
        context.record(
            "CreateOrderLines",
            json!([{"d": {"TransactionKey": "U"}}, {"d": {"TransactionKey": "U"}}]),
        );
        let value = context
            .resolve("$prev.CreateOrderLines.0.d.TransactionKey")
            .expect("value");
        assert_eq!(value, json!("U"));
    }

    #[test]
    fn unknown_references_error_with_the_expression() {
        let context = TemplateContext::new("U".to_string());
        let err = context
            .resolve("$prev.Missing.x")
            .expect_err("unknown step");
        assert!(matches!(
            err,
            CompositeError::TemplateError { expression, .. } if expression == "$prev.Missing.x"
        ));
    }

    #[test]
    fn non_dollar_expressions_are_literals() {
        let context = TemplateContext::new("U".to_string());
        assert_eq!(context.resolve("fixed").expect("literal"), json!("fixed"));
    }

    #[test]
    fn apply_overwrites_nested_paths() {
        let context = TemplateContext::new("U".to_string());
        let mut body = json!({"Itemcode": "I1"});
        let transformations = BTreeMap::from([
            ("TransactionKey".to_string(), "$guid".to_string()),
            ("Meta.Source".to_string(), "gateway".to_string()),
        ]);
        context.apply(&mut body, &transformations).expect("apply");
        assert_eq!(body["TransactionKey"], json!("U"));
        assert_eq!(body["Meta"]["Source"], json!("gateway"));
        assert_eq!(body["Itemcode"], json!("I1"));
    }
}
