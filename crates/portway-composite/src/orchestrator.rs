//! Step orchestration for composite endpoints.
//!
//! Steps run strictly in declared order against sibling endpoints in the
//! same environment. An `is_array` step fans its input array out with a
//! small bounded parallelism, preserving input order in the recorded
//! results. The first failing step short-circuits; there is no automatic
//! compensation — correlation keys (see `$guid`) let backends reconcile.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use portway_config::{CompositeEndpoint, CompositeStep};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CompositeError;
use crate::template::TemplateContext;

/// Parallel sub-requests in flight for one `is_array` step.
const ARRAY_FANOUT: usize = 4;

/// Result of one executed sub-request.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// HTTP status the target endpoint produced.
    pub status: u16,
    /// Response body.
    pub body: Value,
}

impl StepOutcome {
    /// Whether the target reported success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Executes one sub-request against a sibling endpoint.
///
/// The dispatcher provides an implementation bound to the request's
/// environment and authorization context.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run `method` against `endpoint` with the given body.
    async fn run(&self, endpoint: &str, method: &str, body: Value) -> anyhow::Result<StepOutcome>;
}

/// Composite request lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositeState {
    /// No step has run yet.
    Pending,
    /// The step at this index is executing.
    Running(usize),
    /// Every step completed successfully.
    Succeeded,
    /// A step failed and the run short-circuited.
    Failed {
        /// Index of the failing step.
        step: usize,
        /// Failure detail.
        error: String,
    },
}

/// Final result of a composite run.
#[derive(Debug)]
pub struct CompositeOutcome {
    /// Terminal state.
    pub state: CompositeState,
    /// Results for every completed step, keyed by step name.
    pub step_results: Map<String, Value>,
    /// Name of the failing step, when one failed.
    pub failed_step: Option<String>,
    /// Failure detail, when one failed.
    pub error: Option<String>,
}

impl CompositeOutcome {
    /// Whether every step completed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.state, CompositeState::Succeeded)
    }

    /// Response envelope for the dispatcher.
    #[must_use]
    pub fn envelope(&self) -> Value {
        if self.is_success() {
            json!({ "StepResults": self.step_results })
        } else {
            json!({
                "StepResults": self.step_results,
                "FailedStep": self.failed_step,
                "Error": self.error,
            })
        }
    }
}

/// Orchestrates a composite endpoint's declared steps.
pub struct CompositeOrchestrator {
    runner: Arc<dyn StepRunner>,
}

impl CompositeOrchestrator {
    /// Orchestrator delegating sub-requests to the given runner.
    #[must_use]
    pub fn new(runner: Arc<dyn StepRunner>) -> Self {
        Self { runner }
    }

    /// Execute every declared step against the request body.
    ///
    /// The run moves `Pending → Running(step) → Succeeded | Failed(step)`;
    /// the terminal state is returned in the outcome.
    pub async fn execute(&self, endpoint: &CompositeEndpoint, body: &Value) -> CompositeOutcome {
        let mut context = TemplateContext::new(Uuid::new_v4().to_string());

        for (index, step) in endpoint.steps.iter().enumerate() {
            debug!(step = %step.name, index, "composite step starting");

            let result = if step.is_array {
                self.run_array_step(step, body, &context).await
            } else {
                self.run_single_step(step, body, &context).await
            };

            match result {
                Ok(value) => context.record(&step.name, value),
                Err(error) => {
                    warn!(step = %step.name, error = %error, "composite step failed");
                    return CompositeOutcome {
                        state: CompositeState::Failed {
                            step: index,
                            error: error.clone(),
                        },
                        step_results: context.results().clone(),
                        failed_step: Some(step.name.clone()),
                        error: Some(error),
                    };
                }
            }
        }

        CompositeOutcome {
            state: CompositeState::Succeeded,
            step_results: context.results().clone(),
            failed_step: None,
            error: None,
        }
    }

    async fn run_single_step(
        &self,
        step: &CompositeStep,
        body: &Value,
        context: &TemplateContext,
    ) -> Result<Value, String> {
        let mut input = step_input(step, body)?;
        context
            .apply(&mut input, &step.template_transformations)
            .map_err(describe_template_error)?;
        let outcome = self
            .runner
            .run(&step.endpoint, &step.method, input)
            .await
            .map_err(|err| err.to_string())?;
        if !outcome.is_success() {
            return Err(format!(
                "endpoint '{}' returned status {}",
                step.endpoint, outcome.status
            ));
        }
        Ok(outcome.body)
    }

    async fn run_array_step(
        &self,
        step: &CompositeStep,
        body: &Value,
        context: &TemplateContext,
    ) -> Result<Value, String> {
        let property = step.array_property.as_deref().ok_or_else(|| {
            format!("step '{}' is an array step without ArrayProperty", step.name)
        })?;
        let items = body
            .get(property)
            .and_then(Value::as_array)
            .ok_or_else(|| format!("request body has no array at '{property}'"))?;

        let mut prepared = Vec::with_capacity(items.len());
        for item in items {
            let mut input = item.clone();
            context
                .apply(&mut input, &step.template_transformations)
                .map_err(describe_template_error)?;
            prepared.push(input);
        }

        // Bounded fan-out; `buffered` preserves input order in the output.
        let outcomes: Vec<anyhow::Result<StepOutcome>> = stream::iter(prepared)
            .map(|input| self.runner.run(&step.endpoint, &step.method, input))
            .buffered(ARRAY_FANOUT)
            .collect()
            .await;

        let mut results = Vec::with_capacity(outcomes.len());
        for (index, outcome) in outcomes.into_iter().enumerate() {
            let outcome = outcome.map_err(|err| err.to_string())?;
            if !outcome.is_success() {
                return Err(format!(
                    "endpoint '{}' item {index} returned status {}",
                    step.endpoint, outcome.status
                ));
            }
            results.push(outcome.body);
        }
        Ok(Value::Array(results))
    }
}

fn step_input(step: &CompositeStep, body: &Value) -> Result<Value, String> {
    match &step.source_property {
        Some(property) => body
            .get(property)
            .cloned()
            .ok_or_else(|| format!("request body has no property '{property}'")),
        None => Ok(body.clone()),
    }
}

fn describe_template_error(err: CompositeError) -> String {
    err.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Records every sub-request and answers with `{"d": {...body}}`.
    struct RecordingRunner {
        calls: Mutex<Vec<(String, String, Value)>>,
        fail_on: Option<String>,
    }

    impl RecordingRunner {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }

        fn failing_on(endpoint: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on: Some(endpoint.to_string()),
            }
        }

        fn calls(&self) -> Vec<(String, String, Value)> {
            self.calls
                .lock()
                .unwrap_or_else(|err| panic!("lock: {err}"))
                .clone()
        }
    }

    #[async_trait]
    impl StepRunner for RecordingRunner {
        async fn run(
            &self,
            endpoint: &str,
            method: &str,
            body: Value,
        ) -> anyhow::Result<StepOutcome> {
            self.calls
                .lock()
                .unwrap_or_else(|err| panic!("lock: {err}"))
                .push((endpoint.to_string(), method.to_string(), body.clone()));
            if self.fail_on.as_deref() == Some(endpoint) {
                return Ok(StepOutcome {
                    status: 500,
                    body: json!({"error": "backend exploded"}),
                });
            }
            Ok(StepOutcome {
                status: 200,
                body: json!({ "d": body }),
            })
        }
    }

    fn sales_order_endpoint() -> CompositeEndpoint {
        CompositeEndpoint {
            steps: vec![
                CompositeStep {
                    name: "CreateOrderLines".to_string(),
                    endpoint: "OrderLines".to_string(),
                    method: "POST".to_string(),
                    is_array: true,
                    array_property: Some("Lines".to_string()),
                    source_property: None,
                    template_transformations: BTreeMap::from([(
                        "TransactionKey".to_string(),
                        "$guid".to_string(),
                    )]),
                },
                CompositeStep {
                    name: "CreateOrderHeader".to_string(),
                    endpoint: "OrderHeaders".to_string(),
                    method: "POST".to_string(),
                    is_array: false,
                    array_property: None,
                    source_property: Some("Header".to_string()),
                    template_transformations: BTreeMap::from([(
                        "TransactionKey".to_string(),
                        "$prev.CreateOrderLines.0.d.TransactionKey".to_string(),
                    )]),
                },
            ],
        }
    }

    fn sales_order_body() -> Value {
        json!({
            "Header": {"OrderDebtor": "60093"},
            "Lines": [
                {"Itemcode": "I1", "Quantity": 2},
                {"Itemcode": "I2", "Quantity": 4}
            ]
        })
    }

    #[tokio::test]
    async fn sales_order_shares_one_transaction_key_across_steps() {
        let runner = Arc::new(RecordingRunner::new());
        let orchestrator = CompositeOrchestrator::new(runner.clone());

        let outcome = orchestrator
            .execute(&sales_order_endpoint(), &sales_order_body())
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.step_results.len(), 2);

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        let keys: Vec<&Value> = calls
            .iter()
            .map(|(_, _, body)| &body["TransactionKey"])
            .collect();
        assert_eq!(keys[0], keys[1]);
        assert_eq!(keys[1], keys[2]);
        assert!(keys[0].is_string());

        // The header step consumed only the Header object.
        let (endpoint, _, header_body) = &calls[2];
        assert_eq!(endpoint, "OrderHeaders");
        assert_eq!(header_body["OrderDebtor"], json!("60093"));
    }

    #[tokio::test]
    async fn array_results_preserve_input_order() {
        let runner = Arc::new(RecordingRunner::new());
        let orchestrator = CompositeOrchestrator::new(runner);

        let outcome = orchestrator
            .execute(&sales_order_endpoint(), &sales_order_body())
            .await;
        let lines = outcome.step_results["CreateOrderLines"]
            .as_array()
            .expect("array results");
        assert_eq!(lines[0]["d"]["Itemcode"], json!("I1"));
        assert_eq!(lines[1]["d"]["Itemcode"], json!("I2"));
    }

    #[tokio::test]
    async fn first_failing_step_short_circuits_with_partial_results() {
        let runner = Arc::new(RecordingRunner::failing_on("OrderHeaders"));
        let orchestrator = CompositeOrchestrator::new(runner.clone());

        let outcome = orchestrator
            .execute(&sales_order_endpoint(), &sales_order_body())
            .await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.failed_step.as_deref(), Some("CreateOrderHeader"));
        assert!(outcome.step_results.contains_key("CreateOrderLines"));
        assert!(!outcome.step_results.contains_key("CreateOrderHeader"));
        assert!(matches!(
            outcome.state,
            CompositeState::Failed { step: 1, .. }
        ));

        let envelope = outcome.envelope();
        assert_eq!(envelope["FailedStep"], json!("CreateOrderHeader"));
        assert!(envelope["Error"].is_string());
    }

    #[tokio::test]
    async fn unknown_template_reference_fails_the_step() {
        let endpoint = CompositeEndpoint {
            steps: vec![CompositeStep {
                name: "Only".to_string(),
                endpoint: "Target".to_string(),
                method: "POST".to_string(),
                is_array: false,
                array_property: None,
                source_property: None,
                template_transformations: BTreeMap::from([(
                    "Key".to_string(),
                    "$prev.Nope.value".to_string(),
                )]),
            }],
        };
        let runner = Arc::new(RecordingRunner::new());
        let orchestrator = CompositeOrchestrator::new(runner.clone());

        let outcome = orchestrator.execute(&endpoint, &json!({})).await;
        assert!(!outcome.is_success());
        assert!(runner.calls().is_empty());
    }
}
