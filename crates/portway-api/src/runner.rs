//! In-process step runner for composite endpoints.
//!
//! Composite steps target sibling endpoints in the same environment. The
//! runner dispatches them without leaving the process, reusing the same
//! engines, scope checks, and snapshot the outer request captured.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use portway_composite::{StepOutcome, StepRunner};
use portway_config::{EndpointPayload, Environment, Resolution};
use portway_events::EndpointKind;
use portway_proxy::ProxyRequest;
use serde_json::Value;

use crate::auth::RequestIdentity;
use crate::state::{ApiState, auth_context_hash};

/// Kinds a composite step may target.
const STEP_KINDS: &[EndpointKind] = &[EndpointKind::Sql, EndpointKind::Proxy];

pub(crate) struct DispatchRunner {
    state: Arc<ApiState>,
    environment: Arc<Environment>,
    identity: RequestIdentity,
    scheme_and_host: String,
    environment_name: String,
}

impl DispatchRunner {
    pub(crate) const fn new(
        state: Arc<ApiState>,
        environment: Arc<Environment>,
        identity: RequestIdentity,
        scheme_and_host: String,
        environment_name: String,
    ) -> Self {
        Self {
            state,
            environment,
            identity,
            scheme_and_host,
            environment_name,
        }
    }
}

#[async_trait]
impl StepRunner for DispatchRunner {
    async fn run(&self, endpoint: &str, method: &str, body: Value) -> anyhow::Result<StepOutcome> {
        let segments = vec![endpoint.to_string()];
        let resolution = self.state.endpoints.resolve(
            STEP_KINDS,
            &self.environment_name,
            &segments,
            method,
        );
        let Resolution::Matched { definition, .. } = resolution else {
            anyhow::bail!("step target '{endpoint}' is not available");
        };
        if !self.identity.auth.scopes.matches(&definition.name) {
            anyhow::bail!("token lacks scope for step target '{endpoint}'");
        }

        match &definition.payload {
            EndpointPayload::Sql(sql) => {
                let executor = self
                    .state
                    .executor_for(&self.environment)
                    .await
                    .map_err(|err| anyhow::anyhow!("executor unavailable: {err}"))?;
                let result = self
                    .state
                    .sql
                    .mutate(executor.as_ref(), &definition.name, sql, method, &body, None)
                    .await;
                match result {
                    Ok(value) => Ok(StepOutcome {
                        status: 200,
                        body: value,
                    }),
                    Err(err) => Ok(StepOutcome {
                        status: 500,
                        body: serde_json::json!({"error": err.to_string()}),
                    }),
                }
            }
            EndpointPayload::Proxy(proxy) => {
                let payload = serde_json::to_vec(&body)
                    .map_err(|err| anyhow::anyhow!("step body failed to encode: {err}"))?;
                let request = ProxyRequest {
                    method: method.to_string(),
                    path_suffix: Vec::new(),
                    query: None,
                    headers: std::collections::BTreeMap::from([(
                        "content-type".to_string(),
                        "application/json".to_string(),
                    )]),
                    body: Bytes::from(payload),
                    public_base: format!(
                        "{}/api/{}/{}",
                        self.scheme_and_host, self.environment_name, definition.name
                    ),
                    auth_context_hash: auth_context_hash(
                        self.identity.auth.token_id,
                        &self.identity.auth.username,
                    ),
                };
                let response = self
                    .state
                    .proxy
                    .execute(&definition, proxy, &self.environment, request)
                    .await?;
                let parsed: Value = serde_json::from_slice(&response.body)
                    .unwrap_or_else(|_err| {
                        Value::String(String::from_utf8_lossy(&response.body).into_owned())
                    });
                Ok(StepOutcome {
                    status: response.status,
                    body: parsed,
                })
            }
            _ => anyhow::bail!("step target '{endpoint}' has an unsupported kind"),
        }
    }
}
