//! Transport to the external browser-automation capability.
//!
//! Adapters stay pure data (script in, outcome out); everything about how the
//! script actually gets executed lives behind the [`Automation`] trait so the
//! concrete capability can be swapped without touching extraction logic.

use std::time::Duration;

use async_trait::async_trait;
use obol_core::{CredentialContext, ScrapeOutcome};
use serde_json::Value;
use thiserror::Error;
use tracing::{info_span, Instrument};

#[derive(Clone)]
pub struct AutomationConfig {
    pub base_url: String,
    pub token: String,
    /// Execution budget passed to the remote capability.
    pub exec_timeout: Duration,
    /// Client-side hard abort, strictly longer than `exec_timeout`, against a
    /// remote capability that does not honor its own limit.
    pub abort_timeout: Duration,
    pub launch: Option<Value>,
}

impl std::fmt::Debug for AutomationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationConfig")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .field("exec_timeout", &self.exec_timeout)
            .field("abort_timeout", &self.abort_timeout)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("automation request failed: {0}")]
    Transport(reqwest::Error),
    #[error("automation endpoint returned http status {status}")]
    HttpStatus { status: u16 },
    #[error("automation call exceeded the {0:?} abort timeout")]
    AbortTimeout(Duration),
    #[error("malformed automation envelope: {0}")]
    MalformedEnvelope(String),
}

/// Submit a declarative automation script plus a credential context and get a
/// structured outcome back. Credentials travel in the context object only.
#[async_trait]
pub trait Automation: Send + Sync {
    async fn run(
        &self,
        script: &str,
        context: &CredentialContext,
    ) -> Result<ScrapeOutcome, AutomationError>;
}

pub struct HttpAutomationClient {
    client: reqwest::Client,
    config: AutomationConfig,
}

impl HttpAutomationClient {
    pub fn new(config: AutomationConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.abort_timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

impl std::fmt::Debug for HttpAutomationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAutomationClient")
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl Automation for HttpAutomationClient {
    async fn run(
        &self,
        script: &str,
        context: &CredentialContext,
    ) -> Result<ScrapeOutcome, AutomationError> {
        let url = format!("{}/function", self.config.base_url.trim_end_matches('/'));
        let timeout_ms = self.config.exec_timeout.as_millis().to_string();

        let mut request = self
            .client
            .post(&url)
            .query(&[
                ("token", self.config.token.as_str()),
                ("timeout", timeout_ms.as_str()),
            ])
            .json(&serde_json::json!({
                "code": script,
                "context": context,
            }));
        if let Some(launch) = &self.config.launch {
            request = request.query(&[("launch", launch.to_string())]);
        }

        let span = info_span!(
            "automation_run",
            base_url = %self.config.base_url,
            timeout_ms = %timeout_ms,
        );
        let exchange = async {
            let response = request
                .send()
                .await
                .map_err(|e| AutomationError::Transport(e.without_url()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(AutomationError::HttpStatus {
                    status: status.as_u16(),
                });
            }
            response
                .json::<Value>()
                .await
                .map_err(|e| AutomationError::Transport(e.without_url()))
        };

        let value = tokio::time::timeout(self.config.abort_timeout, exchange)
            .instrument(span)
            .await
            .map_err(|_| AutomationError::AbortTimeout(self.config.abort_timeout))??;

        unwrap_envelope(value)
    }
}

/// Validate and unwrap the two known response envelope shapes: the outcome
/// object directly, or `{ "data": <outcome>, "type": "application/json" }`.
pub fn unwrap_envelope(value: Value) -> Result<ScrapeOutcome, AutomationError> {
    let candidate = match value {
        Value::Object(ref map) if map.get("success").is_some_and(Value::is_boolean) => value,
        Value::Object(mut map) => match map.remove("data") {
            Some(inner @ Value::Object(_))
                if inner.get("success").is_some_and(Value::is_boolean) =>
            {
                inner
            }
            Some(_) => {
                return Err(AutomationError::MalformedEnvelope(
                    "data field is not a result object with a boolean `success`".into(),
                ))
            }
            None => {
                return Err(AutomationError::MalformedEnvelope(
                    "missing boolean `success` field".into(),
                ))
            }
        },
        _ => {
            return Err(AutomationError::MalformedEnvelope(
                "response is not a JSON object".into(),
            ))
        }
    };

    serde_json::from_value(candidate).map_err(|e| AutomationError::MalformedEnvelope(e.to_string()))
}
