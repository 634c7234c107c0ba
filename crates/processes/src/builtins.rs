//! Processes available in every registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::ProcessError;
use crate::job::JobMode;
use crate::process::{InputDescription, Process, ProcessContext, ProcessDescription};

pub fn all() -> Vec<Arc<dyn Process>> {
    vec![Arc::new(EchoProcess::new()), Arc::new(HelloWorldProcess::new())]
}

/// Returns its inputs unchanged.
pub struct EchoProcess {
    description: ProcessDescription,
}

impl EchoProcess {
    pub fn new() -> Self {
        Self {
            description: ProcessDescription {
                id: "echo".to_string(),
                title: "Echo".to_string(),
                description: Some("Returns the submitted inputs as outputs.".to_string()),
                version: "1.0.0".to_string(),
                inputs: BTreeMap::new(),
                outputs: BTreeMap::from([("echo".to_string(), json!({"type": "object"}))]),
                job_control_options: vec![JobMode::Sync, JobMode::Async],
            },
        }
    }
}

impl Default for EchoProcess {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Process for EchoProcess {
    fn description(&self) -> &ProcessDescription {
        &self.description
    }

    async fn execute(&self, inputs: Value, ctx: &ProcessContext) -> Result<Value, ProcessError> {
        ctx.checkpoint()?;
        Ok(inputs)
    }
}

/// Greets `name`, optionally followed by `message`.
pub struct HelloWorldProcess {
    description: ProcessDescription,
}

impl HelloWorldProcess {
    pub fn new() -> Self {
        let string = json!({"type": "string"});
        Self {
            description: ProcessDescription {
                id: "hello-world".to_string(),
                title: "Hello World".to_string(),
                description: Some("Echoes a greeting for the given name.".to_string()),
                version: "1.0.0".to_string(),
                inputs: BTreeMap::from([
                    ("name".to_string(), InputDescription::required("Name", string.clone())),
                    ("message".to_string(), InputDescription::optional("Message", string)),
                ]),
                outputs: BTreeMap::from([("echo".to_string(), json!({"type": "string"}))]),
                job_control_options: vec![JobMode::Sync, JobMode::Async],
            },
        }
    }
}

impl Default for HelloWorldProcess {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Process for HelloWorldProcess {
    fn description(&self) -> &ProcessDescription {
        &self.description
    }

    async fn execute(&self, inputs: Value, ctx: &ProcessContext) -> Result<Value, ProcessError> {
        let name = inputs
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ProcessError::invalid_input("name", "must be a string"))?;
        ctx.report_progress(50);
        ctx.checkpoint()?;

        let mut greeting = format!("Hello {}!", name);
        if let Some(message) = inputs.get("message").and_then(Value::as_str) {
            greeting.push(' ');
            greeting.push_str(message.trim());
        }
        Ok(json!({"id": "echo", "value": greeting.trim_end()}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> ProcessContext {
        let (tx, _rx) = mpsc::channel(8);
        ProcessContext::new("test", tx, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_hello_world() {
        let process = HelloWorldProcess::new();
        let out = process
            .execute(json!({"name": "Ada", "message": "Nice to meet you."}), &ctx())
            .await
            .unwrap();
        assert_eq!(out["value"], "Hello Ada! Nice to meet you.");

        let out = process.execute(json!({"name": "Ada"}), &ctx()).await.unwrap();
        assert_eq!(out["value"], "Hello Ada!");

        let err = process.execute(json!({"name": 3}), &ctx()).await.unwrap_err();
        assert!(matches!(err, ProcessError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_echo_stops_when_cancelled() {
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = ProcessContext::new("test", tx, cancel);
        let err = EchoProcess::new().execute(json!({"a": 1}), &ctx).await.unwrap_err();
        assert_eq!(err, ProcessError::Cancelled);
    }
}
