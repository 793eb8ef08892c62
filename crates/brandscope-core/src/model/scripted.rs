use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use super::{ModelCallError, ModelClient, ModelDescriptor, ModelOutput};

/// What a [`ScriptedClient`] does when invoked.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Reply(ModelOutput),
    Fail(ModelCallError),
}

/// Deterministic in-memory [`ModelClient`] returning a canned outcome.
///
/// Used by the CLI fixture mode and the test suites; this is not a provider
/// adapter and performs no network I/O.
pub struct ScriptedClient {
    descriptor: &'static ModelDescriptor,
    outcome: ScriptedOutcome,
    delay: Option<Duration>,
}

impl ScriptedClient {
    pub fn new(descriptor: &'static ModelDescriptor, outcome: ScriptedOutcome) -> Self {
        Self {
            descriptor,
            outcome,
            delay: None,
        }
    }

    /// Add an artificial delay before each reply, to exercise interleaving.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    fn descriptor(&self) -> &ModelDescriptor {
        self.descriptor
    }

    async fn complete(&self, _prompt: &str) -> Result<ModelOutput, ModelCallError> {
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }
        match &self.outcome {
            ScriptedOutcome::Reply(output) => Ok(output.clone()),
            ScriptedOutcome::Fail(error) => Err(error.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::catalog;

    #[tokio::test]
    async fn scripted_client_replays_outcome() {
        let descriptor = catalog::descriptor("gpt-4o-mini").unwrap();
        let client = ScriptedClient::new(
            descriptor,
            ScriptedOutcome::Reply(ModelOutput {
                text: "canned".into(),
                ..Default::default()
            }),
        );
        let first = client.complete("q").await.unwrap();
        let second = client.complete("q").await.unwrap();
        assert_eq!(first.text, "canned");
        assert_eq!(second.text, "canned");
    }

    #[tokio::test]
    async fn scripted_client_replays_failure() {
        let descriptor = catalog::descriptor("claude-haiku").unwrap();
        let client = ScriptedClient::new(descriptor, ScriptedOutcome::Fail(ModelCallError::Timeout));
        let err = client.complete("q").await.unwrap_err();
        assert!(matches!(err, ModelCallError::Timeout));
    }
}
