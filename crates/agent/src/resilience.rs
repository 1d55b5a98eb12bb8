use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use concierge_core::errors::{EndpointError, ModelError};

use crate::circuit::{CircuitBreaker, CircuitSnapshot};
use crate::llm::{LlmClient, ModelReply, ModelRequest};

/// The only path from the pipeline to the model endpoint. Every call is
/// admitted by the breaker and bounded by a timeout; failures are reported,
/// never replaced by a canned answer.
#[derive(Clone)]
pub struct ResilientModelClient {
    inner: Arc<dyn LlmClient>,
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
}

impl ResilientModelClient {
    pub fn new(inner: Arc<dyn LlmClient>, breaker: Arc<CircuitBreaker>, timeout: Duration) -> Self {
        Self { inner, breaker, timeout }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn circuit_snapshot(&self) -> CircuitSnapshot {
        self.breaker.snapshot()
    }

    pub async fn complete(&self, request: ModelRequest) -> Result<ModelReply, ModelError> {
        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(error) => {
                debug!(
                    event_name = "model.call.rejected",
                    endpoint = %self.breaker.endpoint(),
                    "circuit open, model call rejected"
                );
                return Err(error);
            }
        };

        let outcome = match tokio::time::timeout(self.timeout, self.inner.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(EndpointError::Timeout { after_ms: self.timeout.as_millis() as u64 }),
        };

        match outcome {
            Ok(reply) => {
                permit.succeed();
                Ok(reply)
            }
            Err(error) => {
                warn!(
                    event_name = "model.call.failed",
                    endpoint = %self.breaker.endpoint(),
                    trial = permit.is_trial(),
                    error = %error,
                    "model call failed"
                );
                permit.fail();
                Err(ModelError::Endpoint(error))
            }
        }
    }
}
