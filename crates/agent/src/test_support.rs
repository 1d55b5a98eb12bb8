use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

use concierge_core::domain::tenant::{
    PricingRule, PricingTable, PricingUnit, TenantConfig, TenantContext, ToneProfile,
};
use concierge_core::errors::EndpointError;

use crate::circuit::{BreakerPolicy, CircuitBreaker};
use crate::llm::{LlmClient, ModelReply, ModelRequest};
use crate::resilience::ResilientModelClient;

enum Fallback {
    Fail(EndpointError),
    Hang,
}

/// Model double answering from a script, then from its fallback.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<ModelReply, EndpointError>>>,
    fallback: Fallback,
    requests: Mutex<Vec<ModelRequest>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(script: impl IntoIterator<Item = Result<ModelReply, EndpointError>>) -> Self {
        Self::with_fallback(
            script,
            Fallback::Fail(EndpointError::InvalidResponse("script exhausted".to_string())),
        )
    }

    pub fn failing(error: EndpointError) -> Self {
        Self::with_fallback(Vec::new(), Fallback::Fail(error))
    }

    pub fn hanging() -> Self {
        Self::with_fallback(Vec::new(), Fallback::Hang)
    }

    fn with_fallback(
        script: impl IntoIterator<Item = Result<ModelReply, EndpointError>>,
        fallback: Fallback,
    ) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push_text(&self, text: &str) {
        self.script.lock().expect("script lock").push_back(Ok(ModelReply::Text(text.to_string())));
    }

    pub fn endpoint_name(&self) -> &'static str {
        "scripted://model"
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn endpoint(&self) -> &str {
        self.endpoint_name()
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelReply, EndpointError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("requests lock").push(request);
        let next = self.script.lock().expect("script lock").pop_front();
        match (next, &self.fallback) {
            (Some(outcome), _) => outcome,
            (None, Fallback::Fail(error)) => Err(error.clone()),
            (None, Fallback::Hang) => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Err(EndpointError::Transport("hung call woke up".to_string()))
            }
        }
    }
}

pub fn text(value: &str) -> Result<ModelReply, EndpointError> {
    Ok(ModelReply::Text(value.to_string()))
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> Result<ModelReply, EndpointError> {
    Ok(ModelReply::ToolCall { id: id.to_string(), name: name.to_string(), arguments })
}

pub fn model_client(llm: Arc<ScriptedLlm>) -> ResilientModelClient {
    let breaker = Arc::new(CircuitBreaker::new(llm.endpoint_name(), BreakerPolicy::default()));
    ResilientModelClient::new(llm, breaker, Duration::from_secs(30))
}

pub fn tenant_config(id: &str) -> TenantConfig {
    TenantConfig {
        id: id.to_string(),
        display_name: Some("Harbor Spa".to_string()),
        signature: "Warm regards,\nHarbor Spa".to_string(),
        tone: ToneProfile { formality: 0.8, enthusiasm: 0.3, detail: 0.6 },
        pricing: PricingTable {
            currency: "EUR".to_string(),
            rules: vec![
                PricingRule {
                    service: "massage".to_string(),
                    unit: PricingUnit::PerHour,
                    amount: Decimal::new(8_000, 2),
                    minimum: Some(Decimal::new(6_000, 2)),
                },
                PricingRule {
                    service: "day pass".to_string(),
                    unit: PricingUnit::Flat,
                    amount: Decimal::new(4_500, 2),
                    minimum: None,
                },
            ],
        },
        service_types: vec!["facial".to_string()],
        allowed_tools: vec!["calculate_price".to_string(), "check_availability".to_string()],
        agent_categories: None,
        templates: BTreeMap::new(),
    }
}

pub fn tenant(id: &str) -> Arc<TenantContext> {
    Arc::new(TenantContext::try_from(tenant_config(id)).expect("test tenant is valid"))
}
