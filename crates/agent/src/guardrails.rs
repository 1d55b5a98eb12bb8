use serde_json::Value;

use concierge_core::domain::tenant::TenantContext;

use crate::tools::ToolRegistry;

/// A tool request as proposed by the model, before anything runs.
#[derive(Clone, Copy, Debug)]
pub struct ToolInvocation<'a> {
    pub name: &'a str,
    pub arguments: &'a Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub max_argument_bytes: usize,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { max_argument_bytes: 4 * 1024 }
    }
}

impl GuardrailPolicy {
    /// The tenant's own allow-list is checked first so that a tool unknown to
    /// this tenant is reported as not permitted even if it exists elsewhere.
    pub fn evaluate(
        &self,
        tenant: &TenantContext,
        invocation: ToolInvocation<'_>,
        registry: &ToolRegistry,
    ) -> GuardrailDecision {
        if !tenant.allows_tool(invocation.name) {
            return GuardrailDecision::Deny { reason_code: "tool_not_permitted" };
        }

        // Only read-only tools can be registered, so a registered tool is safe to run.
        if !registry.contains(invocation.name) {
            return GuardrailDecision::Deny { reason_code: "tool_not_registered" };
        }

        if invocation.arguments.to_string().len() > self.max_argument_bytes {
            return GuardrailDecision::Deny { reason_code: "arguments_too_large" };
        }

        GuardrailDecision::Allow
    }
}
