use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use concierge_core::domain::classification::{
    Category, ClassificationResult, Confidence, Sentiment,
};
use concierge_core::domain::conversation::ConversationMessage;
use concierge_core::domain::tenant::TenantContext;
use concierge_core::errors::ClassificationError;

use crate::llm::{ModelReply, ModelRequest, ResponseFormat};
use crate::resilience::ResilientModelClient;

/// Turns inbound text into a validated [`ClassificationResult`]. Anything the
/// model returns outside the closed schema is rejected, never defaulted.
#[derive(Clone)]
pub struct Classifier {
    model: ResilientModelClient,
}

impl Classifier {
    pub fn new(model: ResilientModelClient) -> Self {
        Self { model }
    }

    pub async fn classify(
        &self,
        text: &str,
        tenant: &TenantContext,
    ) -> Result<ClassificationResult, ClassificationError> {
        let request = ModelRequest::new(vec![
            ConversationMessage::system(instructions(tenant)),
            ConversationMessage::user(text),
        ])
        .with_response_format(ResponseFormat {
            name: "message_classification".to_string(),
            schema: classification_schema(),
        });

        let raw = match self.model.complete(request).await? {
            ModelReply::Text(raw) => raw,
            ModelReply::ToolCall { name, .. } => {
                return Err(malformed(tenant, "expected a classification, got a tool request", &name));
            }
        };

        match parse_classification(&raw) {
            Ok(result) => {
                info!(
                    event_name = "classifier.classified",
                    tenant_id = %tenant.id(),
                    category = %result.category,
                    confidence = result.confidence.value(),
                    sentiment = result.sentiment.as_str(),
                    "message classified"
                );
                Ok(result)
            }
            Err(reason) => Err(malformed(tenant, &reason, &raw)),
        }
    }
}

fn malformed(tenant: &TenantContext, reason: &str, raw: &str) -> ClassificationError {
    warn!(
        event_name = "classifier.malformed",
        tenant_id = %tenant.id(),
        reason = reason,
        "model returned an unusable classification"
    );
    ClassificationError::Malformed { reason: reason.to_string(), raw: raw.to_string() }
}

fn instructions(tenant: &TenantContext) -> String {
    let categories =
        Category::ALL.iter().map(Category::as_str).collect::<Vec<_>>().join(", ");
    let services = if tenant.service_types().is_empty() {
        "none listed".to_string()
    } else {
        tenant.service_types().join(", ")
    };
    let pricing = tenant
        .pricing()
        .rules
        .iter()
        .map(|rule| format!("{} ({})", rule.service, rule.unit.as_str()))
        .collect::<Vec<_>>();

    let mut prompt = format!(
        "You classify inbound customer messages for {name}.\n\
         Allowed categories: {categories}.\n\
         Services offered: {services}.\n",
        name = tenant.display_name(),
    );
    if !pricing.is_empty() {
        prompt.push_str(&format!(
            "Priced services ({currency}): {list}.\n",
            currency = tenant.pricing().currency,
            list = pricing.join(", "),
        ));
    }
    prompt.push_str(
        "Return JSON with `category`, `confidence` between 0 and 1, `sentiment` \
         (positive, neutral or negative) and `fields`, a map of extracted details such as \
         customer_name, service, date, time or booking_reference. Only include fields present \
         in the message.",
    );
    prompt
}

fn classification_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "category": {
                "type": "string",
                "enum": Category::ALL.iter().map(Category::as_str).collect::<Vec<_>>(),
            },
            "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
            "sentiment": { "type": "string", "enum": ["positive", "neutral", "negative"] },
            "fields": { "type": "object", "additionalProperties": { "type": "string" } },
        },
        "required": ["category", "confidence", "sentiment", "fields"],
        "additionalProperties": false,
    })
}

pub(crate) fn parse_classification(raw: &str) -> Result<ClassificationResult, String> {
    let payload: Value = serde_json::from_str(strip_code_fence(raw))
        .map_err(|error| format!("reply is not JSON: {error}"))?;
    let object = payload.as_object().ok_or_else(|| "reply is not a JSON object".to_string())?;

    let category = match object.get("category") {
        Some(Value::String(name)) => name
            .parse::<Category>()
            .map_err(|_| format!("unrecognized category `{name}`"))?,
        Some(_) => return Err("category is not a string".to_string()),
        None => return Err("missing category".to_string()),
    };

    let confidence = match object.get("confidence").and_then(Value::as_f64) {
        Some(value) => Confidence::new(value)
            .ok_or_else(|| format!("confidence {value} is outside [0, 1]"))?,
        None => return Err("missing or non-numeric confidence".to_string()),
    };

    let sentiment = match object.get("sentiment") {
        Some(Value::String(name)) => name
            .parse::<Sentiment>()
            .map_err(|_| format!("unrecognized sentiment `{name}`"))?,
        _ => return Err("missing sentiment".to_string()),
    };

    let fields = match object.get("fields") {
        Some(Value::Object(map)) => extract_fields(map),
        Some(Value::Null) | None => BTreeMap::new(),
        Some(_) => return Err("fields is not an object".to_string()),
    };

    Ok(ClassificationResult { category, confidence, fields, sentiment })
}

fn extract_fields(map: &Map<String, Value>) -> BTreeMap<String, String> {
    map.iter()
        .filter_map(|(key, value)| {
            let rendered = match value {
                Value::String(text) => text.trim().to_string(),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                Value::Null | Value::Array(_) | Value::Object(_) => return None,
            };
            (!rendered.is_empty()).then(|| (key.clone(), rendered))
        })
        .collect()
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.strip_prefix("json").unwrap_or(rest);
    body.strip_suffix("```").unwrap_or(body).trim()
}
