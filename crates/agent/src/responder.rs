use tera::{Context, Tera};
use tracing::{debug, warn};

use concierge_core::domain::classification::{Category, ClassificationResult};
use concierge_core::domain::conversation::ConversationMessage;
use concierge_core::domain::tenant::{TenantContext, ToneProfile};

use crate::llm::{ModelReply, ModelRequest};
use crate::resilience::ResilientModelClient;

/// Built-in reply templates. Tenants may override any category in their
/// configuration; overrides see the same variables.
fn builtin_template(category: Category) -> &'static str {
    match category {
        Category::BookingRequest => {
            "Hello {{ customer_name | default(value=\"there\") }},\n\n\
             Thank you for your booking request for {{ service | default(value=\"our services\") }} \
             on {{ date | default(value=\"your preferred date\") }}. We are checking availability \
             and will confirm the details with you shortly."
        }
        Category::BookingModification => {
            "Hello {{ customer_name | default(value=\"there\") }},\n\n\
             We have received your request to change booking \
             {{ booking_reference | default(value=\"on file\") }}. We will review the new details \
             and confirm the update as soon as possible."
        }
        Category::GeneralInquiry => {
            "Hello {{ customer_name | default(value=\"there\") }},\n\n\
             Thank you for getting in touch with {{ business }}. We have received your question \
             and will get back to you with an answer shortly."
        }
        Category::Complaint => {
            "Hello {{ customer_name | default(value=\"there\") }},\n\n\
             We are sorry to hear about your experience. Your message has been passed to our team, \
             who will look into it and contact you personally."
        }
        Category::Cancellation => {
            "Hello {{ customer_name | default(value=\"there\") }},\n\n\
             We have received your cancellation request for booking \
             {{ booking_reference | default(value=\"on file\") }}. You will receive a confirmation \
             once it has been processed."
        }
        Category::Payment => {
            "Hello {{ customer_name | default(value=\"there\") }},\n\n\
             Thank you for your message about payment. Our team will review your account and \
             follow up with the details you need."
        }
        Category::Spam => "Thank you for your message.",
    }
}

/// Produces the outbound reply for non-agent categories: template, then an
/// optional tone restyle, then the tenant's fixed signature.
#[derive(Clone)]
pub struct ResponseGenerator {
    model: ResilientModelClient,
}

impl ResponseGenerator {
    pub fn new(model: ResilientModelClient) -> Self {
        Self { model }
    }

    /// Never fails: without a usable restyle the populated template is sent.
    pub async fn generate(
        &self,
        classification: &ClassificationResult,
        tenant: &TenantContext,
    ) -> String {
        let draft = populate_template(classification, tenant);
        let body = match self.restyle(&draft, tenant).await {
            Some(restyled) => restyled,
            None => draft,
        };
        append_signature(&body, tenant)
    }

    async fn restyle(&self, draft: &str, tenant: &TenantContext) -> Option<String> {
        let request = ModelRequest::new(vec![
            ConversationMessage::system(restyle_instructions(tenant)),
            ConversationMessage::user(draft),
        ]);

        match self.model.complete(request).await {
            Ok(ModelReply::Text(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => {
                debug!(
                    event_name = "responder.restyle.unusable",
                    tenant_id = %tenant.id(),
                    "restyle reply unusable, sending template"
                );
                None
            }
            Err(error) => {
                warn!(
                    event_name = "responder.restyle.fallback",
                    tenant_id = %tenant.id(),
                    error = %error,
                    "restyle unavailable, sending template"
                );
                None
            }
        }
    }
}

pub(crate) fn populate_template(
    classification: &ClassificationResult,
    tenant: &TenantContext,
) -> String {
    let mut context = Context::new();
    for (name, value) in &classification.fields {
        context.insert(name.as_str(), value);
    }
    context.insert("business", tenant.display_name());
    context.insert("category", classification.category.as_str());

    let category = classification.category;
    if let Some(template) = tenant.template_override(category) {
        match Tera::one_off(template, &context, false) {
            Ok(rendered) => return rendered.trim().to_string(),
            Err(error) => warn!(
                event_name = "responder.template.override_failed",
                tenant_id = %tenant.id(),
                category = %category,
                error = %error,
                "tenant template failed to render, using built-in"
            ),
        }
    }

    match Tera::one_off(builtin_template(category), &context, false) {
        Ok(rendered) => rendered.trim().to_string(),
        Err(error) => {
            warn!(
                event_name = "responder.template.builtin_failed",
                category = %category,
                error = %error,
                "built-in template failed to render"
            );
            "Thank you for your message. We will get back to you shortly.".to_string()
        }
    }
}

fn restyle_instructions(tenant: &TenantContext) -> String {
    format!(
        "Rewrite the reply below for {name}. Use a {tone} tone. Keep every fact, name, date, \
         price and reference exactly as written. Do not add a greeting sign-off or signature. \
         Return only the rewritten reply.",
        name = tenant.display_name(),
        tone = describe_tone(tenant.tone()),
    )
}

fn describe_tone(tone: &ToneProfile) -> String {
    fn level(value: f64, low: &'static str, mid: &'static str, high: &'static str) -> &'static str {
        if value < 0.34 {
            low
        } else if value < 0.67 {
            mid
        } else {
            high
        }
    }

    format!(
        "{}, {} and {}",
        level(tone.formality, "casual", "friendly but professional", "formal"),
        level(tone.enthusiasm, "calm", "warm", "enthusiastic"),
        level(tone.detail, "brief", "moderately detailed", "thorough"),
    )
}

fn append_signature(body: &str, tenant: &TenantContext) -> String {
    format!("{}\n\n{}", body.trim_end(), tenant.signature())
}
