use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::classification::Category;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    /// Tenant ids double as file names, so only `[A-Za-z0-9_-]` is allowed.
    pub fn parse(value: &str) -> Result<Self, TenantConfigError> {
        let valid = !value.is_empty()
            && value.len() <= 64
            && value.chars().all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'));
        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(TenantConfigError::InvalidId(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TenantConfigError {
    #[error("invalid tenant id `{0}` (expected 1-64 characters of [A-Za-z0-9_-])")]
    InvalidId(String),
    #[error("tone.{field} must be within 0.0..=1.0, got {value}")]
    ToneOutOfRange { field: &'static str, value: String },
    #[error("signature must not be empty")]
    EmptySignature,
    #[error("pricing rule for `{0}` is declared more than once")]
    DuplicatePricingRule(String),
    #[error("pricing rule for `{service}` is invalid: {reason}")]
    InvalidPricingRule { service: String, reason: String },
    #[error("`{0}` is not a known message category")]
    UnknownCategory(String),
}

/// Tone knobs, each normalized to `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToneProfile {
    pub formality: f64,
    pub enthusiasm: f64,
    pub detail: f64,
}

impl Default for ToneProfile {
    fn default() -> Self {
        Self { formality: 0.5, enthusiasm: 0.5, detail: 0.5 }
    }
}

impl ToneProfile {
    fn validate(&self) -> Result<(), TenantConfigError> {
        for (field, value) in
            [("formality", self.formality), ("enthusiasm", self.enthusiasm), ("detail", self.detail)]
        {
            if !(value.is_finite() && (0.0..=1.0).contains(&value)) {
                return Err(TenantConfigError::ToneOutOfRange { field, value: value.to_string() });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingUnit {
    Flat,
    PerHour,
    PerPerson,
}

impl PricingUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::PerHour => "per_hour",
            Self::PerPerson => "per_person",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricingRule {
    pub service: String,
    pub unit: PricingUnit,
    pub amount: Decimal,
    #[serde(default)]
    pub minimum: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    pub currency: String,
    #[serde(default)]
    pub rules: Vec<PricingRule>,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self { currency: "USD".to_string(), rules: Vec::new() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("no pricing rule for service `{0}`")]
    UnknownService(String),
    #[error("quantity must be greater than zero")]
    NonPositiveQuantity,
    #[error("price for quantity {0} is out of range")]
    AmountOverflow(Decimal),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PriceQuote {
    pub service: String,
    pub unit: PricingUnit,
    pub quantity: Decimal,
    pub amount: Decimal,
    pub currency: String,
}

impl PricingTable {
    pub fn rule(&self, service: &str) -> Option<&PricingRule> {
        let wanted = service.trim();
        self.rules.iter().find(|rule| rule.service.eq_ignore_ascii_case(wanted))
    }

    /// Deterministic price for `quantity` units of `service`. Flat rules
    /// ignore the quantity; the minimum charge applies after multiplication.
    pub fn quote(&self, service: &str, quantity: Decimal) -> Result<PriceQuote, PricingError> {
        let rule = self.rule(service).ok_or_else(|| PricingError::UnknownService(service.into()))?;
        if quantity <= Decimal::ZERO {
            return Err(PricingError::NonPositiveQuantity);
        }

        let raw = match rule.unit {
            PricingUnit::Flat => rule.amount,
            PricingUnit::PerHour | PricingUnit::PerPerson => rule
                .amount
                .checked_mul(quantity)
                .ok_or(PricingError::AmountOverflow(quantity))?,
        };
        let floored = rule.minimum.map_or(raw, |minimum| raw.max(minimum));

        Ok(PriceQuote {
            service: rule.service.clone(),
            unit: rule.unit,
            quantity,
            amount: floored.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
            currency: self.currency.clone(),
        })
    }

    fn validate(&self) -> Result<(), TenantConfigError> {
        let mut seen = BTreeSet::new();
        for rule in &self.rules {
            let key = rule.service.trim().to_ascii_lowercase();
            if key.is_empty() {
                return Err(TenantConfigError::InvalidPricingRule {
                    service: rule.service.clone(),
                    reason: "service name is empty".to_string(),
                });
            }
            if !seen.insert(key) {
                return Err(TenantConfigError::DuplicatePricingRule(rule.service.clone()));
            }
            if rule.amount < Decimal::ZERO || rule.minimum.is_some_and(|min| min < Decimal::ZERO) {
                return Err(TenantConfigError::InvalidPricingRule {
                    service: rule.service.clone(),
                    reason: "amounts must not be negative".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Raw tenant configuration as stored on disk.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TenantConfig {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub signature: String,
    #[serde(default)]
    pub tone: ToneProfile,
    #[serde(default)]
    pub pricing: PricingTable,
    #[serde(default)]
    pub service_types: Vec<String>,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub agent_categories: Option<Vec<String>>,
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
}

/// Per-request tenant configuration. Built once from a validated
/// [`TenantConfig`] and only ever handed out by shared reference.
#[derive(Clone, Debug, PartialEq)]
pub struct TenantContext {
    id: TenantId,
    display_name: String,
    signature: String,
    tone: ToneProfile,
    pricing: PricingTable,
    service_types: Vec<String>,
    allowed_tools: BTreeSet<String>,
    agent_categories: BTreeSet<Category>,
    templates: BTreeMap<Category, String>,
}

const DEFAULT_AGENT_CATEGORIES: [Category; 2] = [Category::GeneralInquiry, Category::BookingRequest];

impl TryFrom<TenantConfig> for TenantContext {
    type Error = TenantConfigError;

    fn try_from(config: TenantConfig) -> Result<Self, Self::Error> {
        let id = TenantId::parse(config.id.trim())?;
        config.tone.validate()?;
        config.pricing.validate()?;

        let signature = config.signature.trim_end().to_string();
        if signature.trim().is_empty() {
            return Err(TenantConfigError::EmptySignature);
        }

        let agent_categories = match config.agent_categories {
            Some(names) => parse_categories(names.iter().map(String::as_str))?,
            None => DEFAULT_AGENT_CATEGORIES.into_iter().collect(),
        };

        let mut templates = BTreeMap::new();
        for (name, template) in config.templates {
            let category = name
                .parse::<Category>()
                .map_err(|_| TenantConfigError::UnknownCategory(name.clone()))?;
            templates.insert(category, template);
        }

        let mut service_types = config.service_types;
        for rule in &config.pricing.rules {
            if !service_types.iter().any(|known| known.eq_ignore_ascii_case(&rule.service)) {
                service_types.push(rule.service.clone());
            }
        }

        Ok(Self {
            display_name: config.display_name.unwrap_or_else(|| id.0.clone()),
            id,
            signature,
            tone: config.tone,
            pricing: config.pricing,
            service_types,
            allowed_tools: config.allowed_tools.into_iter().map(|t| t.trim().to_string()).collect(),
            agent_categories,
            templates,
        })
    }
}

fn parse_categories<'a>(
    names: impl Iterator<Item = &'a str>,
) -> Result<BTreeSet<Category>, TenantConfigError> {
    names
        .map(|name| {
            name.parse::<Category>().map_err(|_| TenantConfigError::UnknownCategory(name.to_string()))
        })
        .collect()
}

impl TenantContext {
    pub fn id(&self) -> &TenantId {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn tone(&self) -> &ToneProfile {
        &self.tone
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn service_types(&self) -> &[String] {
        &self.service_types
    }

    pub fn allowed_tools(&self) -> &BTreeSet<String> {
        &self.allowed_tools
    }

    pub fn allows_tool(&self, name: &str) -> bool {
        self.allowed_tools.contains(name)
    }

    pub fn routes_to_agent(&self, category: Category) -> bool {
        !self.allowed_tools.is_empty() && self.agent_categories.contains(&category)
    }

    pub fn template_override(&self, category: Category) -> Option<&str> {
        self.templates.get(&category).map(String::as_str)
    }
}


#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::fixtures::{harbor_spa, harbor_spa_config};
    use super::{PricingError, TenantConfigError, TenantContext, TenantId};
    use crate::domain::classification::Category;

    #[test]
    fn tenant_id_rejects_path_like_values() {
        assert!(TenantId::parse("harbor-spa_2").is_ok());
        assert!(TenantId::parse("../etc/passwd").is_err());
        assert!(TenantId::parse("a/b").is_err());
        assert!(TenantId::parse("").is_err());
    }

    #[test]
    fn context_merges_pricing_services_into_service_types() {
        let tenant = harbor_spa();
        assert_eq!(tenant.service_types(), ["facial", "massage", "day pass"]);
        assert_eq!(tenant.display_name(), "Harbor Spa");
    }

    #[test]
    fn tone_out_of_range_is_rejected() {
        let mut config = harbor_spa_config();
        config.tone.enthusiasm = 1.5;
        let error = TenantContext::try_from(config).expect_err("tone must be validated");
        assert!(matches!(error, TenantConfigError::ToneOutOfRange { field: "enthusiasm", .. }));
    }

    #[test]
    fn blank_signature_is_rejected() {
        let mut config = harbor_spa_config();
        config.signature = "   \n".to_string();
        assert_eq!(TenantContext::try_from(config), Err(TenantConfigError::EmptySignature));
    }

    #[test]
    fn unknown_template_category_is_rejected() {
        let mut config = harbor_spa_config();
        config.templates.insert("refund".to_string(), "Hi".to_string());
        assert_eq!(
            TenantContext::try_from(config),
            Err(TenantConfigError::UnknownCategory("refund".to_string()))
        );
    }

    #[test]
    fn duplicate_pricing_rules_are_rejected() {
        let mut config = harbor_spa_config();
        let mut duplicate = config.pricing.rules[0].clone();
        duplicate.service = "MASSAGE".to_string();
        config.pricing.rules.push(duplicate);
        assert!(matches!(
            TenantContext::try_from(config),
            Err(TenantConfigError::DuplicatePricingRule(_))
        ));
    }

    #[test]
    fn agent_routing_requires_tools_and_category() {
        let tenant = harbor_spa();
        assert!(tenant.routes_to_agent(Category::GeneralInquiry));
        assert!(!tenant.routes_to_agent(Category::Complaint));

        let mut config = harbor_spa_config();
        config.allowed_tools.clear();
        let without_tools = TenantContext::try_from(config).expect("valid");
        assert!(!without_tools.routes_to_agent(Category::GeneralInquiry));
    }

    #[test]
    fn per_hour_price_applies_minimum_and_rounds() {
        let pricing = harbor_spa().pricing().clone();

        let short = pricing.quote("Massage", Decimal::new(5, 1)).expect("priced");
        assert_eq!(short.amount, Decimal::new(6_000, 2));

        let long = pricing.quote("massage", Decimal::new(15, 1)).expect("priced");
        assert_eq!(long.amount, Decimal::new(12_000, 2));
        assert_eq!(long.currency, "EUR");
    }

    #[test]
    fn flat_price_ignores_quantity() {
        let pricing = harbor_spa().pricing().clone();
        let quote = pricing.quote("day pass", Decimal::new(3, 0)).expect("priced");
        assert_eq!(quote.amount, Decimal::new(4_500, 2));
    }

    #[test]
    fn unknown_service_and_zero_quantity_fail() {
        let pricing = harbor_spa().pricing().clone();
        assert_eq!(
            pricing.quote("sauna", Decimal::ONE),
            Err(PricingError::UnknownService("sauna".to_string()))
        );
        assert_eq!(pricing.quote("massage", Decimal::ZERO), Err(PricingError::NonPositiveQuantity));
    }

    #[test]
    fn oversized_quantity_is_an_error_not_a_panic() {
        let pricing = harbor_spa().pricing().clone();
        assert_eq!(
            pricing.quote("massage", Decimal::MAX),
            Err(PricingError::AmountOverflow(Decimal::MAX))
        );
        assert!(pricing.quote("day pass", Decimal::MAX).is_ok());
    }
}
