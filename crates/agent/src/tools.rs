use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use thiserror::Error;

use concierge_core::domain::tenant::{PricingError, TenantContext};
use concierge_db::{AvailabilityRepository, RecordRepository, RepositoryError};

use crate::llm::ToolDefinition;

pub const LOOKUP_RECORD: &str = "lookup_record";
pub const CHECK_AVAILABILITY: &str = "check_availability";
pub const CALCULATE_PRICE: &str = "calculate_price";

const MAX_AVAILABILITY_RANGE_DAYS: i64 = 62;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolAccess {
    ReadOnly,
    Write,
}

/// Failure of a single tool execution. Reported back to the model as a
/// tool-role message; it never ends the turn by itself.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Rejected(String),
    #[error("lookup failed: {0}")]
    Backend(String),
}

impl From<RepositoryError> for ToolError {
    fn from(error: RepositoryError) -> Self {
        Self::Backend(error.to_string())
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;

    fn access(&self) -> ToolAccess {
        ToolAccess::ReadOnly
    }

    async fn execute(&self, tenant: &TenantContext, arguments: Value) -> Result<Value, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool `{0}` can write and cannot be registered")]
    WriteCapable(String),
    #[error("tool `{0}` is already registered")]
    Duplicate(String),
}

/// Process-wide set of tools. Each tenant sees the subset named in its
/// configuration.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Registry with the three built-in lookups over the given stores.
    pub fn with_builtin(
        records: Arc<dyn RecordRepository>,
        availability: Arc<dyn AvailabilityRepository>,
    ) -> Self {
        let mut tools: BTreeMap<String, Arc<dyn Tool>> = BTreeMap::new();
        let builtin: [Arc<dyn Tool>; 3] = [
            Arc::new(LookupRecordTool::new(records)),
            Arc::new(CheckAvailabilityTool::new(availability)),
            Arc::new(CalculatePriceTool),
        ];
        for tool in builtin {
            tools.insert(tool.name().to_string(), tool);
        }
        Self { tools }
    }

    pub fn register<T>(&mut self, tool: T) -> Result<(), RegistryError>
    where
        T: Tool + 'static,
    {
        if tool.access() != ToolAccess::ReadOnly {
            return Err(RegistryError::WriteCapable(tool.name().to_string()));
        }
        if self.tools.contains_key(tool.name()) {
            return Err(RegistryError::Duplicate(tool.name().to_string()));
        }
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn definitions_for(&self, tenant: &TenantContext) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .filter(|tool| tenant.allows_tool(tool.name()))
            .map(|tool| tool.definition())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn required_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("`{key}` must be a non-empty string")))
}

pub struct LookupRecordTool {
    records: Arc<dyn RecordRepository>,
}

impl LookupRecordTool {
    pub fn new(records: Arc<dyn RecordRepository>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Tool for LookupRecordTool {
    fn name(&self) -> &'static str {
        LOOKUP_RECORD
    }

    fn description(&self) -> &'static str {
        "Look up a booking, order or customer record by its identifier."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "record_id": { "type": "string", "description": "Record identifier" } },
            "required": ["record_id"],
        })
    }

    async fn execute(&self, tenant: &TenantContext, arguments: Value) -> Result<Value, ToolError> {
        let record_id = required_str(&arguments, "record_id")?;
        match self.records.find_record(tenant.id(), record_id).await? {
            Some(record) => Ok(json!({
                "found": true,
                "record": {
                    "record_id": record.record_id,
                    "kind": record.kind,
                    "details": record.payload,
                    "updated_at": record.updated_at.to_rfc3339(),
                }
            })),
            None => Ok(json!({ "found": false, "record_id": record_id })),
        }
    }
}

pub struct CheckAvailabilityTool {
    availability: Arc<dyn AvailabilityRepository>,
}

impl CheckAvailabilityTool {
    pub fn new(availability: Arc<dyn AvailabilityRepository>) -> Self {
        Self { availability }
    }
}

fn parse_date(arguments: &Value, key: &str) -> Result<NaiveDate, ToolError> {
    let raw = required_str(arguments, key)?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        ToolError::InvalidArguments(format!("`{key}` must be a date formatted YYYY-MM-DD"))
    })
}

#[async_trait]
impl Tool for CheckAvailabilityTool {
    fn name(&self) -> &'static str {
        CHECK_AVAILABILITY
    }

    fn description(&self) -> &'static str {
        "Check open slots for a service between two dates (inclusive)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "service": { "type": "string" },
                "from": { "type": "string", "format": "date" },
                "to": { "type": "string", "format": "date" },
            },
            "required": ["service", "from", "to"],
        })
    }

    async fn execute(&self, tenant: &TenantContext, arguments: Value) -> Result<Value, ToolError> {
        let service = required_str(&arguments, "service")?;
        let from = parse_date(&arguments, "from")?;
        let to = parse_date(&arguments, "to")?;
        if to < from {
            return Err(ToolError::InvalidArguments("`to` is before `from`".to_string()));
        }
        if (to - from).num_days() > MAX_AVAILABILITY_RANGE_DAYS {
            return Err(ToolError::Rejected(format!(
                "date range exceeds {MAX_AVAILABILITY_RANGE_DAYS} days"
            )));
        }

        let window_start = Utc.from_utc_datetime(&from.and_time(NaiveTime::MIN));
        let window_end = Utc.from_utc_datetime(&to.and_time(NaiveTime::MIN)) + Duration::days(1);
        let slots =
            self.availability.open_slots(tenant.id(), service, window_start, window_end).await?;

        Ok(json!({
            "service": service,
            "available": !slots.is_empty(),
            "slots": slots
                .iter()
                .map(|slot| json!({
                    "starts_at": slot.starts_at.to_rfc3339(),
                    "ends_at": slot.ends_at.to_rfc3339(),
                }))
                .collect::<Vec<_>>(),
        }))
    }
}

/// Prices come from the tenant's rule table only; the model supplies the
/// service and quantity, never an amount.
pub struct CalculatePriceTool;

fn parse_quantity(arguments: &Value) -> Result<Decimal, ToolError> {
    let invalid = || ToolError::InvalidArguments("`quantity` must be a number".to_string());
    match arguments.get("quantity") {
        None | Some(Value::Null) => Ok(Decimal::ONE),
        Some(Value::Number(number)) => Decimal::from_str(&number.to_string())
            .or_else(|_| Decimal::from_scientific(&number.to_string()))
            .map_err(|_| invalid()),
        Some(Value::String(raw)) => Decimal::from_str(raw.trim()).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

#[async_trait]
impl Tool for CalculatePriceTool {
    fn name(&self) -> &'static str {
        CALCULATE_PRICE
    }

    fn description(&self) -> &'static str {
        "Calculate the price of a service from the business's price list."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "service": { "type": "string" },
                "quantity": { "type": "number", "description": "Hours or people, depending on the service" },
            },
            "required": ["service"],
        })
    }

    async fn execute(&self, tenant: &TenantContext, arguments: Value) -> Result<Value, ToolError> {
        let service = required_str(&arguments, "service")?;
        let quantity = parse_quantity(&arguments)?;
        let quote = tenant.pricing().quote(service, quantity).map_err(|error| match error {
            PricingError::UnknownService(_) => ToolError::Rejected(error.to_string()),
            PricingError::NonPositiveQuantity | PricingError::AmountOverflow(_) => {
                ToolError::InvalidArguments(error.to_string())
            }
        })?;

        Ok(json!({
            "service": quote.service,
            "unit": quote.unit.as_str(),
            "quantity": quote.quantity.to_string(),
            "amount": quote.amount.to_string(),
            "currency": quote.currency,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use concierge_core::domain::tenant::TenantContext;
    use concierge_db::{
        AvailabilitySlot, InMemoryAvailabilityRepository, InMemoryRecordRepository, TenantRecord,
    };
    use serde_json::{json, Value};

    use super::{
        RegistryError, Tool, ToolAccess, ToolError, ToolRegistry, CALCULATE_PRICE,
        CHECK_AVAILABILITY, LOOKUP_RECORD,
    };
    use crate::test_support::tenant;

    struct CancelBookingTool;

    #[async_trait]
    impl Tool for CancelBookingTool {
        fn name(&self) -> &'static str {
            "cancel_booking"
        }

        fn description(&self) -> &'static str {
            "Cancels a booking"
        }

        fn parameters(&self) -> Value {
            json!({ "type": "object" })
        }

        fn access(&self) -> ToolAccess {
            ToolAccess::Write
        }

        async fn execute(&self, _tenant: &TenantContext, _arguments: Value) -> Result<Value, ToolError> {
            Ok(json!({ "cancelled": true }))
        }
    }

    fn registry() -> (ToolRegistry, Arc<InMemoryRecordRepository>, Arc<InMemoryAvailabilityRepository>) {
        let records = Arc::new(InMemoryRecordRepository::default());
        let availability = Arc::new(InMemoryAvailabilityRepository::default());
        (ToolRegistry::with_builtin(records.clone(), availability.clone()), records, availability)
    }

    #[test]
    fn registry_refuses_write_capable_tools() {
        let (mut registry, _, _) = registry();

        assert_eq!(
            registry.register(CancelBookingTool),
            Err(RegistryError::WriteCapable("cancel_booking".to_string()))
        );
        assert!(!registry.contains("cancel_booking"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn empty_registry_starts_without_tools() {
        let mut registry = ToolRegistry::default();
        assert!(registry.is_empty());

        registry.register(CancelBookingTool).expect_err("write-capable tool");
        assert!(registry.is_empty());
    }

    #[test]
    fn definitions_are_limited_to_tenant_allowed_tools() {
        let (registry, _, _) = registry();

        let names: Vec<String> =
            registry.definitions_for(&tenant("harbor-spa")).into_iter().map(|d| d.name).collect();

        assert_eq!(names, vec![CALCULATE_PRICE.to_string(), CHECK_AVAILABILITY.to_string()]);
    }

    #[tokio::test]
    async fn calculate_price_applies_per_hour_rule_and_minimum() {
        let (registry, _, _) = registry();
        let tool = registry.get(CALCULATE_PRICE).expect("registered");
        let spa = tenant("harbor-spa");

        let two_hours = tool
            .execute(&spa, json!({ "service": "Massage", "quantity": 2 }))
            .await
            .expect("priced");
        let half_hour = tool
            .execute(&spa, json!({ "service": "massage", "quantity": "0.5" }))
            .await
            .expect("priced");

        assert_eq!(two_hours["amount"], "160.00");
        assert_eq!(two_hours["currency"], "EUR");
        assert_eq!(half_hour["amount"], "60.00");
    }

    #[tokio::test]
    async fn calculate_price_rejects_unknown_service() {
        let (registry, _, _) = registry();
        let tool = registry.get(CALCULATE_PRICE).expect("registered");

        let result = tool.execute(&tenant("harbor-spa"), json!({ "service": "sauna" })).await;

        assert!(matches!(result, Err(ToolError::Rejected(message)) if message.contains("sauna")));
    }

    #[tokio::test]
    async fn calculate_price_rejects_quantity_beyond_decimal_range() {
        let (registry, _, _) = registry();
        let tool = registry.get(CALCULATE_PRICE).expect("registered");

        let result = tool
            .execute(
                &tenant("harbor-spa"),
                json!({ "service": "massage", "quantity": "79228162514264337593543950335" }),
            )
            .await;

        assert!(
            matches!(result, Err(ToolError::InvalidArguments(ref message)) if message.contains("out of range")),
            "unexpected result: {result:?}"
        );
    }

    #[tokio::test]
    async fn lookup_record_is_tenant_scoped() {
        let (registry, records, _) = registry();
        let tool = registry.get(LOOKUP_RECORD).expect("registered");
        let spa = tenant("harbor-spa");
        let other = tenant("city-garage");
        records
            .insert(
                spa.id(),
                TenantRecord {
                    record_id: "BK-1".to_string(),
                    kind: "booking".to_string(),
                    payload: json!({ "status": "confirmed" }),
                    updated_at: Utc::now(),
                },
            )
            .await;

        let found = tool.execute(&spa, json!({ "record_id": "BK-1" })).await.expect("lookup");
        let hidden = tool.execute(&other, json!({ "record_id": "BK-1" })).await.expect("lookup");

        assert_eq!(found["found"], true);
        assert_eq!(found["record"]["details"]["status"], "confirmed");
        assert_eq!(hidden, json!({ "found": false, "record_id": "BK-1" }));
    }

    #[tokio::test]
    async fn check_availability_includes_end_date_and_validates_range() {
        let (registry, _, availability) = registry();
        let tool = registry.get(CHECK_AVAILABILITY).expect("registered");
        let spa = tenant("harbor-spa");
        let start = Utc.with_ymd_and_hms(2026, 5, 6, 15, 0, 0).single().expect("timestamp");
        availability
            .insert(
                spa.id(),
                AvailabilitySlot {
                    service: "facial".to_string(),
                    starts_at: start,
                    ends_at: start + chrono::Duration::hours(1),
                },
            )
            .await;

        let open = tool
            .execute(&spa, json!({ "service": "facial", "from": "2026-05-04", "to": "2026-05-06" }))
            .await
            .expect("checked");
        let closed = tool
            .execute(&spa, json!({ "service": "facial", "from": "2026-05-01", "to": "2026-05-05" }))
            .await
            .expect("checked");
        let too_wide = tool
            .execute(&spa, json!({ "service": "facial", "from": "2026-01-01", "to": "2026-06-01" }))
            .await;
        let reversed = tool
            .execute(&spa, json!({ "service": "facial", "from": "2026-05-06", "to": "2026-05-01" }))
            .await;

        assert_eq!(open["available"], true);
        assert_eq!(open["slots"].as_array().map(Vec::len), Some(1));
        assert_eq!(closed["available"], false);
        assert!(matches!(too_wide, Err(ToolError::Rejected(_))));
        assert!(matches!(reversed, Err(ToolError::InvalidArguments(_))));
    }
}
