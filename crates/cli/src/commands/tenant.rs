use concierge_core::config::{AppConfig, LoadOptions};
use concierge_core::domain::tenant::TenantContext;
use concierge_core::tenants::{FileTenantSource, TenantConfigSource, TenantSourceError};

use crate::commands::{block_on, CommandResult};

pub fn run(options: LoadOptions, tenant_id: &str) -> CommandResult {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "tenant",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let source = FileTenantSource::new(config.tenants.directory.clone());
    let loaded = match block_on(source.load_tenant_context(tenant_id)) {
        Ok(loaded) => loaded,
        Err(message) => return CommandResult::failure("tenant", "runtime_init", message, 3),
    };

    match loaded {
        Ok(tenant) => CommandResult::success("tenant", describe(&tenant)),
        Err(TenantSourceError::NotFound(id)) => CommandResult::failure(
            "tenant",
            "tenant_not_found",
            format!("no tenant file for `{id}` in `{}`", source.directory().display()),
            7,
        ),
        Err(error) => CommandResult::failure("tenant", "tenant_invalid", error.to_string(), 8),
    }
}

fn describe(tenant: &TenantContext) -> String {
    let tools = if tenant.allowed_tools().is_empty() {
        "none (agent route disabled)".to_string()
    } else {
        tenant.allowed_tools().iter().cloned().collect::<Vec<_>>().join(", ")
    };
    let tone = tenant.tone();

    format!(
        "tenant `{}` ({}) is valid: tools [{tools}], services [{}], {} pricing rule(s) in {}, \
         tone formality={} enthusiasm={} detail={}",
        tenant.id(),
        tenant.display_name(),
        tenant.service_types().join(", "),
        tenant.pricing().rules.len(),
        tenant.pricing().currency,
        tone.formality,
        tone.enthusiasm,
        tone.detail,
    )
}
