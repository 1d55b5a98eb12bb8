use std::sync::Arc;
use std::time::Duration;

use concierge_agent::{
    AgentRuntime, CircuitBreaker, HttpChatClient, LlmClient, ResilientModelClient, ToolRegistry,
};
use concierge_core::config::{AppConfig, ConfigError, LoadOptions};
use concierge_core::errors::EndpointError;
use concierge_core::tenants::{FileTenantSource, TenantConfigSource};
use concierge_db::{
    connect_with_settings, migrations, DbPool, SqlAvailabilityRepository,
    SqlConversationRepository, SqlRecordRepository,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
    pub tenants: Arc<dyn TenantConfigSource>,
    pub breaker: Arc<CircuitBreaker>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("model client setup failed: {0}")]
    ModelClient(#[source] EndpointError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let llm: Arc<dyn LlmClient> =
        Arc::new(HttpChatClient::from_config(&config.llm).map_err(BootstrapError::ModelClient)?);
    let application = assemble(config, db_pool, llm);
    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        endpoint = %application.breaker.endpoint(),
        tenants_directory = %application.config.tenants.directory.display(),
        "agent runtime assembled"
    );
    Ok(application)
}

/// Wires the runtime around an already-built model client. One breaker is
/// shared by every component calling the endpoint.
pub fn assemble(config: AppConfig, db_pool: DbPool, llm: Arc<dyn LlmClient>) -> Application {
    let breaker = Arc::new(CircuitBreaker::from_config(llm.endpoint(), &config.resilience));
    let model = ResilientModelClient::new(
        llm,
        breaker.clone(),
        Duration::from_secs(config.llm.timeout_secs),
    );
    let registry = Arc::new(ToolRegistry::with_builtin(
        Arc::new(SqlRecordRepository::new(db_pool.clone())),
        Arc::new(SqlAvailabilityRepository::new(db_pool.clone())),
    ));
    let runtime = Arc::new(AgentRuntime::new(
        model,
        Arc::new(SqlConversationRepository::new(db_pool.clone())),
        registry,
        &config.agent,
    ));
    let tenants: Arc<dyn TenantConfigSource> =
        Arc::new(FileTenantSource::new(config.tenants.directory.clone()));

    Application { config, db_pool, runtime, tenants, breaker }
}

#[cfg(test)]
mod tests {
    use concierge_core::config::{ConfigOverrides, LlmProvider, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                llm_provider: Some(LlmProvider::Ollama),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_when_openai_has_no_api_key() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                llm_provider: Some(LlmProvider::OpenAi),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("llm.api_key"), "unexpected error: {message}");
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_runtime() {
        let app = bootstrap(overrides("sqlite::memory:")).await.expect("bootstrap succeeds");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('conversation_messages', 'tenant_records', 'availability_slots')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");

        assert_eq!(table_count, 3);
        assert!(app.breaker.endpoint().ends_with("/chat/completions"));
        assert_eq!(app.runtime.available_permits(), app.config.agent.max_concurrent_requests);

        app.db_pool.close().await;
    }
}
