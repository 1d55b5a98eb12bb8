use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use concierge_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

pub fn run(options: LoadOptions) -> String {
    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };

    vec![
        field("database.url", "CONCIERGE_DATABASE_URL", config.database.url.clone()),
        field(
            "database.max_connections",
            "CONCIERGE_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        field(
            "database.timeout_secs",
            "CONCIERGE_DATABASE_TIMEOUT_SECS",
            config.database.timeout_secs.to_string(),
        ),
        field("llm.provider", "CONCIERGE_LLM_PROVIDER", format!("{:?}", config.llm.provider)),
        field("llm.model", "CONCIERGE_LLM_MODEL", config.llm.model.clone()),
        field("llm.base_url", "CONCIERGE_LLM_BASE_URL", config.llm.endpoint_base()),
        field("llm.api_key", "CONCIERGE_LLM_API_KEY", llm_api_key.to_string()),
        field("llm.timeout_secs", "CONCIERGE_LLM_TIMEOUT_SECS", config.llm.timeout_secs.to_string()),
        field(
            "resilience.failure_threshold",
            "CONCIERGE_RESILIENCE_FAILURE_THRESHOLD",
            config.resilience.failure_threshold.to_string(),
        ),
        field(
            "resilience.cooldown_secs",
            "CONCIERGE_RESILIENCE_COOLDOWN_SECS",
            config.resilience.cooldown_secs.to_string(),
        ),
        field(
            "agent.max_iterations",
            "CONCIERGE_AGENT_MAX_ITERATIONS",
            config.agent.max_iterations.to_string(),
        ),
        field("agent.memory_cap", "CONCIERGE_AGENT_MEMORY_CAP", config.agent.memory_cap.to_string()),
        field(
            "agent.max_concurrent_requests",
            "CONCIERGE_AGENT_MAX_CONCURRENT_REQUESTS",
            config.agent.max_concurrent_requests.to_string(),
        ),
        field(
            "tenants.directory",
            "CONCIERGE_TENANTS_DIRECTORY",
            config.tenants.directory.display().to_string(),
        ),
        field(
            "server.bind_address",
            "CONCIERGE_SERVER_BIND_ADDRESS",
            config.server.bind_address.clone(),
        ),
        field("server.port", "CONCIERGE_SERVER_PORT", config.server.port.to_string()),
        field(
            "server.graceful_shutdown_secs",
            "CONCIERGE_SERVER_GRACEFUL_SHUTDOWN_SECS",
            config.server.graceful_shutdown_secs.to_string(),
        ),
        field("logging.level", "CONCIERGE_LOGGING_LEVEL", config.logging.level.clone()),
        field("logging.format", "CONCIERGE_LOGGING_FORMAT", format!("{:?}", config.logging.format)),
    ]
}

fn field(key: &'static str, env_key: &'static str, value: String) -> Field {
    Field { key, env_key, value }
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let root = PathBuf::from("concierge.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/concierge.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var(env_key).is_ok_and(|value| !value.trim().is_empty()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
