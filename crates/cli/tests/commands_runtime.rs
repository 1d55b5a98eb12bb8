use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use concierge_cli::commands::{config, doctor, load_options, migrate, tenant};
use serde_json::Value;
use tempfile::TempDir;

const HARBOR_SPA: &str = r#"
id = "harbor-spa"
display_name = "Harbor Spa"
signature = "Warm regards,\nHarbor Spa"
allowed_tools = ["check_availability", "calculate_price"]

[tone]
formality = 0.8
enthusiasm = 0.3
detail = 0.6

[pricing]
currency = "EUR"

[[pricing.rules]]
service = "massage"
unit = "per_hour"
amount = "80.00"
"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(extra_config: &str) -> Self {
        let dir = TempDir::new().expect("tempdir");
        fs::create_dir(dir.path().join("tenants")).expect("tenants dir");
        let config = format!(
            "[database]\nurl = \"sqlite::memory:\"\n\n[llm]\nprovider = \"ollama\"\n\n\
             [tenants]\ndirectory = '{}'\n\n{extra_config}",
            dir.path().join("tenants").display()
        );
        fs::write(dir.path().join("concierge.toml"), config).expect("config file");
        Self { dir }
    }

    fn config_path(&self) -> PathBuf {
        self.dir.path().join("concierge.toml")
    }

    fn write_tenant(&self, id: &str, contents: &str) {
        fs::write(self.tenants_dir().join(format!("{id}.toml")), contents).expect("tenant file");
    }

    fn tenants_dir(&self) -> PathBuf {
        self.dir.path().join("tenants")
    }
}

#[test]
fn migrate_returns_success_with_valid_config() {
    with_clean_env(|| {
        let workspace = Workspace::new("");

        let result = migrate::run(load_options(Some(workspace.config_path())));
        assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_missing_explicit_file() {
    with_clean_env(|| {
        let result = migrate::run(load_options(Some(PathBuf::from("/nonexistent/concierge.toml"))));
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn tenant_reports_valid_file() {
    with_clean_env(|| {
        let workspace = Workspace::new("");
        workspace.write_tenant("harbor-spa", HARBOR_SPA);

        let result = tenant::run(load_options(Some(workspace.config_path())), "harbor-spa");
        assert_eq!(result.exit_code, 0, "expected tenant to validate: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "tenant");
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("`harbor-spa` (Harbor Spa) is valid"));
        assert!(message.contains("calculate_price, check_availability"));
        assert!(message.contains("1 pricing rule(s) in EUR"));
    });
}

#[test]
fn tenant_distinguishes_missing_and_invalid_files() {
    with_clean_env(|| {
        let workspace = Workspace::new("");
        let broken = HARBOR_SPA.replace("harbor-spa", "broken-spa").replace("0.8", "1.8");
        workspace.write_tenant("broken-spa", &broken);

        let missing = tenant::run(load_options(Some(workspace.config_path())), "harbor-spa");
        assert_eq!(missing.exit_code, 7);
        assert_eq!(parse_payload(&missing.output)["error_class"], "tenant_not_found");

        let traversal = tenant::run(load_options(Some(workspace.config_path())), "../etc/passwd");
        assert_eq!(traversal.exit_code, 7);

        let invalid = tenant::run(load_options(Some(workspace.config_path())), "broken-spa");
        assert_eq!(invalid.exit_code, 8);
        assert_eq!(parse_payload(&invalid.output)["error_class"], "tenant_invalid");
    });
}

#[test]
fn doctor_passes_with_tenants_and_reachable_database() {
    with_clean_env(|| {
        let workspace = Workspace::new("");
        workspace.write_tenant("harbor-spa", HARBOR_SPA);

        let result = doctor::run(load_options(Some(workspace.config_path())), true);
        assert_eq!(result.exit_code, 0, "expected doctor pass: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "pass");
        assert_eq!(check_status(&payload, "tenant_directory"), "pass");
        assert_eq!(check_status(&payload, "database_connectivity"), "pass");
    });
}

#[test]
fn doctor_fails_on_empty_tenant_directory() {
    with_clean_env(|| {
        let workspace = Workspace::new("");

        let result = doctor::run(load_options(Some(workspace.config_path())), true);
        assert_eq!(result.exit_code, 1);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
        assert_eq!(check_status(&payload, "config_validation"), "pass");
        assert_eq!(check_status(&payload, "tenant_directory"), "fail");
        assert!(workspace.tenants_dir().exists());
    });
}

#[test]
fn doctor_skips_checks_when_config_is_invalid() {
    with_clean_env(|| {
        let workspace = Workspace::new("[agent]\nmax_iterations = 0\n");

        let result = doctor::run(load_options(Some(workspace.config_path())), true);
        assert_eq!(result.exit_code, 1);

        let payload = parse_payload(&result.output);
        assert_eq!(check_status(&payload, "config_validation"), "fail");
        assert_eq!(check_status(&payload, "database_connectivity"), "skipped");
    });
}

#[test]
fn config_redacts_api_key_and_attributes_sources() {
    with_clean_env(|| {
        let workspace = Workspace::new("");
        let path = workspace.config_path();
        let contents = fs::read_to_string(&path).expect("config").replace(
            "provider = \"ollama\"",
            "provider = \"openai\"\napi_key = \"sk-live-secret-value\"",
        );
        fs::write(&path, contents).expect("rewrite config");
        env::set_var("CONCIERGE_AGENT_MEMORY_CAP", "12");

        let output = config::run(load_options(Some(path.clone())));

        assert!(!output.contains("sk-live-secret-value"), "secret leaked: {output}");
        assert!(output.contains(&format!(
            "- llm.api_key = <redacted> (source: file ({}))",
            path.display()
        )));
        assert!(output.contains("- agent.memory_cap = 12 (source: env (CONCIERGE_AGENT_MEMORY_CAP))"));
        assert!(output.contains("- server.port = 8080 (source: default)"));
    });
}

fn check_status<'a>(payload: &'a Value, name: &str) -> &'a str {
    payload["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .and_then(|check| check["status"].as_str())
        .unwrap_or("missing")
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_clean_env(test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    let previous_values = concierge_vars();
    for (key, _) in &previous_values {
        env::remove_var(key);
    }

    test_fn();

    for (key, _) in concierge_vars() {
        env::remove_var(key);
    }
    for (key, value) in previous_values {
        env::set_var(key, value);
    }
}

fn concierge_vars() -> Vec<(String, String)> {
    env::vars().filter(|(key, _)| key.starts_with("CONCIERGE_")).collect()
}
