//! Tenant configuration sources.
//!
//! A source turns a tenant id into a validated, immutable [`TenantContext`].
//! Contexts are never cached across tenants or merged; each lookup builds a
//! fresh `Arc` from that tenant's own configuration only.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::tenant::{TenantConfig, TenantConfigError, TenantContext, TenantId};
use crate::errors::ApplicationError;

#[derive(Debug, Error)]
pub enum TenantSourceError {
    #[error("tenant `{0}` was not found")]
    NotFound(String),
    #[error(transparent)]
    InvalidConfig(#[from] TenantConfigError),
    #[error("tenant file `{path}` declares id `{declared}`, expected `{expected}`")]
    IdMismatch { path: PathBuf, declared: String, expected: String },
    #[error("could not read tenant file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: io::Error },
    #[error("could not parse tenant file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
}

#[async_trait]
pub trait TenantConfigSource: Send + Sync {
    async fn load_tenant_context(
        &self,
        tenant_id: &str,
    ) -> Result<Arc<TenantContext>, TenantSourceError>;
}

/// Reads `<directory>/<tenant_id>.toml`.
#[derive(Clone, Debug)]
pub struct FileTenantSource {
    directory: PathBuf,
}

impl FileTenantSource {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, tenant_id: &TenantId) -> PathBuf {
        self.directory.join(format!("{tenant_id}.toml"))
    }
}

pub fn parse_tenant_file(path: &Path, raw: &str) -> Result<TenantContext, TenantSourceError> {
    let config = toml::from_str::<TenantConfig>(raw)
        .map_err(|source| TenantSourceError::ParseFile { path: path.to_path_buf(), source })?;
    Ok(TenantContext::try_from(config)?)
}

#[async_trait]
impl TenantConfigSource for FileTenantSource {
    async fn load_tenant_context(
        &self,
        tenant_id: &str,
    ) -> Result<Arc<TenantContext>, TenantSourceError> {
        let id = TenantId::parse(tenant_id).map_err(|_| TenantSourceError::NotFound(tenant_id.into()))?;
        let path = self.path_for(&id);

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(TenantSourceError::NotFound(id.0));
            }
            Err(source) => return Err(TenantSourceError::ReadFile { path, source }),
        };

        let context = parse_tenant_file(&path, &raw)?;
        if context.id() != &id {
            return Err(TenantSourceError::IdMismatch {
                path,
                declared: context.id().to_string(),
                expected: id.0,
            });
        }

        tracing::debug!(
            event_name = "tenant.config.loaded",
            tenant_id = %id,
            path = %path.display(),
            "tenant context loaded"
        );
        Ok(Arc::new(context))
    }
}

/// Fixed in-memory tenant set, for tests and embedding.
#[derive(Clone, Debug, Default)]
pub struct StaticTenantSource {
    tenants: HashMap<String, Arc<TenantContext>>,
}

impl StaticTenantSource {
    pub fn new(tenants: impl IntoIterator<Item = TenantContext>) -> Self {
        Self {
            tenants: tenants
                .into_iter()
                .map(|tenant| (tenant.id().to_string(), Arc::new(tenant)))
                .collect(),
        }
    }
}

#[async_trait]
impl TenantConfigSource for StaticTenantSource {
    async fn load_tenant_context(
        &self,
        tenant_id: &str,
    ) -> Result<Arc<TenantContext>, TenantSourceError> {
        self.tenants
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| TenantSourceError::NotFound(tenant_id.to_string()))
    }
}

impl From<TenantSourceError> for ApplicationError {
    fn from(error: TenantSourceError) -> Self {
        match error {
            TenantSourceError::NotFound(tenant_id) => Self::TenantNotFound(tenant_id),
            TenantSourceError::ReadFile { .. } => Self::Persistence(error.to_string()),
            TenantSourceError::InvalidConfig(_)
            | TenantSourceError::IdMismatch { .. }
            | TenantSourceError::ParseFile { .. } => Self::Configuration(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::{FileTenantSource, StaticTenantSource, TenantConfigSource, TenantSourceError};
    use crate::domain::classification::Category;
    use crate::domain::tenant::fixtures::harbor_spa;

    const HARBOR_SPA: &str = r#"
id = "harbor-spa"
display_name = "Harbor Spa"
signature = "Warm regards,\nHarbor Spa"
service_types = ["facial"]
allowed_tools = ["check_availability", "calculate_price"]
agent_categories = ["general-inquiry", "booking-request", "booking-modification"]

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
minimum = "60.00"

[templates]
complaint = "Dear {{ customer_name | default(value=\"guest\") }}, we are sorry."
"#;

    #[tokio::test]
    async fn file_source_loads_and_validates_tenant() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("harbor-spa.toml"), HARBOR_SPA).expect("write tenant");

        let source = FileTenantSource::new(dir.path());
        let tenant = source.load_tenant_context("harbor-spa").await.expect("tenant loads");

        assert_eq!(tenant.id().as_str(), "harbor-spa");
        assert!(tenant.allows_tool("calculate_price"));
        assert!(!tenant.allows_tool("lookup_record"));
        assert!(tenant.routes_to_agent(Category::BookingModification));
        assert!(tenant.template_override(Category::Complaint).is_some());
        assert_eq!(tenant.pricing().currency, "EUR");
    }

    #[tokio::test]
    async fn file_source_rejects_traversal_and_missing_files() {
        let dir = TempDir::new().expect("tempdir");
        let source = FileTenantSource::new(dir.path());

        assert!(matches!(
            source.load_tenant_context("../harbor-spa").await,
            Err(TenantSourceError::NotFound(_))
        ));
        assert!(matches!(
            source.load_tenant_context("nobody").await,
            Err(TenantSourceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn file_source_rejects_id_mismatch() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("other-tenant.toml"), HARBOR_SPA).expect("write tenant");

        let source = FileTenantSource::new(dir.path());
        let error = source.load_tenant_context("other-tenant").await.expect_err("mismatch");
        assert!(matches!(error, TenantSourceError::IdMismatch { .. }));
    }

    #[tokio::test]
    async fn file_source_reports_invalid_tone() {
        let dir = TempDir::new().expect("tempdir");
        let broken = HARBOR_SPA.replace("formality = 0.8", "formality = 3.0");
        fs::write(dir.path().join("harbor-spa.toml"), broken).expect("write tenant");

        let source = FileTenantSource::new(dir.path());
        let error = source.load_tenant_context("harbor-spa").await.expect_err("invalid tone");
        assert!(matches!(error, TenantSourceError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn static_source_keeps_tenants_apart() {
        let source = StaticTenantSource::new([harbor_spa()]);
        assert!(source.load_tenant_context("harbor-spa").await.is_ok());
        assert!(source.load_tenant_context("another").await.is_err());
    }

    #[test]
    fn source_errors_map_to_application_errors() {
        use crate::errors::ApplicationError;

        assert_eq!(
            ApplicationError::from(TenantSourceError::NotFound("ghost".to_string())),
            ApplicationError::TenantNotFound("ghost".to_string())
        );
        assert!(matches!(
            ApplicationError::from(TenantSourceError::IdMismatch {
                path: "tenants/a.toml".into(),
                declared: "b".to_string(),
                expected: "a".to_string(),
            }),
            ApplicationError::Configuration(_)
        ));
    }
}
