//! In-memory secret store implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{build_secret_path, parse_store_config, SecretStore, StoreError};
use crate::model::{Credential, StoreType};

const DEFAULT_SECRET_TEMPLATE: &str = "{{ .Namespace }}.{{ .Name }}";

/// Opaque config accepted by the inprocess store.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Config {
    #[serde(default)]
    secret_template: Option<String>,
}

/// In-memory secret store for tests and dry runs.
///
/// Secrets are not persistent; data is lost when the process exits.
///
/// # Thread Safety
///
/// This implementation uses interior mutability via `RwLock` and is
/// safe to share across threads.
pub struct InprocessStore {
    secrets: RwLock<HashMap<String, String>>,
    secret_template: String,
}

impl InprocessStore {
    /// Create a new empty inprocess store.
    pub fn new() -> Self {
        Self {
            secrets: RwLock::new(HashMap::new()),
            secret_template: DEFAULT_SECRET_TEMPLATE.to_string(),
        }
    }

    /// Override the default secret path template.
    pub fn with_secret_template(mut self, template: impl Into<String>) -> Self {
        self.secret_template = template.into();
        self
    }

    fn template<'a>(&'a self, config: &'a Config) -> &'a str {
        match &config.secret_template {
            Some(t) if !t.is_empty() => t,
            _ => &self.secret_template,
        }
    }
}

impl Default for InprocessStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InprocessStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.secrets.read().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("InprocessStore")
            .field("secrets_count", &count)
            .finish()
    }
}

#[async_trait]
impl SecretStore for InprocessStore {
    fn store_type(&self) -> StoreType {
        StoreType::Inprocess
    }

    async fn write(
        &self,
        namespace: &str,
        credential: &Credential,
        config: Option<&Value>,
    ) -> Result<String, StoreError> {
        let config: Config = parse_store_config(config)?;
        let path = build_secret_path(self.template(&config), namespace, &credential.name)?;

        let mut secrets = self.secrets.write().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        secrets.insert(path.clone(), credential.value.expose().to_string());
        Ok(path)
    }

    async fn read(&self, path: &str, _config: Option<&Value>) -> Result<Option<String>, StoreError> {
        let secrets = self.secrets.read().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        Ok(secrets.get(path).cloned())
    }

    async fn delete(&self, path: &str, _config: Option<&Value>) -> Result<(), StoreError> {
        let mut secrets = self.secrets.write().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        secrets.remove(path);
        Ok(())
    }
}
