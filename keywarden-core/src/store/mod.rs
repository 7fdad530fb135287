//! Secret store abstraction.
//!
//! This module provides:
//! - [`SecretStore`] - trait implemented by secret store backends
//! - [`StoreRegistry`] - stores keyed by their [`StoreType`]
//! - [`build_secret_path`] - rendering of secret path templates
//! - [`InprocessStore`] - in-memory implementation for tests and dry runs
//!
//! # Path templating
//!
//! Stores resolve the path a secret is written to by rendering a template
//! over two variables, for example `{{ .Namespace }}/{{ .Name }}`. Each
//! store ships a default template; a manifest can override it per store via
//! the `secret_template` key of the opaque store config.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::model::{Credential, StoreType};

mod inprocess;

pub use inprocess::InprocessStore;

/// Error type for secret store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The opaque store config could not be decoded.
    #[error("parse config: {message}")]
    Config { message: String },

    /// The secret path template could not be rendered.
    #[error("build secret path: {message}")]
    Template { message: String },

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    Backend { message: String },
}

/// Implemented by secret store backends.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// The store family.
    fn store_type(&self) -> StoreType;

    /// Write a credential under the namespace, creating or replacing the
    /// secret. Returns the path the secret was written to; the path is the
    /// canonical identity recorded in state.
    async fn write(
        &self,
        namespace: &str,
        credential: &Credential,
        config: Option<&Value>,
    ) -> Result<String, StoreError>;

    /// Read the secret at `path`. Returns `Ok(None)` when no secret exists.
    async fn read(&self, path: &str, config: Option<&Value>) -> Result<Option<String>, StoreError>;

    /// Delete the secret at `path`.
    ///
    /// Must be idempotent: deleting a secret that does not exist returns
    /// success.
    async fn delete(&self, path: &str, config: Option<&Value>) -> Result<(), StoreError>;
}

/// Registry of secret stores keyed by store type.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    stores: HashMap<StoreType, Arc<dyn SecretStore>>,
}

impl StoreRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under its own type, replacing any previous
    /// registration for that type.
    pub fn register(&mut self, store: Arc<dyn SecretStore>) {
        self.stores.insert(store.store_type(), store);
    }

    /// Look up a store by type.
    pub fn get(&self, store_type: &StoreType) -> Option<&Arc<dyn SecretStore>> {
        self.stores.get(store_type)
    }

    /// Check whether a store type is registered.
    pub fn contains(&self, store_type: &StoreType) -> bool {
        self.stores.contains_key(store_type)
    }

    /// The number of registered stores.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("types", &self.stores.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Render a secret path template.
///
/// Supported variables are `{{ .Namespace }}` and `{{ .Name }}`. Unknown
/// variables and unterminated actions are errors rather than being dropped,
/// so a typo in a template never silently derives the wrong path.
pub fn build_secret_path(template: &str, namespace: &str, name: &str) -> Result<String, StoreError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(StoreError::Template {
                message: format!("unterminated action in {template:?}"),
            });
        };
        match after[..end].trim() {
            ".Namespace" => out.push_str(namespace),
            ".Name" => out.push_str(name),
            unknown => {
                return Err(StoreError::Template {
                    message: format!("unknown variable {unknown:?}"),
                })
            }
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Strictly decode an opaque store config into a store's config type.
///
/// An absent config yields the type's default.
pub fn parse_store_config<T>(config: Option<&Value>) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    match config {
        None => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| StoreError::Config { message: e.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_secret_path() {
        let path = build_secret_path("/{{ .Namespace }}/{{ .Name }}", "team-name", "key").unwrap();
        assert_eq!(path, "/team-name/key");

        let path = build_secret_path("{{ .Namespace }}.{{ .Name }}", "team-name", "key").unwrap();
        assert_eq!(path, "team-name.key");

        let path = build_secret_path("static", "team-name", "key").unwrap();
        assert_eq!(path, "static");
    }

    #[test]
    fn test_build_secret_path_tolerates_spacing() {
        let path = build_secret_path("{{.Namespace}}/{{  .Name  }}", "ns", "n").unwrap();
        assert_eq!(path, "ns/n");
    }

    #[test]
    fn test_build_secret_path_unknown_variable() {
        let err = build_secret_path("{{ .Team }}/{{ .Name }}", "ns", "n").unwrap_err();
        assert_eq!(err.to_string(), "build secret path: unknown variable \".Team\"");
    }

    #[test]
    fn test_build_secret_path_unterminated() {
        let err = build_secret_path("{{ .Name", "ns", "n").unwrap_err();
        assert!(matches!(err, StoreError::Template { .. }));
    }

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = StoreRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(InprocessStore::new()));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&StoreType::Inprocess));
        assert!(registry.get(&StoreType::Ssm).is_none());
    }
}
