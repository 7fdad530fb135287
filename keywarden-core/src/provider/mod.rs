//! Credential provider abstraction.
//!
//! This module provides:
//! - [`Provider`] - trait implemented by credential providers
//! - [`ProviderRegistry`] - providers keyed by their [`ProviderType`]
//! - [`Validatable`] / [`parse_request_config`] - strict decoding of the
//!   opaque per-request config blobs
//! - [`RandomProvider`] - randomized secrets, useful for tests and
//!   bootstrap values

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::model::{Credential, CredentialRequest, Metadata, ProviderType};
use crate::state::Resource;

mod random;

pub use random::RandomProvider;

/// Error type for provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The opaque request config could not be decoded or failed validation.
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    /// The provider failed to create the requested credentials.
    #[error("create credentials: {message}")]
    CreateFailed { message: String },

    /// The provider failed to destroy a resource.
    #[error("destroy resource: {message}")]
    DestroyFailed { message: String },
}

/// Implemented by request config structures that carry their own
/// invariants beyond what strict decoding enforces.
pub trait Validatable {
    fn validate(&self) -> Result<(), ProviderError>;
}

/// Strictly decode an opaque request config into a provider's config type,
/// then validate it.
///
/// An absent config yields the type's default. Unknown fields are rejected
/// by the config types themselves (`deny_unknown_fields`), so invariants
/// declared in the manifest cannot be silently dropped.
pub fn parse_request_config<T>(config: Option<&Value>) -> Result<T, ProviderError>
where
    T: DeserializeOwned + Default + Validatable,
{
    let parsed: T = match config {
        None => T::default(),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| ProviderError::InvalidConfig { message: e.to_string() })?,
    };
    parsed.validate()?;
    Ok(parsed)
}

/// Implemented by credential providers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The provider family.
    fn provider_type(&self) -> ProviderType;

    /// Create the requested credentials.
    ///
    /// A successful create returns at least one credential; the resource
    /// recorded in state takes its expiration from the first one. Returned
    /// metadata is stored on the resource and handed back on destroy.
    async fn create(
        &self,
        request: &CredentialRequest,
    ) -> Result<(Vec<Credential>, Option<Metadata>), ProviderError>;

    /// Destroy the resource backing previously created credentials.
    ///
    /// Must be idempotent: destroying a resource that is already gone
    /// returns success. Providers without server-side state implement this
    /// as a no-op.
    async fn destroy(&self, resource: &Resource) -> Result<(), ProviderError>;
}

/// Registry of credential providers keyed by provider type.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderType, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own type, replacing any previous
    /// registration for that type.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.provider_type(), provider);
    }

    /// Look up a provider by type.
    pub fn get(&self, provider_type: &ProviderType) -> Option<&Arc<dyn Provider>> {
        self.providers.get(provider_type)
    }

    /// Check whether a provider type is registered.
    pub fn contains(&self, provider_type: &ProviderType) -> bool {
        self.providers.contains_key(provider_type)
    }

    /// The number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("types", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct TestConfig {
        #[serde(default)]
        role: String,
    }

    impl Validatable for TestConfig {
        fn validate(&self) -> Result<(), ProviderError> {
            if self.role.is_empty() {
                return Err(ProviderError::InvalidConfig {
                    message: "\"role\" must be defined".to_string(),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn test_parse_request_config_rejects_unknown_fields() {
        let config = serde_json::json!({"role": "deploy", "surprise": true});
        let err = parse_request_config::<TestConfig>(Some(&config)).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidConfig { .. }));
    }

    #[test]
    fn test_parse_request_config_runs_validation() {
        let config = serde_json::json!({"role": ""});
        let err = parse_request_config::<TestConfig>(Some(&config)).unwrap_err();
        assert_eq!(err.to_string(), "invalid config: \"role\" must be defined");
    }

    #[test]
    fn test_parse_request_config_absent_uses_default() {
        // The default fails validation here, which is the point: absence is
        // decoded, not special-cased past the invariants.
        let err = parse_request_config::<TestConfig>(None).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidConfig { .. }));
    }

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = ProviderRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(RandomProvider::new()));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&ProviderType::Random));
        assert!(registry.get(&ProviderType::Random).is_some());
        assert!(registry.get(&ProviderType::Aws).is_none());
    }
}
