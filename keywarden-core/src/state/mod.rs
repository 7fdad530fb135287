//! The persisted ledger of provisioned credentials.
//!
//! This module provides:
//! - [`State`] - per-provider resource lists and per-store secret lists
//! - [`Resource`] - a provider-owned row recording minted credentials
//! - [`Secret`] - a store-owned row recording a written secret path
//! - [`StateBackend`] - trait for loading and saving the ledger
//! - [`FileBackend`] - JSON-on-disk implementation with atomic saves
//!
//! The state tracks when credentials need to be rotated because they are
//! expired, the configuration has changed, or they have been deposed, and
//! which secrets and resources are left over and must be cleaned up.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::{CredentialRequest, CredentialType, Metadata, ProviderType, StoreConfig};

mod file;

pub use file::FileBackend;

/// Error type for state backend operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// I/O error reading or writing the state object.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The state object could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The storage medium reported an error.
    #[error("backend error: {message}")]
    Backend { message: String },
}

/// Abstraction over storage for [`State`].
///
/// A backend persists the ledger as an opaque blob keyed by a path whose
/// interpretation is backend specific (a filesystem path, an object key).
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Load state from the backend.
    ///
    /// Backends must synthesize an empty state when nothing exists at
    /// `path`; a missing state object is not an error.
    async fn load(&self, path: &str) -> Result<State, StateError>;

    /// Save the state to the backend.
    ///
    /// The write must be atomic from a reader's perspective: a concurrent
    /// load never observes a partially written state object.
    async fn save(&self, path: &str, state: &State) -> Result<(), StateError>;
}

/// A resource provisioned by a provider as part of creating the requested
/// credentials.
///
/// The identity key of a resource is `(credential_type, store, id)`. At
/// most one non-deposed resource exists per identity key within a provider
/// entry; predecessors are flipped to `deposed` when a superseding resource
/// is added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// The credential type the resource was created for.
    #[serde(rename = "type")]
    pub credential_type: CredentialType,

    /// Identifier, equal to the name of the originating request.
    pub id: String,

    /// Alias of the store the credentials were written to.
    #[serde(default)]
    pub store: String,

    /// Expiration of the credentials backing this resource.
    pub expiration: DateTime<Utc>,

    /// Whether the resource has been superseded and awaits destruction.
    #[serde(default)]
    pub deposed: bool,

    /// Copy of the request config at creation time. Immutable for the
    /// lifetime of the resource; rotation deposes and re-creates instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,

    /// Provider metadata needed to destroy the resource later.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Set while a reconciliation pass holds a request for this resource.
    /// Never persisted.
    #[serde(skip)]
    pub in_use: bool,
}

impl Resource {
    pub(crate) fn from_request(
        request: &CredentialRequest,
        store: &str,
        expiration: DateTime<Utc>,
        metadata: Option<Metadata>,
    ) -> Self {
        Self {
            credential_type: request.credential_type.clone(),
            id: request.name.clone(),
            store: store.to_string(),
            expiration,
            deposed: false,
            config: request.config.clone(),
            metadata,
            in_use: true,
        }
    }

    fn same_identity(&self, other: &Resource) -> bool {
        self.credential_type == other.credential_type
            && self.store == other.store
            && self.id == other.id
    }
}

/// The resources owned by a single provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderState {
    #[serde(rename = "type")]
    pub provider_type: ProviderType,

    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// A secret written to a secret store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    /// The id of the resource the secret was created for.
    pub resource_id: String,

    /// The path the secret was written to; unique within a store entry.
    pub path: String,

    /// Expiration of the written credential.
    pub expiration: DateTime<Utc>,
}

/// The secrets recorded for a single configured store.
///
/// Store entries are identified by logical equality over their
/// [`StoreConfig`] so that two aliases of the same store type keep
/// separate secret lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(flatten)]
    pub store_config: StoreConfig,

    #[serde(default)]
    pub secrets: Vec<Secret>,
}

/// The complete reconciliation ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<ProviderState>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stores: Vec<StoreState>,
}

impl State {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource under its provider entry, creating the entry if it
    /// does not exist. Any existing resource with the same identity key is
    /// marked as deposed.
    pub fn add_resource(&mut self, resource: Resource) {
        let provider_type = resource.credential_type.provider();
        let index = match self
            .providers
            .iter()
            .position(|p| p.provider_type == provider_type)
        {
            Some(i) => i,
            None => {
                self.providers.push(ProviderState {
                    provider_type,
                    resources: Vec::new(),
                });
                self.providers.len() - 1
            }
        };
        let entry = &mut self.providers[index];
        for existing in entry.resources.iter_mut() {
            if existing.same_identity(&resource) {
                existing.deposed = true;
            }
        }
        entry.resources.push(resource);
    }

    /// Return all resources matching the identity key, marking each match
    /// as in use for the duration of this reconciliation pass.
    pub fn get_resources_by_id(
        &mut self,
        credential_type: &CredentialType,
        id: &str,
        store: &str,
    ) -> Vec<Resource> {
        let provider_type = credential_type.provider();
        let Some(entry) = self
            .providers
            .iter_mut()
            .find(|p| p.provider_type == provider_type)
        else {
            return Vec::new();
        };
        let mut resources = Vec::new();
        for r in entry.resources.iter_mut() {
            if &r.credential_type == credential_type && r.store == store && r.id == id {
                r.in_use = true;
                resources.push(r.clone());
            }
        }
        resources
    }

    /// Remove the first resource matching the identity key.
    pub fn remove_resource(&mut self, resource: &Resource) {
        let provider_type = resource.credential_type.provider();
        let Some(entry) = self
            .providers
            .iter_mut()
            .find(|p| p.provider_type == provider_type)
        else {
            return;
        };
        if let Some(i) = entry.resources.iter().position(|r| r.same_identity(resource)) {
            entry.resources.remove(i);
        }
    }

    /// Record a secret under the store entry matching `store_config`,
    /// creating the entry if it does not exist. An existing record with the
    /// same path is replaced in place.
    pub fn add_secret(&mut self, store_config: &StoreConfig, secret: Secret) {
        let index = match self
            .stores
            .iter()
            .position(|s| s.store_config.logical_eq(store_config))
        {
            Some(i) => i,
            None => {
                self.stores.push(StoreState {
                    store_config: store_config.clone(),
                    secrets: Vec::new(),
                });
                self.stores.len() - 1
            }
        };
        let entry = &mut self.stores[index];
        if let Some(existing) = entry.secrets.iter_mut().find(|s| s.path == secret.path) {
            *existing = secret;
        } else {
            entry.secrets.push(secret);
        }
    }

    /// List the secrets in the store entry whose resource id is no longer
    /// referenced by any resource across all providers.
    pub fn list_orphaned_secrets(&self, store_config: &StoreConfig) -> Vec<Secret> {
        let valid_ids: HashSet<&str> = self
            .providers
            .iter()
            .flat_map(|p| p.resources.iter())
            .map(|r| r.id.as_str())
            .collect();
        let Some(entry) = self
            .stores
            .iter()
            .find(|s| s.store_config.logical_eq(store_config))
        else {
            return Vec::new();
        };
        entry
            .secrets
            .iter()
            .filter(|s| !valid_ids.contains(s.resource_id.as_str()))
            .cloned()
            .collect()
    }

    /// Remove a secret record by path.
    pub fn remove_secret(&mut self, store_config: &StoreConfig, secret: &Secret) {
        let Some(entry) = self
            .stores
            .iter_mut()
            .find(|s| s.store_config.logical_eq(store_config))
        else {
            return;
        };
        if let Some(i) = entry.secrets.iter().position(|s| s.path == secret.path) {
            entry.secrets.remove(i);
        }
    }
}
