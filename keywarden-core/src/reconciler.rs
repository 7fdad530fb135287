//! The reconciliation control loop.
//!
//! [`Keywarden::process`] consumes a validated configuration and the
//! mutable state ledger, provisions whatever the manifest requests but the
//! ledger cannot satisfy, and sweeps resources and secrets that are no
//! longer requested.
//!
//! Writes to the ledger happen after the corresponding external success, so
//! a saved state only ever describes durable work. Providers are called
//! before stores (resources before secrets): a crash between the two leaves
//! a resource without its secrets, which the next run rotates; the opposite
//! ordering would leak credentials with no record of them.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::model::{config_equal, CredentialRequest};
use crate::provider::{Provider, ProviderRegistry};
use crate::state::{Resource, Secret, State};
use crate::store::{SecretStore, StoreRegistry};

/// The reconciliation engine.
///
/// Holds the provider and store registries and the global rotation window.
/// One call to [`process`](Keywarden::process) is a single reconciliation
/// run; the caller owns loading and saving the state around it.
pub struct Keywarden {
    providers: ProviderRegistry,
    stores: StoreRegistry,
    rotation_window: Duration,
}

impl Keywarden {
    /// Create a new engine from the injected providers and stores.
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        stores: Vec<Arc<dyn SecretStore>>,
        rotation_window: Duration,
    ) -> Self {
        let mut provider_registry = ProviderRegistry::new();
        for provider in providers {
            provider_registry.register(provider);
        }
        let mut store_registry = StoreRegistry::new();
        for store in stores {
            store_registry.register(store);
        }
        Self {
            providers: provider_registry,
            stores: store_registry,
            rotation_window,
        }
    }

    /// Run one reconciliation pass.
    ///
    /// Requests are processed in declaration order; afterwards, resources
    /// that are deposed or no longer requested are destroyed and orphaned
    /// secrets are deleted. Provider and store failures skip the affected
    /// request or credential and are logged; only an invalid configuration
    /// aborts the run.
    pub async fn process(&self, config: &Config, state: &mut State) -> Result<(), Error> {
        let requests = config.requests();
        info!(
            namespace = config.namespace(),
            requests = requests.len(),
            "starting reconciliation"
        );

        config.validate().map_err(Error::InvalidConfig)?;

        for request in &requests {
            let Some(store_config) = config
                .stores()
                .iter()
                .find(|sc| sc.alias() == request.store)
            else {
                warn!(store = %request.store, "could not find config for store");
                continue;
            };
            let Some(store) = self.stores.get(&store_config.store_type) else {
                warn!(store_type = %store_config.store_type, "store type is not enabled");
                continue;
            };

            for r in &request.credentials {
                if r.name.is_empty() {
                    warn!(
                        credential_type = %r.credential_type,
                        store = %request.store,
                        "missing name in request"
                    );
                    continue;
                }
                let Some(provider) = self.providers.get(&r.credential_type.provider()) else {
                    warn!(
                        credential_type = %r.credential_type,
                        store = %request.store,
                        "provider not configured"
                    );
                    continue;
                };
                info!(
                    credential_type = %r.credential_type,
                    store = %request.store,
                    name = %r.name,
                    "processing request"
                );

                let existing =
                    state.get_resources_by_id(&r.credential_type, &r.name, store_config.alias());
                if existing
                    .iter()
                    .any(|res| has_valid_credentials(r, res, self.rotation_window))
                {
                    info!(name = %r.name, "found existing credentials");
                    continue;
                }

                let (creds, metadata) = match provider.create(r).await {
                    Ok(output) => output,
                    Err(e) => {
                        error!(name = %r.name, error = %e, "failed to provide credentials");
                        continue;
                    }
                };
                if creds.is_empty() {
                    error!(name = %r.name, "no credentials returned by provider");
                    continue;
                }

                state.add_resource(Resource::from_request(
                    r,
                    store_config.alias(),
                    creds[0].expiration,
                    metadata,
                ));
                info!(count = creds.len(), "created new credentials");

                for c in &creds {
                    let path = match store
                        .write(config.namespace(), c, store_config.config.as_ref())
                        .await
                    {
                        Ok(path) => path,
                        Err(e) => {
                            error!(name = %c.name, error = %e, "store credential");
                            continue;
                        }
                    };
                    state.add_secret(
                        store_config,
                        Secret {
                            resource_id: r.name.clone(),
                            path: path.clone(),
                            expiration: c.expiration,
                        },
                    );
                    debug!(path = %path, "stored credential");
                }
            }
        }

        self.sweep_resources(state).await;
        self.sweep_orphaned_secrets(state).await;
        Ok(())
    }

    /// Destroy and remove every resource that is deposed or was not
    /// requested in this pass.
    ///
    /// Iteration runs from the end of each resource list toward the front
    /// to stay clear of index shifts from in-place removal. Resources whose
    /// provider is no longer registered are left in state: removing a row
    /// we cannot destroy externally would silently leak it.
    async fn sweep_resources(&self, state: &mut State) {
        for entry_index in 0..state.providers.len() {
            let provider_type = state.providers[entry_index].provider_type.clone();
            let mut i = state.providers[entry_index].resources.len();
            while i > 0 {
                i -= 1;
                let resource = state.providers[entry_index].resources[i].clone();
                if resource.in_use && !resource.deposed {
                    continue;
                }
                let Some(provider) = self.providers.get(&provider_type) else {
                    debug!(provider_type = %provider_type, "missing provider for expired resource");
                    continue;
                };
                info!(
                    provider_type = %provider_type,
                    id = %resource.id,
                    "destroying expired resource"
                );
                if let Err(e) = provider.destroy(&resource).await {
                    error!(id = %resource.id, error = %e, "destroy resource");
                }
                state.remove_resource(&resource);
            }
        }
    }

    /// Delete and remove every secret whose resource id no longer appears
    /// in any provider entry.
    async fn sweep_orphaned_secrets(&self, state: &mut State) {
        for entry_index in 0..state.stores.len() {
            let store_config = state.stores[entry_index].store_config.clone();
            let orphans = state.list_orphaned_secrets(&store_config);
            for secret in orphans.iter().rev() {
                let Some(store) = self.stores.get(&store_config.store_type) else {
                    debug!(store_type = %store_config.store_type, "missing store for expired secret");
                    continue;
                };
                info!(path = %secret.path, "deleting orphaned secret");
                if let Err(e) = store.delete(&secret.path, store_config.config.as_ref()).await {
                    error!(path = %secret.path, error = %e, "delete secret");
                }
                state.remove_secret(&store_config, secret);
            }
        }
    }
}

/// Whether the ledger already holds valid credentials for the request.
///
/// A resource still counts as valid only while it has at least one rotation
/// window of life remaining, so the next run reliably rotates it before
/// hard expiry. The per-request window, when set, overrides the global one.
fn has_valid_credentials(
    request: &CredentialRequest,
    resource: &Resource,
    rotation_window: Duration,
) -> bool {
    if resource.deposed {
        return false;
    }
    if request.name != resource.id {
        return false;
    }
    if !config_equal(request.config.as_ref(), resource.config.as_ref()) {
        return false;
    }
    let rotation = request.rotation_window.unwrap_or(rotation_window);
    resource.expiration - rotation > Utc::now()
}
