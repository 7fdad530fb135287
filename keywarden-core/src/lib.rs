//! # Keywarden Core
//!
//! Reconciliation core for the keywarden credential provisioner.
//!
//! Given a declarative manifest, keywarden ensures that a set of
//! short-lived credentials exists inside the configured secret stores, is
//! rotated before expiry, and is cleaned up when no longer requested.
//!
//! This crate provides:
//! - The manifest model and its strict parser ([`config`])
//! - The persisted reconciliation ledger and state backends ([`state`])
//! - The [`Provider`] and [`SecretStore`] contracts and registries
//! - The [`Keywarden`] reconciliation engine
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use keywarden_core::{
//!     Config, FileBackend, InprocessStore, Keywarden, RandomProvider, StateBackend,
//! };
//!
//! async fn reconcile(manifest: &str) -> Result<(), keywarden_core::Error> {
//!     let config = Config::parse(manifest)?;
//!     let engine = Keywarden::new(
//!         vec![Arc::new(RandomProvider::new())],
//!         vec![Arc::new(InprocessStore::new())],
//!         chrono::Duration::minutes(10),
//!     );
//!     let backend = FileBackend::new();
//!     let mut state = backend.load("state.json").await?;
//!     engine.process(&config, &mut state).await?;
//!     backend.save("state.json", &state).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod model;
pub mod provider;
pub mod reconciler;
pub mod state;
pub mod store;

// Re-export commonly used types at crate root
pub use config::{Config, ConfigError};
pub use error::Error;
pub use model::{
    config_equal,
    Credential,
    CredentialRequest,
    CredentialType,
    CredentialsMap,
    Metadata,
    ProviderType,
    SecretString,
    StoreConfig,
    StoreType,
};
pub use provider::{
    parse_request_config,
    Provider,
    ProviderError,
    ProviderRegistry,
    RandomProvider,
    Validatable,
};
pub use reconciler::Keywarden;
pub use state::{
    FileBackend,
    ProviderState,
    Resource,
    Secret,
    State,
    StateBackend,
    StateError,
    StoreState,
};
pub use store::{
    build_secret_path,
    InprocessStore,
    SecretStore,
    StoreError,
    StoreRegistry,
};
