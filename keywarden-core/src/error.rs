//! Top-level error type for keywarden.

use thiserror::Error;

use crate::config::ConfigError;
use crate::provider::ProviderError;
use crate::state::StateError;
use crate::store::StoreError;

/// Top-level error type encompassing all keywarden errors.
///
/// A reconciliation run only fails outright on configuration and state
/// backend errors; provider and store failures are logged and skip the
/// affected request, but the variants are carried here so embedders can
/// surface them through a single type.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// Error from a credential provider.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from a secret store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error from a state backend.
    #[error("state backend error: {0}")]
    State(#[from] StateError),
}
