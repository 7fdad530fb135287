//! Randomized secret provider.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;
use serde::Deserialize;

use super::{parse_request_config, Provider, ProviderError, Validatable};
use crate::model::{Credential, CredentialRequest, Metadata, ProviderType};
use crate::state::Resource;

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%&*";

const DEFAULT_LENGTH: usize = 32;

/// Request config accepted by [`RandomProvider`].
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestConfig {
    /// Length of the generated secret.
    #[serde(default = "default_length")]
    pub length: usize,
}

fn default_length() -> usize {
    DEFAULT_LENGTH
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { length: DEFAULT_LENGTH }
    }
}

impl Validatable for RequestConfig {
    fn validate(&self) -> Result<(), ProviderError> {
        if self.length == 0 {
            return Err(ProviderError::InvalidConfig {
                message: "\"length\" must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Provider for randomized secret strings.
///
/// The generated secret has no server-side counterpart, so destroy is a
/// no-op; rotation simply generates a new value.
#[derive(Debug)]
pub struct RandomProvider {
    rotation_interval: Duration,
}

impl RandomProvider {
    /// Create a provider with the default rotation interval of 30 days.
    pub fn new() -> Self {
        Self {
            rotation_interval: Duration::days(30),
        }
    }

    /// Set the interval at which generated secrets are rotated.
    pub fn with_rotation_interval(mut self, interval: Duration) -> Self {
        self.rotation_interval = interval;
        self
    }
}

impl Default for RandomProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for RandomProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Random
    }

    async fn create(
        &self,
        request: &CredentialRequest,
    ) -> Result<(Vec<Credential>, Option<Metadata>), ProviderError> {
        let config: RequestConfig = parse_request_config(request.config.as_ref())?;

        let mut rng = rand::thread_rng();
        let value: String = (0..config.length)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect();

        let credential = Credential::new(&request.name, value, Utc::now() + self.rotation_interval)
            .with_description("Randomly generated secret managed by keywarden.");
        Ok((vec![credential], None))
    }

    async fn destroy(&self, _resource: &Resource) -> Result<(), ProviderError> {
        Ok(())
    }
}
