//! Domain model types for keywarden.
//!
//! This module defines the core types used throughout the crate:
//! - [`CredentialType`] / [`ProviderType`] / [`StoreType`] - enumerated type tags
//! - [`Credential`] - a named secret value produced by a provider
//! - [`CredentialRequest`] - a single declarative credential request
//! - [`CredentialsMap`] - requests mapped to a target secret store
//! - [`StoreConfig`] - a configured secret store and its opaque config
//! - [`SecretString`] - a wrapper that keeps secret values out of logs

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The type of credential (and therefore provider) targeted by a request.
///
/// Unrecognized tags are preserved as [`CredentialType::Unknown`] so that a
/// manifest can be parsed before validation rejects it with a useful error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CredentialType {
    /// A randomized secret string.
    Random,

    /// Short-lived AWS credentials from an assumed role.
    AwsSts,

    /// A repository deploy key.
    GithubDeployKey,

    /// A Github App installation access token.
    GithubAccessToken,

    /// An Artifactory access token.
    ArtifactoryAccessToken,

    /// A tag that is not recognized by this version of keywarden.
    Unknown(String),
}

impl CredentialType {
    /// Get the credential type as its manifest tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Random => "random",
            Self::AwsSts => "aws:sts",
            Self::GithubDeployKey => "github:deploy-key",
            Self::GithubAccessToken => "github:access-token",
            Self::ArtifactoryAccessToken => "artifactory:access-token",
            Self::Unknown(s) => s,
        }
    }

    /// The provider family that can satisfy this credential type.
    pub fn provider(&self) -> ProviderType {
        match self {
            Self::Random => ProviderType::Random,
            Self::AwsSts => ProviderType::Aws,
            Self::GithubDeployKey | Self::GithubAccessToken => ProviderType::Github,
            Self::ArtifactoryAccessToken => ProviderType::Artifactory,
            Self::Unknown(s) => ProviderType::Unknown(s.clone()),
        }
    }

    /// Whether this tag is one of the recognized credential types.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<String> for CredentialType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "random" => Self::Random,
            "aws:sts" => Self::AwsSts,
            "github:deploy-key" => Self::GithubDeployKey,
            "github:access-token" => Self::GithubAccessToken,
            "artifactory:access-token" => Self::ArtifactoryAccessToken,
            _ => Self::Unknown(s),
        }
    }
}

impl From<CredentialType> for String {
    fn from(t: CredentialType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The provider family backing a credential type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderType {
    Random,
    Aws,
    Github,
    Artifactory,
    Unknown(String),
}

impl ProviderType {
    /// Get the provider type as its state-file tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Random => "random",
            Self::Aws => "aws",
            Self::Github => "github",
            Self::Artifactory => "artifactory",
            Self::Unknown(s) => s,
        }
    }
}

impl From<String> for ProviderType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "random" => Self::Random,
            "aws" => Self::Aws,
            "github" => Self::Github,
            "artifactory" => Self::Artifactory,
            _ => Self::Unknown(s),
        }
    }
}

impl From<ProviderType> for String {
    fn from(t: ProviderType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The family of a configured secret store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StoreType {
    /// In-memory store, useful for tests and dry runs.
    Inprocess,

    /// AWS SSM Parameter Store.
    Ssm,

    /// AWS Secrets Manager.
    SecretsManager,

    /// Github repository action secrets.
    Github,

    /// Github repository dependabot secrets.
    GithubDependabot,

    /// A tag that is not recognized by this version of keywarden.
    Unknown(String),
}

impl StoreType {
    /// Get the store type as its manifest tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Inprocess => "inprocess",
            Self::Ssm => "ssm",
            Self::SecretsManager => "secretsmanager",
            Self::Github => "github",
            Self::GithubDependabot => "github:dependabot",
            Self::Unknown(s) => s,
        }
    }

    /// Whether this tag is one of the recognized store types.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<String> for StoreType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "inprocess" => Self::Inprocess,
            "ssm" => Self::Ssm,
            "secretsmanager" => Self::SecretsManager,
            "github" => Self::Github,
            "github:dependabot" => Self::GithubDependabot,
            _ => Self::Unknown(s),
        }
    }
}

impl From<StoreType> for String {
    fn from(t: StoreType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](SecretString::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the type carries no serde implementations: credential values are
/// written to secret stores, never to the state ledger.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Additional provider output attached to a resource in state, and handed
/// back to the same provider when the resource is destroyed.
pub type Metadata = BTreeMap<String, String>;

/// A named secret produced by a provider.
///
/// Only the name and expiration are ever persisted; the value and
/// description exist to be written to a secret store.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Identifier for the credential, used when deriving the secret path.
    pub name: String,

    /// The credential value.
    pub value: SecretString,

    /// A short human-readable description of the credential.
    pub description: String,

    /// The time at which the credential will have expired.
    pub expiration: DateTime<Utc>,
}

impl Credential {
    /// Create a new credential.
    pub fn new(name: impl Into<String>, value: impl Into<String>, expiration: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            value: SecretString::new(value),
            description: String::new(),
            expiration,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A single declarative credential request.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialRequest {
    /// The type of credential (and provider) for the request.
    pub credential_type: CredentialType,

    /// Identifier used to name resources and credentials created by a
    /// provider. The exact usage is up to the individual provider.
    pub name: String,

    /// Per-request override for the global rotation window.
    pub rotation_window: Option<Duration>,

    /// Opaque provider configuration for the requested credential.
    pub config: Option<Value>,
}

/// One or more credential requests mapped to a target secret store.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialsMap {
    /// The alias of the target secret store.
    pub store: String,

    /// The requests that will be provisioned and written to the store.
    pub credentials: Vec<CredentialRequest>,
}

/// A configured secret store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// The store family.
    #[serde(rename = "type")]
    pub store_type: StoreType,

    /// Optional alias; multiple stores of the same type are distinguished
    /// by their aliases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Opaque configuration passed through to the store on every call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

impl StoreConfig {
    /// Create a store config with no alias or opaque config.
    pub fn new(store_type: StoreType) -> Self {
        Self { store_type, name: None, config: None }
    }

    /// The name used to identify the configured store. Defaults to the
    /// store type tag when no alias is set.
    pub fn alias(&self) -> &str {
        match &self.name {
            Some(name) if !name.is_empty() => name,
            _ => self.store_type.as_str(),
        }
    }

    /// Logical equality over the configuration: type, alias, and the opaque
    /// config compared as JSON trees rather than bytes.
    pub fn logical_eq(&self, other: &StoreConfig) -> bool {
        self.store_type == other.store_type
            && self.name.as_deref().unwrap_or("") == other.name.as_deref().unwrap_or("")
            && config_equal(self.config.as_ref(), other.config.as_ref())
    }
}

/// Compare two opaque config blobs for logical equality.
///
/// Comparison is structural over the parsed JSON trees, so key reordering
/// introduced by (de)serialization round trips does not break equality.
/// Two absent configs are equal; an absent config never equals a present one.
pub fn config_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
