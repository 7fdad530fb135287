//! Manifest parsing and validation.
//!
//! The manifest is a versioned YAML (or JSON) document declaring a
//! namespace, the available secret stores, and the credential requests
//! mapped onto them. Parsing is strict once the version has been
//! dispatched: unknown fields anywhere in the document are rejected.
//!
//! Requests sharing a credential type may be declared with the `list`
//! shorthand; [`Config::requests`] returns the flattened form so the
//! reconciler never sees nested lists.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::model::{CredentialRequest, CredentialType, CredentialsMap, StoreConfig, StoreType};

/// Error type for manifest parsing and validation.
///
/// Validation errors carry the ordinal position of the offending entry in
/// the manifest (`requests[i]: creds[j]: ...`) so callers and tests can
/// rely on stable messages.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The version field could not be decoded.
    #[error("unmarshal version: {0}")]
    VersionDecode(#[source] serde_yaml::Error),

    /// The manifest carries no version field.
    #[error("\"version\" must be defined")]
    MissingVersion,

    /// The manifest version is not supported.
    #[error("unknown configuration version: {0}")]
    UnknownVersion(u64),

    /// The manifest body could not be decoded strictly.
    #[error("unmarshal config (version {version}): {source}")]
    Decode {
        version: u64,
        #[source]
        source: serde_yaml::Error,
    },

    /// A required top-level field is missing or empty.
    #[error("{field:?} must be defined")]
    MissingField { field: &'static str },

    /// A store declares an unrecognized type tag.
    #[error("stores[{index}]: unknown type {store_type:?}")]
    UnknownStoreType { index: usize, store_type: String },

    /// Two stores resolve to the same alias.
    #[error("stores[{index}]: duplicate store {alias:?}")]
    DuplicateStore { index: usize, alias: String },

    /// A request map targets a store alias that is not declared.
    #[error("requests[{index}]: undefined store {store:?}")]
    UndefinedStore { index: usize, store: String },

    /// A credential request declares an unrecognized type tag.
    #[error("requests[{request}]: creds[{cred}]: unknown type {credential_type:?}")]
    UnknownCredentialType {
        request: usize,
        cred: usize,
        credential_type: String,
    },

    /// The same `(store, name)` pair is requested twice.
    #[error("requests[{request}]: creds[{cred}]: duplicated request {{store:{store} name:{name}}}")]
    DuplicatedRequest {
        request: usize,
        cred: usize,
        store: String,
        name: String,
    },

    /// A list-shorthand parent carries a field that belongs on its entries.
    #[error("requests[{request}]: creds[{cred}]: {field:?} should not be specified for lists")]
    ListField {
        request: usize,
        cred: usize,
        field: &'static str,
    },

    /// A list-shorthand entry carries its own type tag.
    #[error("requests[{request}]: creds[{cred}]: list entry[{entry}]: request should not include \"type\"")]
    ListEntryType {
        request: usize,
        cred: usize,
        entry: usize,
    },
}

/// A parsed keywarden manifest.
///
/// The raw request structure (including the list shorthand) is retained so
/// that [`validate`](Config::validate) can report positions exactly as they
/// appear in the document; [`requests`](Config::requests) exposes the
/// flattened view consumed by the reconciler.
#[derive(Debug, Clone)]
pub struct Config {
    version: u64,
    namespace: String,
    stores: Vec<StoreConfig>,
    requests: Vec<RawRequestMap>,
}

impl Config {
    /// Parse a YAML (or JSON) manifest.
    ///
    /// The version is probed loosely first; only version 1 documents are
    /// then decoded, strictly.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize)]
        struct VersionProbe {
            version: Option<u64>,
        }

        let probe: VersionProbe =
            serde_yaml::from_str(input).map_err(ConfigError::VersionDecode)?;
        let version = probe.version.ok_or(ConfigError::MissingVersion)?;
        if version != 1 {
            return Err(ConfigError::UnknownVersion(version));
        }

        let raw: RawConfig =
            serde_yaml::from_str(input).map_err(|e| ConfigError::Decode { version, source: e })?;

        Ok(Self {
            version,
            namespace: raw.namespace,
            stores: raw
                .stores
                .into_iter()
                .map(|s| StoreConfig {
                    store_type: s.store_type,
                    name: s.name,
                    config: s.config,
                })
                .collect(),
            requests: raw.requests,
        })
    }

    /// The manifest version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The namespace used when deriving secret paths.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The declared secret stores, in declaration order.
    pub fn stores(&self) -> &[StoreConfig] {
        &self.stores
    }

    /// The credential requests, flattened and in declaration order.
    pub fn requests(&self) -> Vec<CredentialsMap> {
        self.requests
            .iter()
            .map(|r| CredentialsMap {
                store: r.store.clone(),
                credentials: r.creds.iter().flat_map(RawCredential::flatten).collect(),
            })
            .collect()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() {
            return Err(ConfigError::MissingField { field: "namespace" });
        }
        if self.stores.is_empty() {
            return Err(ConfigError::MissingField { field: "stores" });
        }

        let mut aliases = HashSet::with_capacity(self.stores.len());
        for (i, store) in self.stores.iter().enumerate() {
            if !store.store_type.is_known() {
                return Err(ConfigError::UnknownStoreType {
                    index: i,
                    store_type: store.store_type.as_str().to_string(),
                });
            }
            if !aliases.insert(store.alias().to_string()) {
                return Err(ConfigError::DuplicateStore {
                    index: i,
                    alias: store.alias().to_string(),
                });
            }
        }

        let mut seen: HashSet<(String, String)> = HashSet::new();
        for (i, request) in self.requests.iter().enumerate() {
            if !aliases.contains(&request.store) {
                return Err(ConfigError::UndefinedStore {
                    index: i,
                    store: request.store.clone(),
                });
            }
            for (j, cred) in request.creds.iter().enumerate() {
                cred.validate_shorthand(i, j)?;
                for r in cred.flatten() {
                    if !r.credential_type.is_known() {
                        return Err(ConfigError::UnknownCredentialType {
                            request: i,
                            cred: j,
                            credential_type: r.credential_type.as_str().to_string(),
                        });
                    }
                    if !seen.insert((request.store.clone(), r.name.clone())) {
                        return Err(ConfigError::DuplicatedRequest {
                            request: i,
                            cred: j,
                            store: request.store.clone(),
                            name: r.name,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[allow(dead_code)]
    version: u64,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    stores: Vec<RawStore>,
    #[serde(default)]
    requests: Vec<RawRequestMap>,
}

// StoreConfig itself stays lenient for the state file, where it is
// flattened into the store entry; the manifest form is strict.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStore {
    #[serde(rename = "type")]
    store_type: StoreType,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    config: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRequestMap {
    store: String,
    #[serde(default)]
    creds: Vec<RawCredential>,
}

/// A credential request as written in the manifest: either a plain request
/// or a `list` of entries sharing the parent's type.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCredential {
    #[serde(rename = "type", default)]
    credential_type: Option<CredentialType>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    rotation_window: Option<chrono::Duration>,
    #[serde(default)]
    config: Option<Value>,
    #[serde(default)]
    list: Vec<RawListEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawListEntry {
    #[serde(rename = "type", default)]
    credential_type: Option<CredentialType>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    rotation_window: Option<chrono::Duration>,
    #[serde(default)]
    config: Option<Value>,
}

impl RawCredential {
    fn validate_shorthand(&self, request: usize, cred: usize) -> Result<(), ConfigError> {
        if self.list.is_empty() {
            return Ok(());
        }
        if self.name.as_deref().is_some_and(|n| !n.is_empty()) {
            return Err(ConfigError::ListField {
                request,
                cred,
                field: "name",
            });
        }
        if self.config.is_some() {
            return Err(ConfigError::ListField {
                request,
                cred,
                field: "config",
            });
        }
        for (entry, e) in self.list.iter().enumerate() {
            if e.credential_type.is_some() {
                return Err(ConfigError::ListEntryType {
                    request,
                    cred,
                    entry,
                });
            }
        }
        Ok(())
    }

    fn flatten(&self) -> Vec<CredentialRequest> {
        let credential_type = self
            .credential_type
            .clone()
            .unwrap_or_else(|| CredentialType::Unknown(String::new()));
        if self.list.is_empty() {
            return vec![CredentialRequest {
                credential_type,
                name: self.name.clone().unwrap_or_default(),
                rotation_window: self.rotation_window,
                config: self.config.clone(),
            }];
        }
        self.list
            .iter()
            .map(|e| CredentialRequest {
                credential_type: credential_type.clone(),
                name: e.name.clone().unwrap_or_default(),
                rotation_window: e.rotation_window,
                config: e.config.clone(),
            })
            .collect()
    }
}

mod duration {
    use serde::{Deserialize, Deserializer};

    /// Deserialize an optional humantime duration string ("30m", "240s").
    pub(super) fn deserialize_opt<'de, D>(
        deserializer: D,
    ) -> Result<Option<chrono::Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => {
                let parsed = humantime::parse_duration(&s)
                    .map_err(|e| serde::de::Error::custom(format!("parse duration: {e}")))?;
                chrono::Duration::from_std(parsed)
                    .map(Some)
                    .map_err(|e| serde::de::Error::custom(format!("parse duration: {e}")))
            }
        }
    }
}
