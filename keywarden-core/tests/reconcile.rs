//! Integration tests for the reconciliation loop.
//!
//! These tests drive [`Keywarden::process`] end to end with a counting fake
//! provider and the inprocess store, covering provisioning, rotation,
//! per-request rotation windows, orphan cleanup, and the invariants the
//! ledger must uphold after every run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use keywarden_core::{
    Config, Credential, CredentialRequest, CredentialType, InprocessStore, Keywarden, Metadata,
    Provider, ProviderError, ProviderType, Resource, Secret, SecretStore, State, StoreConfig,
    StoreType,
};

const BASIC_MANIFEST: &str = r#"
version: 1
namespace: team-name

stores:
- type: inprocess

requests:
- store: inprocess
  creds:
  - type: random
    name: fake.state.id
"#;

const STORES_ONLY_MANIFEST: &str = r#"
version: 1
namespace: team-name

stores:
- type: inprocess
"#;

/// Fake implementation of [`Provider`] that counts calls and returns a
/// fixed credential.
struct FakeProvider {
    create_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
    expiration: DateTime<Utc>,
}

impl FakeProvider {
    fn new(expiration: DateTime<Utc>) -> Self {
        Self {
            create_calls: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
            expiration,
        }
    }

    fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Random
    }

    async fn create(
        &self,
        _request: &CredentialRequest,
    ) -> Result<(Vec<Credential>, Option<Metadata>), ProviderError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok((
            vec![Credential::new("fake-credential", "fake-value", self.expiration)],
            None,
        ))
    }

    async fn destroy(&self, _resource: &Resource) -> Result<(), ProviderError> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    provider: Arc<FakeProvider>,
    store: Arc<InprocessStore>,
    engine: Keywarden,
    expiration: DateTime<Utc>,
}

impl Harness {
    fn new() -> Self {
        let expiration = Utc::now() + Duration::hours(1);
        let provider = Arc::new(FakeProvider::new(expiration));
        let store = Arc::new(InprocessStore::new());
        let engine = Keywarden::new(
            vec![provider.clone() as Arc<dyn Provider>],
            vec![store.clone() as Arc<dyn SecretStore>],
            Duration::minutes(10),
        );
        Self {
            provider,
            store,
            engine,
            expiration,
        }
    }
}

fn resource(id: &str, store: &str, expiration: DateTime<Utc>) -> Resource {
    Resource {
        credential_type: CredentialType::Random,
        id: id.to_string(),
        store: store.to_string(),
        expiration,
        deposed: false,
        config: None,
        metadata: None,
        in_use: false,
    }
}

/// After a successful run no deposed resources remain and every secret
/// references a live resource.
fn assert_invariants(state: &State) {
    for p in &state.providers {
        for r in &p.resources {
            assert!(!r.deposed, "deposed resource left in state: {}", r.id);
        }
    }
    for s in &state.stores {
        for secret in &s.secrets {
            let referenced = state
                .providers
                .iter()
                .flat_map(|p| p.resources.iter())
                .any(|r| r.id == secret.resource_id);
            assert!(referenced, "orphaned secret left in state: {}", secret.path);
        }
    }
}

#[tokio::test]
async fn test_basic_provisioning() {
    let h = Harness::new();
    let config = Config::parse(BASIC_MANIFEST).unwrap();
    let mut state = State::new();

    h.engine.process(&config, &mut state).await.unwrap();

    assert_eq!(h.provider.create_calls(), 1);
    assert_eq!(h.provider.destroy_calls(), 0);

    let value = h.store.read("team-name.fake-credential", None).await.unwrap();
    assert_eq!(value.as_deref(), Some("fake-value"));

    assert_eq!(state.providers.len(), 1);
    let resources = &state.providers[0].resources;
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].id, "fake.state.id");
    assert_eq!(resources[0].store, "inprocess");
    assert_eq!(resources[0].expiration, h.expiration);
    assert!(resources[0].in_use);
    assert!(!resources[0].deposed);

    assert_eq!(state.stores.len(), 1);
    let secrets = &state.stores[0].secrets;
    assert_eq!(secrets.len(), 1);
    assert_eq!(secrets[0].resource_id, "fake.state.id");
    assert_eq!(secrets[0].path, "team-name.fake-credential");

    assert_invariants(&state);
}

#[tokio::test]
async fn test_does_not_create_credentials_that_exist_in_state() {
    let h = Harness::new();
    let config = Config::parse(BASIC_MANIFEST).unwrap();
    let mut state = State::new();
    state.add_resource(resource("fake.state.id", "inprocess", Utc::now() + Duration::hours(1)));

    h.engine.process(&config, &mut state).await.unwrap();

    assert_eq!(h.provider.create_calls(), 0);
    assert_eq!(h.provider.destroy_calls(), 0);
    assert_eq!(state.providers[0].resources.len(), 1);
    assert!(state.providers[0].resources[0].in_use);
}

#[tokio::test]
async fn test_replaces_resources_within_rotation_window() {
    let h = Harness::new();
    let config = Config::parse(BASIC_MANIFEST).unwrap();
    let mut state = State::new();
    state.add_resource(resource("fake.state.id", "inprocess", Utc::now() + Duration::minutes(3)));

    h.engine.process(&config, &mut state).await.unwrap();

    assert_eq!(h.provider.create_calls(), 1);
    assert_eq!(h.provider.destroy_calls(), 1);

    let resources = &state.providers[0].resources;
    assert_eq!(resources.len(), 1);
    assert!(!resources[0].deposed);
    assert_eq!(resources[0].expiration, h.expiration);
    assert_invariants(&state);
}

#[tokio::test]
async fn test_replaces_resources_within_override_rotation_window() {
    let manifest = r#"
version: 1
namespace: team-name

stores:
- type: inprocess

requests:
- store: inprocess
  creds:
  - type: random
    rotation_window: 30m
    name: fake.state.id
"#;
    let h = Harness::new();
    let config = Config::parse(manifest).unwrap();
    let mut state = State::new();
    state.add_resource(resource("fake.state.id", "inprocess", Utc::now() + Duration::minutes(29)));

    h.engine.process(&config, &mut state).await.unwrap();

    assert_eq!(h.provider.create_calls(), 1);
    assert_eq!(h.provider.destroy_calls(), 1);
    assert_invariants(&state);
}

#[tokio::test]
async fn test_does_not_replace_resources_outside_override_rotation_window() {
    let manifest = r#"
version: 1
namespace: team-name

stores:
- type: inprocess

requests:
- store: inprocess
  creds:
  - type: random
    rotation_window: 240s
    name: fake.state.id
"#;
    let h = Harness::new();
    let config = Config::parse(manifest).unwrap();
    let mut state = State::new();
    let expiration = Utc::now() + Duration::minutes(55);
    state.add_resource(resource("fake.state.id", "inprocess", expiration));

    h.engine.process(&config, &mut state).await.unwrap();

    assert_eq!(h.provider.create_calls(), 0);
    assert_eq!(h.provider.destroy_calls(), 0);
    assert_eq!(state.providers[0].resources[0].expiration, expiration);
}

#[tokio::test]
async fn test_destroys_deposed_resources() {
    let h = Harness::new();
    let config = Config::parse(BASIC_MANIFEST).unwrap();
    let mut state = State::new();
    state.add_resource(resource("fake.state.id", "inprocess", Utc::now()));

    h.engine.process(&config, &mut state).await.unwrap();

    assert_eq!(h.provider.create_calls(), 1);
    assert_eq!(h.provider.destroy_calls(), 1);

    let resources = &state.providers[0].resources;
    assert_eq!(resources.len(), 1);
    assert!(!resources[0].deposed);
    assert_eq!(resources[0].expiration, h.expiration);
    assert_invariants(&state);
}

#[tokio::test]
async fn test_destroys_resources_that_are_no_longer_requested() {
    let h = Harness::new();
    let config = Config::parse(STORES_ONLY_MANIFEST).unwrap();
    let mut state = State::new();
    state.add_resource(resource("other.state.id", "inprocess", Utc::now() + Duration::hours(1)));
    state.add_secret(
        &StoreConfig::new(StoreType::Inprocess),
        Secret {
            resource_id: "other.state.id".to_string(),
            path: "team-name.other".to_string(),
            expiration: Utc::now() + Duration::hours(1),
        },
    );

    h.engine.process(&config, &mut state).await.unwrap();

    assert_eq!(h.provider.create_calls(), 0);
    assert_eq!(h.provider.destroy_calls(), 1);
    assert!(state.providers[0].resources.is_empty());
    assert!(state.stores[0].secrets.is_empty());
}

#[tokio::test]
async fn test_does_nothing_without_requests() {
    let h = Harness::new();
    let config = Config::parse(STORES_ONLY_MANIFEST).unwrap();
    let mut state = State::new();

    h.engine.process(&config, &mut state).await.unwrap();

    assert_eq!(h.provider.create_calls(), 0);
    assert_eq!(h.provider.destroy_calls(), 0);
    assert!(state.providers.is_empty());
    assert!(state.stores.is_empty());
}

#[tokio::test]
async fn test_does_nothing_when_provider_is_missing() {
    let manifest = r#"
version: 1
namespace: team-name

stores:
- type: inprocess

requests:
- store: inprocess
  creds:
  - type: aws:sts
    name: fake.state.id
    config:
      role_arn: arn:aws:iam::role/role-name
"#;
    let h = Harness::new();
    let config = Config::parse(manifest).unwrap();
    let mut state = State::new();

    h.engine.process(&config, &mut state).await.unwrap();

    assert_eq!(h.provider.create_calls(), 0);
    assert_eq!(h.provider.destroy_calls(), 0);
    assert!(state.providers.is_empty());
    assert!(state.stores.is_empty());
}

#[tokio::test]
async fn test_allows_overlapping_credential_names_across_stores() {
    let manifest = r#"
version: 1
namespace: team-name

stores:
- name: one
  type: inprocess
- name: two
  type: inprocess

requests:
- store: one
  creds:
  - type: random
    name: fake.state.id
- store: two
  creds:
  - type: random
    name: fake.state.id
"#;
    let h = Harness::new();
    let config = Config::parse(manifest).unwrap();
    let mut state = State::new();

    h.engine.process(&config, &mut state).await.unwrap();

    assert_eq!(h.provider.create_calls(), 2);
    assert_eq!(h.provider.destroy_calls(), 0);

    let resources = &state.providers[0].resources;
    assert_eq!(resources.len(), 2);
    assert_eq!(resources[0].store, "one");
    assert_eq!(resources[1].store, "two");
    assert!(!resources[0].deposed);
    assert!(!resources[1].deposed);
    assert_invariants(&state);
}

#[tokio::test]
async fn test_duplicated_request_aborts_before_processing() {
    let manifest = r#"
version: 1
namespace: team-name

stores:
- type: secretsmanager
- type: inprocess

requests:
- store: secretsmanager
  creds:
  - type: random
    name: open-source-dev-read-only
  - type: random
    name: open-source-dev-read-only
"#;
    let h = Harness::new();
    let config = Config::parse(manifest).unwrap();
    let mut state = State::new();

    let err = h.engine.process(&config, &mut state).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid config: requests[0]: creds[1]: duplicated request {store:secretsmanager name:open-source-dev-read-only}"
    );
    assert_eq!(h.provider.create_calls(), 0);
    assert!(state.providers.is_empty());
}

// Removing items while sweeping can lead to surprising behaviors when the
// sweep shifts indices under itself. This exercises a state with several
// unrequested resources and layered secrets to ensure the cleanup converges.
#[tokio::test]
async fn test_cleanup_sweeps_all_resources_and_secrets() {
    let h = Harness::new();
    let config = Config::parse(STORES_ONLY_MANIFEST).unwrap();
    let mut state = State::new();

    let now = Utc::now();
    for id in ["r1", "r2", "r3"] {
        state.add_resource(resource(id, "", now));
    }
    let store_config = StoreConfig::new(StoreType::Inprocess);
    for (resource_id, path) in [("r1", "path1"), ("r1", "path2"), ("r2", "path3")] {
        state.add_secret(
            &store_config,
            Secret {
                resource_id: resource_id.to_string(),
                path: path.to_string(),
                expiration: now,
            },
        );
    }

    h.engine.process(&config, &mut state).await.unwrap();

    assert_eq!(h.provider.destroy_calls(), 3);
    for p in &state.providers {
        assert!(p.resources.is_empty());
    }
    for s in &state.stores {
        assert!(s.secrets.is_empty());
    }
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let h = Harness::new();
    let config = Config::parse(BASIC_MANIFEST).unwrap();
    let mut state = State::new();

    h.engine.process(&config, &mut state).await.unwrap();
    assert_eq!(h.provider.create_calls(), 1);

    // Simulate the state round-tripping through a backend between runs.
    let encoded = serde_json::to_string(&state).unwrap();
    let mut reloaded: State = serde_json::from_str(&encoded).unwrap();

    h.engine.process(&config, &mut reloaded).await.unwrap();
    assert_eq!(h.provider.create_calls(), 1);
    assert_eq!(h.provider.destroy_calls(), 0);
    assert_invariants(&reloaded);
}

#[tokio::test]
async fn test_identical_runs_produce_identical_states() {
    let config = Config::parse(BASIC_MANIFEST).unwrap();

    let expiration = Utc::now() + Duration::hours(1);
    let mut states = Vec::new();
    for _ in 0..2 {
        let provider = Arc::new(FakeProvider::new(expiration));
        let store = Arc::new(InprocessStore::new());
        let engine = Keywarden::new(
            vec![provider as Arc<dyn Provider>],
            vec![store as Arc<dyn SecretStore>],
            Duration::minutes(10),
        );
        let mut state = State::new();
        engine.process(&config, &mut state).await.unwrap();
        states.push(serde_json::to_string(&state).unwrap());
    }
    assert_eq!(states[0], states[1]);
}
