//! File-backed state storage.

use std::path::Path;

use async_trait::async_trait;
use tempfile::NamedTempFile;

use super::{State, StateBackend, StateError};

/// State backend that stores the ledger as a JSON file on local disk.
///
/// Saves go through a temporary file in the destination directory followed
/// by a rename, so a concurrent load never observes a partial write.
#[derive(Debug, Default)]
pub struct FileBackend;

impl FileBackend {
    /// Create a new file backend.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StateBackend for FileBackend {
    async fn load(&self, path: &str) -> Result<State, StateError> {
        let path = Path::new(path);
        if !path.exists() {
            return Ok(State::new());
        }
        let contents = std::fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(State::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    async fn save(&self, path: &str, state: &State) -> Result<(), StateError> {
        let path = Path::new(path);
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, state)?;
        tmp.persist(path).map_err(|e| StateError::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CredentialType;
    use crate::state::Resource;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn state_with_resource() -> State {
        let mut state = State::new();
        state.add_resource(Resource {
            credential_type: CredentialType::Random,
            id: "r1".to_string(),
            store: "inprocess".to_string(),
            expiration: Utc::now() + Duration::hours(1),
            deposed: false,
            config: None,
            metadata: None,
            in_use: false,
        });
        state
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_empty_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let backend = FileBackend::new();
        let state = backend.load(path.to_str().unwrap()).await.unwrap();
        assert!(state.providers.is_empty());
        assert!(state.stores.is_empty());
    }

    #[tokio::test]
    async fn test_load_empty_file_returns_empty_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "").unwrap();

        let backend = FileBackend::new();
        let state = backend.load(path.to_str().unwrap()).await.unwrap();
        assert!(state.providers.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let path = path.to_str().unwrap();

        let state = state_with_resource();
        let backend = FileBackend::new();
        backend.save(path, &state).await.unwrap();

        let loaded = backend.load(path).await.unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_save_overwrites_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let path = path.to_str().unwrap();

        let backend = FileBackend::new();
        backend.save(path, &state_with_resource()).await.unwrap();
        backend.save(path, &State::new()).await.unwrap();

        let loaded = backend.load(path).await.unwrap();
        assert!(loaded.providers.is_empty());
    }
}
