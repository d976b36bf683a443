use crate::snapshot::RunSnapshot;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use troupe_core::{TroupeError, TroupeResult};

/// Persistence backend for run snapshots.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, snapshot: &RunSnapshot) -> TroupeResult<()>;
    async fn load(&self, session_id: &str) -> TroupeResult<Option<RunSnapshot>>;
    async fn delete(&self, session_id: &str) -> TroupeResult<()>;
    async fn list(&self) -> TroupeResult<Vec<String>>;
}

/// Session ids become file names, so keep them to a safe alphabet.
fn check_session_id(session_id: &str) -> TroupeResult<()> {
    let valid = !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(TroupeError::Session(format!(
            "invalid session id '{session_id}': use [A-Za-z0-9_-]"
        )))
    }
}

/// File-based snapshot store (one JSON file per session).
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Store rooted at `dir`, created if missing.
    pub async fn new(dir: PathBuf) -> TroupeResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn snapshot_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(&self, snapshot: &RunSnapshot) -> TroupeResult<()> {
        check_session_id(&snapshot.session_id)?;
        let path = self.snapshot_path(&snapshot.session_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(snapshot)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(
            session_id = %snapshot.session_id,
            completed = snapshot.completed.len(),
            "Run snapshot saved"
        );
        Ok(())
    }

    async fn load(&self, session_id: &str) -> TroupeResult<Option<RunSnapshot>> {
        check_session_id(session_id)?;
        let path = self.snapshot_path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path).await?;
        let snapshot: RunSnapshot = serde_json::from_str(&data)
            .map_err(|e| TroupeError::Session(format!("Failed to parse snapshot: {e}")))?;
        Ok(Some(snapshot))
    }

    async fn delete(&self, session_id: &str) -> TroupeResult<()> {
        check_session_id(session_id)?;
        let path = self.snapshot_path(session_id);
        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn list(&self) -> TroupeResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".json") {
                    if check_session_id(stem).is_ok() {
                        ids.push(stem.to_string());
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Snapshot store kept in process memory. Stores serialized JSON so that
/// loading goes through the same decode path as the file store.
#[derive(Default)]
pub struct InMemorySessionStore {
    snapshots: RwLock<HashMap<String, String>>,
}

impl InMemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, snapshot: &RunSnapshot) -> TroupeResult<()> {
        check_session_id(&snapshot.session_id)?;
        let json = serde_json::to_string(snapshot)?;
        self.snapshots
            .write()
            .insert(snapshot.session_id.clone(), json);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> TroupeResult<Option<RunSnapshot>> {
        let json = self.snapshots.read().get(session_id).cloned();
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, session_id: &str) -> TroupeResult<()> {
        self.snapshots.write().remove(session_id);
        Ok(())
    }

    async fn list(&self) -> TroupeResult<Vec<String>> {
        let mut ids: Vec<String> = self.snapshots.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
