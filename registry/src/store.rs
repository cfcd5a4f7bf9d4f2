//! Filesystem-backed tool store.
//!
//! One directory per tool id. Writes stage under `.staging/` and become
//! visible through a single directory rename, so readers never observe a
//! partially written entry. Dotted names are never treated as entries.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entry::RegistryEntry;
use crate::error::{RegistryError, Result};
use crate::spec::safe_module_name;

const METADATA_FILE: &str = "metadata.json";

/// The durable store of promoted tools.
#[derive(Debug, Clone)]
pub struct Registry {
    root: PathBuf,
}

impl Registry {
    /// Open (creating if needed) a registry rooted at the given directory.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(".staging")).await?;
        fs::create_dir_all(root.join(".names")).await?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, tool_id: &str) -> PathBuf {
        self.root.join(tool_id)
    }

    /// Promote an entry into the store.
    ///
    /// Refuses entries whose validation did not pass — the store-level
    /// enforcement of the promotion invariant. The artifact and test paths on
    /// the returned entry point into the committed entry directory.
    ///
    /// Concurrent `put`s for the same tool id are resolved by the directory
    /// rename: the last rename to land wins and no reader ever sees a
    /// half-written entry.
    pub async fn put(
        &self,
        mut entry: RegistryEntry,
        source: &str,
        tests: &str,
    ) -> Result<RegistryEntry> {
        if !entry.validation.passed() {
            return Err(RegistryError::InvalidEntry(format!(
                "refusing to store '{}': latest validation did not pass",
                entry.tool_id
            )));
        }
        entry.spec.check().map_err(RegistryError::InvalidEntry)?;

        let module = safe_module_name(&entry.spec.name);
        let artifact_name = format!("{module}.py");
        let tests_name = format!("test_{module}.py");
        let final_dir = self.entry_dir(&entry.tool_id);
        entry.artifact_path = final_dir.join(&artifact_name);
        entry.tests_path = final_dir.join(&tests_name);

        let staging = self.root.join(".staging").join(Uuid::new_v4().to_string());
        fs::create_dir_all(&staging).await?;
        fs::write(staging.join(&artifact_name), source).await?;
        fs::write(staging.join(&tests_name), tests).await?;
        fs::write(
            staging.join(METADATA_FILE),
            serde_json::to_string_pretty(&entry)?,
        )
        .await?;

        // The rename below is the commit point. An existing entry under the
        // same id is displaced first; ids are content-addressed, so a racing
        // writer is writing equivalent content anyway.
        if fs::try_exists(&final_dir).await? {
            let displaced = self
                .root
                .join(".staging")
                .join(format!("displaced-{}", Uuid::new_v4()));
            fs::rename(&final_dir, &displaced).await?;
            let _ = fs::remove_dir_all(&displaced).await;
        }
        fs::rename(&staging, &final_dir).await?;

        self.update_latest(&entry.spec.name, &entry.tool_id).await?;

        info!(tool_id = %entry.tool_id, "promoted tool");
        Ok(entry)
    }

    /// Atomically point a name at its newest tool id.
    async fn update_latest(&self, name: &str, tool_id: &str) -> Result<()> {
        let names_dir = self.root.join(".names");
        let tmp = names_dir.join(format!(".{}-{}", safe_module_name(name), Uuid::new_v4()));
        fs::write(&tmp, tool_id).await?;
        fs::rename(&tmp, names_dir.join(name)).await?;
        Ok(())
    }

    /// Look up an entry by tool id.
    pub async fn get(&self, tool_id: &str) -> Result<Option<RegistryEntry>> {
        let path = self.entry_dir(tool_id).join(METADATA_FILE);
        match fs::read_to_string(&path).await {
            Ok(content) => {
                let entry =
                    serde_json::from_str(&content).map_err(|e| RegistryError::Corrupt {
                        path: path.display().to_string(),
                        detail: e.to_string(),
                    })?;
                Ok(Some(entry))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up the newest entry promoted under a name.
    pub async fn latest(&self, name: &str) -> Result<Option<RegistryEntry>> {
        let pointer = self.root.join(".names").join(name);
        match fs::read_to_string(&pointer).await {
            Ok(tool_id) => self.get(tool_id.trim()).await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a reference that may be a tool id or a bare tool name.
    pub async fn resolve(&self, reference: &str) -> Result<Option<RegistryEntry>> {
        if let Some(entry) = self.get(reference).await? {
            return Ok(Some(entry));
        }
        self.latest(reference).await
    }

    /// Whether an entry exists for the given tool id.
    pub async fn contains(&self, tool_id: &str) -> Result<bool> {
        Ok(fs::try_exists(self.entry_dir(tool_id).join(METADATA_FILE)).await?)
    }

    /// All entries, newest promotion first.
    pub async fn list(&self) -> Result<Vec<RegistryEntry>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') || !item.file_type().await?.is_dir() {
                continue;
            }
            match self.get(name).await {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => warn!(tool_id = name, "skipping unreadable entry: {e}"),
            }
        }
        entries.sort_by(|a, b| b.promoted_at.cmp(&a.promoted_at));
        debug!(count = entries.len(), "listed registry entries");
        Ok(entries)
    }

    /// Entries carrying the given capability tag, newest first.
    pub async fn list_by_capability(&self, tag: &str) -> Result<Vec<RegistryEntry>> {
        let mut entries = self.list().await?;
        entries.retain(|entry| entry.has_capability(tag));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use crate::test_support::{entry_for, failing_validation};

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::open(dir.path()).await.unwrap();

        let entry = entry_for("square", "def square(x):\n    return x * x\n");
        let stored = registry
            .put(entry, "def square(x):\n    return x * x\n", "def test_square():\n    assert True\n")
            .await
            .unwrap();

        let loaded = registry.get(&stored.tool_id).await.unwrap().unwrap();
        assert_eq!(loaded.tool_id, stored.tool_id);
        assert_eq!(loaded.spec.name, "square");

        // Artifact and metadata became visible together.
        assert!(loaded.artifact_path.exists());
        assert!(loaded.tests_path.exists());
    }

    #[tokio::test]
    async fn failing_validation_is_refused() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::open(dir.path()).await.unwrap();

        let mut entry = entry_for("square", "code");
        entry.validation = failing_validation();

        let result = registry.put(entry, "code", "tests").await;
        assert!(matches!(result, Err(RegistryError::InvalidEntry(_))));

        // Nothing became visible.
        assert!(registry.list().await.unwrap().is_empty());
        assert!(registry.latest("square").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repromotion_versions_and_updates_latest() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::open(dir.path()).await.unwrap();

        let v1_source = "def square(x):\n    return x * x\n";
        let v2_source = "def square(x):\n    return x ** 2\n";

        let v1 = registry
            .put(entry_for("square", v1_source), v1_source, "")
            .await
            .unwrap();
        let v2 = registry
            .put(entry_for("square", v2_source), v2_source, "")
            .await
            .unwrap();

        assert_ne!(v1.tool_id, v2.tool_id);

        // Both versions stay addressable; the name points at the newest.
        assert!(registry.get(&v1.tool_id).await.unwrap().is_some());
        assert!(registry.get(&v2.tool_id).await.unwrap().is_some());
        let latest = registry.latest("square").await.unwrap().unwrap();
        assert_eq!(latest.tool_id, v2.tool_id);
    }

    #[tokio::test]
    async fn resolve_accepts_id_or_name() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::open(dir.path()).await.unwrap();

        let stored = registry
            .put(entry_for("square", "src"), "src", "")
            .await
            .unwrap();

        let by_id = registry.resolve(&stored.tool_id).await.unwrap().unwrap();
        let by_name = registry.resolve("square").await.unwrap().unwrap();
        assert_eq!(by_id.tool_id, by_name.tool_id);

        assert!(registry.resolve("no_such_tool").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_by_capability_filters() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::open(dir.path()).await.unwrap();

        let mut math = entry_for("square", "a");
        math.capabilities = vec!["math".to_string()];
        let mut files = entry_for("read_file", "b");
        files.capabilities = vec!["os".to_string(), "filesystem".to_string()];

        registry.put(math, "a", "").await.unwrap();
        registry.put(files, "b", "").await.unwrap();

        let hits = registry.list_by_capability("filesystem").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].spec.name, "read_file");
    }

    #[tokio::test]
    async fn staging_is_invisible_to_readers() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::open(dir.path()).await.unwrap();
        registry
            .put(entry_for("square", "src"), "src", "")
            .await
            .unwrap();

        let listed = registry.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed.iter().all(|e| !e.tool_id.starts_with('.')));
    }
}
