//! Snapshot file on local disk.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use roster_core::Collection;

use super::{decode, encode, PersistError, SnapshotStore};

/// Fixed-path JSON file, rewritten in full on every save.
///
/// Writes go to a sibling `.tmp` file that is then renamed over the target,
/// so a crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for LocalFile {
    async fn load(&self) -> Result<Option<Collection>, PersistError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => decode(&text).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, snapshot: &Collection) -> Result<(), PersistError> {
        let text = encode(snapshot)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        log::debug!("Snapshot written to {}", self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::Record;

    fn sample() -> Collection {
        let mut c = Collection::with_groups(["men", "women"]);
        c.push(Record {
            id: 1,
            name: "A".to_string(),
            group: "men".to_string(),
            rank: 1,
        });
        c
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFile::new(dir.path().join("data.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFile::new(dir.path().join("nested").join("data.json"));
        store.save(&sample()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(sample()));
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_file_is_human_readable() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFile::new(dir.path().join("data.json"));
        store.save(&sample()).await.unwrap();
        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("\n  \"men\": ["));
    }

    #[tokio::test]
    async fn test_corrupt_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "{ broken").unwrap();
        let err = LocalFile::new(&path).load().await.unwrap_err();
        assert_eq!(err.kind(), "ParseError");
    }

    #[tokio::test]
    async fn test_save_into_unwritable_location_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file, not a directory").unwrap();
        let store = LocalFile::new(blocker.join("data.json"));
        let err = store.save(&sample()).await.unwrap_err();
        assert!(matches!(err, PersistError::Io(_)));
    }
}
