//! Directory-backed persistent backend.
//!
//! One file per key. File names are the hex encoding of the key so any key
//! is a valid name. Writes go to a temporary file that is renamed over the
//! target, so a reader sees either the old or the new value.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{StorageBackend, StorageError, StorageResult};

const VALUE_EXT: &str = "val";
const TEMP_EXT: &str = "tmp";

#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Opens (creating if needed) the directory at `root`.
    pub async fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Opens the directory and checks that it accepts writes.
    pub async fn open_writable(root: impl AsRef<Path>) -> StorageResult<Self> {
        let backend = Self::open(root).await?;
        let probe = backend.root.join(format!(".probe.{}", TEMP_EXT));
        fs::write(&probe, b"ok").await?;
        fs::remove_file(&probe).await?;
        Ok(backend)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("empty key".to_string()));
        }
        Ok(self
            .root
            .join(format!("{}.{}", hex::encode(key.as_bytes()), VALUE_EXT)))
    }

    fn key_for(path: &Path) -> Option<String> {
        if path.extension()?.to_str()? != VALUE_EXT {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let bytes = hex::decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let temp = path.with_extension(format!("{}.{}", uuid::Uuid::new_v4().simple(), TEMP_EXT));
        fs::write(&temp, value.as_bytes()).await?;
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(key) = Self::key_for(&entry.path())
                && key.starts_with(prefix)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = FileBackend::open(dir.path()).await.unwrap();
            backend.set("foodtrace:auth-storage", r#"{"a":1}"#).await.unwrap();
        }

        let backend = FileBackend::open(dir.path()).await.unwrap();
        assert_eq!(
            backend.get("foodtrace:auth-storage").await.unwrap(),
            Some(r#"{"a":1}"#.to_string())
        );
    }

    #[tokio::test]
    async fn test_keys_ignore_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open_writable(dir.path()).await.unwrap();
        backend.set("p:one", "1").await.unwrap();
        backend.set("p:two/with/slashes", "2").await.unwrap();
        backend.set("q:three", "3").await.unwrap();
        std::fs::write(dir.path().join("README"), "not a value").unwrap();

        assert_eq!(
            backend.keys("p:").await.unwrap(),
            vec!["p:one", "p:two/with/slashes"]
        );
    }

    #[tokio::test]
    async fn test_missing_and_invalid_keys() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).await.unwrap();
        assert_eq!(backend.get("absent").await.unwrap(), None);
        backend.remove("absent").await.unwrap();
        assert!(matches!(
            backend.set("", "x").await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
