//! A watermark store backed by a single JSON file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walcap_core::Watermark;
use walcap_pg::{WatermarkLoader, WatermarkSaver};

#[derive(Debug, Clone)]
pub struct FileWatermarkStore {
    path: PathBuf,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored watermark, or `None` if nothing has been saved yet.
    pub async fn load(&self) -> Result<Option<Watermark>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read watermark: {}", self.path.display()))
            }
        };
        let watermark = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse watermark: {}", self.path.display()))?;
        Ok(Some(watermark))
    }

    /// Replace the stored watermark. Written to a sibling file and renamed so
    /// a crash never leaves a partial file behind.
    pub async fn save(&self, watermark: &Watermark) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(watermark)?;
        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write watermark: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace watermark: {}", self.path.display()))?;
        Ok(())
    }

    pub fn loader(&self) -> WatermarkLoader {
        let store = self.clone();
        WatermarkLoader::new(move || {
            let store = store.clone();
            async move { store.load().await.map_err(Into::into) }
        })
    }

    pub fn saver(&self) -> WatermarkSaver {
        let store = self.clone();
        WatermarkSaver::new(move |watermark| {
            let store = store.clone();
            async move { store.save(&watermark).await.map_err(Into::into) }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use tempfile::TempDir;
    use walcap_core::Lsn;

    fn watermark(lsn: u64) -> Watermark {
        Watermark::new(Lsn(lsn), DateTime::from_timestamp(1_704_067_200, 0).unwrap())
    }

    #[tokio::test]
    async fn test_missing_file_loads_none() {
        let dir = TempDir::new().unwrap();
        let store = FileWatermarkStore::new(dir.path().join("wm.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = FileWatermarkStore::new(dir.path().join("wm.json"));

        store.save(&watermark(0x500)).await.unwrap();
        store.save(&watermark(0x16B3748)).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(watermark(0x16B3748)));
        assert!(!dir.path().join("wm.json.tmp").exists());

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"0/16B3748\""));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wm.json");
        std::fs::write(&path, "not json").unwrap();

        let err = FileWatermarkStore::new(&path).load().await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse watermark"));
    }

    #[tokio::test]
    async fn test_callbacks_use_the_file() {
        let dir = TempDir::new().unwrap();
        let store = FileWatermarkStore::new(dir.path().join("wm.json"));

        assert!(store.loader().load().await.unwrap().is_none());
        store.saver().save(watermark(0x900)).await.unwrap();
        assert_eq!(store.loader().load().await.unwrap(), Some(watermark(0x900)));
    }

    #[tokio::test]
    async fn test_loader_reports_read_errors() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be.
        let store = FileWatermarkStore::new(dir.path());
        let err = store.loader().load().await.unwrap_err();
        assert!(err.to_string().contains("Failed to read watermark"));
    }
}
