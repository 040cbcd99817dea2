use super::backend::{file_name, StorageBackend};
use crate::config::Config;
use anyhow::Result;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;

pub struct LocalStorage {
    storage_path: PathBuf,
    base_url: String,
}

impl LocalStorage {
    pub fn new(config: &Config) -> Result<Self> {
        let storage_path = config
            .local_storage_path
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Local storage path not configured"))?;

        Ok(LocalStorage {
            storage_path: PathBuf::from(storage_path),
            base_url: config.base_url.clone(),
        })
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn store_file(
        &self,
        bytes: Vec<u8>,
        name: &str,
        extension: &str,
        _mime_type: &str,
    ) -> Result<String> {
        // Create directory if it doesn't exist
        tokio::fs::create_dir_all(&self.storage_path).await?;

        let file_path = self.storage_path.join(file_name(name, extension));
        tokio::fs::write(&file_path, bytes).await.map_err(|e| {
            anyhow::anyhow!("Failed to write file {}: {}", file_path.display(), e)
        })?;

        Ok(self.generate_url(name, extension))
    }

    async fn get_file(&self, name: &str, extension: &str) -> Result<Vec<u8>> {
        let file_path = self.storage_path.join(file_name(name, extension));

        tokio::fs::read(&file_path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read file {}: {}", file_path.display(), e)
        })
    }

    async fn delete_file(&self, name: &str, extension: &str) -> Result<bool> {
        let file_path = self.storage_path.join(file_name(name, extension));

        match tokio::fs::remove_file(&file_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(anyhow::anyhow!(
                "Failed to delete file {}: {}",
                file_path.display(),
                e
            )),
        }
    }

    fn generate_url(&self, name: &str, extension: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            file_name(name, extension)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(dir: &tempfile::TempDir) -> LocalStorage {
        let config = Config {
            local_storage_path: Some(dir.path().join("images").display().to_string()),
            base_url: "http://img.example/".to_string(),
            ..Config::default()
        };
        LocalStorage::new(&config).unwrap()
    }

    #[tokio::test]
    async fn store_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);

        let url = storage
            .store_file(b"data".to_vec(), "abcde", "png", "image/png")
            .await
            .unwrap();
        assert_eq!(url, "http://img.example/abcde.png");
        assert!(dir.path().join("images/abcde.png").exists());

        assert_eq!(storage.get_file("abcde", "png").await.unwrap(), b"data");
        assert!(storage.get_file("abcde", "gif").await.is_err());

        assert!(storage.delete_file("abcde", "png").await.unwrap());
        assert!(!storage.delete_file("abcde", "png").await.unwrap());
    }

    #[test]
    fn requires_path() {
        let config = Config {
            local_storage_path: None,
            ..Config::default()
        };
        assert!(LocalStorage::new(&config).is_err());
    }
}
