use anyhow::Result;
use async_trait::async_trait;

/// Trait defining the interface for image blob storage
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store an image and return its public URL
    async fn store_file(
        &self,
        bytes: Vec<u8>,
        name: &str,
        extension: &str,
        mime_type: &str,
    ) -> Result<String>;

    /// Get image bytes by name and extension
    async fn get_file(&self, name: &str, extension: &str) -> Result<Vec<u8>>;

    /// Delete an image. Returns `false` if there was nothing to delete.
    async fn delete_file(&self, name: &str, extension: &str) -> Result<bool>;

    /// Generate the public URL of an image
    fn generate_url(&self, name: &str, extension: &str) -> String;
}

/// Object key / file name of an image blob.
pub fn file_name(name: &str, extension: &str) -> String {
    format!("{}.{}", name, extension)
}
