pub mod backend;
pub mod local;
pub mod s3;

pub use backend::StorageBackend;
pub use local::LocalStorage;
pub use s3::S3Storage;

use crate::config::{Config, StorageType};
use anyhow::Result;
use std::sync::Arc;

/// Factory function to create the appropriate storage backend
pub fn create_storage(config: &Config) -> Result<Arc<dyn StorageBackend>> {
    Ok(match config.storage_type {
        StorageType::Local => Arc::new(LocalStorage::new(config)?),
        StorageType::S3 => Arc::new(S3Storage::new(config)?),
    })
}
