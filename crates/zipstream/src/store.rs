use std::sync::Arc;

use crate::bundle::{Bundle, BundleId, FileReference};

/// Errors raised by a bundle metadata store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The id is unknown, expired, or the secret did not match. These cases
    /// are deliberately indistinguishable to callers.
    #[error("bundle not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Fields supplied when creating a bundle. The store assigns id, secret and
/// expiration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewBundle {
    pub filename: String,
    pub files: Vec<FileReference>,
}

/// Persistence for bundle records, keyed by id and guarded by the secret.
#[async_trait::async_trait]
pub trait BundleStore: Send + Sync {
    async fn create(&self, bundle: NewBundle) -> Result<Bundle, StoreError>;

    /// Fetch a bundle. With `secret` set, it must match the stored one.
    async fn read(&self, id: &BundleId, secret: Option<&str>) -> Result<Bundle, StoreError>;

    /// Append `files` to the bundle, preserving order.
    async fn update(
        &self,
        id: &BundleId,
        secret: &str,
        files: Vec<FileReference>,
    ) -> Result<Bundle, StoreError>;

    /// Remove the bundle and return the record as it was.
    async fn delete(&self, id: &BundleId, secret: &str) -> Result<Bundle, StoreError>;

    /// Remove every bundle that expired at or before `now` (epoch seconds).
    async fn purge_expired(&self, now: i64) -> Result<usize, StoreError>;
}

#[async_trait::async_trait]
impl<T: BundleStore + ?Sized> BundleStore for Arc<T> {
    async fn create(&self, bundle: NewBundle) -> Result<Bundle, StoreError> {
        (**self).create(bundle).await
    }

    async fn read(&self, id: &BundleId, secret: Option<&str>) -> Result<Bundle, StoreError> {
        (**self).read(id, secret).await
    }

    async fn update(
        &self,
        id: &BundleId,
        secret: &str,
        files: Vec<FileReference>,
    ) -> Result<Bundle, StoreError> {
        (**self).update(id, secret, files).await
    }

    async fn delete(&self, id: &BundleId, secret: &str) -> Result<Bundle, StoreError> {
        (**self).delete(id, secret).await
    }

    async fn purge_expired(&self, now: i64) -> Result<usize, StoreError> {
        (**self).purge_expired(now).await
    }
}
