use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use zipstream::{
    Bundle, BundleId, BundleStore, FileReference, NewBundle, StoreError, epoch_secs_now,
    expiration_from_now,
};

use crate::schema;

/// A SQLite-backed bundle store.
///
/// Every operation treats an expired bundle exactly like a missing one;
/// expired rows are physically removed by [`BundleStore::purge_expired`].
pub struct SqliteBundleStore {
    conn: Mutex<rusqlite::Connection>,
    lifetime: Duration,
}

impl SqliteBundleStore {
    /// Open a store backed by a file on disk.
    pub fn open(path: &Path, lifetime: Duration) -> Result<Self, StoreError> {
        let conn =
            rusqlite::Connection::open(path).map_err(|e| StoreError::Database(e.to_string()))?;
        Self::from_connection(conn, lifetime)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory(lifetime: Duration) -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Self::from_connection(conn, lifetime)
    }

    fn from_connection(
        mut conn: rusqlite::Connection,
        lifetime: Duration,
    ) -> Result<Self, StoreError> {
        schema::migrations()
            .to_latest(&mut conn)
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
            lifetime,
        })
    }

    /// How long newly created bundles live.
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    fn lock(&self) -> Result<MutexGuard<'_, rusqlite::Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_owned()))
    }

    /// Load a live bundle and check the secret when one is given.
    fn load(
        conn: &rusqlite::Connection,
        id: &BundleId,
        secret: Option<&str>,
    ) -> Result<Bundle, StoreError> {
        let (bundle, files_json) = conn
            .query_row(
                "SELECT id, secret, filename, files_json, expiration_date
                 FROM bundles
                 WHERE id = ?1 AND expiration_date > ?2",
                rusqlite::params![id.as_str(), epoch_secs_now()],
                Self::row_to_bundle,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Database(other.to_string()),
            })?;

        if secret.is_some_and(|s| s != bundle.secret) {
            return Err(StoreError::NotFound);
        }

        let files: Vec<FileReference> = serde_json::from_str(&files_json)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Bundle { files, ..bundle })
    }

    /// Map a row to a bundle with an empty file list plus the raw JSON.
    fn row_to_bundle(row: &rusqlite::Row) -> rusqlite::Result<(Bundle, String)> {
        let bundle = Bundle {
            id: BundleId::new(row.get::<_, String>(0)?),
            secret: row.get(1)?,
            filename: row.get(2)?,
            files: Vec::new(),
            expiration_date: row.get(4)?,
        };
        Ok((bundle, row.get(3)?))
    }
}

fn files_to_json(files: &[FileReference]) -> Result<String, StoreError> {
    serde_json::to_string(files).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait::async_trait]
impl BundleStore for SqliteBundleStore {
    async fn create(&self, bundle: NewBundle) -> Result<Bundle, StoreError> {
        let created = Bundle {
            id: BundleId::new(uuid::Uuid::new_v4().to_string()),
            secret: uuid::Uuid::new_v4().to_string(),
            filename: bundle.filename,
            files: bundle.files,
            expiration_date: expiration_from_now(self.lifetime),
        };
        let files_json = files_to_json(&created.files)?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO bundles (id, secret, filename, files_json, expiration_date)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                created.id.as_str(),
                created.secret,
                created.filename,
                files_json,
                created.expiration_date,
            ],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::debug!(id = %created.id, files = created.files.len(), "bundle created");
        Ok(created)
    }

    async fn read(&self, id: &BundleId, secret: Option<&str>) -> Result<Bundle, StoreError> {
        let conn = self.lock()?;
        Self::load(&conn, id, secret)
    }

    async fn update(
        &self,
        id: &BundleId,
        secret: &str,
        files: Vec<FileReference>,
    ) -> Result<Bundle, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut bundle = Self::load(&tx, id, Some(secret))?;
        bundle.files.extend(files);

        tx.execute(
            "UPDATE bundles SET files_json = ?2 WHERE id = ?1",
            rusqlite::params![id.as_str(), files_to_json(&bundle.files)?],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;
        tx.commit()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(bundle)
    }

    async fn delete(&self, id: &BundleId, secret: &str) -> Result<Bundle, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let bundle = Self::load(&tx, id, Some(secret))?;
        tx.execute("DELETE FROM bundles WHERE id = ?1", [id.as_str()])
            .map_err(|e| StoreError::Database(e.to_string()))?;
        tx.commit()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(bundle)
    }

    async fn purge_expired(&self, now: i64) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM bundles WHERE expiration_date <= ?1",
            [now],
        )
        .map_err(|e| StoreError::Database(e.to_string()))
    }
}

#[cfg(test)]
impl SqliteBundleStore {
    /// Overwrite a bundle's expiration, bypassing the lifetime.
    pub(crate) fn set_expiration(&self, id: &BundleId, expiration_date: i64) {
        self.lock()
            .unwrap()
            .execute(
                "UPDATE bundles SET expiration_date = ?2 WHERE id = ?1",
                rusqlite::params![id.as_str(), expiration_date],
            )
            .unwrap();
    }
}
