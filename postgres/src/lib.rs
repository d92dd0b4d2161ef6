//! `PostgreSQL` durable store for credflow.
//!
//! [`PostgresCredentialStore`] implements [`DurableStore`] over a sqlx
//! connection pool. Every worker of the store stage shares the one pool; sqlx
//! pools are safe for concurrent use.
//!
//! Rows live in the `users` table (see `migrations/`). There is no unique key
//! on `uuid`, so a duplicated delivery yields a duplicated row.
//!
//! # Example
//!
//! ```no_run
//! use credflow_core::event::CredentialEvent;
//! use credflow_core::store::{DurableStore, StoreRecord};
//! use credflow_postgres::PostgresCredentialStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresCredentialStore::connect("postgres://localhost/credflow", 16, 64).await?;
//! store.migrate().await?;
//!
//! let event = CredentialEvent::new("id-1", "alice", "hunter2", 0, 0);
//! store.insert(&StoreRecord::from_event(&event)).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use credflow_core::store::{DurableStore, StoreError, StoreFuture, StoreRecord};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// [`DurableStore`] backed by the `users` table.
#[derive(Clone)]
pub struct PostgresCredentialStore {
    pool: PgPool,
}

impl PostgresCredentialStore {
    /// Connect a pool holding between `min_connections` and
    /// `max_connections` connections.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConnectionFailed`] if the database is unreachable.
    pub async fn connect(
        database_url: &str,
        min_connections: u32,
        max_connections: u32,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(min_connections.min(max_connections))
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::ConnectionFailed(format!("Failed to connect: {e}")))?;

        tracing::info!(min_connections, max_connections, "Connected to PostgreSQL");
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `users` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteFailed`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::WriteFailed(format!("Migration failed: {e}")))
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Hash column of every row with `id`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReadFailed`] if the query fails.
    pub async fn hashes(&self, id: &str) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar::<_, String>("SELECT hash FROM users WHERE uuid = $1 ORDER BY created_at")
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::ReadFailed(format!("Failed to read hashes: {e}")))
    }
}

impl DurableStore for PostgresCredentialStore {
    fn insert(&self, record: &StoreRecord) -> StoreFuture<'_, ()> {
        let record = record.clone();
        Box::pin(async move {
            sqlx::query("INSERT INTO users (uuid, username, password, hash) VALUES ($1, $2, $3, $4)")
                .bind(&record.id)
                .bind(&record.username)
                .bind(&record.secret)
                .bind(&record.hash)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::WriteFailed(format!("Failed to insert {}: {e}", record.id)))?;

            tracing::trace!(id = %record.id, "Inserted credential row");
            Ok(())
        })
    }

    fn update_hash(&self, id: &str, hash: &str) -> StoreFuture<'_, u64> {
        let id = id.to_string();
        let hash = hash.to_string();
        Box::pin(async move {
            let result = sqlx::query("UPDATE users SET hash = $1 WHERE uuid = $2")
                .bind(&hash)
                .bind(&id)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::WriteFailed(format!("Failed to update hash of {id}: {e}")))?;

            Ok(result.rows_affected())
        })
    }
}
