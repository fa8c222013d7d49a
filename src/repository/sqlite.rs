use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqliteJournalMode;
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};

use crate::data_types::UserId;
use crate::metadata::DatasetMetadata;

use super::interface::{Error, MetadataRepository, Result};

#[derive(Debug)]
pub struct SqliteMetadataRepository {
    pub executor: Pool<Sqlite>,
}

impl SqliteMetadataRepository {
    pub const MIGRATOR: Migrator = sqlx::migrate!("migrations/sqlite");

    pub async fn try_new(
        dsn: String,
        journal_mode: SqliteJournalMode,
    ) -> std::result::Result<Self, Error> {
        let options = SqliteConnectOptions::from_str(&dsn)
            .map_err(Error::SqlxError)?
            .create_if_missing(true)
            .journal_mode(journal_mode);

        // An in-memory database lives only as long as some connection to it, and
        // shared-cache writers lock each other out: pin it to a single connection.
        let pool_options = if dsn.contains(":memory:") {
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new()
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(Error::SqlxError)?;
        let repo = Self { executor: pool };
        repo.setup().await?;
        Ok(repo)
    }

    pub fn interpret_error(error: sqlx::Error) -> Error {
        if let sqlx::Error::Database(ref d) = error {
            // Reference: https://www.sqlite.org/rescode.html
            if d.message().contains("UNIQUE constraint failed") {
                return Error::UniqueConstraintViolation(error);
            }
        }
        Error::SqlxError(error)
    }

    fn decode(key: &str, document: &str) -> Result<DatasetMetadata> {
        serde_json::from_str(document).map_err(|source| Error::CorruptRecord {
            key: key.to_string(),
            source,
        })
    }
}

#[async_trait]
impl MetadataRepository for SqliteMetadataRepository {
    async fn setup(&self) -> Result<()> {
        Self::MIGRATOR.run(&self.executor).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<DatasetMetadata>> {
        let row = sqlx::query("SELECT document FROM dataset_metadata WHERE id = $1")
            .bind(key)
            .fetch_optional(&self.executor)
            .await
            .map_err(Self::interpret_error)?;

        row.map(|row| Self::decode(key, row.get("document")))
            .transpose()
    }

    async fn put(&self, key: &str, record: &DatasetMetadata) -> Result<()> {
        let document = serde_json::to_string(record).map_err(Error::EncodeError)?;

        sqlx::query(
            "INSERT INTO dataset_metadata (id, user_id, is_copy, document)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                user_id = excluded.user_id,
                is_copy = excluded.is_copy,
                document = excluded.document",
        )
        .bind(key)
        .bind(record.user_id)
        .bind(record.is_copy)
        .bind(document)
        .execute(&self.executor)
        .await
        .map_err(Self::interpret_error)?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM dataset_metadata WHERE id = $1")
            .bind(key)
            .execute(&self.executor)
            .await
            .map_err(Self::interpret_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn rename(
        &self,
        old_key: &str,
        new_key: &str,
        record: &DatasetMetadata,
    ) -> Result<()> {
        let document = serde_json::to_string(record).map_err(Error::EncodeError)?;
        let mut tx = self
            .executor
            .begin()
            .await
            .map_err(Self::interpret_error)?;

        sqlx::query("DELETE FROM dataset_metadata WHERE id = $1")
            .bind(old_key)
            .execute(&mut *tx)
            .await
            .map_err(Self::interpret_error)?;

        // A plain insert: an existing record under the new key fails the transaction
        sqlx::query(
            "INSERT INTO dataset_metadata (id, user_id, is_copy, document)
            VALUES ($1, $2, $3, $4)",
        )
        .bind(new_key)
        .bind(record.user_id)
        .bind(record.is_copy)
        .bind(document)
        .execute(&mut *tx)
        .await
        .map_err(Self::interpret_error)?;

        tx.commit().await.map_err(Self::interpret_error)?;
        Ok(())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<DatasetMetadata>> {
        let rows = sqlx::query(
            "SELECT id, document FROM dataset_metadata WHERE user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.executor)
        .await
        .map_err(Self::interpret_error)?;

        rows.iter()
            .map(|row| Self::decode(row.get("id"), row.get("document")))
            .collect()
    }
}
