// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistent storage for versioned records.
//!
//! Values are encoded as CBOR before they are written into the `records_v1` table, versions are
//! kept in a separate integer column so that conditions can be checked without decoding.
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::migrate::{MigrateDatabase, Migrator};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, Sqlite, migrate, query, query_as};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::traits::{
    INITIAL_VERSION, Mutation, RecordStore, Version, Versioned, WriteError, WriteSet,
};

/// Create SQLite database if it doesn't already exist.
pub async fn create_database(url: &str) -> Result<(), SqliteError> {
    if !Sqlite::database_exists(url).await? {
        Sqlite::create_database(url).await?
    }
    Ok(())
}

/// Create SQLite connection pool.
pub async fn connection_pool(
    url: &str,
    max_connections: u32,
) -> Result<sqlx::SqlitePool, SqliteError> {
    let pool: sqlx::SqlitePool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;
    Ok(pool)
}

/// Get migrations from folder without running them.
pub fn migrations() -> Migrator {
    migrate!()
}

/// Run any pending database migrations from inside the application.
pub async fn run_pending_migrations(pool: &sqlx::SqlitePool) -> Result<(), SqliteError> {
    migrations().run(pool).await?;
    Ok(())
}

pub struct SqliteStoreBuilder {
    url: String,
    max_connections: u32,
    run_migrations: bool,
    create_database: bool,
}

impl Default for SqliteStoreBuilder {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".into(),
            max_connections: 16,
            create_database: true,
            run_migrations: true,
        }
    }
}

impl SqliteStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(any(test, feature = "test_utils"))]
    pub fn random_memory_url(mut self) -> Self {
        // Every temporary database gets a different, random name to keep parallel tests isolated
        // from each other.
        //
        // See related issue: https://github.com/launchbadge/sqlx/issues/2510
        self.url = format!(
            "sqlite://dbmem{}?mode=memory&cache=private",
            rand::random::<u32>()
        );
        self
    }

    pub fn database_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn create_database(mut self, create_database: bool) -> Self {
        self.create_database = create_database;
        self
    }

    pub fn run_default_migrations(mut self, run_migrations: bool) -> Self {
        self.run_migrations = run_migrations;
        self
    }

    pub async fn build(self) -> Result<SqliteStore, SqliteError> {
        if self.create_database {
            create_database(&self.url).await?;
        }

        let pool = connection_pool(&self.url, self.max_connections).await?;

        if self.run_migrations {
            run_pending_migrations(&pool).await?;
        }

        Ok(SqliteStore::new(pool))
    }
}

/// SQLite database holding versioned records.
///
/// This struct can be cloned and used in multiple places in the application. Every cloned
/// instance re-uses the same connection pool.
///
/// Reads go directly to the pool. Write sets are committed inside one SQLite transaction each,
/// where every condition is checked before the first change gets applied. SQLite strictly
/// serializes transactions with _writes_, we make this explicit with a semaphore so concurrent
/// write sets queue up here instead of failing with "database is locked".
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: sqlx::SqlitePool,
    semaphore: Arc<Semaphore>,
}

impl SqliteStore {
    pub(crate) fn new(pool: sqlx::SqlitePool) -> Self {
        Self {
            pool,
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Shortcut building an in-memory SQLite database with a randomised name for testing purposes.
    #[cfg(any(test, feature = "test_utils"))]
    pub async fn temporary() -> Self {
        SqliteStoreBuilder::new()
            .random_memory_url()
            .max_connections(1)
            .build()
            .await
            .expect("migrations succeeded")
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &sqlx::SqlitePool {
        &self.pool
    }
}

impl<T> RecordStore<T> for SqliteStore
where
    T: Serialize + DeserializeOwned,
{
    type Error = SqliteError;

    async fn read(&self, key: &str) -> Result<Option<Versioned<T>>, Self::Error> {
        let row = query_as::<_, RecordRow>(
            "
            SELECT
                key,
                version,
                value
            FROM
                records_v1
            WHERE
                key = ?
            ",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.decode()?.1)),
            None => Ok(None),
        }
    }

    async fn commit(&self, set: WriteSet<T>) -> Result<(), WriteError<Self::Error>> {
        set.validate::<Self::Error>()?;

        // Encode all values before touching the database.
        let mut mutations = Vec::with_capacity(set.len());
        for mutation in set {
            match mutation {
                Mutation::Put {
                    key,
                    value,
                    expected,
                } => {
                    let bytes = encode(&key, &value)?;
                    mutations.push((key, expected, Some(bytes)));
                }
                Mutation::Assert { key, expected } => {
                    mutations.push((key, expected, None));
                }
            }
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("if semaphore is closed then the whole struct is gone as well");

        let mut tx = self.pool.begin().await.map_err(SqliteError::Sqlite)?;

        for (key, expected, value) in mutations {
            let found = query_as::<_, (i64,)>(
                "
                SELECT
                    version
                FROM
                    records_v1
                WHERE
                    key = ?
                ",
            )
            .bind(key.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(SqliteError::Sqlite)?
            .map(|(version,)| from_sql_version(&key, version))
            .transpose()?;

            if !expected.matches(found) {
                tx.rollback().await.map_err(SqliteError::Sqlite)?;
                return Err(WriteError::VersionConflict {
                    key,
                    expected,
                    found,
                });
            }

            let Some(value) = value else {
                continue;
            };

            match found {
                None => {
                    query(
                        "
                        INSERT INTO
                            records_v1 (
                                key,
                                version,
                                value
                            )
                        VALUES
                            (?, ?, ?)
                        ",
                    )
                    .bind(key.as_str())
                    .bind(to_sql_version(&key, INITIAL_VERSION)?)
                    .bind(value)
                    .execute(&mut *tx)
                    .await
                    .map_err(SqliteError::Sqlite)?;
                }
                Some(version) => {
                    query(
                        "
                        UPDATE
                            records_v1
                        SET
                            version = ?,
                            value = ?
                        WHERE
                            key = ?
                            AND version = ?
                        ",
                    )
                    .bind(to_sql_version(&key, version + 1)?)
                    .bind(value)
                    .bind(key.as_str())
                    .bind(to_sql_version(&key, version)?)
                    .execute(&mut *tx)
                    .await
                    .map_err(SqliteError::Sqlite)?;
                }
            }
        }

        tx.commit().await.map_err(SqliteError::Sqlite)?;

        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, Versioned<T>)>, Self::Error> {
        let rows = query_as::<_, RecordRow>(
            "
            SELECT
                key,
                version,
                value
            FROM
                records_v1
            WHERE
                key >= ?
                AND key > ?
            ORDER BY
                key ASC
            LIMIT
                ?
            ",
        )
        .bind(prefix)
        .bind(after.unwrap_or(""))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        // Keys sharing the prefix form one contiguous range, the first key without it ends the
        // page.
        rows.into_iter()
            .take_while(|row| row.key.starts_with(prefix))
            .map(RecordRow::decode)
            .collect()
    }
}

/// Single record row as it is inserted in the SQLite database.
#[derive(Debug, FromRow)]
struct RecordRow {
    key: String,
    version: i64,
    value: Vec<u8>,
}

impl RecordRow {
    fn decode<T>(self) -> Result<(String, Versioned<T>), SqliteError>
    where
        T: DeserializeOwned,
    {
        let version = from_sql_version(&self.key, self.version)?;
        let value = ciborium::from_reader(&self.value[..])
            .map_err(|err| SqliteError::Decode(self.key.clone(), err.into()))?;
        Ok((self.key, Versioned::new(value, version)))
    }
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, SqliteError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|err| SqliteError::Encode(key.to_string(), err))?;
    Ok(bytes)
}

fn from_sql_version(key: &str, version: i64) -> Result<Version, SqliteError> {
    Version::try_from(version)
        .map_err(|_| SqliteError::Decode(key.to_string(), DecodeError::Version(version)))
}

fn to_sql_version(key: &str, version: Version) -> Result<i64, SqliteError> {
    i64::try_from(version).map_err(|_| SqliteError::VersionOverflow(key.to_string()))
}

#[derive(Debug, Error)]
pub enum SqliteError {
    /// SQLite database and connection error.
    #[error(transparent)]
    Sqlite(#[from] sqlx::Error),

    /// SQL table schema migration error.
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Value could not be encoded before storing it into the database. This is a critical error.
    #[error("failed encoding value of record '{0}' before storing to database: {1}")]
    Encode(String, ciborium::ser::Error<std::io::Error>),

    /// Invalid, corrupted data was found in the database. This is a critical error.
    #[error("could not decode corrupted record '{0}' from database: {1}")]
    Decode(String, DecodeError),

    /// Version counter of a record exceeded what the database column can hold.
    #[error("version of record '{0}' overflows database column")]
    VersionOverflow(String),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    DecodeCbor(#[from] ciborium::de::Error<std::io::Error>),

    #[error("negative version {0}")]
    Version(i64),
}
