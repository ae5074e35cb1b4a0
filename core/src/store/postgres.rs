use chrono::{DateTime, Utc};
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};

use crate::config::StoreConfig;
use crate::errors::StoreError;
use crate::profile::TimingColumns;
use crate::store::{QuerySet, TimesStore, UpdateRecord, batch_params, render_store_info};

/// Postgres-backed store. Owns the client for the lifetime of the run; the
/// connection task winds down when the client is dropped.
pub struct PostgresStore {
    client: Client,
    queries: QuerySet,
}

impl PostgresStore {
    pub async fn connect(config: &StoreConfig, queries: QuerySet) -> Result<Self, StoreError> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.user)
            .password(&config.password);

        let (client, connection) =
            pg_config
                .connect(NoTls)
                .await
                .map_err(|e| StoreError::Connection {
                    reason: e.to_string(),
                })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("Store connection terminated: {}", e);
            }
        });

        info!(
            "Connected to store database {} at {}:{}",
            config.database, config.host, config.port
        );

        Ok(Self { client, queries })
    }
}

impl TimesStore for PostgresStore {
    async fn remaining_count(&self) -> Result<u64, StoreError> {
        let row = self
            .client
            .query_one(self.queries.remaining_count.as_str(), &[])
            .await
            .map_err(|e| StoreError::Query {
                name: "remaining_count",
                reason: e.to_string(),
            })?;
        let count: i64 = row.try_get(0).map_err(|e| StoreError::BadRow {
            name: "remaining_count",
            reason: e.to_string(),
        })?;
        Ok(count.max(0) as u64)
    }

    async fn update_batch(&self, records: &[UpdateRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let statement = render_store_info(&self.queries.store_info, records)?;
        let params = batch_params(records);
        // A store_info without RETURNING yields no rows here; that reads as
        // an affected count of zero, not as a failure.
        let rows = self
            .client
            .query(statement.as_str(), &params)
            .await
            .map_err(|e| StoreError::Query {
                name: "store_info",
                reason: e.to_string(),
            })?;
        Ok(rows.len() as u64)
    }

    async fn biggest_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = self
            .client
            .query_opt(self.queries.get_biggest.as_str(), &[])
            .await
            .map_err(|e| StoreError::Query {
                name: "get_biggest",
                reason: e.to_string(),
            })?;
        match row {
            None => Ok(None),
            // MAX over an empty table is a row holding NULL, hence the
            // nested Option.
            Some(row) => row
                .try_get::<_, Option<DateTime<Utc>>>(0)
                .map_err(|e| StoreError::BadRow {
                    name: "get_biggest",
                    reason: e.to_string(),
                }),
        }
    }

    async fn timing_durations(&self, columns: &TimingColumns) -> Result<Vec<f64>, StoreError> {
        let statement = format!(
            "SELECT EXTRACT(EPOCH FROM ({end} - {start}))::float8 FROM {table} \
             WHERE {start} IS NOT NULL AND {end} IS NOT NULL",
            end = columns.end_column,
            start = columns.start_column,
            table = columns.table,
        );
        let rows = self
            .client
            .query(statement.as_str(), &[])
            .await
            .map_err(|e| StoreError::Query {
                name: "timing_durations",
                reason: e.to_string(),
            })?;
        rows.iter()
            .map(|row| {
                row.try_get::<_, f64>(0).map_err(|e| StoreError::BadRow {
                    name: "timing_durations",
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    async fn end_timestamps(
        &self,
        columns: &TimingColumns,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        let statement = format!(
            "SELECT {end}::timestamptz FROM {table} WHERE {end} IS NOT NULL ORDER BY {end}",
            end = columns.end_column,
            table = columns.table,
        );
        let rows = self
            .client
            .query(statement.as_str(), &[])
            .await
            .map_err(|e| StoreError::Query {
                name: "end_timestamps",
                reason: e.to_string(),
            })?;
        rows.iter()
            .map(|row| {
                row.try_get::<_, DateTime<Utc>>(0)
                    .map_err(|e| StoreError::BadRow {
                        name: "end_timestamps",
                        reason: e.to_string(),
                    })
            })
            .collect()
    }
}
