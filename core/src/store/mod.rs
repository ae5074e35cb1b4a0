pub mod postgres;

use std::error::Error as StdError;
use std::path::Path;

use bytes::BytesMut;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio_postgres::types::{IsNull, ToSql, Type};

use crate::errors::{ConfigError, StoreError};
use crate::profile::TimingColumns;

/// Placeholder in the store_info query that the batch writer expands into
/// one parenthesized tuple per record.
pub const ROWS_PLACEHOLDER: &str = "{rows}";

/// The externally supplied SQL for everything the pipeline asks of the
/// store, loaded from the `queries` mapping of the tables-definition file.
/// The pipeline never inspects the statements beyond the placeholder check.
#[derive(Debug, Clone, Deserialize)]
pub struct QuerySet {
    /// One row, one integer: rows still waiting for an update.
    pub remaining_count: String,
    /// Update-only batch write. Must contain [`ROWS_PLACEHOLDER`] and should
    /// RETURN the matched rows so the affected count can be observed.
    pub store_info: String,
    /// One scalar: the biggest value of the tracked timestamp column.
    pub get_biggest: String,
}

#[derive(Debug, Deserialize)]
struct TablesDefinition {
    queries: QuerySet,
}

impl QuerySet {
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let definition: TablesDefinition =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Invalid {
                message: format!("tables definition: {e}"),
            })?;
        definition.queries.validate()?;
        Ok(definition.queries)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.store_info.contains(ROWS_PLACEHOLDER) {
            return Err(ConfigError::Invalid {
                message: format!("store_info query must contain the {ROWS_PLACEHOLDER} placeholder"),
            });
        }
        Ok(())
    }
}

/// One column value of a persistence record. Values are typed at runtime
/// because the record shape belongs to the event profile, not to the core.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    BigInt(i64),
    Double(f64),
    Timestamp(DateTime<Utc>),
    Null,
}

impl SqlValue {
    /// Postgres cast attached to the value's placeholder so the server can
    /// type the expanded VALUES list without guessing.
    fn pg_cast(&self) -> Option<&'static str> {
        match self {
            SqlValue::Text(_) => Some("text"),
            SqlValue::BigInt(_) => Some("bigint"),
            SqlValue::Double(_) => Some("float8"),
            SqlValue::Timestamp(_) => Some("timestamptz"),
            SqlValue::Null => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::BigInt(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Double(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(value)
    }
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self {
            SqlValue::Text(v) => v.to_sql(ty, out),
            SqlValue::BigInt(v) => v.to_sql(ty, out),
            SqlValue::Double(v) => v.to_sql(ty, out),
            SqlValue::Timestamp(v) => v.to_sql(ty, out),
            SqlValue::Null => Ok(IsNull::Yes),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // The expanded statement casts every placeholder, so the wire type
        // is always the one the inner value agrees with.
        true
    }

    fn to_sql_checked(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        self.to_sql(ty, out)
    }
}

/// Ordered column values for one row of the batch write, in the order the
/// store_info query destructures its tuples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateRecord {
    values: Vec<SqlValue>,
}

impl UpdateRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, value: impl Into<SqlValue>) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn push(&mut self, value: impl Into<SqlValue>) {
        self.values.push(value.into());
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn width(&self) -> usize {
        self.values.len()
    }
}

/// Expand [`ROWS_PLACEHOLDER`] into one cast tuple per record, numbering the
/// parameters across the whole batch: `($1::text,$2::timestamptz),($3...`.
pub(crate) fn render_store_info(
    template: &str,
    records: &[UpdateRecord],
) -> Result<String, StoreError> {
    let Some(first) = records.first() else {
        return Err(StoreError::BadBatch {
            reason: "batch is empty".to_string(),
        });
    };
    let width = first.width();
    if width == 0 {
        return Err(StoreError::BadBatch {
            reason: "records carry no values".to_string(),
        });
    }
    if let Some(odd) = records.iter().find(|record| record.width() != width) {
        return Err(StoreError::BadBatch {
            reason: format!(
                "records of width {} and {} in the same batch",
                width,
                odd.width()
            ),
        });
    }

    let mut clause = String::new();
    let mut param = 1usize;
    for (row, record) in records.iter().enumerate() {
        if row > 0 {
            clause.push(',');
        }
        clause.push('(');
        for (column, value) in record.values().iter().enumerate() {
            if column > 0 {
                clause.push(',');
            }
            match value.pg_cast() {
                Some(cast) => clause.push_str(&format!("${param}::{cast}")),
                None => clause.push_str(&format!("${param}")),
            }
            param += 1;
        }
        clause.push(')');
    }
    Ok(template.replacen(ROWS_PLACEHOLDER, &clause, 1))
}

/// Flatten the batch into the parameter slice `query` expects, in the same
/// order the rendered statement numbers them.
pub(crate) fn batch_params(records: &[UpdateRecord]) -> Vec<&(dyn ToSql + Sync)> {
    records
        .iter()
        .flat_map(|record| record.values().iter())
        .map(|value| value as &(dyn ToSql + Sync))
        .collect()
}

/// Handle to the backing store. One implementation talks to Postgres; tests
/// script their own.
#[allow(async_fn_in_trait)]
pub trait TimesStore {
    /// Rows still expected but not yet updated.
    async fn remaining_count(&self) -> Result<u64, StoreError>;

    /// Update-only write of one batch. Returns the number of rows the write
    /// actually touched; a batch that matches nothing is 0, not an error.
    async fn update_batch(&self, records: &[UpdateRecord]) -> Result<u64, StoreError>;

    /// Biggest value of the tracked timestamp column, if any row has one.
    async fn biggest_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Seconds between the start and end columns for every completed row.
    async fn timing_durations(&self, columns: &TimingColumns) -> Result<Vec<f64>, StoreError>;

    /// Every value of the end column, ascending.
    async fn end_timestamps(
        &self,
        columns: &TimingColumns,
    ) -> Result<Vec<DateTime<Utc>>, StoreError>;
}
