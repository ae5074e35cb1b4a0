use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::store::UpdateRecord;

/// Names of the table and columns the timing statistics are computed from.
#[derive(Debug, Clone)]
pub struct TimingColumns {
    pub table: String,
    pub start_column: String,
    pub end_column: String,
}

/// Everything that depends on the event schema, bundled per event family and
/// handed to the pipeline at construction.
///
/// `validate` decides whether an event is usable at all; `to_record` turns
/// an accepted event and its broker timestamp into the column values the
/// store_info query destructures. The remaining methods name where results
/// land in the status document and which columns feed the timing statistics.
pub trait EventProfile: Send + Sync {
    fn validate(&self, event: &Value) -> bool;

    fn to_record(&self, broker_timestamp: DateTime<Utc>, event: &Value) -> UpdateRecord;

    /// Status-data path for the stored-record count.
    fn count_key(&self) -> &str;

    /// Status-data path for the biggest observed timestamp.
    fn biggest_key(&self) -> &str;

    /// Status-data path where the surrounding harness records the run start,
    /// when it records one. Feeds the simple requests-per-second figure.
    fn start_key(&self) -> Option<&str> {
        None
    }

    /// Status-data prefix under which the duration and rate statistics land.
    fn stats_prefix(&self) -> &str;

    fn timing_columns(&self) -> TimingColumns;
}
