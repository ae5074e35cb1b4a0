use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

use harvest_core::HarvestConfig;
use harvest_core::pipeline::HarvestPipeline;
use harvest_core::profile::{EventProfile, TimingColumns};
use harvest_core::status::{JsonStatus, StatusSink};
use harvest_core::store::postgres::PostgresStore;
use harvest_core::store::{QuerySet, UpdateRecord};
use harvest_core::telemetry::init_tracing;

/// Receptor controller responses. Each event names the request it answers;
/// the pipeline stamps that request's row with the broker receive time.
struct ReceptorResponses;

impl EventProfile for ReceptorResponses {
    fn validate(&self, event: &Value) -> bool {
        event.get("message_id").and_then(Value::as_str).is_some()
            && event.get("in_response_to").and_then(Value::as_str).is_some()
    }

    fn to_record(&self, broker_timestamp: DateTime<Utc>, event: &Value) -> UpdateRecord {
        let request_id = event
            .get("in_response_to")
            .and_then(Value::as_str)
            .unwrap_or_default();
        UpdateRecord::new().with(request_id).with(broker_timestamp)
    }

    fn count_key(&self) -> &str {
        "results.responses.stored"
    }

    fn biggest_key(&self) -> &str {
        "results.responses.last_received"
    }

    fn start_key(&self) -> Option<&str> {
        Some("started")
    }

    fn stats_prefix(&self) -> &str {
        "results.responses"
    }

    fn timing_columns(&self) -> TimingColumns {
        TimingColumns {
            table: "requests".to_string(),
            start_column: "sent_at".to_string(),
            end_column: "responded_at".to_string(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = load_config()?;
    let queries = QuerySet::from_file(&config.store.tables_definition).with_context(|| {
        format!(
            "loading queries from {}",
            config.store.tables_definition.display()
        )
    })?;

    let mut status = JsonStatus::open(&config.status_file).with_context(|| {
        format!("opening status data {}", config.status_file.display())
    })?;
    if status.get("started").is_none() {
        status.set("started", Value::String(Utc::now().to_rfc3339()));
    }

    let store = Arc::new(PostgresStore::connect(&config.store, queries).await?);
    let mut pipeline = HarvestPipeline::new(
        config.kafka.clone(),
        config.processing.clone(),
        store,
        Arc::new(ReceptorResponses),
    );

    let summary = pipeline.run(&mut status).await?;

    status.set("ended", Value::String(Utc::now().to_rfc3339()));
    status.save().context("writing status data")?;

    info!(
        "Stored {} rows, {} still missing ({:?})",
        summary.stored, summary.remaining, summary.stop
    );
    info!("Run metrics: {:?}", pipeline.metrics());
    Ok(())
}

fn load_config() -> Result<HarvestConfig> {
    let configured = match env::args().nth(1) {
        Some(arg) => Some(PathBuf::from(arg)),
        None => {
            let fallback = PathBuf::from("harvest.yaml");
            fallback.exists().then_some(fallback)
        }
    };
    match &configured {
        Some(path) => info!("Loading configuration from {}", path.display()),
        None => info!("No configuration file, using defaults and environment overrides"),
    }
    HarvestConfig::load(configured.as_deref()).context("loading configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use harvest_core::store::SqlValue;
    use serde_json::json;

    #[test]
    fn test_profile_accepts_only_complete_responses() {
        let profile = ReceptorResponses;

        assert!(profile.validate(&json!({
            "message_id": "m-1",
            "in_response_to": "r-1",
        })));
        assert!(!profile.validate(&json!({"message_id": "m-1"})));
        assert!(!profile.validate(&json!({"in_response_to": 7})));
        assert!(!profile.validate(&json!("just a string")));
    }

    #[test]
    fn test_profile_records_the_request_id_and_receive_time() {
        let profile = ReceptorResponses;
        let received = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();

        let record = profile.to_record(
            received,
            &json!({"message_id": "m-1", "in_response_to": "r-9"}),
        );

        assert_eq!(
            record.values(),
            &[
                SqlValue::Text("r-9".to_string()),
                SqlValue::Timestamp(received),
            ]
        );
    }
}
