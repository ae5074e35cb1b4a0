use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global tracing subscriber. `RUST_LOG` wins when set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "harvest_core=info,runner_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Counters accumulated over one pipeline run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct HarvestMetrics {
    pub messages_received: usize,
    pub messages_rejected: usize,
    pub records_buffered: usize,
    pub flushes: usize,
    pub effective_flushes: usize,
    pub forced_flushes: usize,
    pub offsets_submitted: usize,
}
