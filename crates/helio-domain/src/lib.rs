pub mod cache;
pub mod day;
pub mod decoder;
pub mod dedup;
pub mod error;
pub mod flusher;
pub mod ingest;
pub mod repository;
pub mod rollover;
pub mod service;
pub mod types;

pub use cache::TotalsCache;
pub use day::{current_day, day_string, next_midnight, previous_day};
pub use decoder::{decode_device_identity, decode_telemetry, DecodedTotals, DecoderConfig};
pub use dedup::{DedupConfig, Deduplicator};
pub use error::{DomainError, DomainResult};
pub use flusher::{run_flush_loop, FlushOutcome};
pub use ingest::{run_ingest_loop, IncomingMessage, IngestService};
pub use repository::{DailyTotalsRepository, TotalsNotifier};
pub use rollover::{run_rollover_loop, MigrationOutcome};
pub use service::{DailyTotalsService, TotalsServiceConfig};
pub use types::{
    AccumulatorKey, DailyTotalsRecord, DayTotals, DeviceTotals, NewDailyTotals, RangeQuery,
    RangeTotals, ServiceInfo, TelemetryEvent,
};
