// Shared fixtures for barvault behavior tests
use std::sync::Once;

pub use std::sync::Arc;

pub use barvault_core::{
    InstrumentId, OhlcvPoint, ScriptedConnector, SourceId, TimeRange, Timeframe, UtcTimestamp,
    VendorBatch, VersionTag,
};
pub use barvault_engine::MarketDataService;
pub use barvault_store::{FieldSet, SeriesKey};

static TRACING: Once = Once::new();

/// Route engine logs to the test harness; filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn instrument(symbol: &str) -> InstrumentId {
    InstrumentId::parse(symbol).expect("valid instrument")
}

pub fn ts(input: &str) -> UtcTimestamp {
    UtcTimestamp::parse(input).expect("valid timestamp")
}

pub fn range(start: &str, end: &str) -> TimeRange {
    TimeRange::new(ts(start), ts(end)).expect("valid range")
}

/// One UTC day of hourly grid, 2026-01-05.
pub fn hourly_day() -> TimeRange {
    range("2026-01-05T00:00:00Z", "2026-01-06T00:00:00Z")
}

pub fn scripted(id: &str, priority: u8) -> Arc<ScriptedConnector> {
    init_tracing();
    Arc::new(ScriptedConnector::new(
        SourceId::parse(id).expect("valid source"),
        priority,
    ))
}

pub fn daily_bar(symbol: &str, stamp: UtcTimestamp, close: f64, volume: u64) -> OhlcvPoint {
    OhlcvPoint::new(
        instrument(symbol),
        Timeframe::OneDay,
        stamp,
        close,
        close * 1.01,
        close * 0.99,
        close,
        Some(volume),
        SourceId::parse("fixture").expect("valid source"),
    )
    .expect("valid point")
}

/// Daily timestamps 2026-01-01 onward.
pub fn day(index: u8) -> UtcTimestamp {
    ts(&format!("2026-01-{:02}T00:00:00Z", index + 1))
}
