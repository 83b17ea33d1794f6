//! # Barvault Engine
//!
//! Ingestion, reconciliation, and indicator computation over the barvault
//! version store.
//!
//! ## Overview
//!
//! - **Ingestion coordinator**: fills availability gaps from a priority-ordered
//!   connector chain with retries, quotas, and in-flight de-duplication
//! - **Reconciliation**: compares `latest` against an authoritative source,
//!   classifies deviations, and applies accepted adjustments as new versions
//! - **Indicator engine**: deterministic kernels behind a version-aware,
//!   compute-once cache
//! - **Service facade**: one API surface for strategy/backtest and operational
//!   callers
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Engine error types |
//! | [`indicator`] | Indicator kernels, specs, and cache |
//! | [`ingest`] | Gap-filling ingestion coordinator |
//! | [`reconcile`] | Reconciliation engine and scheduler |
//! | [`service`] | Service facade and builder |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use barvault_core::{InstrumentId, ScriptedConnector, SourceId, TimeRange, Timeframe,
//!     UtcTimestamp};
//! use barvault_engine::MarketDataService;
//! use barvault_store::FieldSet;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = MarketDataService::builder()
//!         .connector(
//!             Arc::new(ScriptedConnector::new(SourceId::parse("demo")?, 0)),
//!             None,
//!         )
//!         .build();
//!
//!     let instrument = InstrumentId::parse("BTC-USD")?;
//!     let range = TimeRange::new(
//!         UtcTimestamp::parse("2026-01-05T00:00:00Z")?,
//!         UtcTimestamp::parse("2026-01-06T00:00:00Z")?,
//!     )?;
//!
//!     let report = service
//!         .ensure(&instrument, Timeframe::OneHour, range, FieldSet::OHLCV)
//!         .await?;
//!     println!("completeness: {}", report.availability.completeness);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod indicator;
pub mod ingest;
pub mod reconcile;
pub mod service;

// Re-export commonly used types at crate root for convenience

pub use error::EngineError;
pub use indicator::{
    IndicatorEngine, IndicatorKind, IndicatorPoint, IndicatorSeries, IndicatorSpec,
};
pub use ingest::{EnsureReport, IngestionConfig, IngestionCoordinator, SubRangeFailure};
pub use reconcile::{
    Deviation, ReconcileConfig, ReconcileOutcome, ReconciliationEngine, ReconciliationScheduler,
};
pub use service::{MarketDataService, MarketDataServiceBuilder};
