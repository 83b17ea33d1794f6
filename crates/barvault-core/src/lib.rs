//! # Barvault Core
//!
//! Core contracts and domain types for the Barvault versioned OHLCV cache.
//!
//! ## Overview
//!
//! This crate provides the foundational components for Barvault:
//!
//! - **Canonical domain models** for instruments, timeframes, bars, and versions
//! - **Source connector trait** for vendor adapters with heterogeneous payloads
//! - **Corporate-action feed trait** used to corroborate reconciliation findings
//! - **Trading calendars** that decide which grid points are expected to trade
//! - **Retry and quota primitives** shared by all connector call sites
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`calendar`] | Trading calendars and per-instrument registry |
//! | [`connector`] | Source connector trait, vendor payloads, scripted test double |
//! | [`domain`] | Domain models (InstrumentId, Timeframe, OhlcvPoint, VersionTag) |
//! | [`error`] | Core error types |
//! | [`feed`] | Corporate-action feed trait |
//! | [`retry`] | Bounded retry with exponential backoff |
//! | [`throttle`] | Per-connector rate-limit quotas |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use barvault_core::{FetchRequest, InstrumentId, ScriptedConnector, SourceConnector,
//!     SourceId, TimeRange, Timeframe, UtcTimestamp};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = ScriptedConnector::new(SourceId::parse("demo")?, 0);
//!
//!     let request = FetchRequest {
//!         instrument: InstrumentId::parse("AAPL")?,
//!         timeframe: Timeframe::OneHour,
//!         range: TimeRange::new(
//!             UtcTimestamp::parse("2026-01-05T00:00:00Z")?,
//!             UtcTimestamp::parse("2026-01-06T00:00:00Z")?,
//!         )?,
//!     };
//!
//!     let batch = connector.fetch(request).await?;
//!     println!("fetched {} bars", batch.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Connector failures are structured and classified for the fallback chain:
//!
//! ```rust
//! use barvault_core::{ConnectorError, ConnectorErrorKind};
//!
//! fn handle_error(error: ConnectorError) {
//!     match error.kind() {
//!         ConnectorErrorKind::RateLimited => {
//!             // Advance to the next-priority connector
//!         }
//!         ConnectorErrorKind::Unavailable => {
//!             // Retry within policy, then advance
//!         }
//!         ConnectorErrorKind::InvalidRequest => {
//!             // Report to the caller; never retried
//!         }
//!     }
//! }
//! ```

pub mod calendar;
pub mod connector;
pub mod domain;
pub mod error;
pub mod feed;
pub mod retry;
pub mod throttle;

// Re-export commonly used types at crate root for convenience

// Calendars
pub use calendar::{CalendarRegistry, SessionCalendar, TradingCalendar};

// Connector contract and payloads
pub use connector::{
    CandleRow, ConnectorError, ConnectorErrorKind, FetchRequest, ScriptedConnector,
    SourceConnector, VendorBatch,
};

// Domain models
pub use domain::{
    AdjustmentKind, AdjustmentRecord, CorporateAction, CorporateActionKind, InstrumentId,
    OhlcvPoint, SourceId, TimeRange, Timeframe, UtcTimestamp, VersionTag,
};

// Error types
pub use error::ValidationError;

// Corporate-action feed
pub use feed::{CorporateActionFeed, StaticActionFeed};

// Retry logic
pub use retry::{Backoff, RetryConfig};

// Throttling
pub use throttle::ConnectorQuota;
