//! Canonical domain types for versioned OHLCV series.
//!
//! All models validate their invariants at construction time; invalid states
//! are unrepresentable downstream of this module.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`InstrumentId`] | Validated instrument/ticker id |
//! | [`Timeframe`] | Bar interval (1m, 5m, 15m, 1h, 1d) with grid math |
//! | [`UtcTimestamp`] | UTC-only RFC3339 timestamp |
//! | [`TimeRange`] | Half-open `[start, end)` interval |
//! | [`OhlcvPoint`] | OHLCV bar with source/adjustment metadata |
//! | [`VersionTag`] | `latest` (mutable) or a sealed named tag |
//! | [`SourceId`] | Vendor identifier |
//! | [`CorporateAction`] | Corporate-action feed event |
//! | [`AdjustmentRecord`] | Applied retroactive adjustment |

mod actions;
mod point;
mod range;
mod symbol;
mod timeframe;
mod timestamp;
mod version;

pub use actions::{AdjustmentKind, AdjustmentRecord, CorporateAction, CorporateActionKind};
pub use point::OhlcvPoint;
pub use range::TimeRange;
pub use symbol::InstrumentId;
pub use timeframe::Timeframe;
pub use timestamp::UtcTimestamp;
pub use version::{SourceId, VersionTag};
