use thiserror::Error;

/// Validation and contract errors exposed by `barvault-core`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("instrument id cannot be empty")]
    EmptyInstrument,
    #[error("instrument id length {len} exceeds max {max}")]
    InstrumentTooLong { len: usize, max: usize },
    #[error("instrument id must start with an ASCII letter: '{ch}'")]
    InstrumentInvalidStart { ch: char },
    #[error("instrument id contains invalid character '{ch}' at index {index}")]
    InstrumentInvalidChar { ch: char, index: usize },

    #[error("invalid timeframe '{value}', expected one of 1m, 5m, 15m, 1h, 1d")]
    InvalidTimeframe { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("unix timestamp {value} is out of the representable range")]
    UnixTimestampOutOfRange { value: i64 },
    #[error("timestamp {timestamp} is not aligned to the {timeframe} grid")]
    OffGridTimestamp {
        timestamp: String,
        timeframe: &'static str,
    },

    #[error("range start {start} must be strictly before end {end}")]
    EmptyRange { start: String, end: String },

    #[error("source id cannot be empty")]
    EmptySourceId,
    #[error("source id contains invalid character '{ch}' at index {index}")]
    SourceIdInvalidChar { ch: char, index: usize },

    #[error("version tag cannot be empty")]
    EmptyVersionTag,
    #[error("version tag length {len} exceeds max {max}")]
    VersionTagTooLong { len: usize, max: usize },
    #[error("version tag contains invalid character '{ch}' at index {index}")]
    VersionTagInvalidChar { ch: char, index: usize },
    #[error("'latest' is reserved and cannot be used as a named version tag")]
    ReservedVersionTag,

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },
    #[error("bar high must be >= low")]
    InvalidBarRange,
    #[error("bar open/close must be within high/low range")]
    InvalidBarBounds,
    #[error("adjustment factor must be finite and positive: {value}")]
    InvalidAdjustmentFactor { value: f64 },
}
