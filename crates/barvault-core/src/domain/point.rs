use serde::{Deserialize, Serialize};

use crate::{InstrumentId, SourceId, Timeframe, UtcTimestamp, ValidationError};

/// Canonical OHLCV bar for one grid interval of one instrument.
///
/// Points are immutable once constructed; a correction always produces a new
/// point in a new version, never an in-place edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvPoint {
    pub instrument: InstrumentId,
    pub timeframe: Timeframe,
    pub ts: UtcTimestamp,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<u64>,
    pub source: SourceId,
    pub is_adjusted: bool,
    pub adjustment_factor: Option<f64>,
}

impl OhlcvPoint {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instrument: InstrumentId,
        timeframe: Timeframe,
        ts: UtcTimestamp,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: Option<u64>,
        source: SourceId,
    ) -> Result<Self, ValidationError> {
        validate_non_negative("open", open)?;
        validate_non_negative("high", high)?;
        validate_non_negative("low", low)?;
        validate_non_negative("close", close)?;

        if high < low {
            return Err(ValidationError::InvalidBarRange);
        }
        if open < low || open > high || close < low || close > high {
            return Err(ValidationError::InvalidBarBounds);
        }
        if !timeframe.is_aligned(ts) {
            return Err(ValidationError::OffGridTimestamp {
                timestamp: ts.format_rfc3339(),
                timeframe: timeframe.as_str(),
            });
        }

        Ok(Self {
            instrument,
            timeframe,
            ts,
            open,
            high,
            low,
            close,
            volume,
            source,
            is_adjusted: false,
            adjustment_factor: None,
        })
    }

    /// Derive an adjusted copy: prices scaled by `factor`, volume scaled by the
    /// inverse so notional turnover is preserved (a 4:1 split has factor 0.25).
    pub fn with_adjustment(&self, factor: f64) -> Result<Self, ValidationError> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(ValidationError::InvalidAdjustmentFactor { value: factor });
        }

        let volume = self
            .volume
            .map(|v| (v as f64 / factor).round().max(0.0) as u64);

        Ok(Self {
            instrument: self.instrument.clone(),
            timeframe: self.timeframe,
            ts: self.ts,
            open: self.open * factor,
            high: self.high * factor,
            low: self.low * factor,
            close: self.close * factor,
            volume,
            source: self.source.clone(),
            is_adjusted: true,
            adjustment_factor: Some(factor),
        })
    }
}

fn validate_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(open: f64, high: f64, low: f64, close: f64) -> Result<OhlcvPoint, ValidationError> {
        OhlcvPoint::new(
            InstrumentId::parse("AAPL").expect("valid instrument"),
            Timeframe::OneHour,
            UtcTimestamp::parse("2026-01-05T10:00:00Z").expect("valid timestamp"),
            open,
            high,
            low,
            close,
            Some(1_000_000),
            SourceId::parse("mock").expect("valid source"),
        )
    }

    #[test]
    fn valid_bar_constructs() {
        let p = point(100.0, 105.0, 95.0, 102.0).expect("must construct");
        assert!(!p.is_adjusted);
        assert_eq!(p.adjustment_factor, None);
    }

    #[test]
    fn rejects_high_below_low() {
        let err = point(100.0, 95.0, 105.0, 102.0).expect_err("must fail");
        assert_eq!(err, ValidationError::InvalidBarRange);
    }

    #[test]
    fn rejects_close_outside_bounds() {
        let err = point(100.0, 105.0, 95.0, 110.0).expect_err("must fail");
        assert_eq!(err, ValidationError::InvalidBarBounds);
    }

    #[test]
    fn rejects_off_grid_timestamp() {
        let err = OhlcvPoint::new(
            InstrumentId::parse("AAPL").expect("valid instrument"),
            Timeframe::OneHour,
            UtcTimestamp::parse("2026-01-05T10:30:00Z").expect("valid timestamp"),
            100.0,
            105.0,
            95.0,
            102.0,
            None,
            SourceId::parse("mock").expect("valid source"),
        )
        .expect_err("must fail");
        assert!(matches!(err, ValidationError::OffGridTimestamp { .. }));
    }

    #[test]
    fn split_adjustment_scales_prices_and_inverts_volume() {
        let p = point(100.0, 104.0, 96.0, 102.0).expect("must construct");
        let adjusted = p.with_adjustment(0.25).expect("must adjust");

        assert_eq!(adjusted.open, 25.0);
        assert_eq!(adjusted.close, 25.5);
        assert_eq!(adjusted.volume, Some(4_000_000));
        assert!(adjusted.is_adjusted);
        assert_eq!(adjusted.adjustment_factor, Some(0.25));
    }

    #[test]
    fn rejects_non_positive_factor() {
        let p = point(100.0, 104.0, 96.0, 102.0).expect("must construct");
        assert!(p.with_adjustment(0.0).is_err());
        assert!(p.with_adjustment(-1.0).is_err());
        assert!(p.with_adjustment(f64::NAN).is_err());
    }
}
