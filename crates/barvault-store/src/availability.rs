//! Completeness assessment against the expected timestamp grid.
//!
//! Grid points outside the instrument's trading calendar are treated as
//! satisfied, not missing: a closed exchange produces no bar and that is
//! correct data. Partial data is always reported with its completeness ratio
//! and missing ranges, never returned as if complete.

use std::collections::BTreeMap;

use barvault_core::{OhlcvPoint, SourceId, TimeRange, TradingCalendar, UtcTimestamp};

use crate::SeriesKey;

/// Which optional bar fields a caller requires. A bar missing a required
/// field counts as absent for that caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldSet {
    pub volume: bool,
}

impl FieldSet {
    pub const OHLC: Self = Self { volume: false };
    pub const OHLCV: Self = Self { volume: true };

    fn satisfied_by(self, point: &OhlcvPoint) -> bool {
        !self.volume || point.volume.is_some()
    }
}

/// Which expected grid points one source supplied, as merged ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCoverage {
    pub source: SourceId,
    pub ranges: Vec<TimeRange>,
}

/// Result of one availability check.
#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilityReport {
    pub key: SeriesKey,
    pub range: TimeRange,
    /// Grid points inside the range that the calendar expects to trade.
    pub expected: usize,
    pub present: usize,
    /// `present / expected`, or 1.0 when nothing is expected.
    pub completeness: f64,
    /// Expected-but-absent grid points, merged into contiguous sub-ranges.
    pub missing: Vec<TimeRange>,
    pub coverage: Vec<SourceCoverage>,
}

impl AvailabilityReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Walk the expected grid for `range` and classify each point as present,
/// missing, or outside the calendar.
pub fn assess(
    key: &SeriesKey,
    range: TimeRange,
    points: &[OhlcvPoint],
    calendar: &TradingCalendar,
    fields: FieldSet,
) -> AvailabilityReport {
    let stored: BTreeMap<i64, &OhlcvPoint> = points
        .iter()
        .filter(|point| range.contains(point.ts) && fields.satisfied_by(point))
        .map(|point| (point.ts.unix(), point))
        .collect();

    let mut expected = 0usize;
    let mut present = 0usize;
    let mut missing_stamps: Vec<UtcTimestamp> = Vec::new();
    let mut by_source: BTreeMap<SourceId, Vec<UtcTimestamp>> = BTreeMap::new();

    for stamp in range.grid_points(key.timeframe) {
        if !calendar.covers(stamp, key.timeframe) {
            continue;
        }
        expected += 1;
        match stored.get(&stamp.unix()) {
            Some(point) => {
                present += 1;
                by_source.entry(point.source.clone()).or_default().push(stamp);
            }
            None => missing_stamps.push(stamp),
        }
    }

    let completeness = if expected == 0 {
        1.0
    } else {
        present as f64 / expected as f64
    };

    let coverage = by_source
        .into_iter()
        .map(|(source, stamps)| SourceCoverage {
            source,
            ranges: TimeRange::from_grid_run(&stamps, key.timeframe),
        })
        .collect();

    AvailabilityReport {
        key: key.clone(),
        range,
        expected,
        present,
        completeness,
        missing: TimeRange::from_grid_run(&missing_stamps, key.timeframe),
        coverage,
    }
}
