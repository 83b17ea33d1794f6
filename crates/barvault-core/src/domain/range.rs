use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{Timeframe, UtcTimestamp, ValidationError};

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    start: UtcTimestamp,
    end: UtcTimestamp,
}

impl TimeRange {
    pub fn new(start: UtcTimestamp, end: UtcTimestamp) -> Result<Self, ValidationError> {
        if start >= end {
            return Err(ValidationError::EmptyRange {
                start: start.format_rfc3339(),
                end: end.format_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn start(self) -> UtcTimestamp {
        self.start
    }

    pub fn end(self) -> UtcTimestamp {
        self.end
    }

    pub fn contains(self, ts: UtcTimestamp) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn intersect(self, other: Self) -> Option<Self> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        Self::new(start, end).ok()
    }

    /// Grid points of `timeframe` falling inside the range, ascending.
    /// The first point is the range start rounded up to the grid.
    pub fn grid_points(self, timeframe: Timeframe) -> Vec<UtcTimestamp> {
        let step = timeframe.step_seconds();
        let mut current = if timeframe.is_aligned(self.start) {
            self.start.unix()
        } else {
            timeframe.align_down(self.start).unix() + step
        };

        let end = self.end.unix();
        let mut points = Vec::new();
        while current < end {
            if let Ok(ts) = UtcTimestamp::from_unix(current) {
                points.push(ts);
            }
            current += step;
        }
        points
    }

    /// Merge grid timestamps into contiguous half-open ranges, one grid step wide
    /// per timestamp. Input must be ascending and deduplicated.
    pub fn from_grid_run(timestamps: &[UtcTimestamp], timeframe: Timeframe) -> Vec<Self> {
        let step = timeframe.step_seconds();
        let mut merged: Vec<(i64, i64)> = Vec::new();

        for ts in timestamps {
            let start = ts.unix();
            let end = start + step;
            match merged.last_mut() {
                Some((_, last_end)) if *last_end == start => *last_end = end,
                _ => merged.push((start, end)),
            }
        }

        merged
            .into_iter()
            .filter_map(|(start, end)| {
                let start = UtcTimestamp::from_unix(start).ok()?;
                let end = UtcTimestamp::from_unix(end).ok()?;
                Self::new(start, end).ok()
            })
            .collect()
    }
}

impl Display for TimeRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(input: &str) -> UtcTimestamp {
        UtcTimestamp::parse(input).expect("valid timestamp")
    }

    #[test]
    fn rejects_inverted_range() {
        let err = TimeRange::new(ts("2026-01-02T00:00:00Z"), ts("2026-01-01T00:00:00Z"))
            .expect_err("must fail");
        assert!(matches!(err, ValidationError::EmptyRange { .. }));
    }

    #[test]
    fn hourly_grid_over_one_day_has_24_points() {
        let range = TimeRange::new(ts("2026-01-05T00:00:00Z"), ts("2026-01-06T00:00:00Z"))
            .expect("valid range");
        let points = range.grid_points(Timeframe::OneHour);
        assert_eq!(points.len(), 24);
        assert_eq!(points[0], ts("2026-01-05T00:00:00Z"));
        assert_eq!(points[23], ts("2026-01-05T23:00:00Z"));
    }

    #[test]
    fn unaligned_start_rounds_up() {
        let range = TimeRange::new(ts("2026-01-05T00:30:00Z"), ts("2026-01-05T03:00:00Z"))
            .expect("valid range");
        let points = range.grid_points(Timeframe::OneHour);
        assert_eq!(points, vec![ts("2026-01-05T01:00:00Z"), ts("2026-01-05T02:00:00Z")]);
    }

    #[test]
    fn merges_contiguous_grid_timestamps() {
        let stamps = vec![
            ts("2026-01-05T01:00:00Z"),
            ts("2026-01-05T02:00:00Z"),
            ts("2026-01-05T05:00:00Z"),
        ];
        let ranges = TimeRange::from_grid_run(&stamps, Timeframe::OneHour);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].start(), ts("2026-01-05T01:00:00Z"));
        assert_eq!(ranges[0].end(), ts("2026-01-05T03:00:00Z"));
        assert_eq!(ranges[1].start(), ts("2026-01-05T05:00:00Z"));
        assert_eq!(ranges[1].end(), ts("2026-01-05T06:00:00Z"));
    }

    #[test]
    fn intersect_overlapping_ranges() {
        let a = TimeRange::new(ts("2026-01-05T00:00:00Z"), ts("2026-01-05T12:00:00Z"))
            .expect("valid range");
        let b = TimeRange::new(ts("2026-01-05T06:00:00Z"), ts("2026-01-06T00:00:00Z"))
            .expect("valid range");
        let overlap = a.intersect(b).expect("ranges overlap");
        assert_eq!(overlap.start(), ts("2026-01-05T06:00:00Z"));
        assert_eq!(overlap.end(), ts("2026-01-05T12:00:00Z"));

        let c = TimeRange::new(ts("2026-01-07T00:00:00Z"), ts("2026-01-08T00:00:00Z"))
            .expect("valid range");
        assert!(a.intersect(c).is_none());
    }
}
