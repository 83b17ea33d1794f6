use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Duration;

use crate::{UtcTimestamp, ValidationError};

/// Supported time bucket intervals for bar data.
///
/// Variants are declared in ascending step order, so the derived ordering
/// sorts coarser timeframes after finer ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
}

impl Timeframe {
    pub const ALL: [Self; 5] = [
        Self::OneMinute,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::OneHour,
        Self::OneDay,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::OneDay => "1d",
        }
    }

    /// Grid step in whole seconds.
    pub const fn step_seconds(self) -> i64 {
        match self {
            Self::OneMinute => 60,
            Self::FiveMinutes => 300,
            Self::FifteenMinutes => 900,
            Self::OneHour => 3_600,
            Self::OneDay => 86_400,
        }
    }

    pub const fn step(self) -> Duration {
        Duration::seconds(self.step_seconds())
    }

    pub fn is_aligned(self, ts: UtcTimestamp) -> bool {
        ts.unix().rem_euclid(self.step_seconds()) == 0
    }

    /// Round a timestamp down to the nearest grid point.
    pub fn align_down(self, ts: UtcTimestamp) -> UtcTimestamp {
        let step = self.step_seconds();
        let aligned = ts.unix() - ts.unix().rem_euclid(step);
        UtcTimestamp::from_unix(aligned).expect("aligning down cannot leave the representable range")
    }
}

impl Display for Timeframe {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1m" => Ok(Self::OneMinute),
            "5m" => Ok(Self::FiveMinutes),
            "15m" => Ok(Self::FifteenMinutes),
            "1h" => Ok(Self::OneHour),
            "1d" => Ok(Self::OneDay),
            other => Err(ValidationError::InvalidTimeframe {
                value: other.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_timeframe() {
        let timeframe = Timeframe::from_str("1h").expect("must parse");
        assert_eq!(timeframe, Timeframe::OneHour);
    }

    #[test]
    fn rejects_invalid_timeframe() {
        let err = Timeframe::from_str("2h").expect_err("must fail");
        assert!(matches!(err, ValidationError::InvalidTimeframe { .. }));
    }

    #[test]
    fn orders_by_ascending_step() {
        let mut timeframes = [Timeframe::OneDay, Timeframe::OneMinute, Timeframe::OneHour];
        timeframes.sort();
        assert_eq!(
            timeframes,
            [Timeframe::OneMinute, Timeframe::OneHour, Timeframe::OneDay]
        );
        assert!(Timeframe::ALL.windows(2).all(|w| w[0].step() < w[1].step()));
    }

    #[test]
    fn aligns_down_to_grid() {
        let ts = UtcTimestamp::parse("2026-01-01T10:42:17Z").expect("must parse");
        let aligned = Timeframe::OneHour.align_down(ts);
        assert_eq!(aligned.format_rfc3339(), "2026-01-01T10:00:00Z");
        assert!(Timeframe::OneHour.is_aligned(aligned));
        assert!(!Timeframe::OneHour.is_aligned(ts));
    }
}
