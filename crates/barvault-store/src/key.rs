//! Series addressing.

use std::fmt::{Display, Formatter};

use barvault_core::{InstrumentId, Timeframe};
use serde::{Deserialize, Serialize};

/// Addresses one stored series: every version and audit trail hangs off a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub instrument: InstrumentId,
    pub timeframe: Timeframe,
}

impl SeriesKey {
    pub fn new(instrument: InstrumentId, timeframe: Timeframe) -> Self {
        Self {
            instrument,
            timeframe,
        }
    }
}

impl Display for SeriesKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.instrument, self.timeframe.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_instrument_and_timeframe() {
        let key = SeriesKey::new(
            InstrumentId::parse("AAPL").expect("valid instrument"),
            Timeframe::OneHour,
        );
        assert_eq!(key.to_string(), "AAPL/1h");
    }
}
