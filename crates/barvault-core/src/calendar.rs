//! Trading calendars.
//!
//! The availability checker treats grid points outside an instrument's
//! calendar as satisfied rather than missing. Calendars are configured per
//! instrument class: crypto-style books trade 24/7, exchange-listed
//! instruments trade weekday sessions minus holidays.

use std::collections::{HashMap, HashSet};

use time::{Date, Duration, Time};

use crate::{InstrumentId, Timeframe, UtcTimestamp};

/// Weekday session boundaries plus a holiday set, all UTC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCalendar {
    open: Time,
    close: Time,
    holidays: HashSet<Date>,
}

impl SessionCalendar {
    pub fn new(open: Time, close: Time) -> Self {
        Self {
            open,
            close,
            holidays: HashSet::new(),
        }
    }

    pub fn with_holidays(mut self, holidays: impl IntoIterator<Item = Date>) -> Self {
        self.holidays.extend(holidays);
        self
    }

    fn is_trading_day(&self, date: Date) -> bool {
        let day_num = date.weekday().number_days_from_monday();
        if day_num >= 5 {
            return false;
        }
        !self.holidays.contains(&date)
    }

    fn is_open_at(&self, ts: UtcTimestamp) -> bool {
        if !self.is_trading_day(ts.date()) {
            return false;
        }
        let t = ts.into_inner().time();
        t >= self.open && t < self.close
    }
}

/// Per-instrument-class trading calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradingCalendar {
    /// 24/7 books (crypto and similar): every grid point trades.
    AlwaysOpen,
    /// Session-based venues: weekday sessions minus holidays.
    SessionBased(SessionCalendar),
}

impl TradingCalendar {
    pub fn always_open() -> Self {
        Self::AlwaysOpen
    }

    pub fn weekday_sessions(open: Time, close: Time) -> Self {
        Self::SessionBased(SessionCalendar::new(open, close))
    }

    /// Whether a grid point of `timeframe` is expected to carry data.
    ///
    /// Daily bars are keyed at midnight, so they are judged by trading day
    /// rather than session membership.
    pub fn covers(&self, ts: UtcTimestamp, timeframe: Timeframe) -> bool {
        match self {
            Self::AlwaysOpen => true,
            Self::SessionBased(session) => match timeframe {
                Timeframe::OneDay => session.is_trading_day(ts.date()),
                _ => session.is_open_at(ts),
            },
        }
    }

    pub fn is_trading_day(&self, date: Date) -> bool {
        match self {
            Self::AlwaysOpen => true,
            Self::SessionBased(session) => session.is_trading_day(date),
        }
    }

    /// First trading day strictly after `from`.
    pub fn next_trading_day(&self, from: Date) -> Date {
        let mut date = from.saturating_add(Duration::days(1));
        while !self.is_trading_day(date) {
            date = date.saturating_add(Duration::days(1));
        }
        date
    }
}

/// Calendar lookup by instrument, falling back to a default.
#[derive(Debug, Clone)]
pub struct CalendarRegistry {
    default: TradingCalendar,
    overrides: HashMap<InstrumentId, TradingCalendar>,
}

impl Default for CalendarRegistry {
    fn default() -> Self {
        Self::new(TradingCalendar::AlwaysOpen)
    }
}

impl CalendarRegistry {
    pub fn new(default: TradingCalendar) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_calendar(mut self, instrument: InstrumentId, calendar: TradingCalendar) -> Self {
        self.overrides.insert(instrument, calendar);
        self
    }

    pub fn calendar_for(&self, instrument: &InstrumentId) -> &TradingCalendar {
        self.overrides.get(instrument).unwrap_or(&self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, time};

    fn ts(input: &str) -> UtcTimestamp {
        UtcTimestamp::parse(input).expect("valid timestamp")
    }

    #[test]
    fn always_open_covers_weekends() {
        let calendar = TradingCalendar::always_open();
        // 2026-01-04 is a Sunday.
        assert!(calendar.covers(ts("2026-01-04T03:00:00Z"), Timeframe::OneHour));
    }

    #[test]
    fn session_calendar_excludes_weekends_and_off_hours() {
        let calendar = TradingCalendar::weekday_sessions(time!(14:00), time!(21:00));

        // 2026-01-05 is a Monday.
        assert!(calendar.covers(ts("2026-01-05T14:00:00Z"), Timeframe::OneHour));
        assert!(calendar.covers(ts("2026-01-05T20:00:00Z"), Timeframe::OneHour));
        assert!(!calendar.covers(ts("2026-01-05T21:00:00Z"), Timeframe::OneHour));
        assert!(!calendar.covers(ts("2026-01-05T03:00:00Z"), Timeframe::OneHour));
        assert!(!calendar.covers(ts("2026-01-04T15:00:00Z"), Timeframe::OneHour));
    }

    #[test]
    fn holidays_are_closed() {
        let calendar = TradingCalendar::SessionBased(
            SessionCalendar::new(time!(14:00), time!(21:00)).with_holidays([date!(2026 - 01 - 05)]),
        );

        assert!(!calendar.covers(ts("2026-01-05T15:00:00Z"), Timeframe::OneHour));
        assert!(!calendar.covers(ts("2026-01-05T00:00:00Z"), Timeframe::OneDay));
        assert!(calendar.covers(ts("2026-01-06T00:00:00Z"), Timeframe::OneDay));
    }

    #[test]
    fn next_trading_day_skips_weekend_and_holiday() {
        let calendar = TradingCalendar::SessionBased(
            SessionCalendar::new(time!(14:00), time!(21:00)).with_holidays([date!(2026 - 01 - 05)]),
        );

        // Friday 2026-01-02 -> skip Sat/Sun and the Monday holiday.
        assert_eq!(
            calendar.next_trading_day(date!(2026 - 01 - 02)),
            date!(2026 - 01 - 06)
        );
    }

    #[test]
    fn registry_falls_back_to_default() {
        let aapl = InstrumentId::parse("AAPL").expect("valid instrument");
        let btc = InstrumentId::parse("BTC-USD").expect("valid instrument");

        let registry = CalendarRegistry::new(TradingCalendar::weekday_sessions(
            time!(14:00),
            time!(21:00),
        ))
        .with_calendar(btc.clone(), TradingCalendar::always_open());

        assert_eq!(registry.calendar_for(&btc), &TradingCalendar::AlwaysOpen);
        assert!(matches!(
            registry.calendar_for(&aapl),
            TradingCalendar::SessionBased(_)
        ));
    }
}
