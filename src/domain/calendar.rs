//! Trading-day arithmetic (C1).
//!
//! Pure, deterministic functions over `NaiveDate`. Holidays are pluggable via
//! `HolidayCalendar` but the only shipped implementation treats weekends as
//! the sole non-trading days, per spec: holiday data is an external concern.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};

/// India Standard Time, UTC+5:30. Fixed offset, not a DST-aware zone — IST
/// has none, so `chrono_tz` would add a dependency for no behavioral gain.
pub fn ist_offset() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 30 * 60).expect("IST offset is a valid fixed offset")
}

/// The trading-day local date (IST) a UTC timestamp falls on (§6 Timezone).
pub fn ist_date(timestamp: DateTime<Utc>) -> NaiveDate {
    timestamp.with_timezone(&ist_offset()).date_naive()
}

/// The IST wall-clock time of day for a UTC timestamp, used to evaluate
/// market-hours and scheduler trigger windows (§4.9, §4.10).
pub fn ist_time(timestamp: DateTime<Utc>) -> NaiveTime {
    timestamp.with_timezone(&ist_offset()).time()
}

/// Market session window: weekday, 09:15-15:30 IST (§4.10).
pub fn is_market_hours(timestamp: DateTime<Utc>) -> bool {
    let local = timestamp.with_timezone(&ist_offset());
    if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let open = NaiveTime::from_hms_opt(9, 15, 0).unwrap();
    let close = NaiveTime::from_hms_opt(15, 30, 0).unwrap();
    let t = local.time();
    t >= open && t <= close
}

/// Determines whether a date is a trading day, independent of weekday rules.
pub trait HolidayCalendar: Send + Sync {
    fn is_holiday(&self, date: NaiveDate) -> bool;
}

/// Default calendar: every day is tradable except Saturday/Sunday.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeekendOnlyCalendar;

impl HolidayCalendar for WeekendOnlyCalendar {
    fn is_holiday(&self, _date: NaiveDate) -> bool {
        false
    }
}

pub struct TradingCalendar<H: HolidayCalendar = WeekendOnlyCalendar> {
    holidays: H,
}

impl Default for TradingCalendar<WeekendOnlyCalendar> {
    fn default() -> Self {
        Self {
            holidays: WeekendOnlyCalendar,
        }
    }
}

impl<H: HolidayCalendar> TradingCalendar<H> {
    pub fn new(holidays: H) -> Self {
        Self { holidays }
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.is_holiday(date)
    }

    pub fn next_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut d = date.succ_opt().expect("NaiveDate overflow");
        while !self.is_trading_day(d) {
            d = d.succ_opt().expect("NaiveDate overflow");
        }
        d
    }

    pub fn previous_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut d = date.pred_opt().expect("NaiveDate underflow");
        while !self.is_trading_day(d) {
            d = d.pred_opt().expect("NaiveDate underflow");
        }
        d
    }

    pub fn add_trading_days(&self, date: NaiveDate, n: u32) -> NaiveDate {
        let mut d = date;
        for _ in 0..n {
            d = self.next_trading_day(d);
        }
        d
    }

    pub fn subtract_trading_days(&self, date: NaiveDate, n: u32) -> NaiveDate {
        let mut d = date;
        for _ in 0..n {
            d = self.previous_trading_day(d);
        }
        d
    }

    /// Number of trading days in `(a, b]` when `b >= a`, `(b, a]` negated otherwise.
    pub fn trading_days_between(&self, a: NaiveDate, b: NaiveDate) -> i64 {
        if b >= a {
            let mut count = 0i64;
            let mut d = a;
            while d < b {
                d = self.next_trading_day(d);
                count += 1;
            }
            count
        } else {
            -self.trading_days_between(b, a)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cal() -> TradingCalendar {
        TradingCalendar::default()
    }

    #[test]
    fn skips_weekends() {
        let friday = NaiveDate::from_ymd_opt(2025, 1, 24).unwrap(); // Friday
        let monday = NaiveDate::from_ymd_opt(2025, 1, 27).unwrap();
        assert_eq!(cal().next_trading_day(friday), monday);
    }

    #[test]
    fn previous_trading_day_skips_weekend() {
        let monday = NaiveDate::from_ymd_opt(2025, 1, 27).unwrap();
        let friday = NaiveDate::from_ymd_opt(2025, 1, 24).unwrap();
        assert_eq!(cal().previous_trading_day(monday), friday);
    }

    #[test]
    fn add_and_subtract_are_inverses_around_weekends() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 22).unwrap(); // Wednesday
        let plus5 = cal().add_trading_days(start, 5);
        assert_eq!(cal().subtract_trading_days(plus5, 5), start);
    }

    #[test]
    fn trading_days_between_is_deterministic() {
        let a = NaiveDate::from_ymd_opt(2025, 1, 20).unwrap(); // Monday
        let b = NaiveDate::from_ymd_opt(2025, 1, 24).unwrap(); // Friday
        assert_eq!(cal().trading_days_between(a, b), 4);
        assert_eq!(cal().trading_days_between(b, a), -4);
    }

    #[test]
    fn is_trading_day_rejects_saturday() {
        let saturday = NaiveDate::from_ymd_opt(2025, 1, 25).unwrap();
        assert!(!cal().is_trading_day(saturday));
    }

    #[test]
    fn ist_date_rolls_forward_past_midnight_utc() {
        // 2025-01-24 19:00 UTC is 2025-01-25 00:30 IST.
        let ts = NaiveDate::from_ymd_opt(2025, 1, 24)
            .unwrap()
            .and_hms_opt(19, 0, 0)
            .unwrap()
            .and_utc();
        assert_eq!(ist_date(ts), NaiveDate::from_ymd_opt(2025, 1, 25).unwrap());
    }

    #[test]
    fn market_hours_excludes_weekend_and_after_close() {
        let saturday_morning = NaiveDate::from_ymd_opt(2025, 1, 25)
            .unwrap()
            .and_hms_opt(5, 0, 0)
            .unwrap()
            .and_utc();
        assert!(!is_market_hours(saturday_morning));

        let monday_after_close = NaiveDate::from_ymd_opt(2025, 1, 27)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap()
            .and_utc();
        assert!(!is_market_hours(monday_after_close));

        let monday_midday = NaiveDate::from_ymd_opt(2025, 1, 27)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap()
            .and_utc();
        assert!(is_market_hours(monday_midday));
    }
}
