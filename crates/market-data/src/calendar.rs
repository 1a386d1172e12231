use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::HashSet;

use arena_core::{ArenaConfig, ArenaError};

/// XETRA trading calendar: weekday sessions in the exchange timezone,
/// minus the configured holiday set. DST handling comes from chrono-tz.
#[derive(Debug, Clone)]
pub struct MarketCalendar {
    tz: Tz,
    open: NaiveTime,
    close: NaiveTime,
    holidays: HashSet<NaiveDate>,
}

impl MarketCalendar {
    pub fn from_config(config: &ArenaConfig) -> Result<Self, ArenaError> {
        let tz: Tz = config
            .timezone
            .parse()
            .map_err(|_| ArenaError::Config(format!("unknown timezone {}", config.timezone)))?;
        let open = NaiveTime::from_hms_opt(config.market_open_hour, 0, 0)
            .ok_or_else(|| ArenaError::Config("bad market open time".into()))?;
        let close = NaiveTime::from_hms_opt(config.market_close_hour, config.market_close_minute, 0)
            .ok_or_else(|| ArenaError::Config("bad market close time".into()))?;
        if open >= close {
            return Err(ArenaError::Config("market opens after it closes".into()));
        }
        Ok(Self {
            tz,
            open,
            close,
            holidays: config.holidays.iter().copied().collect(),
        })
    }

    /// Weekday and not a configured holiday, judged in exchange-local time.
    pub fn is_trading_day(&self, instant: DateTime<Utc>) -> bool {
        let local = instant.with_timezone(&self.tz);
        let date = local.date_naive();
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Inside the trading session: `[open, close)` on a trading day.
    pub fn is_market_open(&self, instant: DateTime<Utc>) -> bool {
        if !self.is_trading_day(instant) {
            return false;
        }
        let local_time = instant.with_timezone(&self.tz).time();
        local_time >= self.open && local_time < self.close
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn calendar_with_holiday(holiday: &str) -> MarketCalendar {
        let mut config = ArenaConfig::default();
        config.holidays = vec![NaiveDate::parse_from_str(holiday, "%Y-%m-%d").unwrap()];
        MarketCalendar::from_config(&config).unwrap()
    }

    fn berlin_instant(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        chrono_tz::Europe::Berlin
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn weekday_session_is_open() {
        let cal = calendar_with_holiday("2025-12-24");
        // Tuesday 2025-06-10, 10:00 Berlin
        assert!(cal.is_market_open(berlin_instant(2025, 6, 10, 10, 0)));
    }

    #[test]
    fn weekend_is_closed() {
        let cal = calendar_with_holiday("2025-12-24");
        // Saturday
        assert!(!cal.is_trading_day(berlin_instant(2025, 6, 14, 10, 0)));
        assert!(!cal.is_market_open(berlin_instant(2025, 6, 14, 10, 0)));
    }

    #[test]
    fn holiday_is_closed() {
        let cal = calendar_with_holiday("2025-12-24");
        assert!(!cal.is_trading_day(berlin_instant(2025, 12, 24, 10, 0)));
    }

    #[test]
    fn session_boundaries() {
        let cal = calendar_with_holiday("2025-12-24");
        // Tuesday: before open, at open, just before close, at close
        assert!(!cal.is_market_open(berlin_instant(2025, 6, 10, 8, 59)));
        assert!(cal.is_market_open(berlin_instant(2025, 6, 10, 9, 0)));
        assert!(cal.is_market_open(berlin_instant(2025, 6, 10, 17, 29)));
        assert!(!cal.is_market_open(berlin_instant(2025, 6, 10, 17, 30)));
    }

    #[test]
    fn dst_does_not_shift_session() {
        let cal = calendar_with_holiday("2025-12-24");
        // Winter (CET) and summer (CEST): 10:00 Berlin is open either way
        assert!(cal.is_market_open(berlin_instant(2025, 1, 14, 10, 0)));
        assert!(cal.is_market_open(berlin_instant(2025, 7, 15, 10, 0)));
    }
}
