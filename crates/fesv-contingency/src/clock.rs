//! Local wall-clock time for period and event stamps.
//!
//! The authority expects `fInicio`/`hInicio`, `fFin`/`hFin` and the
//! transmission date in the emitter's local time, not UTC.

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;

use crate::config::ContingencyConfig;
use crate::error::ContingencyResult;

#[derive(Debug, Clone, Copy)]
pub struct LocalClock {
    tz: Tz,
    fixed: Option<DateTime<Utc>>,
}

impl LocalClock {
    pub fn new(tz: Tz) -> Self {
        LocalClock { tz, fixed: None }
    }

    pub fn from_config(config: &ContingencyConfig) -> ContingencyResult<Self> {
        Ok(Self::new(config.tz()?))
    }

    /// A clock stopped at `instant`.
    pub fn fixed(tz: Tz, instant: DateTime<Utc>) -> Self {
        LocalClock {
            tz,
            fixed: Some(instant),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn now_utc(&self) -> DateTime<Utc> {
        self.fixed.unwrap_or_else(Utc::now)
    }

    pub fn now_local(&self) -> NaiveDateTime {
        self.to_local(self.now_utc())
    }

    /// Wall-clock time of `instant` in this clock's zone.
    pub fn to_local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.tz).naive_local()
    }
}

impl Default for LocalClock {
    fn default() -> Self {
        Self::new(chrono_tz::America::El_Salvador)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_el_salvador_is_utc_minus_six() {
        let instant = Utc.with_ymd_and_hms(2025, 3, 15, 20, 30, 0).unwrap();
        let clock = LocalClock::fixed(chrono_tz::America::El_Salvador, instant);

        let local = clock.now_local();
        assert_eq!(local.format("%Y-%m-%d %H:%M:%S").to_string(), "2025-03-15 14:30:00");
    }

    #[test]
    fn test_local_date_can_lag_utc_date() {
        let instant = Utc.with_ymd_and_hms(2025, 3, 16, 2, 0, 0).unwrap();
        let clock = LocalClock::fixed(chrono_tz::America::El_Salvador, instant);

        assert_eq!(clock.now_local().format("%Y-%m-%d").to_string(), "2025-03-15");
    }

    #[test]
    fn test_from_config() {
        let clock = LocalClock::from_config(&ContingencyConfig::default()).unwrap();
        assert_eq!(clock.timezone(), chrono_tz::America::El_Salvador);
    }
}
