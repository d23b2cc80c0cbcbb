//! Pure market-hours calendar for the CME-listed futures session.
//!
//! Every function here is a pure function of `now` (already converted to
//! America/New_York) plus the two static date sets; there is no mutable
//! state to own or lock.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Weekday};
use chrono_tz::America::New_York;
use chrono_tz::Tz;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct MarketCalendar {
    pub holidays: HashSet<NaiveDate>,
    pub early_closes: HashSet<NaiveDate>,
    /// Bypasses the weekday/time gate entirely. Used by test tooling so
    /// scenario tests don't flake depending on when they happen to run;
    /// never set `true` outside tests.
    force_open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenStatus {
    pub open: bool,
    pub reason: &'static str,
}

impl Default for MarketCalendar {
    fn default() -> Self {
        Self {
            holidays: HashSet::new(),
            early_closes: HashSet::new(),
            force_open: false,
        }
    }
}

impl MarketCalendar {
    pub fn new(holidays: HashSet<NaiveDate>, early_closes: HashSet<NaiveDate>) -> Self {
        Self {
            holidays,
            early_closes,
            force_open: false,
        }
    }

    /// A calendar that reports open regardless of weekday or time.
    /// Scenario tests use this so they don't depend on the clock.
    pub fn always_open() -> Self {
        Self {
            holidays: HashSet::new(),
            early_closes: HashSet::new(),
            force_open: true,
        }
    }

    pub fn now_et() -> DateTime<Tz> {
        chrono::Utc::now().with_timezone(&New_York)
    }

    pub fn is_open(&self, now: DateTime<Tz>) -> OpenStatus {
        if self.force_open {
            return OpenStatus {
                open: true,
                reason: "forced-open",
            };
        }

        let date = now.date_naive();
        if self.holidays.contains(&date) {
            return OpenStatus {
                open: false,
                reason: "holiday",
            };
        }

        let hm = now.hour() * 60 + now.minute();
        match now.weekday() {
            Weekday::Sat => OpenStatus {
                open: false,
                reason: "saturday",
            },
            Weekday::Sun => {
                if hm >= 18 * 60 {
                    OpenStatus {
                        open: true,
                        reason: "sunday-evening-open",
                    }
                } else {
                    OpenStatus {
                        open: false,
                        reason: "sunday-before-open",
                    }
                }
            }
            Weekday::Fri => {
                if self.early_closes.contains(&date) && hm >= 13 * 60 {
                    OpenStatus {
                        open: false,
                        reason: "early-close",
                    }
                } else if hm >= 17 * 60 {
                    OpenStatus {
                        open: false,
                        reason: "friday-close",
                    }
                } else {
                    OpenStatus {
                        open: true,
                        reason: "open",
                    }
                }
            }
            _ => {
                if self.early_closes.contains(&date) && hm >= 13 * 60 {
                    OpenStatus {
                        open: false,
                        reason: "early-close",
                    }
                } else if hm >= 17 * 60 && hm < 18 * 60 {
                    OpenStatus {
                        open: false,
                        reason: "daily-maintenance",
                    }
                } else {
                    OpenStatus {
                        open: true,
                        reason: "open",
                    }
                }
            }
        }
    }

    /// Walks forward in 15-minute steps (bounded to 14 days) to find the
    /// next instant the market is open. Used only for diagnostics; the
    /// webhook path itself just rejects with `outside-hours`.
    pub fn time_until_open(&self, now: DateTime<Tz>) -> Option<Duration> {
        let mut cursor = now;
        let step = Duration::minutes(15);
        let limit = now + Duration::days(14);
        while cursor < limit {
            if self.is_open(cursor).open {
                return Some(cursor - now);
            }
            cursor += step;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn et(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
        New_York.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn saturday_is_closed() {
        let cal = MarketCalendar::default();
        // 2026-07-25 is a Saturday.
        let status = cal.is_open(et(2026, 7, 25, 12, 0));
        assert!(!status.open);
    }

    #[test]
    fn sunday_evening_opens_at_eighteen() {
        let cal = MarketCalendar::default();
        assert!(!cal.is_open(et(2026, 7, 26, 17, 59)).open);
        assert!(cal.is_open(et(2026, 7, 26, 18, 0)).open);
    }

    #[test]
    fn weekday_daily_maintenance_window_closed() {
        let cal = MarketCalendar::default();
        assert!(cal.is_open(et(2026, 7, 28, 16, 59)).open);
        assert!(!cal.is_open(et(2026, 7, 28, 17, 30)).open);
        assert!(cal.is_open(et(2026, 7, 28, 18, 0)).open);
    }

    #[test]
    fn friday_closes_at_seventeen() {
        let cal = MarketCalendar::default();
        assert!(cal.is_open(et(2026, 7, 31, 16, 59)).open);
        assert!(!cal.is_open(et(2026, 7, 31, 17, 0)).open);
    }

    #[test]
    fn holiday_closed_all_day() {
        let mut holidays = HashSet::new();
        let date = NaiveDate::from_ymd_opt(2026, 12, 25).unwrap();
        holidays.insert(date);
        let cal = MarketCalendar::new(holidays, HashSet::new());
        assert!(!cal.is_open(et(2026, 12, 25, 10, 0)).open);
    }

    #[test]
    fn early_close_after_thirteen() {
        let mut early = HashSet::new();
        let date = NaiveDate::from_ymd_opt(2026, 11, 27).unwrap();
        early.insert(date);
        let cal = MarketCalendar::new(HashSet::new(), early);
        assert!(cal.is_open(et(2026, 11, 27, 12, 59)).open);
        assert!(!cal.is_open(et(2026, 11, 27, 13, 0)).open);
    }
}
