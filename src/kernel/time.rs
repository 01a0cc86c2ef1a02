//! Simulated time.
//!
//! The whole engine works with [`SimTime`], a thin wrapper over UTC seconds.
//! Time only ever moves forward, in integer multiples of the scenario epoch
//! length Δ, and every epoch's timestamp is derived from the window start
//! (`start + index * Δ`) rather than accumulated, so long runs do not drift.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// A point in simulated time, stored as UTC seconds (with fractional part).
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct SimTime(f64);

impl SimTime {
    /// Builds a `SimTime` from raw Unix seconds.
    pub fn from_unix(secs: f64) -> Self {
        Self(secs)
    }

    /// Builds a `SimTime` from a UTC datetime.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_micros()) * 1e-6)
    }

    /// Parses the scenario timestamp format `YYYY-MM-DD HH:MM:SS` (UTC).
    pub fn parse(text: &str) -> Option<Self> {
        let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").ok()?;
        Some(Self::from_datetime(Utc.from_utc_datetime(&naive)))
    }

    pub fn as_unix(&self) -> f64 {
        self.0
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        let secs = self.0.floor() as i64;
        let nanos = (((self.0 - self.0.floor()) * 1e9).round() as u32).min(999_999_999);
        Utc.timestamp_opt(secs, nanos)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// This time shifted by `secs` seconds (negative shifts look backward).
    pub fn offset(self, secs: f64) -> Self {
        Self(self.0 + secs)
    }

    /// Seconds elapsed from `earlier` to `self`.
    pub fn seconds_since(self, earlier: SimTime) -> f64 {
        self.0 - earlier.0
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_datetime().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// A closed simulated-time interval `[start, end]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeWindow {
    pub start: SimTime,
    pub end: SimTime,
}

impl TimeWindow {
    pub fn new(start: SimTime, end: SimTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: SimTime) -> bool {
        t >= self.start && t <= self.end
    }

    /// Number of epochs a fixed-step run over this window realizes:
    /// `floor((end - start) / delta) + 1`.
    pub fn epoch_count(&self, delta: f64) -> u64 {
        if self.end < self.start || delta <= 0.0 {
            return 0;
        }
        (self.end.seconds_since(self.start) / delta).floor() as u64 + 1
    }

    /// Timestamp of the `index`-th epoch, derived from the window start.
    pub fn epoch_time(&self, index: u64, delta: f64) -> SimTime {
        self.start.offset(index as f64 * delta)
    }

    /// Intersection with another window, if the two overlap.
    pub fn clip(&self, other: &TimeWindow) -> Option<TimeWindow> {
        let start = if self.start > other.start { self.start } else { other.start };
        let end = if self.end < other.end { self.end } else { other.end };
        (start <= end).then_some(TimeWindow { start, end })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scenario_timestamps() {
        let t = SimTime::parse("2021-03-01 00:00:00").unwrap();
        assert_eq!(t.to_datetime().to_string(), "2021-03-01 00:00:00 UTC");
        assert!(SimTime::parse("01-03-2021").is_none());
    }

    #[test]
    fn epoch_count_is_floor_plus_one() {
        let start = SimTime::parse("2021-03-01 00:00:00").unwrap();
        let window = TimeWindow::new(start, start.offset(660.0));
        assert_eq!(window.epoch_count(1.0), 661);
        assert_eq!(window.epoch_count(7.0), 95); // floor(660/7) + 1
        assert_eq!(window.epoch_count(661.0), 1);
    }

    #[test]
    fn epoch_time_does_not_accumulate_drift() {
        let start = SimTime::parse("2021-03-01 00:00:00").unwrap();
        let window = TimeWindow::new(start, start.offset(86400.0));
        let t = window.epoch_time(86400, 1.0);
        assert_eq!(t.seconds_since(start), 86400.0);
    }

    #[test]
    fn clip_returns_overlap() {
        let start = SimTime::from_unix(0.0);
        let a = TimeWindow::new(start, start.offset(100.0));
        let b = TimeWindow::new(start.offset(40.0), start.offset(200.0));
        let c = a.clip(&b).unwrap();
        assert_eq!(c.start.as_unix(), 40.0);
        assert_eq!(c.end.as_unix(), 100.0);
        assert!(a.clip(&TimeWindow::new(start.offset(150.0), start.offset(160.0))).is_none());
    }
}
