use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub hours: u64,
    pub minutes: u64,
    pub total_hours: f64,
    /// Share of the target reached, capped at 100.
    pub percentage: f64,
}

impl Progress {
    pub const ZERO: Progress = Progress {
        hours: 0,
        minutes: 0,
        total_hours: 0.0,
        percentage: 0.0,
    };

    /// Progress between `start` and `now`. A start in the future counts as zero.
    pub fn at(start: Option<DateTime<Utc>>, target_hours: f64, now: DateTime<Utc>) -> Self {
        let Some(start) = start else {
            return Self::ZERO;
        };
        let elapsed_ms = (now - start).num_milliseconds().max(0);
        let total_hours = elapsed_ms as f64 / 3_600_000.0;
        let hours = total_hours.floor();
        let minutes = ((total_hours - hours) * 60.0).floor();
        let percentage = if target_hours > 0.0 {
            (total_hours / target_hours * 100.0).min(100.0)
        } else {
            0.0
        };
        Self {
            hours: hours as u64,
            minutes: minutes as u64,
            total_hours,
            percentage,
        }
    }

    pub fn milestones(&self) -> Milestones {
        Milestones::reached(self.total_hours)
    }

    pub fn formatted(&self) -> String {
        format_elapsed(self.hours, self.minutes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Milestones {
    pub h24: bool,
    pub h48: bool,
    pub h72: bool,
}

impl Milestones {
    pub fn reached(total_hours: f64) -> Self {
        Self {
            h24: total_hours >= 24.0,
            h48: total_hours >= 48.0,
            h72: total_hours >= 72.0,
        }
    }
}

pub fn format_elapsed(hours: u64, minutes: u64) -> String {
    format!("{hours}h {minutes}m")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    #[test_timeout::timeout]
    fn splits_hours_and_minutes() {
        let now = start() + Duration::minutes(25 * 60 + 30);
        let progress = Progress::at(Some(start()), 72.0, now);
        assert_eq!(progress.hours, 25);
        assert_eq!(progress.minutes, 30);
        assert_eq!(progress.formatted(), "25h 30m");
        assert!((progress.percentage - 25.5 / 72.0 * 100.0).abs() < 1e-9);
        assert_eq!(
            progress.milestones(),
            Milestones {
                h24: true,
                h48: false,
                h72: false
            }
        );
    }

    #[test_timeout::timeout]
    fn caps_percentage_at_target() {
        let now = start() + Duration::hours(100);
        let progress = Progress::at(Some(start()), 72.0, now);
        assert_eq!(progress.percentage, 100.0);
        assert!(progress.milestones().h72);
    }

    #[test_timeout::timeout]
    fn missing_or_future_start_is_zero() {
        assert_eq!(Progress::at(None, 72.0, start()), Progress::ZERO);
        let progress = Progress::at(Some(start() + Duration::hours(1)), 72.0, start());
        assert_eq!(progress.hours, 0);
        assert_eq!(progress.percentage, 0.0);
    }
}
