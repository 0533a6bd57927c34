use chrono::{DateTime, Days, Months, Utc};
use serde::{Deserialize, Serialize};

/// Recurring backup cadence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackupCadence {
    Daily,
    Weekly,
    Monthly,
    SixMonths,
    Yearly,
}

impl BackupCadence {
    /// Calendar arithmetic, so monthly backups keep the day of month (clamped at month end).
    pub fn next_due(&self, last: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            BackupCadence::Daily => last.checked_add_days(Days::new(1)),
            BackupCadence::Weekly => last.checked_add_days(Days::new(7)),
            BackupCadence::Monthly => last.checked_add_months(Months::new(1)),
            BackupCadence::SixMonths => last.checked_add_months(Months::new(6)),
            BackupCadence::Yearly => last.checked_add_months(Months::new(12)),
        }
    }

    pub fn is_due(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.next_due(last).is_some_and(|due| due <= now)
    }
}

/// Descriptor of one archive in an instance's backup directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupInfo {
    pub name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn daily_is_due_after_a_day() {
        let now = Utc::now();
        assert!(BackupCadence::Daily.is_due(now - Duration::hours(25), now));
        assert!(!BackupCadence::Daily.is_due(now - Duration::hours(23), now));
    }

    #[test]
    fn monthly_clamps_to_month_end() {
        let last = Utc.with_ymd_and_hms(2024, 1, 31, 3, 0, 0).unwrap();
        let due = BackupCadence::Monthly.next_due(last).unwrap();
        assert_eq!(due, Utc.with_ymd_and_hms(2024, 2, 29, 3, 0, 0).unwrap());
    }

    #[test]
    fn six_months_and_yearly() {
        let last = Utc.with_ymd_and_hms(2023, 8, 15, 0, 0, 0).unwrap();
        assert_eq!(
            BackupCadence::SixMonths.next_due(last).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 15, 0, 0, 0).unwrap()
        );
        assert_eq!(
            BackupCadence::Yearly.next_due(last).unwrap(),
            Utc.with_ymd_and_hms(2024, 8, 15, 0, 0, 0).unwrap()
        );
    }
}
