//! Cohort definitions and the retention computation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::ops::Bound;
use std::str::FromStr;

use chrono::{NaiveDate, TimeDelta};
use pulse_core::error::DomainError;
use pulse_core::event::StoredEvent;
use serde::{Deserialize, Serialize};

/// Retention window used when a caller does not choose one.
pub const DEFAULT_WINDOW_DAYS: u32 = 7;

/// Which cohorts are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CohortMaturity {
    /// Every cohort dated before today, even if its window is still open.
    #[default]
    Lenient,
    /// Only cohorts whose whole window has elapsed.
    Strict,
}

impl fmt::Display for CohortMaturity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lenient => f.write_str("lenient"),
            Self::Strict => f.write_str("strict"),
        }
    }
}

impl FromStr for CohortMaturity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            other => Err(DomainError::InvalidQuery(format!(
                "unknown cohort maturity {other:?}, expected \"lenient\" or \"strict\""
            ))),
        }
    }
}

/// Parameters of a retention query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionOptions {
    /// Days after the cohort date in which a return counts.
    pub window_days: u32,
    /// Which cohorts to report.
    pub maturity: CohortMaturity,
}

impl Default for RetentionOptions {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            maturity: CohortMaturity::default(),
        }
    }
}

impl RetentionOptions {
    /// Checks the options.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidQuery` if `window_days` is zero.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.window_days == 0 {
            return Err(DomainError::InvalidQuery(
                "window_days must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    fn window(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.window_days))
    }
}

/// One cohort's retention.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionRow {
    /// First-seen date shared by the cohort.
    pub cohort_date: NaiveDate,
    /// Users first seen on `cohort_date`.
    pub cohort_size: u64,
    /// Members with an event within the window after `cohort_date`.
    pub returned_count: u64,
    /// `returned_count / cohort_size * 100`, rounded to two decimals.
    pub retention_percent: f64,
}

/// Rounds `returned / size * 100` to two decimals; zero when `size` is zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn retention_percent(returned: u64, size: u64) -> f64 {
    if size == 0 {
        return 0.0;
    }
    let percent = returned as f64 / size as f64 * 100.0;
    (percent * 100.0).round() / 100.0
}

/// Distinct activity dates per user.
#[derive(Debug, Default)]
pub struct ActivityIndex {
    users: HashMap<u32, BTreeSet<NaiveDate>>,
}

impl ActivityIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one event.
    pub fn record(&mut self, event: &StoredEvent) {
        self.users
            .entry(event.user_id)
            .or_default()
            .insert(event.event_date());
    }

    /// Records a page of events.
    pub fn record_all(&mut self, events: &[StoredEvent]) {
        for event in events {
            self.record(event);
        }
    }

    /// Number of distinct users seen.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Computes the cohort table as of `today`, ordered by cohort date.
    #[must_use]
    pub fn cohorts(&self, today: NaiveDate, options: RetentionOptions) -> Vec<RetentionRow> {
        let window = options.window();
        let latest_cohort = match options.maturity {
            CohortMaturity::Lenient => today.pred_opt(),
            CohortMaturity::Strict => today.checked_sub_signed(window),
        };
        let Some(latest_cohort) = latest_cohort else {
            return Vec::new();
        };

        let mut tallies: BTreeMap<NaiveDate, (u64, u64)> = BTreeMap::new();
        for dates in self.users.values() {
            let Some(&first_seen) = dates.first() else {
                continue;
            };
            if first_seen > latest_cohort {
                continue;
            }
            let window_end = first_seen
                .checked_add_signed(window)
                .unwrap_or(NaiveDate::MAX);
            let returned = dates
                .range((Bound::Excluded(first_seen), Bound::Included(window_end)))
                .next()
                .is_some();

            let tally = tallies.entry(first_seen).or_default();
            tally.0 += 1;
            if returned {
                tally.1 += 1;
            }
        }

        tallies
            .into_iter()
            .map(|(cohort_date, (cohort_size, returned_count))| RetentionRow {
                cohort_date,
                cohort_size,
                returned_count,
                retention_percent: retention_percent(returned_count, cohort_size),
            })
            .collect()
    }
}
