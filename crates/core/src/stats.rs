//! Derived statistics over a progress record.
//!
//! Percentages are computed against a [`PageScope`]; streaks and weekly counts
//! use the whole record.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::model::{PageScope, ProgressRecord, TopicId};

/// Completed-out-of-total ratio with a rounded percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRatio {
    completed: usize,
    total: usize,
    percent: u8,
}

impl ProgressRatio {
    #[must_use]
    pub fn new(completed: usize, total: usize) -> Self {
        let completed = completed.min(total);
        let percent = if total == 0 {
            0
        } else {
            // completed <= total, so the rounded value is at most 100.
            u8::try_from((completed * 100 + total / 2) / total).unwrap_or(100)
        };
        Self {
            completed,
            total,
            percent,
        }
    }

    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn percent(&self) -> u8 {
        self.percent
    }
}

fn ratio_over<'a>(
    record: &ProgressRecord,
    topics: impl Iterator<Item = &'a TopicId>,
) -> ProgressRatio {
    let (completed, total) = topics.fold((0_usize, 0_usize), |(done, total), id| {
        (done + usize::from(record.is_completed(id)), total + 1)
    });
    ProgressRatio::new(completed, total)
}

/// Progress of the page topics whose id starts with `prefix`.
#[must_use]
pub fn group_progress(record: &ProgressRecord, page: &PageScope, prefix: &str) -> ProgressRatio {
    ratio_over(record, page.in_group(prefix))
}

/// Progress across every topic on the page.
#[must_use]
pub fn overall_progress(record: &ProgressRecord, page: &PageScope) -> ProgressRatio {
    ratio_over(record, page.iter())
}

/// Consecutive-day completion streak ending today or yesterday.
///
/// Completion days are deduplicated, then walked newest to oldest. Returns 0
/// when the newest completion is older than yesterday.
#[must_use]
pub fn streak(record: &ProgressRecord, today: NaiveDate) -> u32 {
    let days: BTreeSet<NaiveDate> = record.completion_days().collect();
    let mut newest_first = days.iter().rev();

    let Some(&newest) = newest_first.next() else {
        return 0;
    };
    if (today - newest).num_days() > 1 {
        return 0;
    }

    let mut streak = 1;
    let mut previous = newest;
    for &day in newest_first {
        if (previous - day).num_days() > 1 {
            break;
        }
        streak += 1;
        previous = day;
    }
    streak
}

/// First day (Monday) of the week containing `today`.
#[must_use]
pub fn week_start(today: NaiveDate) -> NaiveDate {
    today - Duration::days(i64::from(today.weekday().num_days_from_monday()))
}

/// Topics completed in the current Monday-based week, up to and including today.
#[must_use]
pub fn weekly_completions(record: &ProgressRecord, today: NaiveDate) -> usize {
    let start = week_start(today);
    record
        .completion_days()
        .filter(|day| *day >= start && *day <= today)
        .count()
}

/// Days since the record was started, counting the start day itself.
#[must_use]
pub fn days_active(record: &ProgressRecord, today: NaiveDate) -> u32 {
    let elapsed = (today - record.start_date.date_naive()).num_days();
    u32::try_from(elapsed.max(0)).unwrap_or(u32::MAX).saturating_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::{DateTime, Utc};

    fn record_with(completions: &[(&str, DateTime<Utc>)]) -> ProgressRecord {
        let mut record = ProgressRecord::new(fixed_now() - Duration::days(30));
        for (id, at) in completions {
            record.set_topic_completed(TopicId::new(*id), true, *at);
        }
        record
    }

    fn today() -> NaiveDate {
        fixed_now().date_naive()
    }

    #[test]
    fn streak_today_and_yesterday_is_two() {
        let record = record_with(&[
            ("part1-01", fixed_now()),
            ("part1-02", fixed_now() - Duration::days(1)),
        ]);
        assert_eq!(streak(&record, today()), 2);
    }

    #[test]
    fn streak_two_days_ago_only_is_zero() {
        let record = record_with(&[("part1-01", fixed_now() - Duration::days(2))]);
        assert_eq!(streak(&record, today()), 0);
    }

    #[test]
    fn streak_may_end_yesterday() {
        let record = record_with(&[
            ("a-1", fixed_now() - Duration::days(1)),
            ("a-2", fixed_now() - Duration::days(2)),
            ("a-3", fixed_now() - Duration::days(3)),
        ]);
        assert_eq!(streak(&record, today()), 3);
    }

    #[test]
    fn streak_dedups_same_day_and_stops_at_gap() {
        let record = record_with(&[
            ("a-1", fixed_now()),
            ("a-2", fixed_now()),
            ("a-3", fixed_now() - Duration::days(1)),
            ("a-4", fixed_now() - Duration::days(3)),
        ]);
        assert_eq!(streak(&record, today()), 2);
    }

    #[test]
    fn streak_empty_record_is_zero() {
        assert_eq!(streak(&ProgressRecord::new(fixed_now()), today()), 0);
    }

    #[test]
    fn group_progress_is_page_scoped() {
        let record = record_with(&[("part1-01", fixed_now()), ("part2-01", fixed_now())]);
        let page = PageScope::parse("part1-01\npart1-02\npart1-03\npart1-04");

        let part1 = group_progress(&record, &page, "part1");
        assert_eq!((part1.completed(), part1.total(), part1.percent()), (1, 4, 25));

        // part2-01 is complete but not rendered on this page.
        assert_eq!(group_progress(&record, &page, "part2"), ProgressRatio::new(0, 0));
        assert_eq!(overall_progress(&record, &PageScope::default()).percent(), 0);
    }

    #[test]
    fn ratio_rounds_to_nearest() {
        assert_eq!(ProgressRatio::new(1, 3).percent(), 33);
        assert_eq!(ProgressRatio::new(2, 3).percent(), 67);
        assert_eq!(ProgressRatio::new(3, 3).percent(), 100);
    }

    #[test]
    fn weekly_counts_current_week_only() {
        // fixed_now() is a Tuesday.
        let record = record_with(&[
            ("a-1", fixed_now()),
            ("a-2", fixed_now() - Duration::days(1)),
            ("a-3", fixed_now() - Duration::days(2)),
        ]);
        assert_eq!(week_start(today()).weekday(), chrono::Weekday::Mon);
        assert_eq!(weekly_completions(&record, today()), 2);
    }

    #[test]
    fn days_active_counts_start_day() {
        let record = ProgressRecord::new(fixed_now());
        assert_eq!(days_active(&record, today()), 1);
        assert_eq!(days_active(&record, today() + Duration::days(4)), 5);
    }
}
