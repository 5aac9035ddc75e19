use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;

use study_core::model::{PageScope, ProgressRecord};
use study_core::stats::{self, ProgressRatio};

const BAR_WIDTH: usize = 20;

/// Every derived statistic for the current page, ready to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dashboard {
    pub overall: ProgressRatio,
    pub groups: Vec<(String, ProgressRatio)>,
    pub streak: u32,
    pub this_week: usize,
    pub total_completed: usize,
    pub days_active: u32,
    pub notes: usize,
    pub last_updated: DateTime<Utc>,
}

impl Dashboard {
    #[must_use]
    pub fn build(record: &ProgressRecord, page: &PageScope, today: NaiveDate) -> Self {
        let groups = page
            .groups()
            .into_iter()
            .map(|group| (group.to_owned(), stats::group_progress(record, page, group)))
            .collect();

        Self {
            overall: stats::overall_progress(record, page),
            groups,
            streak: stats::streak(record, today),
            this_week: stats::weekly_completions(record, today),
            total_completed: record.completed_topics().count(),
            days_active: stats::days_active(record, today),
            notes: record.notes.len(),
            last_updated: record.last_updated,
        }
    }
}

fn bar(ratio: ProgressRatio) -> String {
    let filled = usize::from(ratio.percent()) * BAR_WIDTH / 100;
    format!("{}{}", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled))
}

fn write_row(f: &mut fmt::Formatter<'_>, label: &str, ratio: ProgressRatio) -> fmt::Result {
    writeln!(
        f,
        "{label:<12} [{}] {:>3}% ({}/{})",
        bar(ratio),
        ratio.percent(),
        ratio.completed(),
        ratio.total()
    )
}

impl fmt::Display for Dashboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_row(f, "overall", self.overall)?;
        for (group, ratio) in &self.groups {
            write_row(f, group, *ratio)?;
        }
        writeln!(f)?;
        writeln!(f, "streak:      {} day(s)", self.streak)?;
        writeln!(f, "this week:   {}", self.this_week)?;
        writeln!(f, "completed:   {}", self.total_completed)?;
        writeln!(f, "days active: {}", self.days_active)?;
        writeln!(f, "notes:       {}", self.notes)?;
        write!(f, "updated:     {}", self.last_updated.to_rfc3339())
    }
}
