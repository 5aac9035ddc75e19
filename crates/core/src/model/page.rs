use std::collections::BTreeSet;

use crate::model::ids::TopicId;
use crate::model::record::ProgressRecord;

/// The set of topics rendered on the current page.
///
/// Statistics are scoped to the page: a topic that is complete in the record
/// but not on the page does not count, and a page without topics reports zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageScope {
    topics: BTreeSet<TopicId>,
}

impl PageScope {
    #[must_use]
    pub fn new(topics: impl IntoIterator<Item = TopicId>) -> Self {
        Self {
            topics: topics.into_iter().collect(),
        }
    }

    /// Parse a page manifest: one topic id per line, blank lines and `#` comments ignored.
    #[must_use]
    pub fn parse(manifest: &str) -> Self {
        Self::new(
            manifest
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(TopicId::new),
        )
    }

    /// Every topic the record knows about.
    #[must_use]
    pub fn from_record(record: &ProgressRecord) -> Self {
        Self::new(record.topics.keys().cloned())
    }

    #[must_use]
    pub fn contains(&self, topic: &TopicId) -> bool {
        self.topics.contains(topic)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TopicId> {
        self.topics.iter()
    }

    pub fn in_group<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a TopicId> + 'a {
        self.topics.iter().filter(move |id| id.in_group(prefix))
    }

    /// Distinct groups on the page, sorted.
    #[must_use]
    pub fn groups(&self) -> Vec<&str> {
        let groups: BTreeSet<&str> = self.topics.iter().map(TopicId::group).collect();
        groups.into_iter().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
