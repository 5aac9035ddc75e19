use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::ids::TopicId;

//
// ─── TOPIC PROGRESS ────────────────────────────────────────────────────────────
//

/// Completion state of a single topic.
///
/// `completed_date` is set exactly when `completed` is true. The constructors
/// are the only way to build one in code; deserialized values are taken as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicProgress {
    completed: bool,
    #[serde(default)]
    completed_date: Option<DateTime<Utc>>,
}

impl TopicProgress {
    #[must_use]
    pub fn pending() -> Self {
        Self {
            completed: false,
            completed_date: None,
        }
    }

    #[must_use]
    pub fn completed_at(at: DateTime<Utc>) -> Self {
        Self {
            completed: true,
            completed_date: Some(at),
        }
    }

    #[must_use]
    pub fn completed(&self) -> bool {
        self.completed
    }

    #[must_use]
    pub fn completed_date(&self) -> Option<DateTime<Utc>> {
        self.completed_date
    }
}

//
// ─── NOTES ─────────────────────────────────────────────────────────────────────
//

/// Free-text note attached to a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicNote {
    pub content: String,
    #[serde(alias = "lastUpdated")]
    pub last_modified: DateTime<Utc>,
}

//
// ─── RECORD ────────────────────────────────────────────────────────────────────
//

/// The single persisted progress record for one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    #[serde(default)]
    pub topics: BTreeMap<TopicId, TopicProgress>,
    #[serde(default)]
    pub notes: BTreeMap<TopicId, TopicNote>,
    pub start_date: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Write stamp, bumped on every persisted update.
    #[serde(default)]
    pub version: u64,
}

impl ProgressRecord {
    /// Default skeleton for a profile that has no record yet.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            topics: BTreeMap::new(),
            notes: BTreeMap::new(),
            start_date: now,
            last_updated: now,
            version: 0,
        }
    }

    /// Mark a topic complete (stamped with `now`) or pending.
    pub fn set_topic_completed(
        &mut self,
        topic: TopicId,
        completed: bool,
        now: DateTime<Utc>,
    ) -> &TopicProgress {
        let state = if completed {
            TopicProgress::completed_at(now)
        } else {
            TopicProgress::pending()
        };
        let slot = self.topics.entry(topic).or_insert_with(TopicProgress::pending);
        *slot = state;
        slot
    }

    #[must_use]
    pub fn topic(&self, topic: &TopicId) -> Option<&TopicProgress> {
        self.topics.get(topic)
    }

    #[must_use]
    pub fn is_completed(&self, topic: &TopicId) -> bool {
        self.topics.get(topic).is_some_and(TopicProgress::completed)
    }

    pub fn completed_topics(&self) -> impl Iterator<Item = &TopicId> {
        self.topics
            .iter()
            .filter(|(_, state)| state.completed())
            .map(|(id, _)| id)
    }

    /// Calendar days (UTC) of every completion, one entry per completed topic.
    pub fn completion_days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.topics
            .values()
            .filter(|state| state.completed())
            .filter_map(TopicProgress::completed_date)
            .map(|at| at.date_naive())
    }

    pub fn set_note(&mut self, topic: TopicId, content: impl Into<String>, now: DateTime<Utc>) {
        self.notes.insert(
            topic,
            TopicNote {
                content: content.into(),
                last_modified: now,
            },
        );
    }

    #[must_use]
    pub fn note(&self, topic: &TopicId) -> Option<&TopicNote> {
        self.notes.get(topic)
    }

    /// Shallow merge by topic key: incoming notes replace existing ones, others stay.
    ///
    /// Returns the number of notes written.
    pub fn merge_notes(&mut self, incoming: BTreeMap<TopicId, TopicNote>) -> usize {
        let count = incoming.len();
        self.notes.extend(incoming);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    #[test]
    fn toggle_on_then_off_clears_date() {
        let mut record = ProgressRecord::new(fixed_now());
        let id = TopicId::new("part1-01");

        let state = record.set_topic_completed(id.clone(), true, fixed_now());
        assert!(state.completed());
        assert_eq!(state.completed_date(), Some(fixed_now()));

        let state = record.set_topic_completed(id.clone(), false, fixed_now());
        assert!(!state.completed());
        assert_eq!(state.completed_date(), None);
        assert!(!record.is_completed(&id));
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let mut record = ProgressRecord::new(fixed_now());
        record.set_topic_completed(TopicId::new("part1-01"), true, fixed_now());
        record.set_note(TopicId::new("part1-01"), "ownership", fixed_now());

        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("startDate").is_some());
        assert!(value.get("lastUpdated").is_some());
        assert_eq!(value["topics"]["part1-01"]["completed"], true);
        assert!(value["topics"]["part1-01"]["completedDate"].is_string());
        assert_eq!(value["notes"]["part1-01"]["content"], "ownership");
        assert!(value["notes"]["part1-01"]["lastModified"].is_string());
    }

    #[test]
    fn parses_record_without_version_or_notes() {
        let raw = r#"{
            "topics": { "part1-01": { "completed": false, "completedDate": null } },
            "startDate": "2023-11-14T22:13:20Z",
            "lastUpdated": "2023-11-14T22:13:20Z"
        }"#;
        let record: ProgressRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.version, 0);
        assert!(record.notes.is_empty());
        assert_eq!(record.topics.len(), 1);
    }

    #[test]
    fn note_accepts_last_updated_alias() {
        let raw = r#"{ "content": "x", "lastUpdated": "2023-11-14T22:13:20Z" }"#;
        let note: TopicNote = serde_json::from_str(raw).unwrap();
        assert_eq!(note.last_modified, fixed_now());
    }

    #[test]
    fn merge_notes_overwrites_only_incoming_keys() {
        let mut record = ProgressRecord::new(fixed_now());
        record.set_note(TopicId::new("a-1"), "old a", fixed_now());
        record.set_note(TopicId::new("b-1"), "old b", fixed_now());

        let later = fixed_now() + Duration::hours(1);
        let mut incoming = BTreeMap::new();
        incoming.insert(
            TopicId::new("a-1"),
            TopicNote {
                content: "new a".into(),
                last_modified: later,
            },
        );
        incoming.insert(
            TopicId::new("c-1"),
            TopicNote {
                content: "new c".into(),
                last_modified: later,
            },
        );

        assert_eq!(record.merge_notes(incoming), 2);
        assert_eq!(record.note(&TopicId::new("a-1")).unwrap().content, "new a");
        assert_eq!(record.note(&TopicId::new("b-1")).unwrap().content, "old b");
        assert_eq!(record.note(&TopicId::new("c-1")).unwrap().content, "new c");
    }

    #[test]
    fn completion_days_skip_pending_topics() {
        let mut record = ProgressRecord::new(fixed_now());
        record.set_topic_completed(TopicId::new("a-1"), true, fixed_now());
        record.set_topic_completed(TopicId::new("a-2"), false, fixed_now());
        let days: Vec<_> = record.completion_days().collect();
        assert_eq!(days, vec![fixed_now().date_naive()]);
    }
}
