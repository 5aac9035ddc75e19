use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Opaque identifier of a learning topic.
///
/// Ids follow a `<part>-<n>` convention (`part1-01`) that is only used for
/// grouping. Nothing is validated.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicId(String);

impl TopicId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Group part of the id: everything before the last `-`, or the whole id.
    #[must_use]
    pub fn group(&self) -> &str {
        self.0
            .rsplit_once('-')
            .map_or(self.0.as_str(), |(group, _)| group)
    }

    #[must_use]
    pub fn in_group(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Debug for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TopicId({:?})", self.0)
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TopicId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for TopicId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TopicId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for TopicId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_is_text_before_last_dash() {
        assert_eq!(TopicId::new("part1-01").group(), "part1");
        assert_eq!(TopicId::new("rust-basics-3").group(), "rust-basics");
        assert_eq!(TopicId::new("intro").group(), "intro");
    }

    #[test]
    fn in_group_matches_prefix() {
        let id = TopicId::new("part2-07");
        assert!(id.in_group("part2"));
        assert!(!id.in_group("part1"));
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&TopicId::new("part1-01")).unwrap();
        assert_eq!(json, "\"part1-01\"");
    }

    #[test]
    fn display_and_debug() {
        let id: TopicId = "part3-02".parse().unwrap();
        assert_eq!(id.to_string(), "part3-02");
        assert_eq!(format!("{id:?}"), "TopicId(\"part3-02\")");
    }
}
