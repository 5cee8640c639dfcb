//! Tag-based selection of manifest entries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Set of tags requested for a run. An entry participates when any of its
/// tags is in the set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    tags: BTreeSet<String>,
}

impl TagFilter {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags
                .into_iter()
                .map(Into::into)
                .map(|t: String| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// Parse a comma separated list, e.g. `k8s,general`.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    /// Whether an entry declaring `tags` is selected by this filter.
    pub fn matches<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        tags.iter().any(|t| self.tags.contains(t.as_ref()))
    }
}

impl std::fmt::Display for TagFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined: Vec<&str> = self.tags().collect();
        write!(f, "{}", joined.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersecting_tags_are_selected() {
        let tags = ["k8s", "general"];
        assert!(TagFilter::parse("k8s").matches(&tags));
        assert!(!TagFilter::parse("operators").matches(&tags));
    }

    #[test]
    fn test_multiple_filter_tags() {
        let filter = TagFilter::parse("operators, general");
        assert!(filter.matches(&["general"]));
        assert!(filter.matches(&["operators", "k8s"]));
        assert!(!filter.matches(&["k8s"]));
    }

    #[test]
    fn test_no_substring_matching() {
        // "k8s-extra" is a distinct tag, not a superset of "k8s"
        assert!(!TagFilter::parse("k8s").matches(&["k8s-extra"]));
    }

    #[test]
    fn test_empty_filter_selects_nothing() {
        let filter = TagFilter::parse(" , ");
        assert!(filter.is_empty());
        assert!(!filter.matches(&["k8s"]));
        assert!(!filter.matches::<&str>(&[]));
    }
}
