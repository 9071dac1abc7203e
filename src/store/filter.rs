// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metadata predicates for filtered queries and bulk deletes.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::{Metadata, MetadataValue};

/// A predicate over record metadata.
///
/// Comparisons against a missing key are false, except `Ne` and `NotIn`,
/// which hold when the key is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataFilter {
    Eq(String, MetadataValue),
    Ne(String, MetadataValue),
    Gt(String, MetadataValue),
    Gte(String, MetadataValue),
    Lt(String, MetadataValue),
    Lte(String, MetadataValue),
    In(String, Vec<MetadataValue>),
    NotIn(String, Vec<MetadataValue>),
    Exists(String),
    And(Vec<MetadataFilter>),
    Or(Vec<MetadataFilter>),
}

impl MetadataFilter {
    pub fn eq(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        MetadataFilter::Eq(key.into(), value.into())
    }

    pub fn ne(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        MetadataFilter::Ne(key.into(), value.into())
    }

    pub fn gt(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        MetadataFilter::Gt(key.into(), value.into())
    }

    pub fn gte(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        MetadataFilter::Gte(key.into(), value.into())
    }

    pub fn lt(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        MetadataFilter::Lt(key.into(), value.into())
    }

    pub fn lte(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        MetadataFilter::Lte(key.into(), value.into())
    }

    pub fn is_in<V: Into<MetadataValue>>(key: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        MetadataFilter::In(key.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn not_in<V: Into<MetadataValue>>(
        key: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        MetadataFilter::NotIn(key.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn exists(key: impl Into<String>) -> Self {
        MetadataFilter::Exists(key.into())
    }

    /// Conjunction with another predicate.
    pub fn and(self, other: MetadataFilter) -> Self {
        match self {
            MetadataFilter::And(mut all) => {
                all.push(other);
                MetadataFilter::And(all)
            }
            first => MetadataFilter::And(vec![first, other]),
        }
    }

    /// Disjunction with another predicate.
    pub fn or(self, other: MetadataFilter) -> Self {
        match self {
            MetadataFilter::Or(mut any) => {
                any.push(other);
                MetadataFilter::Or(any)
            }
            first => MetadataFilter::Or(vec![first, other]),
        }
    }

    /// A `key == "value"` test every matching record must pass, if the
    /// predicate has one at its top level. Stores use it to narrow a scan
    /// before evaluating the full predicate.
    pub fn required_str_eq(&self) -> Option<(&str, &str)> {
        match self {
            MetadataFilter::Eq(key, MetadataValue::Str(value)) => Some((key.as_str(), value.as_str())),
            MetadataFilter::And(all) => all.iter().find_map(MetadataFilter::required_str_eq),
            _ => None,
        }
    }

    /// Evaluates the predicate against a record's metadata.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            MetadataFilter::Eq(key, value) => metadata.get(key).is_some_and(|v| v.matches(value)),
            MetadataFilter::Ne(key, value) => !metadata.get(key).is_some_and(|v| v.matches(value)),
            MetadataFilter::Gt(key, value) => compare(metadata, key, value, |o| o == Ordering::Greater),
            MetadataFilter::Gte(key, value) => compare(metadata, key, value, |o| o != Ordering::Less),
            MetadataFilter::Lt(key, value) => compare(metadata, key, value, |o| o == Ordering::Less),
            MetadataFilter::Lte(key, value) => compare(metadata, key, value, |o| o != Ordering::Greater),
            MetadataFilter::In(key, values) => metadata
                .get(key)
                .is_some_and(|v| values.iter().any(|candidate| v.matches(candidate))),
            MetadataFilter::NotIn(key, values) => !metadata
                .get(key)
                .is_some_and(|v| values.iter().any(|candidate| v.matches(candidate))),
            MetadataFilter::Exists(key) => metadata.contains_key(key),
            MetadataFilter::And(all) => all.iter().all(|f| f.matches(metadata)),
            MetadataFilter::Or(any) => any.iter().any(|f| f.matches(metadata)),
        }
    }
}

fn compare<F>(metadata: &Metadata, key: &str, value: &MetadataValue, accept: F) -> bool
where
    F: Fn(Ordering) -> bool,
{
    metadata
        .get(key)
        .and_then(|stored| stored.compare(value))
        .is_some_and(accept)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("source_id".into(), "handbook".into());
        metadata.insert("sequence_index".into(), MetadataValue::Int(3));
        metadata.insert("score".into(), MetadataValue::Float(0.75));
        metadata.insert("draft".into(), MetadataValue::Bool(false));
        metadata
    }

    #[test]
    fn test_equality_filters() {
        let metadata = sample();
        assert!(MetadataFilter::eq("source_id", "handbook").matches(&metadata));
        assert!(!MetadataFilter::eq("source_id", "faq").matches(&metadata));
        assert!(MetadataFilter::eq("sequence_index", 3.0).matches(&metadata));
        assert!(MetadataFilter::eq("draft", false).matches(&metadata));
        assert!(MetadataFilter::ne("source_id", "faq").matches(&metadata));
        assert!(MetadataFilter::ne("missing", "x").matches(&metadata));
        assert!(!MetadataFilter::eq("missing", "x").matches(&metadata));
    }

    #[test]
    fn test_range_filters() {
        let metadata = sample();
        assert!(MetadataFilter::gte("sequence_index", 3_i64).matches(&metadata));
        assert!(MetadataFilter::gt("sequence_index", 2_i64).matches(&metadata));
        assert!(!MetadataFilter::lt("sequence_index", 3_i64).matches(&metadata));
        assert!(MetadataFilter::lte("score", 0.75).matches(&metadata));
        // bools and mismatched kinds never order
        assert!(!MetadataFilter::gt("draft", false).matches(&metadata));
        assert!(!MetadataFilter::gt("source_id", 1_i64).matches(&metadata));
        assert!(!MetadataFilter::gt("missing", 1_i64).matches(&metadata));
    }

    #[test]
    fn test_membership_filters() {
        let metadata = sample();
        assert!(MetadataFilter::is_in("source_id", ["faq", "handbook"]).matches(&metadata));
        assert!(!MetadataFilter::is_in("source_id", ["faq"]).matches(&metadata));
        assert!(MetadataFilter::not_in("source_id", ["faq"]).matches(&metadata));
        assert!(MetadataFilter::not_in("missing", ["faq"]).matches(&metadata));
        assert!(MetadataFilter::exists("draft").matches(&metadata));
        assert!(!MetadataFilter::exists("missing").matches(&metadata));
    }

    #[test]
    fn test_combinators() {
        let metadata = sample();
        let both = MetadataFilter::eq("source_id", "handbook").and(MetadataFilter::gte("sequence_index", 3_i64));
        assert!(both.matches(&metadata));

        let neither = MetadataFilter::eq("source_id", "faq").or(MetadataFilter::eq("draft", true));
        assert!(!neither.matches(&metadata));

        let chained = neither.or(MetadataFilter::exists("score"));
        assert!(matches!(&chained, MetadataFilter::Or(any) if any.len() == 3));
        assert!(chained.matches(&metadata));

        assert!(MetadataFilter::And(vec![]).matches(&metadata));
        assert!(!MetadataFilter::Or(vec![]).matches(&metadata));
    }

    #[test]
    fn test_required_str_eq() {
        let stale = MetadataFilter::gte("sequence_index", 2_i64).and(MetadataFilter::eq("source_id", "doc"));
        assert_eq!(stale.required_str_eq(), Some(("source_id", "doc")));
        assert_eq!(MetadataFilter::eq("source_id", "doc").required_str_eq(), Some(("source_id", "doc")));

        // Only conjunctions narrow; numbers compare across kinds so they never do.
        let either = MetadataFilter::eq("source_id", "a").or(MetadataFilter::eq("source_id", "b"));
        assert_eq!(either.required_str_eq(), None);
        assert_eq!(MetadataFilter::eq("page", 3_i64).required_str_eq(), None);
        assert_eq!(MetadataFilter::ne("source_id", "doc").required_str_eq(), None);
    }
}
