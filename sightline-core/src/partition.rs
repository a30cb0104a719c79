//! Sightline Core - Partitions
//!
//! A partition identifies an independent slice of a view: the subset of a
//! query filter that pins the configured partition key fields. Staleness
//! is tracked and refresh serialized per partition, so two filters that
//! pin the same fields to the same values must map to the same
//! [`PartitionKey`] regardless of clause order.

use std::collections::BTreeSet;
use std::fmt;

use crate::{Comparator, Condition, DateRange, Filter};

/// Canonical identity of a partition.
///
/// Built from the pinned field/value pairs sorted by field name, with
/// values in their JSON encoding. Filters pinning the same pairs in any
/// order produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey(String);

impl PartitionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A partition: its canonical key plus the refresh filter that selects
/// the partition's documents in storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    key: PartitionKey,
    filter: Filter,
}

impl Partition {
    fn from_conditions(mut conditions: Vec<Condition>) -> Self {
        conditions.sort_by(|a, b| a.field.cmp(&b.field));
        let key = if conditions.is_empty() {
            "(unpartitioned)".to_string()
        } else {
            conditions
                .iter()
                .map(|c| {
                    let value = serde_json::to_string(&c.value).unwrap_or_default();
                    format!("{}={}", c.field, value)
                })
                .collect::<Vec<_>>()
                .join("|")
        };
        let filter = Filter {
            clauses: conditions.into_iter().map(crate::Clause::Where).collect(),
        };
        Partition {
            key: PartitionKey(key),
            filter,
        }
    }

    /// Extract the partition a query filter addresses.
    ///
    /// Only top-level equality conditions on the configured fields
    /// participate. Conditions buried inside combinators and non-equality
    /// comparators are skipped; the extraction reports what was skipped
    /// so the caller can log it. A filter pinning none of the fields maps
    /// to the single unpartitioned slice covering the whole view.
    pub fn from_query_filter(filter: &Filter, fields: &BTreeSet<String>) -> PartitionExtraction {
        let mut pinned: Vec<Condition> = Vec::new();
        for cond in filter.conditions() {
            if cond.op == Comparator::Eq
                && fields.contains(&cond.field)
                && !pinned.iter().any(|p| p.field == cond.field)
            {
                pinned.push(cond.clone());
            }
        }
        let missing_fields: Vec<String> = fields
            .iter()
            .filter(|f| !pinned.iter().any(|p| &&p.field == f))
            .cloned()
            .collect();
        PartitionExtraction {
            partition: Partition::from_conditions(pinned),
            skipped_combinators: filter.has_combinators(),
            missing_fields,
        }
    }

    /// The partition for an explicit time window.
    pub fn from_range(range: &DateRange, start_field: &str, end_field: &str) -> Self {
        let filter = range.to_partition_filter(start_field, end_field);
        Partition::from_conditions(filter.conditions().cloned().collect())
    }

    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    /// The refresh filter: equality conditions on the pinned fields.
    pub fn filter(&self) -> &Filter {
        &self.filter
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key.as_str())
    }
}

/// Result of partition extraction, with diagnostics for the caller.
#[derive(Debug, Clone)]
pub struct PartitionExtraction {
    pub partition: Partition,
    /// The source filter had top-level `AnyOf`/`NoneOf` combinators,
    /// which never contribute pinned fields.
    pub skipped_combinators: bool,
    /// Configured partition fields the filter did not pin.
    pub missing_fields: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn range_fields() -> BTreeSet<String> {
        ["range_start", "range_end"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn clause_order_does_not_change_the_key() {
        let fields = range_fields();
        let a = Filter::eq("range_start", "2026-01-01T00:00:00.000Z")
            .and_eq("range_end", "2026-01-08T00:00:00.000Z");
        let b = Filter::eq("range_end", "2026-01-08T00:00:00.000Z")
            .and_eq("range_start", "2026-01-01T00:00:00.000Z");
        let ka = Partition::from_query_filter(&a, &fields).partition;
        let kb = Partition::from_query_filter(&b, &fields).partition;
        assert_eq!(ka.key(), kb.key());
        assert_eq!(ka.filter(), kb.filter());
    }

    #[test]
    fn non_partition_conditions_are_ignored() {
        let fields = range_fields();
        let filter = Filter::eq("range_start", "2026-01-01T00:00:00.000Z")
            .and_eq("range_end", "2026-01-08T00:00:00.000Z")
            .and_eq("page_id", "p1");
        let extraction = Partition::from_query_filter(&filter, &fields);
        assert!(extraction.missing_fields.is_empty());
        assert!(!extraction.skipped_combinators);
        let pinned: Vec<&str> = extraction
            .partition
            .filter()
            .conditions()
            .map(|c| c.field.as_str())
            .collect();
        assert_eq!(pinned, vec!["range_end", "range_start"]);
    }

    #[test]
    fn unpinned_fields_are_reported() {
        let fields = range_fields();
        let filter = Filter::eq("range_start", "2026-01-01T00:00:00.000Z");
        let extraction = Partition::from_query_filter(&filter, &fields);
        assert_eq!(extraction.missing_fields, vec!["range_end".to_string()]);
    }

    #[test]
    fn non_equality_conditions_do_not_pin() {
        let fields = range_fields();
        let filter = Filter::cmp("range_start", Comparator::Gte, "2026-01-01T00:00:00.000Z");
        let extraction = Partition::from_query_filter(&filter, &fields);
        assert_eq!(extraction.missing_fields.len(), 2);
        assert_eq!(extraction.partition.key().as_str(), "(unpartitioned)");
    }

    #[test]
    fn combinators_are_flagged_not_descended() {
        let fields = range_fields();
        let filter = Filter::any_of(vec![
            Filter::eq("range_start", "2026-01-01T00:00:00.000Z"),
            Filter::eq("range_start", "2026-02-01T00:00:00.000Z"),
        ]);
        let extraction = Partition::from_query_filter(&filter, &fields);
        assert!(extraction.skipped_combinators);
        assert_eq!(extraction.partition.key().as_str(), "(unpartitioned)");
    }

    #[test]
    fn empty_filter_maps_to_the_unpartitioned_slice() {
        let extraction = Partition::from_query_filter(&Filter::empty(), &range_fields());
        assert_eq!(extraction.partition.key().as_str(), "(unpartitioned)");
        assert!(extraction.partition.filter().is_empty());
    }

    #[test]
    fn range_partition_matches_documents_it_governs() {
        let day = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let partition = Partition::from_range(&DateRange::for_day(day), "range_start", "range_end");

        let mut doc = crate::Document::new();
        doc.insert("range_start".into(), json!("2026-01-05T00:00:00.000Z"));
        doc.insert("range_end".into(), json!("2026-01-06T00:00:00.000Z"));
        doc.insert("page_id".into(), json!("p9"));
        assert!(partition.filter().matches(&doc));

        let from_filter = Partition::from_query_filter(partition.filter(), &range_fields());
        assert_eq!(from_filter.partition.key(), partition.key());
    }

    #[test]
    fn duplicate_pins_keep_the_first() {
        let fields = range_fields();
        let filter = Filter::eq("range_start", "2026-01-01T00:00:00.000Z")
            .and_eq("range_start", "2026-02-01T00:00:00.000Z")
            .and_eq("range_end", "2026-01-08T00:00:00.000Z");
        let extraction = Partition::from_query_filter(&filter, &fields);
        let start = extraction
            .partition
            .filter()
            .conditions()
            .find(|c| c.field == "range_start")
            .cloned()
            .unwrap();
        assert_eq!(start.value, json!("2026-01-01T00:00:00.000Z"));
    }
}
