//! Sightline Core - Filter expressions
//!
//! Filters select documents by field conditions. A [`Filter`] is a
//! conjunction of clauses; branching lives in explicit [`Clause::AnyOf`]
//! and [`Clause::NoneOf`] combinators so that callers (and the partition
//! extractor) can inspect top-level structure without walking a free-form
//! expression tree.
//!
//! Field paths are dotted: `"metrics.views"` descends into nested
//! objects. Comparisons over encoded timestamps work because the wire
//! format (see [`crate::timestamp_value`]) sorts lexicographically in
//! chronological order.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{lookup_path, Document};

/// Comparison operator for a single field condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Field value is equal to one of the elements of the given array.
    In,
}

/// A single field condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: Comparator,
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: Comparator, value: impl Into<Value>) -> Self {
        Condition {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Evaluate this condition against a document.
    ///
    /// Missing fields fail every comparison except `Ne`, which follows
    /// document-store convention and treats an absent field as "not equal".
    pub fn matches(&self, doc: &Document) -> bool {
        let actual = lookup_path(doc, &self.field);
        match self.op {
            Comparator::Eq => actual.is_some_and(|v| values_equal(v, &self.value)),
            Comparator::Ne => !actual.is_some_and(|v| values_equal(v, &self.value)),
            Comparator::Gt => self.ordered(actual, |ord| ord == Ordering::Greater),
            Comparator::Gte => self.ordered(actual, |ord| ord != Ordering::Less),
            Comparator::Lt => self.ordered(actual, |ord| ord == Ordering::Less),
            Comparator::Lte => self.ordered(actual, |ord| ord != Ordering::Greater),
            Comparator::In => self.value.as_array().is_some_and(|candidates| {
                actual.is_some_and(|v| candidates.iter().any(|c| values_equal(v, c)))
            }),
        }
    }

    fn ordered(&self, actual: Option<&Value>, accept: impl Fn(Ordering) -> bool) -> bool {
        actual
            .and_then(|v| compare_values(v, &self.value))
            .is_some_and(accept)
    }
}

/// One clause of a filter conjunction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clause {
    /// A plain field condition.
    Where(Condition),
    /// At least one branch matches. An empty branch list matches nothing.
    AnyOf(Vec<Filter>),
    /// No branch matches. An empty branch list matches everything.
    NoneOf(Vec<Filter>),
}

impl Clause {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Clause::Where(cond) => cond.matches(doc),
            Clause::AnyOf(branches) => branches.iter().any(|f| f.matches(doc)),
            Clause::NoneOf(branches) => !branches.iter().any(|f| f.matches(doc)),
        }
    }
}

/// A conjunction of clauses. The empty filter matches every document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Filter {
    pub clauses: Vec<Clause>,
}

impl Filter {
    /// The filter that matches everything.
    pub fn empty() -> Self {
        Filter::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Single-condition filter with an arbitrary comparator.
    pub fn cmp(field: impl Into<String>, op: Comparator, value: impl Into<Value>) -> Self {
        Filter {
            clauses: vec![Clause::Where(Condition::new(field, op, value))],
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::cmp(field, Comparator::Eq, value)
    }

    /// Filter matching documents where at least one branch matches.
    pub fn any_of(branches: Vec<Filter>) -> Self {
        Filter {
            clauses: vec![Clause::AnyOf(branches)],
        }
    }

    /// Filter matching documents where no branch matches.
    pub fn none_of(branches: Vec<Filter>) -> Self {
        Filter {
            clauses: vec![Clause::NoneOf(branches)],
        }
    }

    /// Append a condition to the conjunction.
    pub fn and_cmp(
        mut self,
        field: impl Into<String>,
        op: Comparator,
        value: impl Into<Value>,
    ) -> Self {
        self.clauses.push(Clause::Where(Condition::new(field, op, value)));
        self
    }

    pub fn and_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and_cmp(field, Comparator::Eq, value)
    }

    /// Merge another filter's clauses into this conjunction.
    pub fn and(mut self, other: Filter) -> Self {
        self.clauses.extend(other.clauses);
        self
    }

    /// Evaluate the filter against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses.iter().all(|c| c.matches(doc))
    }

    /// Top-level plain conditions, skipping combinator clauses.
    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.clauses.iter().filter_map(|c| match c {
            Clause::Where(cond) => Some(cond),
            _ => None,
        })
    }

    /// Whether the top level contains `AnyOf`/`NoneOf` combinators.
    pub fn has_combinators(&self) -> bool {
        self.clauses
            .iter()
            .any(|c| matches!(c, Clause::AnyOf(_) | Clause::NoneOf(_)))
    }
}

/// Numeric equality for numbers, structural equality otherwise.
///
/// `1` and `1.0` are distinct `serde_json` numbers but the same value to
/// a filter.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Partial order over JSON values: numbers numerically, strings and bools
/// by their natural order. Mixed or unordered types compare as `None`,
/// which fails any range condition.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
