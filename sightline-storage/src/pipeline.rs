//! Sightline Storage - Aggregation pipelines
//!
//! A small, backend-neutral pipeline language: match, group with
//! accumulators, sort, limit, project. [`execute`] evaluates a pipeline
//! over an in-memory document set; remote backends translate the same
//! stages to their native aggregation syntax instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sightline_core::filter::compare_values;
use sightline_core::{lookup_path, set_path, Document, Filter};

use crate::store::{SortOrder, SortSpec};

/// Field carrying the group key in stage output, by document-store
/// convention.
pub const GROUP_KEY: &str = "_id";

/// Accumulation function applied per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulateOp {
    Sum,
    Avg,
    Min,
    Max,
    /// Documents in the group; the accumulator's field is ignored.
    Count,
}

/// One output field of a group stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accumulator {
    pub output: String,
    pub op: AccumulateOp,
    pub field: String,
}

impl Accumulator {
    pub fn sum(output: impl Into<String>, field: impl Into<String>) -> Self {
        Accumulator {
            output: output.into(),
            op: AccumulateOp::Sum,
            field: field.into(),
        }
    }

    pub fn avg(output: impl Into<String>, field: impl Into<String>) -> Self {
        Accumulator {
            output: output.into(),
            op: AccumulateOp::Avg,
            field: field.into(),
        }
    }

    pub fn min(output: impl Into<String>, field: impl Into<String>) -> Self {
        Accumulator {
            output: output.into(),
            op: AccumulateOp::Min,
            field: field.into(),
        }
    }

    pub fn max(output: impl Into<String>, field: impl Into<String>) -> Self {
        Accumulator {
            output: output.into(),
            op: AccumulateOp::Max,
            field: field.into(),
        }
    }

    pub fn count(output: impl Into<String>) -> Self {
        Accumulator {
            output: output.into(),
            op: AccumulateOp::Count,
            field: String::new(),
        }
    }
}

/// One pipeline stage, applied to the previous stage's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Match(Filter),
    Group {
        by: String,
        accumulators: Vec<Accumulator>,
    },
    Sort(SortSpec),
    Limit(usize),
    /// Keep exactly the listed dotted paths. `_id` is not implicit.
    Project(Vec<String>),
}

/// An ordered list of stages.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregatePipeline {
    stages: Vec<Stage>,
}

impl AggregatePipeline {
    pub fn new() -> Self {
        AggregatePipeline::default()
    }

    pub fn matching(mut self, filter: Filter) -> Self {
        self.stages.push(Stage::Match(filter));
        self
    }

    pub fn group(mut self, by: impl Into<String>, accumulators: Vec<Accumulator>) -> Self {
        self.stages.push(Stage::Group {
            by: by.into(),
            accumulators,
        });
        self
    }

    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.stages.push(Stage::Sort(SortSpec::new(field, order)));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.stages.push(Stage::Limit(limit));
        self
    }

    pub fn project(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.stages
            .push(Stage::Project(fields.into_iter().map(Into::into).collect()));
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The filter of a leading match stage, if the pipeline starts with
    /// one. Staleness checking keys off this.
    pub fn leading_match(&self) -> Option<&Filter> {
        match self.stages.first() {
            Some(Stage::Match(filter)) => Some(filter),
            _ => None,
        }
    }
}

/// Evaluate a pipeline over an in-memory snapshot.
pub fn execute(docs: Vec<Document>, pipeline: &AggregatePipeline) -> Vec<Document> {
    let mut current = docs;
    for stage in pipeline.stages() {
        current = match stage {
            Stage::Match(filter) => current.into_iter().filter(|d| filter.matches(d)).collect(),
            Stage::Group { by, accumulators } => run_group(&current, by, accumulators),
            Stage::Sort(spec) => {
                let mut sorted = current;
                sort_documents(&mut sorted, spec);
                sorted
            }
            Stage::Limit(n) => {
                let mut limited = current;
                limited.truncate(*n);
                limited
            }
            Stage::Project(fields) => current.into_iter().map(|d| project(&d, fields)).collect(),
        };
    }
    current
}

/// Stable single-field sort. Documents missing the field sort first
/// ascending and last descending.
pub fn sort_documents(docs: &mut [Document], spec: &SortSpec) {
    docs.sort_by(|a, b| {
        let ord = match (lookup_path(a, &spec.field), lookup_path(b, &spec.field)) {
            (None, None) => std::cmp::Ordering::Equal,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(x), Some(y)) => compare_values(x, y).unwrap_or(std::cmp::Ordering::Equal),
        };
        match spec.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });
}

#[derive(Debug, Clone, Default)]
struct AccState {
    sum: f64,
    numeric_count: u64,
    doc_count: u64,
    min: Option<Value>,
    max: Option<Value>,
}

impl AccState {
    fn observe(&mut self, value: Option<&Value>) {
        self.doc_count += 1;
        let Some(value) = value else { return };
        if let Some(n) = value.as_f64() {
            self.sum += n;
            self.numeric_count += 1;
        }
        match &self.min {
            None => self.min = Some(value.clone()),
            Some(current) => {
                if compare_values(value, current) == Some(std::cmp::Ordering::Less) {
                    self.min = Some(value.clone());
                }
            }
        }
        match &self.max {
            None => self.max = Some(value.clone()),
            Some(current) => {
                if compare_values(value, current) == Some(std::cmp::Ordering::Greater) {
                    self.max = Some(value.clone());
                }
            }
        }
    }

    fn finalize(&self, op: AccumulateOp) -> Value {
        match op {
            AccumulateOp::Sum => Value::from(self.sum),
            AccumulateOp::Avg => {
                if self.numeric_count == 0 {
                    Value::Null
                } else {
                    Value::from(self.sum / self.numeric_count as f64)
                }
            }
            AccumulateOp::Min => self.min.clone().unwrap_or(Value::Null),
            AccumulateOp::Max => self.max.clone().unwrap_or(Value::Null),
            AccumulateOp::Count => Value::from(self.doc_count),
        }
    }
}

fn run_group(docs: &[Document], by: &str, accumulators: &[Accumulator]) -> Vec<Document> {
    // Keyed by the canonical JSON encoding of the group value so output
    // order is deterministic.
    let mut groups: BTreeMap<String, (Value, Vec<AccState>)> = BTreeMap::new();
    for doc in docs {
        let key_value = lookup_path(doc, by).cloned().unwrap_or(Value::Null);
        let canonical = serde_json::to_string(&key_value).unwrap_or_default();
        let (_, states) = groups
            .entry(canonical)
            .or_insert_with(|| (key_value, vec![AccState::default(); accumulators.len()]));
        for (acc, state) in accumulators.iter().zip(states.iter_mut()) {
            state.observe(lookup_path(doc, &acc.field));
        }
    }
    groups
        .into_values()
        .map(|(key_value, states)| {
            let mut out = Document::new();
            out.insert(GROUP_KEY.to_string(), key_value);
            for (acc, state) in accumulators.iter().zip(states.iter()) {
                out.insert(acc.output.clone(), state.finalize(acc.op));
            }
            out
        })
        .collect()
}

fn project(doc: &Document, fields: &[String]) -> Document {
    let mut out = Document::new();
    for field in fields {
        if let Some(value) = lookup_path(doc, field) {
            set_path(&mut out, field, value.clone());
        }
    }
    out
}
