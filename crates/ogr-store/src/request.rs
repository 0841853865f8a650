use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use ogr_types::{EntityName, Node, TypeError, Value};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Opaque row filter.
///
/// The store never inspects a predicate; it only calls it.
#[derive(Clone)]
pub struct Predicate(Arc<dyn Fn(&Node) -> bool + Send + Sync>);

impl Predicate {
    pub fn new(f: impl Fn(&Node) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Matches every node.
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    /// Matches nodes whose `attribute` equals `value`.
    pub fn eq(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        let attribute = attribute.into();
        let value = value.into();
        Self::new(move |node| node.value(&attribute) == &value)
    }

    pub fn matches(&self, node: &Node) -> bool {
        (self.0)(node)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate(..)")
    }
}

/// One sort key of a fetch request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDescriptor {
    pub attribute: String,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn ascending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            ascending: true,
        }
    }

    pub fn descending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            ascending: false,
        }
    }
}

/// Query descriptor: which nodes of one entity, in which order, how many.
#[derive(Clone, Debug)]
pub struct FetchRequest {
    entity: EntityName,
    predicate: Predicate,
    sort: Vec<SortDescriptor>,
    limit: Option<usize>,
}

impl FetchRequest {
    /// All nodes of `entity`, in reference order.
    pub fn new(entity: EntityName) -> Self {
        Self {
            entity,
            predicate: Predicate::all(),
            sort: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn sorted_by(mut self, descriptor: SortDescriptor) -> Self {
        self.sort.push(descriptor);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn without_limit(mut self) -> Self {
        self.limit = None;
        self
    }

    pub fn entity(&self) -> &EntityName {
        &self.entity
    }

    pub fn sort(&self) -> &[SortDescriptor] {
        &self.sort
    }

    pub fn max_results(&self) -> Option<usize> {
        self.limit
    }

    /// Whether `node` belongs in the result, ignoring sort and limit.
    pub fn matches(&self, node: &Node) -> bool {
        node.entity() == &self.entity && !node.is_deleted() && self.predicate.matches(node)
    }

    /// Filter, sort and limit a candidate set.
    ///
    /// Ties on every sort key fall back to reference order so results are
    /// deterministic.
    pub fn finish(&self, mut nodes: Vec<Node>) -> Vec<Node> {
        nodes.retain(|node| self.matches(node));
        nodes.sort_by(|a, b| self.compare(a, b));
        if let Some(limit) = self.limit {
            nodes.truncate(limit);
        }
        nodes
    }

    fn compare(&self, a: &Node, b: &Node) -> Ordering {
        for key in &self.sort {
            let ord = a.value(&key.attribute).compare(b.value(&key.attribute));
            let ord = if key.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.reference().cmp(b.reference())
    }
}

/// Aggregate functions over one attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    Count,
    Sum,
    Average,
    Min,
    Max,
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count => write!(f, "count"),
            Self::Sum => write!(f, "sum"),
            Self::Average => write!(f, "average"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
        }
    }
}

/// Aggregate descriptor: a function applied to one attribute of the nodes a
/// fetch request selects, optionally per value of a grouping attribute.
#[derive(Clone, Debug)]
pub struct AggregateRequest {
    function: AggregateFunction,
    attribute: String,
    fetch: FetchRequest,
    group_by: Option<String>,
}

impl AggregateRequest {
    pub fn new(function: AggregateFunction, fetch: FetchRequest, attribute: impl Into<String>) -> Self {
        Self {
            function,
            attribute: attribute.into(),
            fetch,
            group_by: None,
        }
    }

    /// Aggregate separately for each value of `attribute`.
    pub fn grouped_by(mut self, attribute: impl Into<String>) -> Self {
        self.group_by = Some(attribute.into());
        self
    }

    pub fn group_by(&self) -> Option<&str> {
        self.group_by.as_deref()
    }

    pub fn function(&self) -> AggregateFunction {
        self.function
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn fetch(&self) -> &FetchRequest {
        &self.fetch
    }

    pub fn entity(&self) -> &EntityName {
        self.fetch.entity()
    }

    /// Evaluate over already-selected nodes.
    ///
    /// Null attributes are skipped. Over an empty set `Count` and `Sum`
    /// yield `Int(0)`; `Average`, `Min` and `Max` yield `Null`. `Sum` stays
    /// integral until a float appears or the integer sum overflows. A
    /// grouped request yields the value of its first group.
    pub fn evaluate(&self, nodes: &[Node]) -> StoreResult<Value> {
        if self.group_by.is_some() {
            if let Some((_, value)) = self.evaluate_groups(nodes)?.into_iter().next() {
                return Ok(value);
            }
        }
        self.evaluate_all(nodes.iter())
    }

    /// Evaluate once per group, groups ordered by their key. Nodes without
    /// the grouping attribute form the `Null` group. An ungrouped request
    /// yields a single `Null`-keyed group.
    pub fn evaluate_groups(&self, nodes: &[Node]) -> StoreResult<Vec<(Value, Value)>> {
        let Some(group_by) = &self.group_by else {
            return Ok(vec![(Value::Null, self.evaluate_all(nodes.iter())?)]);
        };
        let mut keyed: Vec<&Node> = nodes.iter().collect();
        keyed.sort_by(|a, b| a.value(group_by).compare(b.value(group_by)));

        let mut groups = Vec::new();
        for chunk in keyed.chunk_by(|a, b| a.value(group_by).compare(b.value(group_by)).is_eq()) {
            let key = chunk[0].value(group_by).clone();
            groups.push((key, self.evaluate_all(chunk.iter().copied())?));
        }
        Ok(groups)
    }

    fn evaluate_all<'a>(&self, nodes: impl Iterator<Item = &'a Node>) -> StoreResult<Value> {
        let values: Vec<&Value> = nodes
            .map(|node| node.value(&self.attribute))
            .filter(|value| !value.is_null())
            .collect();

        let result = match self.function {
            AggregateFunction::Count => Value::Int(values.len() as i64),
            AggregateFunction::Sum => self.sum(&values)?,
            AggregateFunction::Average => {
                if values.is_empty() {
                    Value::Null
                } else {
                    let total = self.numeric(&values)?.iter().sum::<f64>();
                    Value::Float(total / values.len() as f64)
                }
            }
            AggregateFunction::Min => values
                .into_iter()
                .min_by(|a, b| a.compare(b))
                .cloned()
                .unwrap_or(Value::Null),
            AggregateFunction::Max => values
                .into_iter()
                .max_by(|a, b| a.compare(b))
                .cloned()
                .unwrap_or(Value::Null),
        };
        Ok(result)
    }

    fn sum(&self, values: &[&Value]) -> StoreResult<Value> {
        let floats = self.numeric(values)?;
        let mut int_sum: Option<i64> = Some(0);
        for value in values {
            int_sum = match (int_sum, value) {
                (Some(acc), Value::Int(i)) => acc.checked_add(*i),
                _ => None,
            };
        }
        Ok(match int_sum {
            Some(total) => Value::Int(total),
            None => Value::Float(floats.iter().sum()),
        })
    }

    fn numeric(&self, values: &[&Value]) -> StoreResult<Vec<f64>> {
        values
            .iter()
            .map(|value| {
                value.as_f64().ok_or_else(|| {
                    TypeError::Mismatch {
                        attribute: self.attribute.clone(),
                        expected: "number".into(),
                        found: value.type_name().into(),
                    }
                    .into()
                })
            })
            .collect()
    }
}
