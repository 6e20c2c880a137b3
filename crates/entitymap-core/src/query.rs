//! Backend-level query descriptions.
//!
//! A [`Query`] is what a lazy collection pushes down to its backend while
//! it is still untouched: equality/range/IN conditions over columns, sort
//! order and paging. Backends are free to translate it into their own
//! language; [`Query::apply`] gives the reference in-memory semantics.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::row::Row;
use crate::value::Value;

/// Comparison operator of a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// `column = value`
    #[default]
    Eq,
    /// `column != value`
    NotEq,
    /// `column IN (values)`; the value must be an array.
    In,
    /// `column < value`
    Lt,
    /// `column <= value`
    Lte,
    /// `column > value`
    Gt,
    /// `column >= value`
    Gte,
}

impl Operator {
    /// Symbol used in log output.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::In => "IN",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
        }
    }
}

/// A single column condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Column (or, before translation, property) name.
    pub column: String,
    /// Comparison operator.
    #[serde(default)]
    pub operator: Operator,
    /// Right-hand side.
    pub value: Value,
}

impl Condition {
    /// Create a condition.
    pub fn new(column: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: value.into(),
        }
    }

    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Operator::Eq, value)
    }

    /// `column IN (values)`
    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(column, Operator::In, Value::Array(values))
    }

    /// Evaluate against a row. A missing column reads as NULL.
    pub fn matches(&self, row: &Row) -> bool {
        let actual = row.get(&self.column).unwrap_or(&Value::Null);
        match self.operator {
            Operator::Eq => actual.loosely_equals(&self.value),
            Operator::NotEq => !actual.loosely_equals(&self.value),
            Operator::In => match &self.value {
                Value::Array(options) => options.iter().any(|o| actual.loosely_equals(o)),
                other => actual.loosely_equals(other),
            },
            Operator::Lt => actual.compare(&self.value) == Some(Ordering::Less),
            Operator::Lte => matches!(
                actual.compare(&self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Gt => actual.compare(&self.value) == Some(Ordering::Greater),
            Operator::Gte => matches!(
                actual.compare(&self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

/// Sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Column to sort on.
    pub column: String,
    /// Descending instead of ascending.
    #[serde(default)]
    pub descending: bool,
}

/// Conditions, ordering and paging for `Backend::all`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Query {
    /// All conditions must hold.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Sort keys, most significant first.
    #[serde(default)]
    pub order: Vec<Order>,
    /// Rows to skip.
    #[serde(default)]
    pub offset: usize,
    /// Maximum number of rows.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Query {
    /// Empty query: every row, backend order.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition.
    #[must_use]
    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Add a sort key.
    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order.push(Order {
            column: column.into(),
            descending,
        });
        self
    }

    /// True when the query selects every row in backend order.
    pub fn is_unfiltered(&self) -> bool {
        self.conditions.is_empty() && self.order.is_empty() && self.offset == 0 && self.limit.is_none()
    }

    /// True if `row` satisfies every condition.
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }

    /// Filter, sort and page `rows` in memory.
    pub fn apply(&self, rows: Vec<Row>) -> Vec<Row> {
        let mut selected: Vec<Row> = rows.into_iter().filter(|r| self.matches(r)).collect();
        if !self.order.is_empty() {
            selected.sort_by(|a, b| self.compare_rows(a, b));
        }
        let limit = self.limit.unwrap_or(usize::MAX);
        selected.into_iter().skip(self.offset).take(limit).collect()
    }

    /// Compare two rows by the sort keys; NULL sorts first.
    pub fn compare_rows(&self, a: &Row, b: &Row) -> Ordering {
        for key in &self.order {
            let left = a.get(&key.column).unwrap_or(&Value::Null);
            let right = b.get(&key.column).unwrap_or(&Value::Null);
            let ord = left.compare(right).unwrap_or(Ordering::Equal);
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}
