//! Filter AST types: the serializable tree of rules a caller builds against
//! a root entity. The tree arrives as JSON from the client, so every node
//! round-trips through serde with field order preserved.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Root of a filter: the entity being queried plus its rule tree.
///
/// An empty `rules` list means "no filter" and callers treat it the same as
/// supplying no filter at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSet {
    #[serde(rename = "rootTable")]
    pub root_table: String,
    #[serde(default)]
    pub rules: Vec<FilterRule>,
}

impl FilterSet {
    pub fn new(root_table: impl Into<String>, rules: Vec<FilterRule>) -> Self {
        Self {
            root_table: root_table.into(),
            rules,
        }
    }

    /// A filter that matches every row of `root_table`.
    pub fn all(root_table: impl Into<String>) -> Self {
        Self::new(root_table, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// A single node of the rule tree: either a leaf condition on one field or a
/// group combining nested rules with AND/OR.
///
/// Serialized without a tag; the two variants are distinguished by their
/// fields (`combinator`/`rules` vs `field`/`operator`/`value`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterRule {
    Group {
        combinator: Combinator,
        rules: Vec<FilterRule>,
    },
    Condition {
        field: String,
        operator: FilterOperator,
        value: Json,
    },
}

impl FilterRule {
    pub fn condition(
        field: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<Json>,
    ) -> Self {
        Self::Condition {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn group(combinator: Combinator, rules: Vec<FilterRule>) -> Self {
        Self::Group { combinator, rules }
    }
}

/// Logical combinator for a rule group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Combinator {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

/// Comparison operator of a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Ilike,
    In,
    NotIn,
    Is,
    Between,
}

impl FilterOperator {
    /// The wire name, used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Like => "like",
            Self::Ilike => "ilike",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Is => "is",
            Self::Between => "between",
        }
    }
}

/// A dot-delimited field path. Every segment before the last names a
/// relation hop away from the root entity; the last segment is the column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath<'a> {
    segments: Vec<&'a str>,
}

impl<'a> FieldPath<'a> {
    pub fn parse(raw: &'a str) -> Self {
        Self {
            segments: raw.split('.').collect(),
        }
    }

    /// Number of relation hops. `"status"` is 0, `"enrollments.program.code"`
    /// is 2.
    pub fn depth(&self) -> usize {
        self.segments.len() - 1
    }

    /// The relation segments, in traversal order.
    pub fn relations(&self) -> &[&'a str] {
        &self.segments[..self.segments.len() - 1]
    }

    /// The final column segment.
    pub fn column(&self) -> &'a str {
        self.segments[self.segments.len() - 1]
    }

    /// False when the raw path was empty or contained an empty segment
    /// (`""`, `"a..b"`, `"a."`).
    pub fn is_well_formed(&self) -> bool {
        self.segments.iter().all(|segment| !segment.is_empty())
    }
}
