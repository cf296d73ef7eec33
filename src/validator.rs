//! Structural validation of filter ASTs.
//!
//! Validation is total: it never panics and never stops at the first defect.
//! Every problem found is returned with a pointer-style path into the tree
//! (`rules[2].rules[0]`) so callers can surface all of them at once.
//!
//! Unknown operator names never reach this module; they are rejected when the
//! AST is deserialized, since `FilterOperator` is a closed enum.

use serde_json::Value as Json;

use crate::ast::{FieldPath, FilterOperator, FilterRule, FilterSet};

/// Default bound on relation hops when the caller does not supply one.
pub const DEFAULT_MAX_DEPTH: usize = 3;

/// One defect found in a filter AST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Pointer into the AST, e.g. `rules[2].rules[0]`.
    pub path: String,
    pub message: String,
}

impl ValidationError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ValidationOptions {
    /// Maximum number of relation hops a field path may traverse.
    pub max_depth: usize,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Validate a filter AST. An empty result means the AST is well-formed.
pub fn validate_ast(ast: &FilterSet, options: &ValidationOptions) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if ast.root_table.trim().is_empty() {
        errors.push(ValidationError::new(
            "rootTable",
            "root table name must not be empty",
        ));
    }

    for (index, rule) in ast.rules.iter().enumerate() {
        walk_rule(rule, &format!("rules[{index}]"), options, &mut errors);
    }

    errors
}

fn walk_rule(
    rule: &FilterRule,
    path: &str,
    options: &ValidationOptions,
    errors: &mut Vec<ValidationError>,
) {
    match rule {
        FilterRule::Group { rules, .. } => {
            if rules.is_empty() {
                errors.push(ValidationError::new(path, "rule group must not be empty"));
            }
            for (index, nested) in rules.iter().enumerate() {
                walk_rule(nested, &format!("{path}.rules[{index}]"), options, errors);
            }
        }
        FilterRule::Condition {
            field,
            operator,
            value,
        } => {
            check_field(field, path, options, errors);
            check_value_shape(*operator, value, path, errors);
        }
    }
}

fn check_field(
    field: &str,
    path: &str,
    options: &ValidationOptions,
    errors: &mut Vec<ValidationError>,
) {
    let field_path = FieldPath::parse(field);
    if !field_path.is_well_formed() {
        errors.push(ValidationError::new(
            path,
            format!("field '{field}' is not a valid dot-delimited path"),
        ));
        return;
    }
    let depth = field_path.depth();
    if depth > options.max_depth {
        errors.push(ValidationError::new(
            path,
            format!(
                "field '{field}' traverses {depth} relations, maximum is {}",
                options.max_depth
            ),
        ));
    }
}

fn check_value_shape(
    operator: FilterOperator,
    value: &Json,
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    use FilterOperator::*;

    match operator {
        In | NotIn => match value {
            Json::Array(items) if items.is_empty() => errors.push(ValidationError::new(
                path,
                format!("operator '{}' requires a non-empty list", operator.name()),
            )),
            Json::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    if !is_scalar(item) {
                        errors.push(ValidationError::new(
                            path,
                            format!(
                                "operator '{}' list element {index} must be a scalar",
                                operator.name()
                            ),
                        ));
                    }
                }
            }
            _ => errors.push(ValidationError::new(
                path,
                format!("operator '{}' requires a list value", operator.name()),
            )),
        },
        Between => match value {
            Json::Array(items) if items.len() == 2 && items.iter().all(is_scalar) => {}
            Json::Array(items) => errors.push(ValidationError::new(
                path,
                format!(
                    "operator 'between' requires exactly two scalar bounds, got {}",
                    items.len()
                ),
            )),
            _ => errors.push(ValidationError::new(
                path,
                "operator 'between' requires a two-element list of bounds",
            )),
        },
        Is => {
            if !matches!(value, Json::Null | Json::Bool(_)) {
                errors.push(ValidationError::new(
                    path,
                    "operator 'is' accepts only null, true or false",
                ));
            }
        }
        Like | Ilike => {
            if !value.is_string() {
                errors.push(ValidationError::new(
                    path,
                    format!("operator '{}' requires a string pattern", operator.name()),
                ));
            }
        }
        Eq | Neq | Gt | Gte | Lt | Lte => {
            if !is_scalar(value) {
                errors.push(ValidationError::new(
                    path,
                    format!(
                        "operator '{}' requires a scalar value (use 'is' for null checks)",
                        operator.name()
                    ),
                ));
            }
        }
    }
}

fn is_scalar(value: &Json) -> bool {
    matches!(value, Json::String(_) | Json::Number(_) | Json::Bool(_))
}
