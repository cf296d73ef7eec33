//! Query compiler that translates a validated filter AST into sea-query
//! SELECT statements.
//!
//! The compiler assumes the AST already passed [`crate::validator`]; value
//! shapes the validator would have rejected surface here as internal errors.
//! Compilation performs no I/O: the result is an unexecuted statement pair.

use std::collections::HashMap;

use sea_query::{
    Asterisk, BinOper, Cond, Condition, Expr, Func, Iden, JoinType, QueryBuilder,
    SelectStatement, SimpleExpr, Value,
};
use serde_json::Value as Json;
use thiserror::Error;

use crate::ast::{Combinator, FieldPath, FilterOperator, FilterRule, FilterSet};
use crate::config::SchemaConfig;

/// Identifier wrapper for sea-query.
#[derive(Debug, Clone)]
struct Ident(String);

impl Ident {
    fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl Iden for Ident {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "{}", self.0).unwrap();
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// The root table is not in the schema (configuration error).
    #[error("unknown root table '{0}'")]
    UnknownTable(String),
    /// A relation path cannot be expressed as a join chain. Failing here is
    /// deliberate: silently dropping the condition would widen the result set.
    #[error("unsupported relation path '{path}': {reason}")]
    UnsupportedPath { path: String, reason: String },
    /// A value shape that validation should have caught.
    #[error("internal compiler error: {0}")]
    Internal(String),
}

/// Compilation options, mirroring the caller-facing fetch knobs.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Overrides the AST's root table when non-empty.
    pub root_table: String,
    /// Explicit select list; `None` or empty selects `*`.
    pub select_fields: Option<Vec<String>>,
    /// Also build an exact-count statement over the same joins and filters.
    pub include_count: bool,
    /// Depth bound forwarded to validation by the fetch layer; the compiler
    /// itself does not re-check depth.
    pub max_depth: Option<usize>,
}

/// An unexecuted, renderable statement pair.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub select: SelectStatement,
    pub count: Option<SelectStatement>,
}

impl CompiledQuery {
    pub fn row_sql<B: QueryBuilder>(&self, builder: B) -> String {
        self.select.to_string(builder)
    }

    pub fn count_sql<B: QueryBuilder>(&self, builder: B) -> Option<String> {
        self.count.as_ref().map(|stmt| stmt.to_string(builder))
    }
}

/// One inner join produced by a relation hop.
#[derive(Debug, Clone)]
struct JoinEdge {
    table: String,
    alias: String,
    source_alias: String,
    local_key: String,
    foreign_key: String,
}

/// Joins collected while walking the rule tree, deduplicated per relation
/// path so two conditions on the same relation share one join.
#[derive(Debug, Default)]
struct JoinPlan {
    joins: Vec<JoinEdge>,
    seen: HashMap<String, usize>,
}

impl JoinPlan {
    fn ensure_join<F: FnOnce() -> JoinEdge>(&mut self, path: &str, make: F) -> String {
        if let Some(&index) = self.seen.get(path) {
            return self.joins[index].alias.clone();
        }
        let edge = make();
        let alias = edge.alias.clone();
        self.seen.insert(path.to_string(), self.joins.len());
        self.joins.push(edge);
        alias
    }
}

pub struct QueryCompiler {
    schema: SchemaConfig,
}

impl QueryCompiler {
    pub fn new(schema: SchemaConfig) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &SchemaConfig {
        &self.schema
    }

    /// Compile a validated AST into an unexecuted statement pair.
    pub fn compile(
        &self,
        ast: &FilterSet,
        options: &QueryOptions,
    ) -> Result<CompiledQuery, CompileError> {
        let root_name = if options.root_table.is_empty() {
            ast.root_table.as_str()
        } else {
            options.root_table.as_str()
        };
        let root = self
            .schema
            .entity(root_name)
            .ok_or_else(|| CompileError::UnknownTable(root_name.to_string()))?;
        let root_alias = root.table.clone();

        let mut plan = JoinPlan::default();
        let condition = if ast.rules.is_empty() {
            None
        } else {
            Some(self.compile_rules(Combinator::And, &ast.rules, root_name, &root_alias, &mut plan)?)
        };

        let mut select = SelectStatement::new();
        select.from(Ident::new(&root_alias));
        match &options.select_fields {
            Some(fields) if !fields.is_empty() => {
                for field in fields {
                    select.column((Ident::new(&root_alias), Ident::new(field)));
                }
            }
            _ => {
                select.column((Ident::new(&root_alias), Asterisk));
            }
        }
        // A to-many join yields one row per matching child; DISTINCT keeps
        // one row per root entity.
        if !plan.joins.is_empty() {
            select.distinct();
        }
        apply_joins(&mut select, &plan);
        if let Some(cond) = &condition {
            select.cond_where(cond.clone());
        }

        let count = if options.include_count {
            // Count distinct matching root rows, not join rows.
            let mut matching = SelectStatement::new();
            matching.distinct();
            matching.column((Ident::new(&root_alias), Ident::new(&root.primary_key)));
            matching.from(Ident::new(&root_alias));
            apply_joins(&mut matching, &plan);
            if let Some(cond) = condition {
                matching.cond_where(cond);
            }
            let mut stmt = SelectStatement::new();
            stmt.expr(Expr::col(Asterisk).count());
            stmt.from_subquery(matching, Ident::new("matching_rows"));
            Some(stmt)
        } else {
            None
        };

        tracing::debug!(root = root_name, joins = plan.joins.len(), "compiled filter query");
        Ok(CompiledQuery { select, count })
    }

    /// Build the condition tree for a rule list. AND/OR nesting is preserved
    /// exactly as supplied; nothing is flattened or reassociated.
    fn compile_rules(
        &self,
        combinator: Combinator,
        rules: &[FilterRule],
        root: &str,
        root_alias: &str,
        plan: &mut JoinPlan,
    ) -> Result<Condition, CompileError> {
        let mut condition = match combinator {
            Combinator::And => Cond::all(),
            Combinator::Or => Cond::any(),
        };
        for rule in rules {
            condition = match rule {
                FilterRule::Group { combinator, rules } => {
                    condition.add(self.compile_rules(*combinator, rules, root, root_alias, plan)?)
                }
                FilterRule::Condition {
                    field,
                    operator,
                    value,
                } => condition.add(self.compile_condition(
                    field, *operator, value, root, root_alias, plan,
                )?),
            };
        }
        Ok(condition)
    }

    fn compile_condition(
        &self,
        field: &str,
        operator: FilterOperator,
        value: &Json,
        root: &str,
        root_alias: &str,
        plan: &mut JoinPlan,
    ) -> Result<SimpleExpr, CompileError> {
        use FilterOperator::*;

        let (alias, column) = self.resolve_field(field, root, root_alias, plan)?;
        let col = || Expr::col((Ident::new(&alias), Ident::new(&column)));

        let expr = match operator {
            Eq => col().eq(scalar_value(operator, value)?),
            Neq => col().ne(scalar_value(operator, value)?),
            Gt => col().gt(scalar_value(operator, value)?),
            Gte => col().gte(scalar_value(operator, value)?),
            Lt => col().lt(scalar_value(operator, value)?),
            Lte => col().lte(scalar_value(operator, value)?),
            Like => col().like(pattern_value(operator, value)?),
            // ILIKE is Postgres-only syntax; lowering both sides renders on
            // every backend.
            Ilike => Expr::expr(Func::lower(col()))
                .like(pattern_value(operator, value)?.to_lowercase()),
            In => col().is_in(list_values(operator, value)?),
            NotIn => col().is_not_in(list_values(operator, value)?),
            Between => {
                let (low, high) = bound_values(value)?;
                col().between(low, high)
            }
            Is => match value {
                Json::Null => col().is_null(),
                Json::Bool(b) => col().binary(BinOper::Is, Expr::val(*b)),
                other => {
                    return Err(CompileError::Internal(format!(
                        "operator 'is' expects null or boolean, got {other}"
                    )))
                }
            },
        };
        Ok(expr)
    }

    /// Resolve a field path to a `(table alias, column)` pair, registering
    /// one inner join per relation hop.
    fn resolve_field(
        &self,
        raw: &str,
        root: &str,
        root_alias: &str,
        plan: &mut JoinPlan,
    ) -> Result<(String, String), CompileError> {
        let path = FieldPath::parse(raw);
        let mut entity_name = root.to_string();
        let mut alias = root_alias.to_string();
        let mut prefix = String::new();

        for segment in path.relations() {
            let entity = self.schema.entity(&entity_name).ok_or_else(|| {
                CompileError::UnsupportedPath {
                    path: raw.to_string(),
                    reason: format!("unknown entity '{entity_name}'"),
                }
            })?;
            let relation = entity.relations.get(*segment).ok_or_else(|| {
                CompileError::UnsupportedPath {
                    path: raw.to_string(),
                    reason: format!("'{entity_name}' has no relation '{segment}'"),
                }
            })?;
            let target = self.schema.entity(&relation.entity).ok_or_else(|| {
                CompileError::UnsupportedPath {
                    path: raw.to_string(),
                    reason: format!(
                        "relation '{segment}' points at unknown entity '{}'",
                        relation.entity
                    ),
                }
            })?;

            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(segment);

            alias = plan.ensure_join(&prefix, || JoinEdge {
                table: target.table.clone(),
                alias: prefix.replace('.', "__"),
                source_alias: alias.clone(),
                local_key: relation.local_key.clone(),
                foreign_key: relation.foreign_key.clone(),
            });
            entity_name = relation.entity.clone();
        }

        Ok((alias, path.column().to_string()))
    }
}

fn apply_joins(stmt: &mut SelectStatement, plan: &JoinPlan) {
    for edge in &plan.joins {
        stmt.join_as(
            JoinType::InnerJoin,
            Ident::new(&edge.table),
            Ident::new(&edge.alias),
            Expr::col((Ident::new(&edge.alias), Ident::new(&edge.foreign_key)))
                .equals((Ident::new(&edge.source_alias), Ident::new(&edge.local_key))),
        );
    }
}

fn scalar_value(operator: FilterOperator, value: &Json) -> Result<Value, CompileError> {
    match value {
        Json::String(s) => Ok(s.as_str().into()),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i.into())
            } else if let Some(f) = n.as_f64() {
                Ok(f.into())
            } else {
                Err(CompileError::Internal(format!(
                    "numeric value out of range for operator '{}'",
                    operator.name()
                )))
            }
        }
        Json::Bool(b) => Ok((*b).into()),
        other => Err(CompileError::Internal(format!(
            "operator '{}' expects a scalar value, got {other}",
            operator.name()
        ))),
    }
}

fn pattern_value(operator: FilterOperator, value: &Json) -> Result<String, CompileError> {
    value.as_str().map(str::to_owned).ok_or_else(|| {
        CompileError::Internal(format!(
            "operator '{}' expects a string pattern, got {value}",
            operator.name()
        ))
    })
}

fn list_values(operator: FilterOperator, value: &Json) -> Result<Vec<Value>, CompileError> {
    let items = value.as_array().ok_or_else(|| {
        CompileError::Internal(format!(
            "operator '{}' expects a list value, got {value}",
            operator.name()
        ))
    })?;
    items
        .iter()
        .map(|item| scalar_value(operator, item))
        .collect()
}

fn bound_values(value: &Json) -> Result<(Value, Value), CompileError> {
    match value.as_array().map(Vec::as_slice) {
        Some([low, high]) => Ok((
            scalar_value(FilterOperator::Between, low)?,
            scalar_value(FilterOperator::Between, high)?,
        )),
        _ => Err(CompileError::Internal(format!(
            "operator 'between' expects exactly two bounds, got {value}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FilterRule;
    use sea_query::PostgresQueryBuilder;
    use serde_json::json;

    fn compiler() -> QueryCompiler {
        QueryCompiler::new(SchemaConfig::builtin())
    }

    fn options_for(root: &str) -> QueryOptions {
        QueryOptions {
            root_table: root.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_simple_condition_compilation() {
        let ast = FilterSet::new(
            "students",
            vec![FilterRule::condition("status", FilterOperator::Eq, "ACTIVE")],
        );

        let compiled = compiler().compile(&ast, &options_for("students")).unwrap();
        let sql = compiled.row_sql(PostgresQueryBuilder);
        assert!(sql.contains(r#"FROM "students""#));
        assert!(sql.contains(r#""students"."status" = 'ACTIVE'"#));
    }

    #[test]
    fn test_empty_rules_compile_without_where() {
        let ast = FilterSet::all("students");
        let compiled = compiler().compile(&ast, &options_for("students")).unwrap();
        let sql = compiled.row_sql(PostgresQueryBuilder);
        assert!(!sql.contains("WHERE"));
        assert!(sql.contains(r#""students".*"#));
    }

    #[test]
    fn test_select_fields_replace_asterisk() {
        let ast = FilterSet::all("students");
        let options = QueryOptions {
            root_table: "students".to_string(),
            select_fields: Some(vec!["id".to_string(), "name".to_string()]),
            ..Default::default()
        };
        let sql = compiler()
            .compile(&ast, &options)
            .unwrap()
            .row_sql(PostgresQueryBuilder);
        assert!(sql.contains(r#""students"."id""#));
        assert!(sql.contains(r#""students"."name""#));
        assert!(!sql.contains('*'));
    }

    #[test]
    fn test_nesting_is_preserved_not_flattened() {
        // AND(status = ACTIVE, OR(campus = SYD, campus = MEL))
        let ast = FilterSet::new(
            "students",
            vec![
                FilterRule::condition("status", FilterOperator::Eq, "ACTIVE"),
                FilterRule::group(
                    Combinator::Or,
                    vec![
                        FilterRule::condition("campus", FilterOperator::Eq, "SYD"),
                        FilterRule::condition("campus", FilterOperator::Eq, "MEL"),
                    ],
                ),
            ],
        );

        let sql = compiler()
            .compile(&ast, &options_for("students"))
            .unwrap()
            .row_sql(PostgresQueryBuilder);
        assert!(sql.contains(
            r#""students"."status" = 'ACTIVE' AND ("students"."campus" = 'SYD' OR "students"."campus" = 'MEL')"#
        ));
    }

    #[test]
    fn test_relation_path_builds_join_chain() {
        let ast = FilterSet::new(
            "students",
            vec![FilterRule::condition(
                "enrollments.program.code",
                FilterOperator::Eq,
                "CERT4",
            )],
        );

        let sql = compiler()
            .compile(&ast, &options_for("students"))
            .unwrap()
            .row_sql(PostgresQueryBuilder);
        assert!(sql.contains(
            r#"INNER JOIN "enrollments" AS "enrollments" ON "enrollments"."student_id" = "students"."id""#
        ));
        assert!(sql.contains(
            r#"INNER JOIN "programs" AS "enrollments__program" ON "enrollments__program"."id" = "enrollments"."program_id""#
        ));
        assert!(sql.contains(r#""enrollments__program"."code" = 'CERT4'"#));
    }

    #[test]
    fn test_shared_relation_path_joins_once() {
        let ast = FilterSet::new(
            "students",
            vec![
                FilterRule::condition("enrollments.status", FilterOperator::Eq, "CURRENT"),
                FilterRule::condition("enrollments.progress", FilterOperator::Gte, 50),
            ],
        );

        let sql = compiler()
            .compile(&ast, &options_for("students"))
            .unwrap()
            .row_sql(PostgresQueryBuilder);
        assert_eq!(sql.matches("INNER JOIN").count(), 1);
    }

    #[test]
    fn test_unknown_root_table() {
        let ast = FilterSet::all("invoicing");
        let err = compiler()
            .compile(&ast, &options_for("invoicing"))
            .unwrap_err();
        assert_eq!(err, CompileError::UnknownTable("invoicing".to_string()));
    }

    #[test]
    fn test_unknown_relation_is_unsupported_path() {
        let ast = FilterSet::new(
            "students",
            vec![FilterRule::condition(
                "guardians.name",
                FilterOperator::Eq,
                "x",
            )],
        );

        let err = compiler()
            .compile(&ast, &options_for("students"))
            .unwrap_err();
        match err {
            CompileError::UnsupportedPath { path, reason } => {
                assert_eq!(path, "guardians.name");
                assert!(reason.contains("no relation 'guardians'"));
            }
            other => panic!("expected UnsupportedPath, got {other:?}"),
        }
    }

    #[test]
    fn test_in_and_between_operators() {
        let ast = FilterSet::new(
            "invoices",
            vec![
                FilterRule::condition("status", FilterOperator::In, json!(["DUE", "OVERDUE"])),
                FilterRule::condition("amount", FilterOperator::Between, json!([100, 500])),
            ],
        );

        let sql = compiler()
            .compile(&ast, &options_for("invoices"))
            .unwrap()
            .row_sql(PostgresQueryBuilder);
        assert!(sql.contains(r#""invoices"."status" IN ('DUE', 'OVERDUE')"#));
        assert!(sql.contains(r#""invoices"."amount" BETWEEN 100 AND 500"#));
    }

    #[test]
    fn test_ilike_lowers_both_sides() {
        let ast = FilterSet::new(
            "students",
            vec![FilterRule::condition("name", FilterOperator::Ilike, "%ALI%")],
        );

        let compiled = compiler().compile(&ast, &options_for("students")).unwrap();
        let sql = compiled.row_sql(PostgresQueryBuilder);
        assert!(sql.contains(r#"LOWER("students"."name") LIKE '%ali%'"#));

        // The same statement renders on SQLite without ILIKE syntax.
        let sqlite_sql = compiled.row_sql(sea_query::SqliteQueryBuilder);
        assert!(sqlite_sql.contains(r#"LOWER("students"."name") LIKE '%ali%'"#));
    }

    #[test]
    fn test_to_many_join_deduplicates_root_rows() {
        let ast = FilterSet::new(
            "students",
            vec![FilterRule::condition(
                "enrollments.status",
                FilterOperator::Eq,
                "CURRENT",
            )],
        );
        let options = QueryOptions {
            root_table: "students".to_string(),
            include_count: true,
            ..Default::default()
        };

        let compiled = compiler().compile(&ast, &options).unwrap();
        let sql = compiled.row_sql(PostgresQueryBuilder);
        assert!(sql.starts_with("SELECT DISTINCT"));

        // The count is over distinct matching root rows, not join rows.
        let count_sql = compiled.count_sql(PostgresQueryBuilder).unwrap();
        assert!(count_sql.contains("COUNT(*)"));
        assert!(count_sql.contains(r#"SELECT DISTINCT "students"."id""#));
        assert!(count_sql.contains(r#"AS "matching_rows""#));
    }

    #[test]
    fn test_joinless_query_stays_plain() {
        let ast = FilterSet::new(
            "students",
            vec![FilterRule::condition("status", FilterOperator::Eq, "ACTIVE")],
        );

        let sql = compiler()
            .compile(&ast, &options_for("students"))
            .unwrap()
            .row_sql(PostgresQueryBuilder);
        assert!(!sql.contains("DISTINCT"));
    }

    #[test]
    fn test_is_null_rendering() {
        let ast = FilterSet::new(
            "students",
            vec![FilterRule::condition(
                "deleted_at",
                FilterOperator::Is,
                serde_json::Value::Null,
            )],
        );

        let sql = compiler()
            .compile(&ast, &options_for("students"))
            .unwrap()
            .row_sql(PostgresQueryBuilder);
        assert!(sql.contains(r#""students"."deleted_at" IS NULL"#));
    }

    #[test]
    fn test_count_statement_shares_joins_and_filters() {
        let ast = FilterSet::new(
            "students",
            vec![FilterRule::condition(
                "enrollments.status",
                FilterOperator::Eq,
                "CURRENT",
            )],
        );
        let options = QueryOptions {
            root_table: "students".to_string(),
            include_count: true,
            ..Default::default()
        };

        let compiled = compiler().compile(&ast, &options).unwrap();
        let count_sql = compiled.count_sql(PostgresQueryBuilder).unwrap();
        assert!(count_sql.contains("COUNT(*)"));
        assert!(count_sql.contains("INNER JOIN"));
        assert!(count_sql.contains(r#""enrollments"."status" = 'CURRENT'"#));
    }

    #[test]
    fn test_bad_scalar_shape_is_internal_error() {
        // The validator would reject this; compilation flags it as internal.
        let ast = FilterSet::new(
            "students",
            vec![FilterRule::condition(
                "status",
                FilterOperator::Eq,
                json!({ "nested": true }),
            )],
        );

        let err = compiler()
            .compile(&ast, &options_for("students"))
            .unwrap_err();
        assert!(matches!(err, CompileError::Internal(_)));
    }
}
