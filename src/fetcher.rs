//! The cached, generic fetch layer.
//!
//! A [`FilterFetcher`] owns a compiler, an executor and a keyed result
//! cache. Each request is turned into a cache key from the root table plus
//! the literal serialization of its AST; identical requests within the cache
//! lifetime never re-issue a query. The rule order supplied by the caller is
//! kept as-is in the key, so two logically equivalent but reordered ASTs
//! simply miss each other's entry.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::ast::FilterSet;
use crate::compiler::{CompileError, CompiledQuery, QueryCompiler, QueryOptions};
use crate::executor::{ExecuteError, QueryExecutor, QueryOutput};
use crate::validator::{validate_ast, ValidationError, ValidationOptions};

#[derive(Debug, Error)]
pub enum FetchError {
    /// The AST failed validation; all defects aggregated into one message.
    #[error("invalid filter: {0}")]
    Validation(String),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Execute(#[from] ExecuteError),
    #[error("cannot decode row from '{table}': {source}")]
    Decode {
        table: String,
        source: serde_json::Error,
    },
}

impl FetchError {
    fn from_validation(errors: &[ValidationError]) -> Self {
        let message = errors
            .iter()
            .map(|error| format!("{}: {}", error.path, error.message))
            .collect::<Vec<_>>()
            .join("; ");
        Self::Validation(message)
    }
}

/// One fetch: the root table, an optional filter and the select knobs.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub root_table: String,
    pub ast: Option<FilterSet>,
    pub select_fields: Option<Vec<String>>,
    /// Extra columns merged after `select_fields`.
    pub additional_select_fields: Vec<String>,
    pub include_count: bool,
    /// Overrides the schema's default depth bound.
    pub max_depth: Option<usize>,
}

impl FetchRequest {
    /// Fetch every row of `root_table`.
    pub fn all(root_table: impl Into<String>) -> Self {
        Self {
            root_table: root_table.into(),
            ..Default::default()
        }
    }

    /// Fetch rows matching `ast`, rooted at the AST's own table.
    pub fn filtered(ast: FilterSet) -> Self {
        Self {
            root_table: ast.root_table.clone(),
            ast: Some(ast),
            ..Default::default()
        }
    }
}

/// Rows decoded into the caller's type, plus the exact count when requested.
#[derive(Debug, Clone)]
pub struct FetchResult<T> {
    pub rows: Vec<T>,
    pub count: Option<u64>,
}

/// Cache-keyed fetch pipeline: key -> validate -> compile -> execute.
pub struct FilterFetcher {
    compiler: QueryCompiler,
    executor: Arc<dyn QueryExecutor>,
    cache: Cache<String, Arc<QueryOutput>>,
}

impl FilterFetcher {
    pub fn new(compiler: QueryCompiler, executor: Arc<dyn QueryExecutor>) -> Self {
        let schema = compiler.schema();
        let cache = Cache::builder()
            .max_capacity(schema.cache_capacity)
            .time_to_live(Duration::from_secs(schema.cache_ttl_secs))
            .build();
        Self {
            compiler,
            executor,
            cache,
        }
    }

    /// Fetch rows for `request`, serving from cache when the same logical
    /// query was executed within the cache lifetime.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        request: &FetchRequest,
    ) -> Result<FetchResult<T>, FetchError> {
        let key = cache_key(request);
        if let Some(output) = self.cache.get(&key).await {
            tracing::debug!(%key, "filter cache hit");
            return decode_output(&request.root_table, &output);
        }
        tracing::debug!(%key, "filter cache miss");

        let output = Arc::new(self.execute(request).await?);
        self.cache.insert(key, Arc::clone(&output)).await;
        decode_output(&request.root_table, &output)
    }

    /// Same as [`fetch`](Self::fetch) but always requests an exact row
    /// count; filtering semantics are unchanged.
    pub async fn fetch_with_count<T: DeserializeOwned>(
        &self,
        request: &FetchRequest,
    ) -> Result<FetchResult<T>, FetchError> {
        let mut request = request.clone();
        request.include_count = true;
        self.fetch(&request).await
    }

    async fn execute(&self, request: &FetchRequest) -> Result<QueryOutput, FetchError> {
        let compiled = self.compile(request)?;
        Ok(self.executor.fetch(&compiled).await?)
    }

    fn compile(&self, request: &FetchRequest) -> Result<CompiledQuery, FetchError> {
        let options = QueryOptions {
            root_table: request.root_table.clone(),
            select_fields: merged_select_fields(request),
            include_count: request.include_count,
            max_depth: request.max_depth,
        };

        match &request.ast {
            // The all-rows shortcut: no validation pass is needed.
            None => Ok(self
                .compiler
                .compile(&FilterSet::all(request.root_table.as_str()), &options)?),
            Some(ast) if ast.is_empty() => Ok(self
                .compiler
                .compile(&FilterSet::all(request.root_table.as_str()), &options)?),
            Some(ast) => {
                let validation = ValidationOptions {
                    max_depth: request.max_depth.unwrap_or(self.compiler.schema().max_depth),
                };
                let errors = validate_ast(ast, &validation);
                if !errors.is_empty() {
                    return Err(FetchError::from_validation(&errors));
                }
                Ok(self.compiler.compile(ast, &options)?)
            }
        }
    }
}

fn merged_select_fields(request: &FetchRequest) -> Option<Vec<String>> {
    let mut fields = request.select_fields.clone().unwrap_or_default();
    for extra in &request.additional_select_fields {
        if !fields.contains(extra) {
            fields.push(extra.clone());
        }
    }
    if fields.is_empty() {
        None
    } else {
        Some(fields)
    }
}

/// Cache key: root table plus either `"all"` or the AST's literal JSON
/// serialization. Count-requesting fetches are namespaced apart since their
/// cached output carries the extra count field.
fn cache_key(request: &FetchRequest) -> String {
    let fragment = match &request.ast {
        Some(ast) if !ast.is_empty() => serde_json::to_string(ast)
            .unwrap_or_else(|_| "unserializable".to_string()),
        _ => "all".to_string(),
    };
    let mut key = format!("{}:{}", request.root_table, fragment);
    if request.include_count {
        key.push_str("#count");
    }
    key
}

fn decode_output<T: DeserializeOwned>(
    table: &str,
    output: &QueryOutput,
) -> Result<FetchResult<T>, FetchError> {
    let rows = output
        .rows
        .iter()
        .map(|row| {
            serde_json::from_value(row.clone()).map_err(|source| FetchError::Decode {
                table: table.to_string(),
                source,
            })
        })
        .collect::<Result<Vec<T>, _>>()?;
    Ok(FetchResult {
        rows,
        count: output.count,
    })
}
