//! Dynamic filter-to-query compiler: callers build a serializable filter AST
//! over a root entity, the crate validates it, compiles it to SQL with
//! sea-query, executes it asynchronously and caches results per logical
//! query.

pub mod ast;
pub mod compiler;
pub mod config;
pub mod executor;
pub mod fetcher;
pub mod validator;

pub use ast::{Combinator, FilterOperator, FilterRule, FilterSet};
pub use compiler::{CompileError, CompiledQuery, QueryCompiler, QueryOptions};
pub use config::{ConfigError, SchemaConfig};
pub use executor::{ExecuteError, QueryExecutor, QueryOutput, SqlxExecutor};
pub use fetcher::{FetchError, FetchRequest, FetchResult, FilterFetcher};
pub use validator::{validate_ast, ValidationError, ValidationOptions};
