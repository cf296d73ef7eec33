//! Interactive demo: paste a filter AST as JSON, get validation feedback or
//! the compiled SQL.

use anyhow::Context;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use sea_query::PostgresQueryBuilder;
use tracing_subscriber::EnvFilter;

use filter_dispatcher::compiler::{QueryCompiler, QueryOptions};
use filter_dispatcher::config::SchemaConfig;
use filter_dispatcher::validator::{validate_ast, ValidationOptions};
use filter_dispatcher::FilterSet;

const SCHEMA_FILE: &str = "schema.json";

fn load_schema() -> SchemaConfig {
    match SchemaConfig::from_json_file(SCHEMA_FILE) {
        Ok(schema) => {
            println!("✅ loaded schema from {SCHEMA_FILE}");
            schema
        }
        Err(e) => {
            println!("⚠️ {e}, using built-in training schema");
            SchemaConfig::builtin()
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("--- Filter Dispatcher: filter AST to SQL compiler ---");
    let schema = load_schema();

    println!("\n[entities]:");
    let mut names: Vec<_> = schema.entities.keys().collect();
    names.sort();
    for name in names {
        println!("  {name}");
    }
    println!("[max relation depth]: {}", schema.max_depth);

    let max_depth = schema.max_depth;
    let compiler = QueryCompiler::new(schema);

    println!("\nEnter a filter AST as JSON, e.g.:");
    println!(
        r#"  {{"rootTable":"students","rules":[{{"field":"status","operator":"eq","value":"ACTIVE"}}]}}"#
    );
    println!("Type 'exit' to quit.\n");

    let mut editor = DefaultEditor::new().context("cannot initialize line editor")?;
    loop {
        match editor.readline("filter> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "exit" || line == "quit" {
                    break;
                }
                editor.add_history_entry(line).ok();
                handle_line(&compiler, max_depth, line);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("readline failed"),
        }
    }

    Ok(())
}

fn handle_line(compiler: &QueryCompiler, max_depth: usize, line: &str) {
    let ast: FilterSet = match serde_json::from_str(line) {
        Ok(ast) => ast,
        Err(e) => {
            println!("✗ invalid filter JSON: {e}");
            return;
        }
    };

    let errors = validate_ast(&ast, &ValidationOptions { max_depth });
    if !errors.is_empty() {
        println!("✗ validation failed:");
        for error in errors {
            println!("  {}: {}", error.path, error.message);
        }
        return;
    }

    let options = QueryOptions {
        root_table: ast.root_table.clone(),
        include_count: true,
        ..Default::default()
    };
    match compiler.compile(&ast, &options) {
        Ok(compiled) => {
            println!("[rows]  {}", compiled.row_sql(PostgresQueryBuilder));
            if let Some(count_sql) = compiled.count_sql(PostgresQueryBuilder) {
                println!("[count] {count_sql}");
            }
        }
        Err(e) => println!("✗ compilation failed: {e}"),
    }
}
