//! Schema configuration: which entities can be queried, how their relations
//! join, and tuning for the result cache. Loaded from a JSON file.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("schema file {path} does not exist")]
    Missing { path: String },
    #[error("cannot read schema file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("cannot parse schema file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// A joinable relation hop: `target.foreign_key = source.local_key`.
///
/// Covers both directions: a one-to-many hop keeps `local_key` at the
/// owner's primary key, a many-to-one hop puts the referencing column in
/// `local_key` and the target's primary key in `foreign_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationSchema {
    /// Entity the relation points at.
    pub entity: String,
    #[serde(default = "default_key")]
    pub local_key: String,
    #[serde(default = "default_key")]
    pub foreign_key: String,
}

fn default_key() -> String {
    "id".to_string()
}

/// One queryable entity: its physical table plus named relations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Physical table name.
    pub table: String,
    /// Column identifying one row, used for exact counts over joins.
    #[serde(default = "default_key")]
    pub primary_key: String,
    #[serde(default)]
    pub relations: HashMap<String, RelationSchema>,
}

/// The full schema plus cache tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub entities: HashMap<String, EntitySchema>,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

fn default_max_depth() -> usize {
    crate::validator::DEFAULT_MAX_DEPTH
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_cache_capacity() -> u64 {
    1024
}

impl SchemaConfig {
    /// Load the schema from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(ConfigError::Missing {
                path: path_ref.display().to_string(),
            });
        }

        let content = fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.display().to_string(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path_ref.display().to_string(),
            source,
        })
    }

    /// Look up an entity by name. `None` means the name is unknown.
    pub fn entity(&self, name: &str) -> Option<&EntitySchema> {
        self.entities.get(name)
    }

    /// The built-in training schema, used by tests and as a demo fallback:
    /// students with enrollments into programs, plus invoices.
    pub fn builtin() -> Self {
        let mut entities = HashMap::new();

        entities.insert(
            "students".to_string(),
            EntitySchema {
                table: "students".to_string(),
                primary_key: "id".to_string(),
                relations: HashMap::from([
                    (
                        "enrollments".to_string(),
                        RelationSchema {
                            entity: "enrollments".to_string(),
                            local_key: "id".to_string(),
                            foreign_key: "student_id".to_string(),
                        },
                    ),
                    (
                        "invoices".to_string(),
                        RelationSchema {
                            entity: "invoices".to_string(),
                            local_key: "id".to_string(),
                            foreign_key: "student_id".to_string(),
                        },
                    ),
                ]),
            },
        );

        entities.insert(
            "enrollments".to_string(),
            EntitySchema {
                table: "enrollments".to_string(),
                primary_key: "id".to_string(),
                relations: HashMap::from([
                    (
                        "student".to_string(),
                        RelationSchema {
                            entity: "students".to_string(),
                            local_key: "student_id".to_string(),
                            foreign_key: "id".to_string(),
                        },
                    ),
                    (
                        "program".to_string(),
                        RelationSchema {
                            entity: "programs".to_string(),
                            local_key: "program_id".to_string(),
                            foreign_key: "id".to_string(),
                        },
                    ),
                ]),
            },
        );

        entities.insert(
            "programs".to_string(),
            EntitySchema {
                table: "programs".to_string(),
                primary_key: "id".to_string(),
                relations: HashMap::new(),
            },
        );

        entities.insert(
            "invoices".to_string(),
            EntitySchema {
                table: "invoices".to_string(),
                primary_key: "id".to_string(),
                relations: HashMap::from([(
                    "student".to_string(),
                    RelationSchema {
                        entity: "students".to_string(),
                        local_key: "student_id".to_string(),
                        foreign_key: "id".to_string(),
                    },
                )]),
            },
        );

        Self {
            entities,
            max_depth: default_max_depth(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}
