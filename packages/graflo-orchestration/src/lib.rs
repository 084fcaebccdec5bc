/*
 * Graflo Orchestration - ingestion coordination
 *
 * - Caster: iterates data sources, casts records through resource actor
 *   trees, and hands batches to the writer with bounded concurrency
 * - IngestionParams: run configuration (workers, batch size, dry, limits)
 * - DataSource / DataSourceRegistry: the batch-iterator contract
 * - Patterns: declarative resource -> physical-source mapping
 */

pub mod caster;
pub mod data_source;
pub mod error;
pub mod patterns;

pub use caster::{Caster, IngestionParams};
pub use data_source::{BatchIter, DataSource, DataSourceRegistry, InMemorySource};
pub use error::{CasterError, Result};
pub use patterns::{
    build_registry, FilePattern, Patterns, SourceFactory, SourcePattern, SparqlPattern,
    TablePattern,
};
