/*
 * Graflo Storage - sink contract and batch writer
 *
 * - GraphSink: the uniform key/value + edge sink every backend implements
 * - InMemorySink: reference implementation used by tests and dry runs
 * - DBWriter: four-phase push (vertex upsert, blank-edge resolution,
 *   extra-weight enrichment, edge insertion) with bounded concurrency
 */

pub mod error;
pub mod memory;
pub mod sink;
pub mod writer;

pub use error::{Result, StorageError};
pub use memory::{InMemorySink, StoredEdge};
pub use sink::GraphSink;
pub use writer::DBWriter;
