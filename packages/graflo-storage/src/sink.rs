//! The backend-sink contract consumed by the writer.
//!
//! The core treats every graph store as a uniform key/value + edge sink with
//! match-key-idempotent upserts. Wire protocols, query languages and
//! reserved-word handling live entirely behind this trait.

use async_trait::async_trait;

use crate::error::Result;
use graflo_core::{Doc, EdgeRecord, Schema};

#[async_trait]
pub trait GraphSink: Send + Sync {
    /// Initialize collections and indexes for a schema. Fails with
    /// [`crate::StorageError::SchemaExists`] when a schema is already
    /// present and `recreate_schema` is false.
    async fn init_db(&self, schema: &Schema, recreate_schema: bool) -> Result<()>;

    /// Remove all graph data for the schema; the schema itself stays.
    async fn clear_data(&self, schema: &Schema) -> Result<()>;

    /// Batched idempotent upsert: documents matching an existing one on
    /// `match_keys` update it, others insert. `dry` suppresses mutation.
    async fn upsert_docs_batch(
        &self,
        docs: Vec<Doc>,
        class_name: &str,
        match_keys: &[String],
        dry: bool,
    ) -> Result<()>;

    /// Batched edge insert. Endpoint documents are matched on the given key
    /// tuples; `collection_name` overrides the default edge collection.
    #[allow(clippy::too_many_arguments)]
    async fn insert_edges_batch(
        &self,
        edges: Vec<EdgeRecord>,
        source_class: &str,
        target_class: &str,
        relation: Option<&str>,
        match_keys_source: &[String],
        match_keys_target: &[String],
        collection_name: Option<&str>,
        dry: bool,
    ) -> Result<()>;

    /// For each document in `batch`, fetch currently persisted documents of
    /// `class_name` matching on `match_keys`, projected to `keep_keys`.
    /// The result is aligned with `batch`. This is the one read-back the
    /// ingest path performs (extra-weight enrichment).
    async fn fetch_present_documents(
        &self,
        class_name: &str,
        batch: &[Doc],
        match_keys: &[String],
        keep_keys: &[String],
    ) -> Result<Vec<Vec<Doc>>>;
}
