//! DBWriter: pushes a `GraphContainer` to a sink in four strictly ordered
//! phases.
//!
//! 1. Vertex upsert (parallel across vertex types), assigning generated
//!    identities to blank vertices first.
//! 2. Blank-edge resolution, joining container vertex lists now that blank
//!    identities exist.
//! 3. Extra-weight enrichment, the one read-back from the sink.
//! 4. Edge insertion (parallel across edge ids).
//!
//! Phases 2 and 3 mutate shared container state and run on the caller's
//! task; phases 1 and 4 fan out under a semaphore of width `max_concurrent`.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::sink::GraphSink;
use graflo_core::{Doc, EdgeId, EdgeRecord, GraphContainer, Resource, Schema};

pub struct DBWriter {
    schema: Arc<Schema>,
    dry: bool,
    max_concurrent: usize,
}

fn doc_has_keys(doc: &Doc, keys: &[String]) -> bool {
    keys.iter()
        .all(|k| doc.get(k).is_some_and(|v| !v.is_null()))
}

fn key_of(doc: &Doc, keys: &[String]) -> Option<String> {
    let projected: Vec<&Value> = keys
        .iter()
        .map(|k| doc.get(k).filter(|v| !v.is_null()))
        .collect::<Option<Vec<_>>>()?;
    serde_json::to_string(&projected).ok()
}

/// Assign a fresh opaque identifier to every document missing one in its
/// identity slot. Mutates in place so later phases see the same keys.
fn assign_blank_ids(docs: &mut [Doc], identity: &[String], default_slot: &str) {
    let preferred = identity.first().map(String::as_str).unwrap_or(default_slot);
    for doc in docs {
        let missing = doc
            .get(preferred)
            .map_or(true, |v| v.is_null() || v.as_str() == Some(""));
        if missing {
            let generated = Uuid::new_v4().to_string();
            doc.insert(preferred.to_string(), json!(generated.clone()));
            if preferred != default_slot && !doc.contains_key(default_slot) {
                doc.insert(default_slot.to_string(), json!(generated));
            }
        }
    }
}

impl DBWriter {
    pub fn new(schema: Arc<Schema>, dry: bool, max_concurrent: usize) -> Self {
        Self {
            schema,
            dry,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Push the container to the sink. The container is mutated in place:
    /// blank-vertex identities are assigned and blank edge lists rebuilt, so
    /// a dry run leaves the same container shape a wet run would.
    pub async fn write(
        &self,
        gc: &mut GraphContainer,
        sink: Arc<dyn GraphSink>,
        resource_name: Option<&str>,
    ) -> Result<()> {
        self.push_vertices(gc, Arc::clone(&sink)).await?;
        self.resolve_blank_edges(gc)?;
        if let Ok(resource) = self.schema.fetch_resource(resource_name) {
            if !resource.extra_weights.is_empty() {
                self.enrich_extra_weights(gc, Arc::clone(&sink), resource)
                    .await?;
            }
        }
        self.push_edges(gc, sink).await
    }

    // ------------------------------------------------------------------
    // Phase 1: vertices
    // ------------------------------------------------------------------

    async fn push_vertices(
        &self,
        gc: &mut GraphContainer,
        sink: Arc<dyn GraphSink>,
    ) -> Result<()> {
        let vc = &self.schema.vertex_config;
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = Vec::new();

        let entries: Vec<(String, Vec<Doc>)> = gc.vertices.drain(..).collect();
        for (vertex_type, mut docs) in entries {
            let dbname = vc.vertex_dbname(&vertex_type)?;
            let identity = vc.identity_fields(&vertex_type)?;
            let blank = vc.is_blank(&vertex_type);
            let slot = vc.db_flavor.identity_slot();
            let sink = Arc::clone(&sink);
            let semaphore = Arc::clone(&semaphore);
            let dry = self.dry;
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("writer semaphore closed");
                if blank {
                    assign_blank_ids(&mut docs, &identity, slot);
                }
                sink.upsert_docs_batch(docs.clone(), &dbname, &identity, dry)
                    .await?;
                Ok::<(String, Vec<Doc>), StorageError>((vertex_type, docs))
            }));
        }

        for task in tasks {
            let (vertex_type, docs) = task.await??;
            gc.vertices.insert(vertex_type, docs);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase 2: blank-edge resolution
    // ------------------------------------------------------------------

    /// Rebuild edge lists whose endpoints are blank types: unresolved
    /// records (missing the blank side's identity) are dropped, then the
    /// container's vertex lists are joined by shared identity fields when
    /// any exist, else paired positionally.
    fn resolve_blank_edges(&self, gc: &mut GraphContainer) -> Result<()> {
        let vc = &self.schema.vertex_config;
        let blank_edges: Vec<EdgeId> = self
            .schema
            .edge_config
            .edges_items(false)
            .map(|(edge_id, _)| edge_id)
            .filter(|edge_id| vc.is_blank(&edge_id.source) || vc.is_blank(&edge_id.target))
            .collect();

        for edge_id in blank_edges {
            let (Some(source_docs), Some(target_docs)) = (
                gc.vertices.get(&edge_id.source).cloned(),
                gc.vertices.get(&edge_id.target).cloned(),
            ) else {
                continue;
            };
            let source_ids = vc.identity_fields(&edge_id.source)?;
            let target_ids = vc.identity_fields(&edge_id.target)?;
            let shared: Vec<String> = source_ids
                .iter()
                .filter(|f| target_ids.contains(f))
                .cloned()
                .collect();

            let records = gc.edges.entry(edge_id.clone()).or_default();
            records.retain(|r| {
                let source_ok =
                    !vc.is_blank(&edge_id.source) || doc_has_keys(&r.source, &source_ids);
                let target_ok =
                    !vc.is_blank(&edge_id.target) || doc_has_keys(&r.target, &target_ids);
                source_ok && target_ok
            });

            if !shared.is_empty() {
                let mut targets_by_key: HashMap<String, Vec<&Doc>> = HashMap::new();
                for target in &target_docs {
                    if let Some(key) = key_of(target, &shared) {
                        targets_by_key.entry(key).or_default().push(target);
                    }
                }
                for source in &source_docs {
                    let Some(key) = key_of(source, &shared) else {
                        continue;
                    };
                    for target in targets_by_key.get(&key).into_iter().flatten() {
                        records.push(EdgeRecord {
                            source: source.clone(),
                            target: (*target).clone(),
                            weight: Doc::new(),
                        });
                    }
                }
            } else {
                records.extend(source_docs.iter().zip(target_docs.iter()).map(
                    |(source, target)| EdgeRecord {
                        source: source.clone(),
                        target: target.clone(),
                        weight: Doc::new(),
                    },
                ));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase 3: extra weights
    // ------------------------------------------------------------------

    /// Fetch vertex-sourced weight fields from the sink and inject them into
    /// every edge emitted in the same per-record scope. Alignment between
    /// the flattened edge lists and the per-record accumulators uses running
    /// offsets, which phase 2 invalidates when it rebuilds a blank-endpoint
    /// edge list; those edge ids are skipped entirely rather than risking a
    /// positionally shifted attach.
    async fn enrich_extra_weights(
        &self,
        gc: &mut GraphContainer,
        sink: Arc<dyn GraphSink>,
        resource: &Resource,
    ) -> Result<()> {
        let vc = &self.schema.vertex_config;
        for edge in &resource.extra_weights {
            let Some(weights) = &edge.weights else {
                continue;
            };
            let edge_id = edge.edge_id();
            if vc.is_blank(&edge_id.source) || vc.is_blank(&edge_id.target) {
                warn!(
                    edge = %edge_id,
                    "extra weights on a blank-endpoint edge are not supported, skipped"
                );
                continue;
            }
            for weight in &weights.vertices {
                let Some(vertex_name) = &weight.name else {
                    warn!("extra weight without a vertex name, skipped");
                    continue;
                };
                if !vc.contains(vertex_name) {
                    warn!(vertex = %vertex_name, "extra weight names an unknown vertex");
                    continue;
                }
                let Some(batch) = gc.vertices.get(vertex_name).cloned() else {
                    continue;
                };
                let identity = vc.identity_fields(vertex_name)?;
                let fetched = sink
                    .fetch_present_documents(
                        &vc.vertex_dbname(vertex_name)?,
                        &batch,
                        &identity,
                        &weight.fields,
                    )
                    .await?;

                let mut vertex_offset = 0usize;
                let mut edge_offset = 0usize;
                for record in &mut gc.linear {
                    let n_vertices = record.vertices.get(vertex_name).map(Vec::len).unwrap_or(0);
                    let record_weights: Doc = fetched
                        .get(vertex_offset)
                        .filter(|_| n_vertices > 0)
                        .and_then(|matches| matches.first())
                        .map(|doc| {
                            doc.iter()
                                .map(|(k, v)| (weight.cfield(k), v.clone()))
                                .collect()
                        })
                        .unwrap_or_default();
                    vertex_offset += n_vertices;

                    let n_edges = record.edges.get(&edge_id).map(Vec::len).unwrap_or(0);
                    if n_edges > 0 && !record_weights.is_empty() {
                        if let Some(global) = gc.edges.get_mut(&edge_id) {
                            if let Some(slice) =
                                global.get_mut(edge_offset..edge_offset + n_edges)
                            {
                                for rec in slice {
                                    rec.weight.extend(record_weights.clone());
                                }
                            }
                        }
                        if let Some(list) = record.edges.get_mut(&edge_id) {
                            for rec in list {
                                rec.weight.extend(record_weights.clone());
                            }
                        }
                    }
                    edge_offset += n_edges;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase 4: edges
    // ------------------------------------------------------------------

    async fn push_edges(&self, gc: &mut GraphContainer, sink: Arc<dyn GraphSink>) -> Result<()> {
        let vc = &self.schema.vertex_config;
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = Vec::new();

        for (container_id, records) in gc.edges.iter() {
            if records.is_empty() {
                continue;
            }
            // configured edge with the same endpoints supplies relation and
            // collection naming; pipeline-only edges fall back to defaults
            let config_edge = self
                .schema
                .edge_config
                .edges
                .iter()
                .find(|e| {
                    e.source == container_id.source && e.target == container_id.target && !e.is_aux()
                });
            let relation = container_id
                .purpose
                .clone()
                .or_else(|| config_edge.and_then(|e| e.relation.clone()));
            let collection = config_edge.and_then(|e| e.database_name.clone());
            let source_class = vc.vertex_dbname(&container_id.source)?;
            let target_class = vc.vertex_dbname(&container_id.target)?;
            let source_keys = vc.identity_fields(&container_id.source)?;
            let target_keys = vc.identity_fields(&container_id.target)?;

            debug!(edge = %container_id, count = records.len(), "pushing edge batch");
            let records = records.clone();
            let sink = Arc::clone(&sink);
            let semaphore = Arc::clone(&semaphore);
            let dry = self.dry;
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("writer semaphore closed");
                sink.insert_edges_batch(
                    records,
                    &source_class,
                    &target_class,
                    relation.as_deref(),
                    &source_keys,
                    &target_keys,
                    collection.as_deref(),
                    dry,
                )
                .await
            }));
        }

        for task in tasks {
            task.await??;
        }
        Ok(())
    }
}
