//! Caster: the top-level ingestion coordinator.
//!
//! Iterates data sources, drives every record through its resource's actor
//! tree (with worker-level parallelism), accumulates batches into graph
//! containers, and hands each container to the writer before drawing the
//! next batch. Batch size is the backpressure knob: there is no buffering
//! between producer and writer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::data_source::{DataSource, DataSourceRegistry, InMemorySource};
use crate::error::{CasterError, Result};
use graflo_core::{Doc, GrafloError, GraphContainer, Schema};
use graflo_storage::{DBWriter, GraphSink};

fn default_batch_size() -> usize {
    10_000
}

/// Parameters controlling one ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct IngestionParams {
    /// Remove existing graph data before the first write; the schema stays.
    pub clear_data: bool,
    /// Record-processing workers. Above 1, sources are consumed through a
    /// shared work queue.
    pub n_cores: usize,
    /// Hard cap on records drawn from each source.
    pub max_items: Option<usize>,
    /// Records per container handed to the writer.
    pub batch_size: usize,
    /// Skip sink writes while performing all transformation work.
    pub dry: bool,
    /// Stop after schema initialization; never ingest.
    pub init_only: bool,
    /// Cap on files enumerated per file pattern (connector-side).
    pub limit_files: Option<usize>,
    /// Semaphore width inside the writer; defaults to `n_cores`. Set to 1
    /// for stores that dislike concurrent transactions.
    pub max_concurrent_db_ops: Option<usize>,
    /// Replace an existing schema in the sink instead of failing.
    pub recreate_schema: bool,
    /// Half-open row filter `[after, before)` on `datetime_column`.
    pub datetime_after: Option<String>,
    pub datetime_before: Option<String>,
    pub datetime_column: Option<String>,
}

impl Default for IngestionParams {
    fn default() -> Self {
        Self {
            clear_data: false,
            n_cores: 1,
            max_items: None,
            batch_size: default_batch_size(),
            dry: false,
            init_only: false,
            limit_files: None,
            max_concurrent_db_ops: None,
            recreate_schema: false,
            datetime_after: None,
            datetime_before: None,
            datetime_column: None,
        }
    }
}

impl IngestionParams {
    /// Use every available core for record processing.
    pub fn auto_cores(mut self) -> Self {
        self.n_cores = num_cpus::get().max(1);
        self
    }
}

fn parse_datetime_bound(s: &str) -> Option<chrono::NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(chrono::NaiveTime::MIN))
}

type QueueTask = Option<(Box<dyn DataSource>, Option<String>)>;

pub struct Caster {
    schema: Arc<Schema>,
    pub ingestion_params: IngestionParams,
    cancel: CancellationToken,
}

impl Caster {
    pub fn new(schema: Arc<Schema>, ingestion_params: IngestionParams) -> Self {
        Self {
            schema,
            ingestion_params,
            cancel: CancellationToken::new(),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Token observed at batch boundaries; cancelling it stops all workers
    /// cooperatively, letting in-flight batches complete.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ------------------------------------------------------------------
    // Casting
    // ------------------------------------------------------------------

    /// Cast one batch of records into a graph container. Records failing
    /// with a record-level error are logged and dropped; anything else
    /// aborts the batch.
    pub async fn cast_batch(
        &self,
        batch: Vec<Doc>,
        resource_name: Option<&str>,
    ) -> Result<GraphContainer> {
        let n_cores = self.ingestion_params.n_cores.max(1);
        let mut accumulators = Vec::with_capacity(batch.len());

        if n_cores <= 1 {
            let resource = self.schema.fetch_resource(resource_name)?;
            for doc in &batch {
                match resource.apply(doc) {
                    Ok(acc) => accumulators.push(acc),
                    Err(GrafloError::RecordTransform(reason)) => {
                        warn!(%reason, "record dropped");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        } else {
            let semaphore = Arc::new(Semaphore::new(n_cores));
            let mut tasks = Vec::with_capacity(batch.len());
            for doc in batch {
                let schema = Arc::clone(&self.schema);
                let name = resource_name.map(str::to_string);
                let semaphore = Arc::clone(&semaphore);
                tasks.push(tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("caster semaphore closed");
                    match tokio::task::spawn_blocking(move || {
                        let resource = schema.fetch_resource(name.as_deref())?;
                        resource.apply(&doc)
                    })
                    .await
                    {
                        Ok(inner) => inner.map_err(CasterError::from),
                        Err(join) => Err(CasterError::from(join)),
                    }
                }));
            }
            for task in tasks {
                match task.await? {
                    Ok(acc) => accumulators.push(acc),
                    Err(CasterError::Core(GrafloError::RecordTransform(reason))) => {
                        warn!(%reason, "record dropped");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let mut container = GraphContainer::from_docs_list(accumulators);
        container.pick_unique();
        Ok(container)
    }

    // ------------------------------------------------------------------
    // Processing pipeline
    // ------------------------------------------------------------------

    /// Cast one batch and, when a sink is given, hand the container to the
    /// writer before returning.
    pub async fn process_batch(
        &self,
        batch: Vec<Doc>,
        resource_name: Option<&str>,
        sink: Option<&Arc<dyn GraphSink>>,
    ) -> Result<GraphContainer> {
        let mut container = self.cast_batch(batch, resource_name).await?;
        if let Some(sink) = sink {
            let writer = self.make_db_writer();
            writer
                .write(&mut container, Arc::clone(sink), resource_name)
                .await?;
        }
        Ok(container)
    }

    pub async fn process_data_source(
        &self,
        mut source: Box<dyn DataSource>,
        resource_name: Option<&str>,
        sink: Option<&Arc<dyn GraphSink>>,
    ) -> Result<()> {
        let name = resource_name
            .map(str::to_string)
            .or_else(|| source.resource_name().map(str::to_string));
        let batches = source.iter_batches(
            self.ingestion_params.batch_size.max(1),
            self.ingestion_params.max_items,
        )?;
        for batch in batches {
            if self.cancel.is_cancelled() {
                info!("cancellation observed at batch boundary");
                break;
            }
            let mut batch = batch?;
            self.filter_datetime_rows(&mut batch);
            if batch.is_empty() {
                continue;
            }
            self.process_batch(batch, name.as_deref(), sink).await?;
        }
        Ok(())
    }

    /// Convenience entry for records already in memory.
    pub async fn process_records(
        &self,
        records: Vec<Doc>,
        resource_name: Option<&str>,
        sink: Option<&Arc<dyn GraphSink>>,
    ) -> Result<()> {
        let source = InMemorySource::new(records);
        self.process_data_source(Box::new(source), resource_name, sink)
            .await
    }

    /// Restrict tabular rows to `[after, before)` on the configured column.
    /// Rows whose column is absent or unparseable are dropped while a
    /// filter is active.
    fn filter_datetime_rows(&self, batch: &mut Vec<Doc>) {
        let params = &self.ingestion_params;
        let Some(column) = params.datetime_column.as_deref() else {
            return;
        };
        let after = params.datetime_after.as_deref().and_then(parse_datetime_bound);
        let before = params
            .datetime_before
            .as_deref()
            .and_then(parse_datetime_bound);
        if after.is_none() && before.is_none() {
            return;
        }
        batch.retain(|doc| {
            let Some(value) = doc
                .get(column)
                .and_then(Value::as_str)
                .and_then(parse_datetime_bound)
            else {
                return false;
            };
            after.map_or(true, |a| value >= a) && before.map_or(true, |b| value < b)
        });
    }

    // ------------------------------------------------------------------
    // Queue-based processing
    // ------------------------------------------------------------------

    async fn process_with_queue(
        &self,
        queue: Arc<Mutex<VecDeque<QueueTask>>>,
        sink: Option<&Arc<dyn GraphSink>>,
        worker: usize,
    ) -> Result<()> {
        loop {
            let task = queue.lock().await.pop_front();
            match task {
                Some(Some((source, name))) => {
                    self.process_data_source(source, name.as_deref(), sink)
                        .await?;
                }
                Some(None) => {
                    debug!(worker, "worker received shutdown sentinel");
                    break;
                }
                None => break,
            }
            if self.cancel.is_cancelled() {
                break;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Ingestion orchestration
    // ------------------------------------------------------------------

    /// Drain every registered data source into the sink, multi-worker when
    /// `n_cores > 1`.
    pub async fn ingest_data_sources(
        &self,
        mut registry: DataSourceRegistry,
        sink: Arc<dyn GraphSink>,
    ) -> Result<()> {
        let mut tasks: Vec<(Box<dyn DataSource>, Option<String>)> = Vec::new();
        for resource_name in self.schema.resource_names() {
            let sources = registry.take_data_sources(&resource_name);
            if !sources.is_empty() {
                info!(
                    resource = %resource_name,
                    sources = sources.len(),
                    "data sources found"
                );
                for source in sources {
                    tasks.push((source, Some(resource_name.clone())));
                }
            }
        }

        let started = Instant::now();
        let n_cores = self.ingestion_params.n_cores.max(1);
        if n_cores > 1 {
            let mut queue: VecDeque<QueueTask> = VecDeque::with_capacity(tasks.len() + n_cores);
            for task in tasks {
                queue.push_back(Some(task));
            }
            for _ in 0..n_cores {
                queue.push_back(None);
            }
            let queue = Arc::new(Mutex::new(queue));
            let workers: Vec<_> = (0..n_cores)
                .map(|worker| self.process_with_queue(Arc::clone(&queue), Some(&sink), worker))
                .collect();
            futures::future::try_join_all(workers).await?;
        } else {
            for (source, name) in tasks {
                self.process_data_source(source, name.as_deref(), Some(&sink))
                    .await?;
            }
        }
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ingestion finished"
        );
        Ok(())
    }

    /// Main entry point: initialize the sink, optionally clear data, then
    /// ingest every registered source.
    pub async fn ingest(
        &self,
        registry: DataSourceRegistry,
        sink: Arc<dyn GraphSink>,
    ) -> Result<()> {
        sink.init_db(&self.schema, self.ingestion_params.recreate_schema)
            .await?;
        if self.ingestion_params.clear_data {
            sink.clear_data(&self.schema).await?;
        }
        if self.ingestion_params.init_only {
            info!("ingest execution bound to init");
            return Ok(());
        }
        self.ingest_data_sources(registry, sink).await
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    fn make_db_writer(&self) -> DBWriter {
        let max_concurrent = self
            .ingestion_params
            .max_concurrent_db_ops
            .unwrap_or_else(|| self.ingestion_params.n_cores.max(1));
        DBWriter::new(
            Arc::clone(&self.schema),
            self.ingestion_params.dry,
            max_concurrent,
        )
    }
}
