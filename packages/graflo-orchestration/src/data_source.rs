//! The data-source contract and the in-memory implementation.
//!
//! The orchestrator only ever sees batches of record dicts; what sits on the
//! other side (files, SPARQL endpoints, relational tables) is a connector
//! concern.

use std::collections::HashMap;

use crate::error::{CasterError, Result};
use graflo_core::Doc;

/// Iterator of record batches. Yielding an `Err` aborts the source.
pub type BatchIter = Box<dyn Iterator<Item = Result<Vec<Doc>>> + Send>;

/// Anything that can yield batches of records for one resource.
pub trait DataSource: Send {
    /// Resource this source feeds, when the source knows it.
    fn resource_name(&self) -> Option<&str> {
        None
    }

    /// Produce the batch iterator. Sources are single-shot: calling this
    /// drains the source.
    fn iter_batches(&mut self, batch_size: usize, limit: Option<usize>) -> Result<BatchIter>;
}

/// Records already in memory: a list of dicts, or rows plus column names.
#[derive(Debug, Default)]
pub struct InMemorySource {
    data: Vec<Doc>,
    resource_name: Option<String>,
}

impl InMemorySource {
    pub fn new(data: Vec<Doc>) -> Self {
        Self {
            data,
            resource_name: None,
        }
    }

    pub fn with_resource_name(mut self, name: impl Into<String>) -> Self {
        self.resource_name = Some(name.into());
        self
    }

    /// Dress positional rows with column names.
    pub fn from_rows(rows: Vec<Vec<serde_json::Value>>, columns: &[String]) -> Result<Self> {
        if rows.iter().any(|r| r.len() != columns.len()) {
            return Err(CasterError::config(
                "row length does not match the column list",
            ));
        }
        let data = rows
            .into_iter()
            .map(|row| {
                columns
                    .iter()
                    .cloned()
                    .zip(row)
                    .collect::<Doc>()
            })
            .collect();
        Ok(Self {
            data,
            resource_name: None,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl DataSource for InMemorySource {
    fn resource_name(&self) -> Option<&str> {
        self.resource_name.as_deref()
    }

    fn iter_batches(&mut self, batch_size: usize, limit: Option<usize>) -> Result<BatchIter> {
        let batch_size = batch_size.max(1);
        let mut data = std::mem::take(&mut self.data);
        if let Some(limit) = limit {
            data.truncate(limit);
        }
        let mut batches: Vec<Result<Vec<Doc>>> = Vec::new();
        while !data.is_empty() {
            let rest = data.split_off(batch_size.min(data.len()));
            batches.push(Ok(std::mem::replace(&mut data, rest)));
        }
        Ok(Box::new(batches.into_iter()))
    }
}

/// Data sources gathered per resource name, consumed by the orchestrator.
#[derive(Default)]
pub struct DataSourceRegistry {
    sources: HashMap<String, Vec<Box<dyn DataSource>>>,
}

impl DataSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource_name: impl Into<String>, source: Box<dyn DataSource>) {
        self.sources.entry(resource_name.into()).or_default().push(source);
    }

    /// Remove and return the sources registered for a resource.
    pub fn take_data_sources(&mut self, resource_name: &str) -> Vec<Box<dyn DataSource>> {
        self.sources.remove(resource_name).unwrap_or_default()
    }

    pub fn source_count(&self, resource_name: &str) -> usize {
        self.sources.get(resource_name).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.sources.values().all(Vec::is_empty)
    }
}
