//! Patterns: the declarative mapping from resource names to physical data
//! sources.
//!
//! A `Patterns` object says *where* records for each resource live (file
//! name regexes, tables, SPARQL classes, plain paths); a [`SourceFactory`]
//! turns each entry into live [`DataSource`]s. The core ships only the
//! in-memory factory path; file readers and connectors plug in from outside.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::data_source::{DataSource, DataSourceRegistry};
use crate::error::Result;
use graflo_core::EncodingType;

/// Files matching a regex within an optional sub-path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilePattern {
    pub regex: String,
    #[serde(default)]
    pub sub_path: Option<String>,
    #[serde(default)]
    pub encoding: EncodingType,
}

impl FilePattern {
    pub fn compiled(&self) -> Result<Regex> {
        Ok(Regex::new(&self.regex)?)
    }

    pub fn matches(&self, file_name: &str) -> Result<bool> {
        Ok(self.compiled()?.is_match(file_name))
    }
}

/// A relational table, optionally date-sliced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TablePattern {
    pub table_name: String,
    #[serde(default)]
    pub schema_name: Option<String>,
    #[serde(default)]
    pub resource_name: Option<String>,
    /// Column used with the orchestrator's `[after, before)` filter.
    #[serde(default)]
    pub date_field: Option<String>,
    /// Extra WHERE fragment appended by the connector.
    #[serde(default)]
    pub date_filter: Option<String>,
}

/// Instances of an RDF class, from an endpoint or a local file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SparqlPattern {
    pub class_uri: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub graph_uri: Option<String>,
}

/// Mapping from resource name to concrete source descriptors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Patterns {
    #[serde(default)]
    pub patterns: IndexMap<String, FilePattern>,
    #[serde(default)]
    pub table_patterns: IndexMap<String, TablePattern>,
    #[serde(default)]
    pub sparql_patterns: IndexMap<String, SparqlPattern>,
    /// Plain resource name -> path mapping.
    #[serde(default)]
    pub resource_mapping: IndexMap<String, String>,
}

impl Patterns {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let patterns: Patterns =
            serde_json::from_value(value).map_err(graflo_core::GrafloError::from)?;
        patterns.validate()?;
        Ok(patterns)
    }

    /// Compile every file regex once, failing fast on invalid ones.
    pub fn validate(&self) -> Result<()> {
        for pattern in self.patterns.values() {
            pattern.compiled()?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
            && self.table_patterns.is_empty()
            && self.sparql_patterns.is_empty()
            && self.resource_mapping.is_empty()
    }
}

/// One pattern entry, as handed to a [`SourceFactory`].
#[derive(Debug, Clone)]
pub enum SourcePattern<'a> {
    File(&'a FilePattern),
    Table(&'a TablePattern),
    Sparql(&'a SparqlPattern),
    Plain(&'a str),
}

/// Opens concrete data sources for a pattern entry. Implementations live
/// with the connectors (file readers, SQL, SPARQL); tests use in-memory
/// factories.
pub trait SourceFactory {
    fn open(
        &self,
        resource_name: &str,
        pattern: SourcePattern<'_>,
    ) -> Result<Vec<Box<dyn DataSource>>>;
}

/// Enumerate every pattern entry through the factory into a registry.
pub fn build_registry(
    patterns: &Patterns,
    factory: &dyn SourceFactory,
) -> Result<DataSourceRegistry> {
    patterns.validate()?;
    let mut registry = DataSourceRegistry::new();
    for (resource_name, pattern) in &patterns.patterns {
        for source in factory.open(resource_name, SourcePattern::File(pattern))? {
            registry.register(resource_name.clone(), source);
        }
    }
    for (resource_name, pattern) in &patterns.table_patterns {
        let name = pattern.resource_name.as_deref().unwrap_or(resource_name);
        for source in factory.open(name, SourcePattern::Table(pattern))? {
            registry.register(name.to_string(), source);
        }
    }
    for (resource_name, pattern) in &patterns.sparql_patterns {
        for source in factory.open(resource_name, SourcePattern::Sparql(pattern))? {
            registry.register(resource_name.clone(), source);
        }
    }
    for (resource_name, path) in &patterns.resource_mapping {
        for source in factory.open(resource_name, SourcePattern::Plain(path))? {
            registry.register(resource_name.clone(), source);
        }
    }
    Ok(registry)
}
