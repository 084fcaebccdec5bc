//! Schema: the frozen root object wiring vertices, edges, transforms and
//! resources together.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::edge::EdgeConfig;
use crate::errors::{GrafloError, Result};
use crate::onto::DbFlavor;
use crate::resource::Resource;
use crate::transform::Transform;
use crate::vertex::VertexConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaMetadata {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Complete schema configuration. Construct with [`Schema::from_value`] or
/// [`Schema::from_yaml_str`], both of which run [`Schema::finish_init`];
/// after that the schema is read-only for the rest of the ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Schema {
    pub general: SchemaMetadata,
    pub vertex_config: VertexConfig,
    #[serde(default)]
    pub edge_config: EdgeConfig,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub transforms: IndexMap<String, Transform>,
}

impl Schema {
    pub fn from_value(value: Value) -> Result<Self> {
        let mut schema: Schema = serde_json::from_value(value)?;
        schema.finish_init()?;
        Ok(schema)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Override the target store flavor before `finish_init`, e.g. when the
    /// flavor comes from the connection config rather than the schema file.
    pub fn set_db_flavor(&mut self, db_flavor: DbFlavor) {
        self.vertex_config.db_flavor = db_flavor;
    }

    /// Validate and cross-wire everything: vertex normalization, edge
    /// storage resolution, transform library resolution, and per-resource
    /// actor-tree binding. Fatal errors here halt before any ingest work.
    pub fn finish_init(&mut self) -> Result<()> {
        self.vertex_config.finish_init()?;
        self.edge_config
            .finish_init(&self.vertex_config, self.vertex_config.db_flavor)?;

        let mut library = std::mem::take(&mut self.transforms);
        let empty = IndexMap::new();
        let mut result = Ok(());
        for (name, transform) in library.iter_mut() {
            transform.name = Some(name.clone());
            if let Err(e) = transform.finish_init(&empty) {
                result = Err(e);
                break;
            }
        }
        self.transforms = library;
        result?;

        let mut seen = BTreeSet::new();
        for resource in &self.resources {
            if !seen.insert(resource.name().to_string()) {
                return Err(GrafloError::Validation(format!(
                    "resource name {} used more than once",
                    resource.name()
                )));
            }
        }

        let mut resources = std::mem::take(&mut self.resources);
        let mut result = Ok(());
        for resource in &mut resources {
            if let Err(e) =
                resource.finish_init(&self.vertex_config, &self.edge_config, &self.transforms)
            {
                result = Err(e);
                break;
            }
        }
        self.resources = resources;
        result
    }

    /// Fetch a resource by name, or the first one when no name is given.
    pub fn fetch_resource(&self, name: Option<&str>) -> Result<&Resource> {
        match name {
            Some(name) => self
                .resources
                .iter()
                .find(|r| r.name() == name)
                .ok_or_else(|| GrafloError::Validation(format!("resource {name} not found"))),
            None => self
                .resources
                .first()
                .ok_or_else(|| GrafloError::Validation("schema has no resources".into())),
        }
    }

    pub fn resource_names(&self) -> Vec<String> {
        self.resources.iter().map(|r| r.name().to_string()).collect()
    }

    /// Drop vertex types that take part in no edge, pruning actor steps that
    /// referenced them and removing resources reduced to nothing.
    pub fn remove_disconnected_vertices(&mut self) {
        let connected = self.edge_config.vertices();
        let all: BTreeSet<String> = self.vertex_config.vertex_names().into_iter().collect();
        let disconnected: BTreeSet<String> = all.difference(&connected).cloned().collect();
        if disconnected.is_empty() {
            return;
        }
        self.vertex_config.remove_vertices(&disconnected);
        self.resources
            .retain_mut(|resource| resource.prune_vertices(&disconnected));
    }
}
