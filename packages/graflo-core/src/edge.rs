//! Edge type configuration: endpoints, weights, indexes, relation handling.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{GrafloError, Result};
use crate::onto::{DbFlavor, EdgeId, EdgeKind, FieldType, Index};
use crate::vertex::{Field, VertexConfig};

/// Relation assigned to edges on stores that require every edge to carry a
/// named type, when the schema does not set one.
pub const DEFAULT_RELATION: &str = "relates";

/// Edge attribute configuration: direct fields read off the endpoint reps at
/// emission time, plus vertex-sourced weights resolved at write time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightConfig {
    #[serde(default)]
    pub vertices: Vec<crate::onto::Weight>,
    #[serde(default)]
    pub direct: Vec<Field>,
}

impl WeightConfig {
    pub fn direct_names(&self) -> Vec<String> {
        self.direct.iter().map(|f| f.name.clone()).collect()
    }
}

/// An edge type between two vertex types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Edge {
    #[serde(alias = "from")]
    pub source: String,
    #[serde(alias = "to")]
    pub target: String,

    /// Restrict source reps to those emitted under this key segment.
    #[serde(default)]
    pub match_source: Option<String>,
    /// Restrict target reps to those emitted under this key segment.
    #[serde(default)]
    pub match_target: Option<String>,
    /// Drop source reps whose document carries this field.
    #[serde(default)]
    pub exclude_source: Option<String>,
    /// Drop target reps whose document carries this field.
    #[serde(default)]
    pub exclude_target: Option<String>,

    /// Relation label (e.g. a Cypher relationship type).
    #[serde(default)]
    pub relation: Option<String>,
    /// Edge field the relation label is stored under, for stores that keep
    /// it as a property.
    #[serde(default)]
    pub relation_field: Option<String>,
    /// Derive the relation label from the enclosing mapping key at emission.
    #[serde(default)]
    pub relation_from_key: bool,

    /// Disambiguates parallel edges between the same endpoint pair.
    #[serde(default)]
    pub purpose: Option<String>,

    #[serde(rename = "type", default)]
    pub kind: EdgeKind,
    /// For INDIRECT edges: vertex type the edge is defined by.
    #[serde(default)]
    pub by: Option<String>,

    #[serde(default, alias = "index")]
    pub indexes: Vec<Index>,
    #[serde(default)]
    pub weights: Option<WeightConfig>,

    /// Storage collection name, synthesized at `finish_init`.
    #[serde(default)]
    pub database_name: Option<String>,

    #[serde(skip)]
    source_dbname: Option<String>,
    #[serde(skip)]
    target_dbname: Option<String>,
}

impl Edge {
    pub fn between(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            match_source: None,
            match_target: None,
            exclude_source: None,
            exclude_target: None,
            relation: None,
            relation_field: None,
            relation_from_key: false,
            purpose: None,
            kind: EdgeKind::Direct,
            by: None,
            indexes: Vec::new(),
            weights: None,
            database_name: None,
            source_dbname: None,
            target_dbname: None,
        }
    }

    pub fn edge_id(&self) -> EdgeId {
        EdgeId::new(self.source.clone(), self.target.clone(), self.purpose.clone())
    }

    pub fn is_aux(&self) -> bool {
        self.kind == EdgeKind::Aux
    }

    pub fn source_dbname(&self) -> &str {
        self.source_dbname.as_deref().unwrap_or(&self.source)
    }

    pub fn target_dbname(&self) -> &str {
        self.target_dbname.as_deref().unwrap_or(&self.target)
    }

    /// Direct weight field names, empty when no weights are configured.
    pub fn direct_weight_names(&self) -> Vec<String> {
        self.weights
            .as_ref()
            .map(WeightConfig::direct_names)
            .unwrap_or_default()
    }

    /// Cross-wire against the vertex configuration: validate endpoint names,
    /// resolve storage names, expand indexes, apply store-specific relation
    /// defaults.
    pub fn finish_init(&mut self, vertex_config: &VertexConfig, db_flavor: DbFlavor) -> Result<()> {
        if !vertex_config.contains(&self.source) {
            return Err(GrafloError::vertex_ref(&self.source));
        }
        if !vertex_config.contains(&self.target) {
            return Err(GrafloError::vertex_ref(&self.target));
        }

        self.source_dbname = Some(vertex_config.vertex_dbname(&self.source)?);
        self.target_dbname = Some(vertex_config.vertex_dbname(&self.target)?);

        if self.kind == EdgeKind::Indirect {
            if let Some(by) = &self.by {
                self.by = Some(vertex_config.vertex_dbname(by)?);
            }
        }

        if self.database_name.is_none() {
            let mut name = format!("{}_{}", self.source_dbname(), self.target_dbname());
            if let Some(purpose) = &self.purpose {
                name = format!("{name}_{purpose}");
            }
            self.database_name = Some(name);
        }

        if db_flavor == DbFlavor::Tigergraph {
            if self.relation.is_none() {
                self.relation = Some(DEFAULT_RELATION.to_string());
            }
            if self.relation_from_key && self.relation_field.is_none() {
                self.relation_field = Some("relation".to_string());
            }
            if let Some(relation_field) = self.relation_field.clone() {
                let weights = self.weights.get_or_insert_with(WeightConfig::default);
                if !weights.direct_names().contains(&relation_field) {
                    weights
                        .direct
                        .push(Field::typed(relation_field.clone(), FieldType::String));
                }
                let has_index = self
                    .indexes
                    .iter()
                    .any(|idx| idx.fields.contains(&relation_field));
                if !has_index {
                    self.indexes.push(Index::over(vec![relation_field]));
                }
            }
        }

        let indexes = std::mem::take(&mut self.indexes);
        self.indexes = indexes
            .into_iter()
            .map(|idx| Self::init_index(idx, vertex_config, db_flavor))
            .collect::<Result<_>>()?;
        Ok(())
    }

    /// Expand a single edge index: a vertex-named index turns into
    /// `vertex@field` composites; stores with endpoint columns get
    /// `_from`/`_to` prepended for uniqueness.
    fn init_index(mut index: Index, vc: &VertexConfig, db_flavor: DbFlavor) -> Result<Index> {
        let mut fields: Vec<String> = Vec::new();

        match &index.name {
            None => fields.extend(index.fields.iter().cloned()),
            Some(vertex_name) => {
                let prefix = format!("{vertex_name}@");
                let mut raw: Vec<String> = index.fields.clone();
                if !index.exclude_edge_endpoints && db_flavor.has_edge_endpoint_fields() {
                    raw.retain(|f| f != "_from" && f != "_to");
                }
                let already_mapped = !raw.is_empty() && raw.iter().all(|f| f.starts_with(&prefix));
                if already_mapped {
                    fields.extend(raw);
                } else {
                    let base = if raw.is_empty() {
                        vc.index(vertex_name)?.fields.clone()
                    } else {
                        raw
                    };
                    fields.extend(base.into_iter().map(|f| format!("{vertex_name}@{f}")));
                }
            }
        }

        if !index.exclude_edge_endpoints
            && db_flavor.has_edge_endpoint_fields()
            && !fields.iter().any(|f| f == "_from" || f == "_to")
        {
            let mut endpoints = vec!["_from".to_string(), "_to".to_string()];
            endpoints.extend(fields);
            fields = endpoints;
        }

        index.fields = fields;
        Ok(index)
    }
}

/// The set of edge types making up a schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeConfig {
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl EdgeConfig {
    pub fn new(edges: Vec<Edge>) -> Self {
        Self { edges }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    pub fn finish_init(&mut self, vc: &VertexConfig, db_flavor: DbFlavor) -> Result<()> {
        let mut seen: IndexMap<EdgeId, ()> = IndexMap::new();
        for edge in &mut self.edges {
            edge.finish_init(vc, db_flavor)?;
            if seen.insert(edge.edge_id(), ()).is_some() {
                return Err(GrafloError::Validation(format!(
                    "edge {} defined more than once",
                    edge.edge_id()
                )));
            }
        }
        Ok(())
    }

    pub fn edges_list(&self, include_aux: bool) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| include_aux || !e.is_aux())
    }

    pub fn edges_items(&self, include_aux: bool) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges_list(include_aux).map(|e| (e.edge_id(), e))
    }

    pub fn get(&self, edge_id: &EdgeId) -> Option<&Edge> {
        self.edges.iter().find(|e| &e.edge_id() == edge_id)
    }

    pub fn contains(&self, edge_id: &EdgeId) -> bool {
        self.get(edge_id).is_some()
    }

    /// Vertex names taking part in any edge.
    pub fn vertices(&self) -> std::collections::BTreeSet<String> {
        self.edges
            .iter()
            .flat_map(|e| [e.source.clone(), e.target.clone()])
            .collect()
    }
}
