//! Vertex type configuration: fields, indexes, filters, identity.

use indexmap::IndexMap;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::errors::{GrafloError, Result};
use crate::filter::FilterExpression;
use crate::onto::{DbFlavor, FieldType, Index};

/// A typed vertex field. Schema files may spell a field as a bare string
/// (untyped) or as a `{name, type}` mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub field_type: Option<FieldType>,
}

impl Field {
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: None,
        }
    }

    pub fn typed(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type: Some(field_type),
        }
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.field_type {
            None => serializer.serialize_str(&self.name),
            Some(t) => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("name", &self.name)?;
                map.serialize_entry("type", &t)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct FieldMap {
            name: String,
            #[serde(rename = "type", default)]
            field_type: Option<FieldType>,
        }
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(name) => Ok(Field::untyped(name)),
            Value::Object(_) => {
                let m: FieldMap =
                    serde_json::from_value(value).map_err(D::Error::custom)?;
                Ok(Field {
                    name: m.name,
                    field_type: m.field_type,
                })
            }
            other => Err(D::Error::custom(format!(
                "field must be a string or a mapping, got {other}"
            ))),
        }
    }
}

/// A vertex type: named fields, indexes and pre-write filters.
///
/// Unknown keys are ignored on load so schema files can carry annotations
/// (e.g. inline transform notes) without breaking validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub indexes: Vec<Index>,
    /// Shorthand for the primary index: `identity: [a, b]` is equivalent to
    /// a leading `{fields: [a, b]}` index entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Vec<String>>,
    #[serde(default)]
    pub filters: Vec<FilterExpression>,
    /// Storage collection name; defaults to the vertex name.
    #[serde(default)]
    pub dbname: Option<String>,
}

impl Vertex {
    pub fn new(name: impl Into<String>, fields: Vec<&str>) -> Self {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Field::untyped).collect(),
            indexes: Vec::new(),
            identity: None,
            filters: Vec::new(),
            dbname: None,
        }
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Identity fields: the primary (first) index.
    pub fn identity_fields(&self) -> &[String] {
        self.indexes
            .first()
            .map(|idx| idx.fields.as_slice())
            .unwrap_or(&[])
    }

    pub fn dbname(&self) -> &str {
        self.dbname.as_deref().unwrap_or(&self.name)
    }

    /// Normalize after load: promote the identity shorthand, synthesize the
    /// default index, and pull index-only fields into the field list.
    fn normalize(&mut self) {
        if let Some(identity) = self.identity.take() {
            self.indexes.insert(0, Index::over(identity));
        }
        if self.indexes.is_empty() {
            self.indexes = vec![Index::over(self.field_names())];
        } else {
            let mut seen: Vec<String> = self.field_names();
            for idx in &self.indexes {
                for field in &idx.fields {
                    if !seen.contains(field) {
                        seen.push(field.clone());
                        self.fields.push(Field::untyped(field.clone()));
                    }
                }
            }
        }
    }

    fn finish_init(&mut self, db_flavor: DbFlavor) {
        if db_flavor == DbFlavor::Tigergraph {
            for field in &mut self.fields {
                if field.field_type.is_none() {
                    field.field_type = Some(FieldType::String);
                }
            }
        }
    }

    /// Evaluate the vertex filters against a document.
    pub fn passes_filters(&self, doc: &crate::onto::Doc) -> bool {
        self.filters.iter().all(|f| f.evaluate(doc))
    }
}

/// The set of vertex types making up a schema, with blank-vertex tracking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VertexConfig {
    pub vertices: Vec<Vertex>,
    /// Vertex types without intrinsic identity; their ids are assigned by the
    /// writer.
    #[serde(default)]
    pub blank_vertices: Vec<String>,
    /// Field-type overrides per vertex, carried for schema compatibility.
    #[serde(default)]
    pub force_types: IndexMap<String, Vec<String>>,
    #[serde(default)]
    pub db_flavor: DbFlavor,

    #[serde(skip)]
    by_name: BTreeMap<String, usize>,
}

impl VertexConfig {
    pub fn new(vertices: Vec<Vertex>) -> Result<Self> {
        let mut config = Self {
            vertices,
            ..Default::default()
        };
        config.finish_init()?;
        Ok(config)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let mut config: VertexConfig = serde_json::from_value(value)?;
        config.finish_init()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Normalize every vertex, build the name lookup, validate blank names.
    pub fn finish_init(&mut self) -> Result<()> {
        self.by_name.clear();
        for (i, vertex) in self.vertices.iter_mut().enumerate() {
            vertex.normalize();
            vertex.finish_init(self.db_flavor);
            if self.by_name.insert(vertex.name.clone(), i).is_some() {
                return Err(GrafloError::Validation(format!(
                    "vertex '{}' defined more than once",
                    vertex.name
                )));
            }
        }
        for blank in &self.blank_vertices {
            if !self.by_name.contains_key(blank) {
                return Err(GrafloError::Validation(format!(
                    "blank vertex '{blank}' is not defined as a vertex"
                )));
            }
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn vertex(&self, name: &str) -> Result<&Vertex> {
        // lookup by name first, then by storage name
        if let Some(&i) = self.by_name.get(name) {
            return Ok(&self.vertices[i]);
        }
        self.vertices
            .iter()
            .find(|v| v.dbname() == name)
            .ok_or_else(|| GrafloError::vertex_ref(name))
    }

    pub fn vertex_names(&self) -> Vec<String> {
        self.vertices.iter().map(|v| v.name.clone()).collect()
    }

    pub fn vertex_dbname(&self, name: &str) -> Result<String> {
        Ok(self.vertex(name)?.dbname().to_string())
    }

    pub fn fields_names(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.vertex(name)?.field_names())
    }

    pub fn identity_fields(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.vertex(name)?.identity_fields().to_vec())
    }

    /// Primary index of a vertex.
    pub fn index(&self, name: &str) -> Result<&Index> {
        self.vertex(name)?
            .indexes
            .first()
            .ok_or_else(|| GrafloError::vertex_ref(name))
    }

    pub fn indexes(&self, name: &str) -> Result<&[Index]> {
        Ok(&self.vertex(name)?.indexes)
    }

    pub fn filters(&self, name: &str) -> &[FilterExpression] {
        self.by_name
            .get(name)
            .map(|&i| self.vertices[i].filters.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_blank(&self, name: &str) -> bool {
        self.blank_vertices.iter().any(|b| b == name)
    }

    /// Remove vertices by name (and from the blank list). Rebuilds lookups.
    pub fn remove_vertices(&mut self, names: &std::collections::BTreeSet<String>) {
        if names.is_empty() {
            return;
        }
        self.vertices.retain(|v| !names.contains(&v.name));
        self.blank_vertices.retain(|b| !names.contains(b));
        self.by_name.clear();
        for (i, vertex) in self.vertices.iter().enumerate() {
            self.by_name.insert(vertex.name.clone(), i);
        }
    }
}
