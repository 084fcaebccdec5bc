//! Resources: one actor tree plus a per-field casting table.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::actor::ActorWrapper;
use crate::context::{ActionContext, DocAccumulator};
use crate::edge::{Edge, EdgeConfig};
use crate::errors::{GrafloError, Result};
use crate::onto::{Doc, EncodingType};
use crate::transform::Transform;
use crate::vertex::VertexConfig;

/// Primitive constructors usable in a resource casting table.
///
/// Type expressions are matched against this closed set and never evaluated;
/// anything else is dropped with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCaster {
    Int,
    Uint,
    Float,
    Bool,
    Str,
    Datetime,
}

/// Resolve a casting expression against the allow-list. A `builtins.`
/// prefix is accepted; anything unresolved returns `None`.
pub fn resolve_type_caster(expr: &str) -> Option<TypeCaster> {
    let expr = expr.trim();
    let expr = expr.strip_prefix("builtins.").unwrap_or(expr);
    match expr {
        "int" => Some(TypeCaster::Int),
        "uint" => Some(TypeCaster::Uint),
        "float" => Some(TypeCaster::Float),
        "bool" => Some(TypeCaster::Bool),
        "str" | "string" => Some(TypeCaster::Str),
        "datetime" => Some(TypeCaster::Datetime),
        _ => None,
    }
}

impl TypeCaster {
    pub fn cast(&self, value: &Value) -> Result<Value> {
        let fail = || GrafloError::record(format!("cannot cast {value} as {self:?}"));
        match self {
            TypeCaster::Int => match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|f| f as i64))
                    .map(Value::from)
                    .ok_or_else(fail),
                Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| fail()),
                Value::Bool(b) => Ok(Value::from(*b as i64)),
                _ => Err(fail()),
            },
            TypeCaster::Uint => match value {
                Value::Number(n) => n.as_u64().map(Value::from).ok_or_else(fail),
                Value::String(s) => s.trim().parse::<u64>().map(Value::from).map_err(|_| fail()),
                _ => Err(fail()),
            },
            TypeCaster::Float => match value {
                Value::Number(n) => n.as_f64().map(Value::from).ok_or_else(fail),
                Value::String(s) => s.trim().parse::<f64>().map(Value::from).map_err(|_| fail()),
                _ => Err(fail()),
            },
            TypeCaster::Bool => match value {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::Number(n) => Ok(Value::Bool(n.as_f64() != Some(0.0))),
                Value::String(s) => match s.trim().to_lowercase().as_str() {
                    "true" | "1" | "yes" => Ok(Value::Bool(true)),
                    "false" | "0" | "no" => Ok(Value::Bool(false)),
                    _ => Err(fail()),
                },
                _ => Err(fail()),
            },
            TypeCaster::Str => match value {
                Value::String(s) => Ok(Value::String(s.clone())),
                other => Ok(Value::String(other.to_string())),
            },
            TypeCaster::Datetime => {
                let Value::String(s) = value else {
                    return Err(fail());
                };
                let s = s.trim();
                if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                    return Ok(Value::String(dt.to_rfc3339()));
                }
                for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
                    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, format) {
                        return Ok(Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string()));
                    }
                }
                if let Ok(d) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                    return Ok(Value::String(d.format("%Y-%m-%d").to_string()));
                }
                Err(fail())
            }
        }
    }
}

fn cast_fields(value: &mut Value, casters: &IndexMap<String, TypeCaster>) -> Result<()> {
    match value {
        Value::Object(obj) => {
            for (key, v) in obj.iter_mut() {
                match casters.get(key) {
                    Some(caster) if !v.is_object() && !v.is_array() && !v.is_null() => {
                        *v = caster.cast(v)?;
                    }
                    _ => cast_fields(v, casters)?,
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                cast_fields(item, casters)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

/// A named data resource: an actor pipeline, a casting table and
/// edge-emission policy. The public operation is [`Resource::apply`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resource {
    #[serde(alias = "name")]
    pub resource_name: String,
    /// Raw pipeline steps; built into the actor tree at `finish_init`.
    #[serde(alias = "apply")]
    pub pipeline: Vec<Value>,
    #[serde(default)]
    pub encoding: EncodingType,
    #[serde(default)]
    pub merge_collections: Vec<String>,
    /// Edges whose weights are looked up in the sink at write time.
    #[serde(default)]
    pub extra_weights: Vec<Edge>,
    /// Field name -> casting expression, resolved against the allow-list.
    #[serde(default)]
    pub types: IndexMap<String, String>,
    /// When false, edge actors wait for explicitly routed targets.
    #[serde(default = "default_true")]
    pub edge_greedy: bool,

    #[serde(skip)]
    root: Option<ActorWrapper>,
    #[serde(skip)]
    casters: IndexMap<String, TypeCaster>,
}

impl Resource {
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    pub fn name(&self) -> &str {
        &self.resource_name
    }

    pub fn root(&self) -> Result<&ActorWrapper> {
        self.root
            .as_ref()
            .ok_or_else(|| GrafloError::Validation("resource was not initialized".into()))
    }

    /// Total actor count, for diagnostics.
    pub fn count(&self) -> usize {
        self.root.as_ref().map(ActorWrapper::count).unwrap_or(0)
    }

    /// Build and bind the actor tree, resolve the casting table, and wire
    /// extra-weight edges against the vertex configuration.
    pub fn finish_init(
        &mut self,
        vertex_config: &VertexConfig,
        edge_config: &EdgeConfig,
        transforms: &IndexMap<String, Transform>,
    ) -> Result<()> {
        self.casters.clear();
        for (field, expr) in &self.types {
            match resolve_type_caster(expr) {
                Some(caster) => {
                    self.casters.insert(field.clone(), caster);
                }
                None => warn!(
                    resource = %self.resource_name,
                    field = %field,
                    expr = %expr,
                    "type expression outside the caster allow-list, dropped"
                ),
            }
        }

        let mut root = ActorWrapper::from_pipeline(&self.pipeline)?;
        root.finish_init(vertex_config, edge_config, transforms, self.edge_greedy)?;
        debug!(
            resource = %self.resource_name,
            actors = root.count(),
            "resource pipeline bound"
        );
        self.root = Some(root);

        for edge in &mut self.extra_weights {
            edge.finish_init(vertex_config, vertex_config.db_flavor)?;
        }
        Ok(())
    }

    /// Interpret one record: cast typed fields, run the actor tree, and
    /// normalize the context into a per-record accumulator.
    pub fn apply(&self, record: &Doc) -> Result<DocAccumulator> {
        let root = self.root()?;
        let mut doc = Value::Object(record.clone());
        if !self.casters.is_empty() {
            cast_fields(&mut doc, &self.casters)?;
        }
        let mut ctx = ActionContext::new();
        root.run(&mut ctx, &doc)?;
        Ok(ctx.normalize())
    }

    /// Drop pipeline steps referencing the named vertices. Returns false
    /// when the whole resource should be removed.
    pub fn prune_vertices(&mut self, names: &std::collections::BTreeSet<String>) -> bool {
        let Some(root) = self.root.as_mut() else {
            return true;
        };
        if root.mentions_vertices(names) {
            return false;
        }
        root.prune_vertices(names);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_resolve_type_caster_allowlist() {
        assert_eq!(resolve_type_caster("int"), Some(TypeCaster::Int));
        assert_eq!(resolve_type_caster("float"), Some(TypeCaster::Float));
        assert_eq!(resolve_type_caster("builtins.str"), Some(TypeCaster::Str));
    }

    #[test]
    fn test_resolve_type_caster_rejects_expressions() {
        assert_eq!(resolve_type_caster("__import__('os').system"), None);
        assert_eq!(resolve_type_caster("lambda x: x"), None);
    }

    #[test]
    fn test_unsafe_caster_expression_is_dropped() {
        let mut resource = Resource::from_yaml_str(
            r#"
resource_name: typed
pipeline:
-   vertex: person
types:
    age: int
    unsafe: "__import__('os').system"
"#,
        )
        .unwrap();
        let vc = VertexConfig::from_yaml_str("vertices:\n-   name: person\n    fields: [id, age]")
            .unwrap();
        resource
            .finish_init(&vc, &EdgeConfig::default(), &IndexMap::new())
            .unwrap();
        assert_eq!(resource.casters.get("age"), Some(&TypeCaster::Int));
        assert!(!resource.casters.contains_key("unsafe"));
    }

    #[test]
    fn test_apply_casts_and_emits() {
        let mut resource = Resource::from_yaml_str(
            r#"
resource_name: people
pipeline:
-   vertex: person
types:
    age: int
"#,
        )
        .unwrap();
        let vc = VertexConfig::from_yaml_str("vertices:\n-   name: person\n    fields: [id, age]")
            .unwrap();
        resource
            .finish_init(&vc, &EdgeConfig::default(), &IndexMap::new())
            .unwrap();

        let mut record = Doc::new();
        record.insert("id".into(), json!("p1"));
        record.insert("age".into(), json!("41"));
        let acc = resource.apply(&record).unwrap();
        assert_eq!(acc.vertices["person"].len(), 1);
        assert_eq!(acc.vertices["person"][0]["age"], json!(41));
    }

    #[test]
    fn test_bad_cast_is_record_error() {
        let mut resource = Resource::from_yaml_str(
            "resource_name: people\npipeline:\n-   vertex: person\ntypes:\n    age: int",
        )
        .unwrap();
        let vc = VertexConfig::from_yaml_str("vertices:\n-   name: person\n    fields: [id, age]")
            .unwrap();
        resource
            .finish_init(&vc, &EdgeConfig::default(), &IndexMap::new())
            .unwrap();
        let mut record = Doc::new();
        record.insert("age".into(), json!("not-a-number"));
        let err = resource.apply(&record).unwrap_err();
        assert!(matches!(err, GrafloError::RecordTransform(_)));
    }

    #[test]
    fn test_count_reports_all_actors() {
        let mut resource = Resource::from_yaml_str(
            r#"
resource_name: works
pipeline:
-   vertex: work
-   key: referenced_works
    apply:
    -   vertex: work
    -   source: work
        target: work
"#,
        )
        .unwrap();
        let vc = VertexConfig::from_yaml_str(
            "vertices:\n-   name: work\n    fields: [_key]",
        )
        .unwrap();
        resource
            .finish_init(&vc, &EdgeConfig::default(), &IndexMap::new())
            .unwrap();
        // root descend + vertex + nested descend + vertex + edge
        assert_eq!(resource.count(), 5);
    }

    #[test]
    fn test_datetime_caster() {
        assert_eq!(
            TypeCaster::Datetime.cast(&json!("2023-06-08 10:00:00")).unwrap(),
            json!("2023-06-08T10:00:00")
        );
        assert_eq!(
            TypeCaster::Datetime.cast(&json!("2023-06-08")).unwrap(),
            json!("2023-06-08")
        );
        assert!(TypeCaster::Datetime.cast(&json!("yesterday")).is_err());
    }
}
