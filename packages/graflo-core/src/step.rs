//! Pipeline step normalisation.
//!
//! Author-facing steps arrive in several surface shapes (`{vertex: "x"}`,
//! `{transform: {...}}`, `{edge: {from, to}}`, flat `{source, target}`,
//! `{key, apply}`, bare lists). [`normalize_step`] rewrites each into a
//! canonical `{type: <variant>, ...}` mapping before validation. The
//! normaliser is total over recognised shapes and idempotent: canonical
//! input passes through unchanged.

use serde_json::{Map, Value};

use crate::errors::{GrafloError, Result};

/// Wrap a single step into a one-element list; pass lists through.
pub fn steps_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn flatten_into(obj: &mut Map<String, Value>, inner: Value) {
    if let Value::Object(inner) = inner {
        for (k, v) in inner {
            obj.insert(k, v);
        }
    }
}

fn normalize_pipeline_key(obj: &mut Map<String, Value>) -> Result<()> {
    let raw = obj.remove("pipeline").or_else(|| obj.remove("apply"));
    if let Some(raw) = raw {
        let steps = steps_list(&raw)
            .iter()
            .map(normalize_step)
            .collect::<Result<Vec<_>>>()?;
        obj.insert("pipeline".into(), Value::Array(steps));
    }
    Ok(())
}

fn with_type(mut obj: Map<String, Value>, step_type: &str) -> Value {
    obj.insert("type".into(), Value::String(step_type.to_string()));
    Value::Object(obj)
}

const TRANSFORM_MARKERS: &[&str] = &[
    "name",
    "map",
    "dress",
    "foo",
    "module",
    "input",
    "to_vertex",
    "target_vertex",
];

/// Rewrite one raw step into canonical `{type, ...}` form.
pub fn normalize_step(value: &Value) -> Result<Value> {
    if let Value::Array(_) = value {
        // a list at step position is an implicit descend over its items
        let mut obj = Map::new();
        obj.insert("pipeline".into(), value.clone());
        normalize_pipeline_key(&mut obj)?;
        return Ok(with_type(obj, "descend"));
    }

    let Value::Object(source) = value else {
        return Err(GrafloError::StepShape(format!(
            "step must be a mapping or a list, got {value}"
        )));
    };
    let mut obj = source.clone();

    if obj.contains_key("type") {
        // already canonical; keep nested pipelines canonical too
        if obj.get("type").and_then(Value::as_str) == Some("descend") {
            normalize_pipeline_key(&mut obj)?;
        }
        return Ok(Value::Object(obj));
    }

    if obj.contains_key("vertex") {
        return Ok(with_type(obj, "vertex"));
    }

    if let Some(inner) = obj.remove("transform") {
        flatten_into(&mut obj, inner);
        return Ok(with_type(obj, "transform"));
    }

    for wrapper in ["edge", "create_edge"] {
        if let Some(inner) = obj.remove(wrapper) {
            flatten_into(&mut obj, inner);
            return Ok(with_type(obj, "edge"));
        }
    }
    let has_source = obj.contains_key("source") || obj.contains_key("from");
    let has_target = obj.contains_key("target") || obj.contains_key("to");
    if has_source && has_target {
        return Ok(with_type(obj, "edge"));
    }

    if let Some(inner) = obj.remove("descend") {
        flatten_into(&mut obj, inner);
        normalize_pipeline_key(&mut obj)?;
        return Ok(with_type(obj, "descend"));
    }

    if let Some(inner) = obj.remove("vertex_router") {
        flatten_into(&mut obj, inner);
        return Ok(with_type(obj, "vertex_router"));
    }
    if obj.contains_key("type_field") {
        return Ok(with_type(obj, "vertex_router"));
    }

    if obj.contains_key("apply") || obj.contains_key("pipeline") {
        normalize_pipeline_key(&mut obj)?;
        return Ok(with_type(obj, "descend"));
    }

    if TRANSFORM_MARKERS.iter().any(|m| obj.contains_key(*m)) {
        return Ok(with_type(obj, "transform"));
    }

    Err(GrafloError::StepShape(format!(
        "could not recognize step shape: {value}"
    )))
}
