//! Field transforms: pure renames (`map`) and functional transforms resolved
//! against a closed registry of named functions.
//!
//! The registry replaces dynamic module loading: a transform referencing
//! `module`/`foo` resolves to a registered [`TransformFn`] at `finish_init`
//! and fails fast with [`GrafloError::TransformLoad`] when the name is
//! unknown. User crates may add functions with [`register_function`].

use std::collections::HashMap;
use std::sync::RwLock;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::errors::{GrafloError, Result};
use crate::onto::Doc;

/// A registered transform function: positional input values in, positional
/// output values out. Static parameters come from the transform definition.
pub type TransformFn = fn(&[Value], &Doc) -> Result<Vec<Value>>;

static REGISTRY: Lazy<RwLock<HashMap<String, TransformFn>>> = Lazy::new(|| {
    let mut m: HashMap<String, TransformFn> = HashMap::new();
    m.insert("split_keep_part".into(), builtin::split_keep_part);
    m.insert("to_lower".into(), builtin::to_lower);
    m.insert("to_upper".into(), builtin::to_upper);
    m.insert("strip".into(), builtin::strip);
    m.insert("replace".into(), builtin::replace);
    m.insert("concat".into(), builtin::concat);
    m.insert("parse_datetime".into(), builtin::parse_datetime);
    m.insert("round_to".into(), builtin::round_to);
    RwLock::new(m)
});

/// Register a transform function under a name usable as `foo` in schemas.
pub fn register_function(name: impl Into<String>, func: TransformFn) {
    REGISTRY.write().expect("transform registry lock").insert(name.into(), func);
}

fn resolve_function(module: Option<&str>, foo: &str) -> Option<TransformFn> {
    let registry = REGISTRY.read().expect("transform registry lock");
    if let Some(module) = module {
        if let Some(f) = registry.get(&format!("{module}.{foo}")) {
            return Some(*f);
        }
    }
    registry.get(foo).copied()
}

mod builtin {
    use super::*;

    fn str_arg<'a>(args: &'a [Value], idx: usize) -> Result<&'a str> {
        args.get(idx)
            .and_then(Value::as_str)
            .ok_or_else(|| GrafloError::record(format!("expected string argument at {idx}")))
    }

    pub fn split_keep_part(args: &[Value], params: &Doc) -> Result<Vec<Value>> {
        let input = str_arg(args, 0)?;
        let sep = params.get("sep").and_then(Value::as_str).unwrap_or("/");
        let keep = params.get("keep").and_then(Value::as_i64).unwrap_or(-1);
        let parts: Vec<&str> = input.split(sep).collect();
        let idx = if keep < 0 {
            parts.len() as i64 + keep
        } else {
            keep
        };
        let part = usize::try_from(idx)
            .ok()
            .and_then(|i| parts.get(i))
            .ok_or_else(|| {
                GrafloError::record(format!("split_keep_part: index {keep} out of range"))
            })?;
        Ok(vec![json!(part)])
    }

    pub fn to_lower(args: &[Value], _params: &Doc) -> Result<Vec<Value>> {
        Ok(vec![json!(str_arg(args, 0)?.to_lowercase())])
    }

    pub fn to_upper(args: &[Value], _params: &Doc) -> Result<Vec<Value>> {
        Ok(vec![json!(str_arg(args, 0)?.to_uppercase())])
    }

    pub fn strip(args: &[Value], _params: &Doc) -> Result<Vec<Value>> {
        Ok(vec![json!(str_arg(args, 0)?.trim())])
    }

    pub fn replace(args: &[Value], params: &Doc) -> Result<Vec<Value>> {
        let from = params.get("from").and_then(Value::as_str).unwrap_or("");
        let to = params.get("to").and_then(Value::as_str).unwrap_or("");
        Ok(vec![json!(str_arg(args, 0)?.replace(from, to))])
    }

    pub fn concat(args: &[Value], params: &Doc) -> Result<Vec<Value>> {
        let sep = params.get("sep").and_then(Value::as_str).unwrap_or("");
        let parts: Vec<String> = args
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        Ok(vec![json!(parts.join(sep))])
    }

    pub fn parse_datetime(args: &[Value], params: &Doc) -> Result<Vec<Value>> {
        let format = params
            .get("format")
            .and_then(Value::as_str)
            .unwrap_or("%Y%m%d %H:%M:%S");
        let joined = args
            .iter()
            .map(|v| match v {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        let parsed = chrono::NaiveDateTime::parse_from_str(&joined, format)
            .map_err(|e| GrafloError::record(format!("parse_datetime '{joined}': {e}")))?;
        Ok(vec![json!(parsed.format("%Y-%m-%dT%H:%M:%S").to_string())])
    }

    pub fn round_to(args: &[Value], params: &Doc) -> Result<Vec<Value>> {
        let digits = params.get("digits").and_then(Value::as_u64).unwrap_or(2) as i32;
        let raw = match args.first() {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| GrafloError::record("round_to: expected numeric argument"))?;
        let factor = 10f64.powi(digits);
        Ok(vec![json!((raw * factor).round() / factor)])
    }
}

/// Output pivot: package a single scalar result together with the input
/// field name, e.g. `{name: "Open", value: 17.9}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DressConfig {
    /// Output field that receives the input field name.
    pub key: String,
    /// Output field that receives the function result.
    pub value: String,
}

pub(crate) fn de_one_or_many<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

/// A transform definition: either a pure field rename (`map`) or a named
/// function with declared input and output field tuples.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Transform {
    /// Reference into the schema transform library.
    #[serde(default)]
    pub name: Option<String>,
    /// Namespace of the function (kept for schema compatibility; resolution
    /// tries `module.foo` first, then bare `foo`).
    #[serde(default)]
    pub module: Option<String>,
    /// Function name in the registry.
    #[serde(default)]
    pub foo: Option<String>,
    #[serde(default)]
    pub params: Doc,
    #[serde(default, deserialize_with = "de_one_or_many")]
    pub input: Vec<String>,
    #[serde(default, deserialize_with = "de_one_or_many")]
    pub output: Vec<String>,
    /// Rename table: input field -> output field.
    #[serde(default)]
    pub map: IndexMap<String, String>,
    #[serde(default)]
    pub dress: Option<DressConfig>,

    #[serde(skip)]
    resolved: Option<TransformFn>,
}

impl PartialEq for Transform {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.module == other.module
            && self.foo == other.foo
            && self.params == other.params
            && self.input == other.input
            && self.output == other.output
            && self.map == other.map
            && self.dress == other.dress
    }
}

impl Transform {
    /// Pure mapping transform from a rename table.
    pub fn mapping(map: IndexMap<String, String>) -> Self {
        let mut t = Transform {
            map,
            ..Default::default()
        };
        t.derive_io();
        t
    }

    pub fn is_mapping(&self) -> bool {
        self.foo.is_none()
    }

    /// Fill input/output from whatever was declared: map pairs, dress spec,
    /// or mirroring input into output.
    fn derive_io(&mut self) {
        if self.map.is_empty() && !self.input.is_empty() && !self.output.is_empty() && self.foo.is_none()
        {
            if self.input.len() == self.output.len() {
                self.map = self
                    .input
                    .iter()
                    .cloned()
                    .zip(self.output.iter().cloned())
                    .collect();
            }
        }
        if !self.map.is_empty() {
            if self.input.is_empty() {
                self.input = self.map.keys().cloned().collect();
            }
            if self.output.is_empty() {
                self.output = self.map.values().cloned().collect();
            }
        }
        if let Some(dress) = &self.dress {
            self.output = vec![dress.key.clone(), dress.value.clone()];
        }
        if self.output.is_empty() && !self.input.is_empty() {
            self.output = self.input.clone();
        }
    }

    /// Resolve the library reference and function, then derive field tuples.
    ///
    /// Library resolution is copy-and-merge: the library entry is the base
    /// and locally declared input/output/params override it.
    pub fn finish_init(&mut self, library: &IndexMap<String, Transform>) -> Result<()> {
        if self.foo.is_none() && self.map.is_empty() {
            if let Some(name) = self.name.clone() {
                let base = library.get(&name).ok_or_else(|| {
                    GrafloError::transform_load(&name, "not present in transform library")
                })?;
                let mut merged = base.clone();
                if !self.input.is_empty() {
                    merged.input = self.input.clone();
                }
                if !self.output.is_empty() {
                    merged.output = self.output.clone();
                }
                if !self.params.is_empty() {
                    let mut params = merged.params.clone();
                    params.extend(self.params.clone());
                    merged.params = params;
                }
                merged.name = Some(name);
                *self = merged;
            }
        }

        if let Some(foo) = &self.foo {
            let func = resolve_function(self.module.as_deref(), foo).ok_or_else(|| {
                GrafloError::transform_load(foo, "no such function in the transform registry")
            })?;
            self.resolved = Some(func);
        }

        self.derive_io();

        if self.input.is_empty() && self.output.is_empty() && self.name.is_none() {
            return Err(GrafloError::Validation(
                "transform needs input/output, map or name".into(),
            ));
        }
        if self.dress.is_some() && self.input.len() != 1 {
            return Err(GrafloError::Validation(
                "a dress spec requires exactly one input field".into(),
            ));
        }
        Ok(())
    }

    /// Apply to a record, producing the rewritten fields.
    ///
    /// Both branches require every declared input field: a functional
    /// transform cannot call its function without them, and a mapping
    /// transform fails the record the same way rather than emitting a
    /// partial rename.
    pub fn apply(&self, doc: &Doc) -> Result<Doc> {
        if let Some(func) = self.resolved {
            let mut args = Vec::with_capacity(self.input.len());
            for field in &self.input {
                let value = doc.get(field).cloned().filter(|v| !v.is_null()).ok_or_else(|| {
                    GrafloError::record(format!("missing input field '{field}'"))
                })?;
                args.push(value);
            }
            let results = func(&args, &self.params)?;
            return Ok(self.dress_as_doc(results));
        }

        let mut out = Doc::new();
        for (src, dst) in &self.map {
            let value = doc
                .get(src)
                .ok_or_else(|| GrafloError::record(format!("missing input field '{src}'")))?;
            out.insert(dst.clone(), value.clone());
        }
        Ok(out)
    }

    fn dress_as_doc(&self, results: Vec<Value>) -> Doc {
        let mut out = Doc::new();
        if let Some(dress) = &self.dress {
            out.insert(dress.key.clone(), json!(self.input[0].clone()));
            out.insert(
                dress.value.clone(),
                results.into_iter().next().unwrap_or(Value::Null),
            );
            return out;
        }
        if results.len() == 1 && self.output.len() != 1 {
            // single scalar lands in the last output slot
            if let (Some(last), Some(value)) = (self.output.last(), results.into_iter().next()) {
                out.insert(last.clone(), value);
            }
            return out;
        }
        for (field, value) in self.output.iter().zip(results) {
            out.insert(field.clone(), value);
        }
        out
    }
}
