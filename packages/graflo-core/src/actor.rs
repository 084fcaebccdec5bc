//! The actor tree: typed pipeline steps interpreting one record into graph
//! fragments.
//!
//! Five step variants exist. Vertex emits a vertex document at the current
//! location; Transform rewrites fields and stages the result for sibling
//! emissions; Edge joins previously emitted vertex reps into edge records;
//! Descend recurses into sub-documents, pushing location segments; and
//! VertexRouter picks the vertex type from a runtime discriminator field.
//!
//! Execution is depth-first and left-to-right: children of a descend level
//! observe accumulations made by their left siblings. The tree is stateless
//! between records; all scratch state lives in the per-record
//! [`ActionContext`].

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;

use crate::context::{
    non_null, restrict_doc, ActionContext, EdgeRecord, LocationIndex, StagedTransform, VertexRep,
};
use crate::edge::{Edge, EdgeConfig};
use crate::errors::{GrafloError, Result};
use crate::filter::FilterExpression;
use crate::onto::{Doc, EdgeId, EdgeKind};
use crate::step::normalize_step;
use crate::transform::{de_one_or_many, DressConfig, Transform};
use crate::vertex::VertexConfig;

/// Per-vertex-type view bound into actors at `finish_init`: the set of
/// fields a vertex document may carry (declared fields plus direct-weight
/// fields of incident edges) and the pre-write filters.
#[derive(Debug, Clone)]
pub(crate) struct VertexSchema {
    pub allowed: BTreeSet<String>,
    pub filters: Vec<FilterExpression>,
}

#[derive(Debug, Default)]
pub(crate) struct BoundSchemas {
    pub vertices: BTreeMap<String, VertexSchema>,
}

impl BoundSchemas {
    fn build(vc: &VertexConfig, aux: &BTreeMap<String, BTreeSet<String>>) -> Self {
        let mut vertices = BTreeMap::new();
        for vertex in &vc.vertices {
            let mut allowed: BTreeSet<String> = vertex.field_names().into_iter().collect();
            if let Some(extra) = aux.get(&vertex.name) {
                allowed.extend(extra.iter().cloned());
            }
            vertices.insert(
                vertex.name.clone(),
                VertexSchema {
                    allowed,
                    filters: vertex.filters.clone(),
                },
            );
        }
        Self { vertices }
    }
}

struct InitEnv<'a> {
    vertex_config: &'a VertexConfig,
    transforms: &'a IndexMap<String, Transform>,
    edge_greedy: bool,
    schemas: Arc<BoundSchemas>,
    explicit_vertices: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// Actors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct VertexActor {
    pub name: String,
    keep_fields: Option<Vec<String>>,
    /// Synthesized actors (added from transform outputs) do not count as
    /// explicit routing for non-greedy edges.
    explicit: bool,
    bound: Option<VertexSchema>,
}

impl VertexActor {
    fn new(name: String, keep_fields: Option<Vec<String>>, explicit: bool) -> Self {
        Self {
            name,
            keep_fields,
            explicit,
            bound: None,
        }
    }

    fn bind(&mut self, env: &InitEnv) -> Result<()> {
        if !env.vertex_config.contains(&self.name) {
            return Err(GrafloError::vertex_ref(&self.name));
        }
        let mut schema = env
            .schemas
            .vertices
            .get(&self.name)
            .cloned()
            .expect("schema is built for every configured vertex");
        if let Some(keep) = &self.keep_fields {
            schema.allowed.retain(|f| keep.contains(f));
        }
        self.bound = Some(schema);
        Ok(())
    }

    fn apply(&self, ctx: &mut ActionContext, doc: &Value, loc: &LocationIndex) -> Result<()> {
        let Some(obj) = doc.as_object() else {
            return Ok(());
        };
        let bound = self
            .bound
            .as_ref()
            .ok_or_else(|| GrafloError::Validation("actor tree was not initialized".into()))?;

        let mut vertex = restrict_doc(obj, &bound.allowed);
        let staged: Vec<StagedTransform> = ctx.staged_at(loc).to_vec();
        for transform in staged {
            if transform.to_vertex.as_deref().is_some_and(|t| t != self.name) {
                continue;
            }
            for (k, v) in &transform.fields {
                if bound.allowed.contains(k) && !v.is_null() {
                    vertex.insert(k.clone(), v.clone());
                }
            }
        }
        if !bound.filters.iter().all(|f| f.evaluate(&vertex)) {
            return Ok(());
        }
        ctx.add_rep(
            &self.name,
            loc,
            VertexRep {
                vertex,
                ctx: obj.clone(),
            },
        );
        if self.explicit {
            ctx.target_vertices.insert(self.name.clone());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TransformActor {
    pub transform: Transform,
    pub to_vertex: Option<String>,
    schemas: Option<Arc<BoundSchemas>>,
}

impl TransformActor {
    fn bind(&mut self, env: &InitEnv) -> Result<()> {
        self.transform.finish_init(env.transforms)?;
        if let Some(to_vertex) = &self.to_vertex {
            if !env.vertex_config.contains(to_vertex) {
                return Err(GrafloError::vertex_ref(to_vertex));
            }
        }
        self.schemas = Some(env.schemas.clone());
        Ok(())
    }

    fn apply(&self, ctx: &mut ActionContext, doc: &Value, loc: &LocationIndex) -> Result<()> {
        let Some(obj) = doc.as_object() else {
            return Ok(());
        };
        let out = self.transform.apply(obj)?;
        let schemas = self
            .schemas
            .as_ref()
            .ok_or_else(|| GrafloError::Validation("actor tree was not initialized".into()))?;

        // rewrite reps already emitted at this location
        for (vertex_type, by_loc) in ctx.acc_vertex.iter_mut() {
            if self.to_vertex.as_deref().is_some_and(|t| t != vertex_type.as_str()) {
                continue;
            }
            let Some(schema) = schemas.vertices.get(vertex_type) else {
                continue;
            };
            let Some(reps) = by_loc.get_mut(loc) else {
                continue;
            };
            for rep in reps {
                for (k, v) in &out {
                    if schema.allowed.contains(k) && !v.is_null() {
                        rep.vertex.insert(k.clone(), v.clone());
                    }
                }
            }
        }

        // and stage for emissions yet to come at the same location
        ctx.stage_transform(
            loc,
            StagedTransform {
                fields: out,
                to_vertex: self.to_vertex.clone(),
            },
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EdgeActor {
    pub edge: Edge,
    greedy: bool,
}

impl EdgeActor {
    /// Emit edges between reps of the source and target types around `loc`.
    ///
    /// Target reps come from the actor's own scope (at or beneath `loc`);
    /// source reps prefer the deepest ancestor scope when source and target
    /// are the same type, which is what lets a nested list of targets
    /// inherit a parent vertex as its natural source.
    fn apply(&self, ctx: &mut ActionContext, loc: &LocationIndex) -> Result<()> {
        let edge = &self.edge;
        if !self.greedy && !ctx.target_vertices.contains(&edge.target) {
            return Ok(());
        }

        let relation = if edge.relation_from_key {
            loc.last_key().map(|k| k.replace('-', "_"))
        } else {
            None
        };
        let purpose = relation.or_else(|| edge.purpose.clone());
        let edge_id = EdgeId::new(edge.source.clone(), edge.target.clone(), purpose);
        let weight_fields = edge.direct_weight_names();

        let records: Vec<EdgeRecord> = {
            let sources = self.select(
                ctx,
                &edge.source,
                loc,
                edge.match_source.as_deref(),
                edge.exclude_source.as_deref(),
                true,
            );
            let targets = self.select(
                ctx,
                &edge.target,
                loc,
                edge.match_target.as_deref(),
                edge.exclude_target.as_deref(),
                false,
            );
            let mut records = Vec::new();
            for (s_loc, s) in &sources {
                for (t_loc, t) in &targets {
                    if edge.source == edge.target && s_loc == t_loc && s.vertex == t.vertex {
                        continue;
                    }
                    let mut weight = Doc::new();
                    for field in &weight_fields {
                        let value = non_null(&s.vertex, field)
                            .or_else(|| non_null(&t.vertex, field))
                            .or_else(|| non_null(&s.ctx, field))
                            .or_else(|| non_null(&t.ctx, field));
                        if let Some(value) = value {
                            weight.insert(field.clone(), value.clone());
                        }
                    }
                    records.push(EdgeRecord {
                        source: s.vertex.clone(),
                        target: t.vertex.clone(),
                        weight,
                    });
                }
            }
            records
        };

        for record in records {
            ctx.add_edge(edge_id.clone(), record);
        }
        Ok(())
    }

    /// Pick candidate reps of one endpoint type relative to `loc`.
    fn select<'a>(
        &self,
        ctx: &'a ActionContext,
        vertex_type: &str,
        loc: &LocationIndex,
        match_key: Option<&str>,
        exclude_field: Option<&str>,
        is_source: bool,
    ) -> Vec<(&'a LocationIndex, &'a VertexRep)> {
        let filtered: Vec<(&LocationIndex, &VertexRep)> = ctx
            .reps_of(vertex_type)
            .into_iter()
            .filter(|(rep_loc, rep)| {
                match_key.map_or(true, |k| rep_loc.contains_key(k))
                    && exclude_field.map_or(true, |f| {
                        non_null(&rep.vertex, f).is_none() && non_null(&rep.ctx, f).is_none()
                    })
            })
            .collect();
        if filtered.is_empty() {
            return filtered;
        }

        let under: Vec<_> = filtered
            .iter()
            .filter(|(rep_loc, _)| loc.is_prefix_of(rep_loc))
            .cloned()
            .collect();
        let ancestors: Vec<_> = filtered
            .iter()
            .filter(|(rep_loc, _)| rep_loc.is_proper_prefix_of(loc))
            .cloned()
            .collect();

        if is_source && self.edge.source == self.edge.target && !ancestors.is_empty() {
            return Self::deepest(ancestors);
        }
        if !under.is_empty() {
            return under;
        }
        if !is_source && !self.greedy {
            // non-greedy targets must be emitted at or beneath the edge scope
            return Vec::new();
        }
        if !ancestors.is_empty() {
            return Self::deepest(ancestors);
        }
        if self.greedy {
            return Self::max_congruence(filtered, loc);
        }
        Vec::new()
    }

    fn deepest<'a>(
        reps: Vec<(&'a LocationIndex, &'a VertexRep)>,
    ) -> Vec<(&'a LocationIndex, &'a VertexRep)> {
        let max_depth = reps.iter().map(|(l, _)| l.depth()).max().unwrap_or(0);
        reps.into_iter()
            .filter(|(l, _)| l.depth() == max_depth)
            .collect()
    }

    fn max_congruence<'a>(
        reps: Vec<(&'a LocationIndex, &'a VertexRep)>,
        loc: &LocationIndex,
    ) -> Vec<(&'a LocationIndex, &'a VertexRep)> {
        let best = reps
            .iter()
            .map(|(l, _)| l.congruence_measure(loc))
            .max()
            .unwrap_or(0);
        reps.into_iter()
            .filter(|(l, _)| l.congruence_measure(loc) == best)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct DescendActor {
    pub key: Option<String>,
    pub any_key: bool,
    pub children: Vec<ActorWrapper>,
}

impl DescendActor {
    fn apply(&self, ctx: &mut ActionContext, doc: &Value, loc: &LocationIndex) -> Result<()> {
        let (sub, base, wrap_key): (&Value, LocationIndex, Option<&str>) = match &self.key {
            Some(key) => match doc.as_object().and_then(|o| o.get(key)) {
                Some(value) => (value, loc.extend_key(key), Some(key.as_str())),
                None => return Ok(()),
            },
            None => (doc, loc.clone(), None),
        };

        if self.any_key {
            if let Some(obj) = sub.as_object() {
                for (key, value) in obj {
                    self.run_items(ctx, value, base.extend_key(key), Some(key.as_str()))?;
                }
            }
            return Ok(());
        }
        self.run_items(ctx, sub, base, wrap_key)
    }

    /// A non-list sub-document is treated as a single-element list, so every
    /// level gets a positional segment and sibling levels stay congruent.
    fn run_items(
        &self,
        ctx: &mut ActionContext,
        value: &Value,
        base: LocationIndex,
        wrap_key: Option<&str>,
    ) -> Result<()> {
        match value {
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.run_level(ctx, item, base.extend_item(i), wrap_key)?;
                }
                Ok(())
            }
            other => self.run_level(ctx, other, base.extend_item(0), wrap_key),
        }
    }

    fn run_level(
        &self,
        ctx: &mut ActionContext,
        item: &Value,
        item_loc: LocationIndex,
        wrap_key: Option<&str>,
    ) -> Result<()> {
        let wrapped;
        let doc: &Value = if item.is_object() {
            item
        } else if let Some(key) = wrap_key {
            // scalar list items become `{key: value}` so field-addressed
            // transforms can reach them
            let mut m = Map::new();
            m.insert(key.to_string(), item.clone());
            wrapped = Value::Object(m);
            &wrapped
        } else {
            return Ok(());
        };
        for child in &self.children {
            child.apply(ctx, doc, &item_loc)?;
        }
        Ok(())
    }

    /// Add Vertex steps for configured vertex types that no explicit step
    /// emits but whose fields this level's transforms produce.
    fn synthesize_vertices(&mut self, env: &InitEnv) -> Result<()> {
        let mut outputs: BTreeSet<String> = BTreeSet::new();
        for child in &self.children {
            if let Actor::Transform(t) = &child.actor {
                if t.to_vertex.is_none() {
                    outputs.extend(t.transform.output.iter().cloned());
                }
            }
        }
        if outputs.is_empty() {
            return Ok(());
        }
        let present: BTreeSet<String> = self
            .children
            .iter()
            .filter_map(|c| match &c.actor {
                Actor::Vertex(v) => Some(v.name.clone()),
                _ => None,
            })
            .collect();
        for vertex in &env.vertex_config.vertices {
            if env.explicit_vertices.contains(&vertex.name) || present.contains(vertex.name.as_str())
            {
                continue;
            }
            if vertex.field_names().iter().any(|f| outputs.contains(f)) {
                let mut actor = VertexActor::new(vertex.name.clone(), None, false);
                actor.bind(env)?;
                self.children.push(ActorWrapper {
                    actor: Actor::Vertex(actor),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct VertexRouterActor {
    pub type_field: String,
    pub prefix: Option<String>,
    pub field_map: Option<IndexMap<String, String>>,
    schemas: Option<Arc<BoundSchemas>>,
}

impl VertexRouterActor {
    fn bind(&mut self, env: &InitEnv) -> Result<()> {
        if self.prefix.is_some() && self.field_map.is_some() {
            return Err(GrafloError::Validation(
                "vertex_router: prefix and field_map are mutually exclusive".into(),
            ));
        }
        self.schemas = Some(env.schemas.clone());
        Ok(())
    }

    fn apply(&self, ctx: &mut ActionContext, doc: &Value, loc: &LocationIndex) -> Result<()> {
        let Some(obj) = doc.as_object() else {
            return Ok(());
        };
        let Some(type_value) = obj.get(&self.type_field).and_then(Value::as_str) else {
            return Ok(());
        };
        let schemas = self
            .schemas
            .as_ref()
            .ok_or_else(|| GrafloError::Validation("actor tree was not initialized".into()))?;
        let Some(schema) = schemas.vertices.get(type_value) else {
            warn!(vertex = type_value, "router discriminator names an unknown vertex type");
            return Ok(());
        };

        let mut source = Doc::new();
        if let Some(prefix) = &self.prefix {
            for (k, v) in obj {
                let key = k.strip_prefix(prefix.as_str()).unwrap_or(k);
                source.insert(key.to_string(), v.clone());
            }
        } else if let Some(field_map) = &self.field_map {
            for (original, renamed) in field_map {
                if let Some(v) = obj.get(original) {
                    source.insert(renamed.clone(), v.clone());
                }
            }
        } else {
            source = obj.clone();
        }

        let mut vertex = restrict_doc(&source, &schema.allowed);
        let staged: Vec<StagedTransform> = ctx.staged_at(loc).to_vec();
        for transform in staged {
            if transform.to_vertex.as_deref().is_some_and(|t| t != type_value) {
                continue;
            }
            for (k, v) in &transform.fields {
                if schema.allowed.contains(k) && !v.is_null() {
                    vertex.insert(k.clone(), v.clone());
                }
            }
        }
        if !schema.filters.iter().all(|f| f.evaluate(&vertex)) {
            return Ok(());
        }
        ctx.add_rep(
            type_value,
            loc,
            VertexRep {
                vertex,
                ctx: obj.clone(),
            },
        );
        ctx.target_vertices.insert(type_value.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Actor {
    Vertex(VertexActor),
    Transform(TransformActor),
    Edge(EdgeActor),
    Descend(DescendActor),
    Router(VertexRouterActor),
}

// ---------------------------------------------------------------------------
// Step parsing
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct VertexStep {
    vertex: String,
    #[serde(default)]
    keep_fields: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TransformStep {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    module: Option<String>,
    #[serde(default)]
    foo: Option<String>,
    #[serde(default)]
    params: Doc,
    #[serde(default, deserialize_with = "de_one_or_many")]
    input: Vec<String>,
    #[serde(default, deserialize_with = "de_one_or_many")]
    output: Vec<String>,
    #[serde(default)]
    map: IndexMap<String, String>,
    #[serde(default)]
    dress: Option<DressConfig>,
    #[serde(default, alias = "target_vertex")]
    to_vertex: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DescendStep {
    #[serde(default, alias = "into")]
    key: Option<String>,
    #[serde(default)]
    any_key: bool,
    #[serde(default)]
    pipeline: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RouterStep {
    type_field: String,
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default)]
    field_map: Option<IndexMap<String, String>>,
}

// ---------------------------------------------------------------------------
// Wrapper
// ---------------------------------------------------------------------------

/// One node of the actor tree. Descend nodes own their children in author
/// order; all other nodes are leaves.
#[derive(Debug, Clone)]
pub struct ActorWrapper {
    pub actor: Actor,
}

impl ActorWrapper {
    /// Build the root wrapper from a resource pipeline: an implicit descend
    /// with a null key over the listed steps.
    pub fn from_pipeline(steps: &[Value]) -> Result<Self> {
        let children = steps
            .iter()
            .map(Self::from_step)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            actor: Actor::Descend(DescendActor {
                key: None,
                any_key: false,
                children,
            }),
        })
    }

    /// Build a wrapper from one raw step in any accepted surface shape.
    pub fn from_step(value: &Value) -> Result<Self> {
        let canonical = normalize_step(value)?;
        Self::parse_canonical(canonical)
    }

    fn parse_canonical(canonical: Value) -> Result<Self> {
        let Value::Object(mut obj) = canonical else {
            return Err(GrafloError::StepShape(format!(
                "canonical step must be a mapping, got {canonical}"
            )));
        };
        let step_type = obj
            .remove("type")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| GrafloError::StepShape("canonical step lost its type tag".into()))?;
        let rest = Value::Object(obj);

        let actor = match step_type.as_str() {
            "vertex" => {
                let step: VertexStep = serde_json::from_value(rest)
                    .map_err(|e| GrafloError::StepShape(format!("vertex step: {e}")))?;
                Actor::Vertex(VertexActor::new(step.vertex, step.keep_fields, true))
            }
            "transform" => {
                let step: TransformStep = serde_json::from_value(rest)
                    .map_err(|e| GrafloError::StepShape(format!("transform step: {e}")))?;
                let mut transform = Transform::default();
                transform.name = step.name;
                transform.module = step.module;
                transform.foo = step.foo;
                transform.params = step.params;
                transform.input = step.input;
                transform.output = step.output;
                transform.map = step.map;
                transform.dress = step.dress;
                Actor::Transform(TransformActor {
                    transform,
                    to_vertex: step.to_vertex,
                    schemas: None,
                })
            }
            "edge" => {
                let edge: Edge = serde_json::from_value(rest)
                    .map_err(|e| GrafloError::StepShape(format!("edge step: {e}")))?;
                Actor::Edge(EdgeActor { edge, greedy: true })
            }
            "descend" => {
                let step: DescendStep = serde_json::from_value(rest)
                    .map_err(|e| GrafloError::StepShape(format!("descend step: {e}")))?;
                let children = step
                    .pipeline
                    .iter()
                    .map(Self::from_step)
                    .collect::<Result<Vec<_>>>()?;
                Actor::Descend(DescendActor {
                    key: step.key,
                    any_key: step.any_key,
                    children,
                })
            }
            "vertex_router" => {
                let step: RouterStep = serde_json::from_value(rest)
                    .map_err(|e| GrafloError::StepShape(format!("vertex_router step: {e}")))?;
                Actor::Router(VertexRouterActor {
                    type_field: step.type_field,
                    prefix: step.prefix,
                    field_map: step.field_map,
                    schemas: None,
                })
            }
            other => {
                return Err(GrafloError::StepShape(format!(
                    "unknown step type '{other}'"
                )))
            }
        };
        Ok(Self { actor })
    }

    /// Bind the tree to the live schema: validate references, resolve
    /// transforms, synthesize implicit vertex steps, and append edge steps
    /// for configured direct edges the pipeline does not spell out.
    pub fn finish_init(
        &mut self,
        vertex_config: &VertexConfig,
        edge_config: &EdgeConfig,
        transforms: &IndexMap<String, Transform>,
        edge_greedy: bool,
    ) -> Result<()> {
        let mut explicit_vertices = BTreeSet::new();
        let mut explicit_edges = BTreeSet::new();
        self.collect_refs(&mut explicit_vertices, &mut explicit_edges);

        let mut aux: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        self.collect_edge_weights(&mut aux);
        for edge in edge_config.edges_list(false) {
            if edge.kind != EdgeKind::Direct {
                continue;
            }
            for field in edge.direct_weight_names() {
                aux.entry(edge.source.clone()).or_default().insert(field.clone());
                aux.entry(edge.target.clone()).or_default().insert(field);
            }
        }

        let env = InitEnv {
            vertex_config,
            transforms,
            edge_greedy,
            schemas: Arc::new(BoundSchemas::build(vertex_config, &aux)),
            explicit_vertices,
        };
        self.init_inner(&env)?;

        if let Actor::Descend(root) = &mut self.actor {
            for edge in edge_config.edges_list(false) {
                if edge.kind != EdgeKind::Direct || explicit_edges.contains(&edge.edge_id()) {
                    continue;
                }
                let mut bound = edge.clone();
                bound.finish_init(vertex_config, vertex_config.db_flavor)?;
                root.children.push(ActorWrapper {
                    actor: Actor::Edge(EdgeActor {
                        edge: bound,
                        greedy: edge_greedy,
                    }),
                });
            }
        }
        Ok(())
    }

    fn init_inner(&mut self, env: &InitEnv) -> Result<()> {
        match &mut self.actor {
            Actor::Vertex(actor) => actor.bind(env),
            Actor::Transform(actor) => actor.bind(env),
            Actor::Router(actor) => actor.bind(env),
            Actor::Edge(actor) => {
                actor
                    .edge
                    .finish_init(env.vertex_config, env.vertex_config.db_flavor)?;
                actor.greedy = env.edge_greedy;
                Ok(())
            }
            Actor::Descend(descend) => {
                for child in &mut descend.children {
                    child.init_inner(env)?;
                }
                descend.synthesize_vertices(env)
            }
        }
    }

    /// Run the tree against a whole record.
    pub fn run(&self, ctx: &mut ActionContext, doc: &Value) -> Result<()> {
        self.apply(ctx, doc, &LocationIndex::root())
    }

    pub(crate) fn apply(
        &self,
        ctx: &mut ActionContext,
        doc: &Value,
        loc: &LocationIndex,
    ) -> Result<()> {
        match &self.actor {
            Actor::Vertex(actor) => actor.apply(ctx, doc, loc),
            Actor::Transform(actor) => actor.apply(ctx, doc, loc),
            Actor::Edge(actor) => actor.apply(ctx, loc),
            Actor::Descend(actor) => actor.apply(ctx, doc, loc),
            Actor::Router(actor) => actor.apply(ctx, doc, loc),
        }
    }

    /// Total number of actors in this subtree.
    pub fn count(&self) -> usize {
        1 + match &self.actor {
            Actor::Descend(d) => d.children.iter().map(ActorWrapper::count).sum(),
            _ => 0,
        }
    }

    fn collect_refs(&self, vertices: &mut BTreeSet<String>, edges: &mut BTreeSet<EdgeId>) {
        match &self.actor {
            Actor::Vertex(v) => {
                vertices.insert(v.name.clone());
            }
            Actor::Edge(e) => {
                edges.insert(e.edge.edge_id());
            }
            Actor::Descend(d) => {
                for child in &d.children {
                    child.collect_refs(vertices, edges);
                }
            }
            _ => {}
        }
    }

    fn collect_edge_weights(&self, aux: &mut BTreeMap<String, BTreeSet<String>>) {
        match &self.actor {
            Actor::Edge(e) => {
                for field in e.edge.direct_weight_names() {
                    aux.entry(e.edge.source.clone())
                        .or_default()
                        .insert(field.clone());
                    aux.entry(e.edge.target.clone()).or_default().insert(field);
                }
            }
            Actor::Descend(d) => {
                for child in &d.children {
                    child.collect_edge_weights(aux);
                }
            }
            _ => {}
        }
    }

    /// True when this node directly references one of the named vertices.
    pub fn mentions_vertices(&self, names: &BTreeSet<String>) -> bool {
        match &self.actor {
            Actor::Vertex(v) => names.contains(&v.name),
            Actor::Transform(t) => t
                .to_vertex
                .as_ref()
                .is_some_and(|v| names.contains(v)),
            Actor::Edge(e) => names.contains(&e.edge.source) || names.contains(&e.edge.target),
            _ => false,
        }
    }

    /// Drop descendant steps referencing the named vertices.
    pub fn prune_vertices(&mut self, names: &BTreeSet<String>) {
        if let Actor::Descend(d) = &mut self.actor {
            d.children.retain_mut(|child| {
                child.prune_vertices(names);
                !child.mentions_vertices(names)
            });
        }
    }
}
