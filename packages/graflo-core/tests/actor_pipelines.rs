//! End-to-end actor-tree tests: records in, accumulated vertices and edges
//! out.

use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use graflo_core::{
    ActionContext, ActorWrapper, Doc, EdgeConfig, EdgeId, LocationIndex, VertexConfig, VertexRep,
};

fn vertex_config(yaml: &str) -> VertexConfig {
    VertexConfig::from_yaml_str(yaml).unwrap()
}

fn pipeline(yaml: &str) -> ActorWrapper {
    let steps: Value = serde_yaml::from_str(yaml).unwrap();
    ActorWrapper::from_pipeline(steps.as_array().unwrap()).unwrap()
}

fn run(wrapper: &ActorWrapper, doc: Value) -> ActionContext {
    let mut ctx = ActionContext::new();
    wrapper.run(&mut ctx, &doc).unwrap();
    ctx
}

fn doc_of(value: Value) -> Doc {
    value.as_object().unwrap().clone()
}

fn item(i: usize) -> LocationIndex {
    LocationIndex::root().extend_item(i)
}

#[test]
fn test_cross_map_rewires_fields_between_vertices() {
    let vc = vertex_config(
        r#"
vertices:
-   name: person
    fields: [id]
-   name: company
    fields: [name]
"#,
    );
    let mut anw = pipeline(
        r#"
-   vertex: person
-   vertex: company
-   map:
        name: id
        id: name
"#,
    );
    anw.finish_init(&vc, &EdgeConfig::default(), &IndexMap::new(), true)
        .unwrap();

    let ctx = run(
        &anw,
        json!([
            {"name": "John", "id": "Apple"},
            {"name": "Mary", "id": "Oracle"}
        ]),
    );

    assert_eq!(
        ctx.acc_vertex["person"][&item(0)],
        vec![VertexRep {
            vertex: doc_of(json!({"id": "John"})),
            ctx: doc_of(json!({"name": "John", "id": "Apple"})),
        }]
    );
    assert_eq!(
        ctx.acc_vertex["person"][&item(1)],
        vec![VertexRep {
            vertex: doc_of(json!({"id": "Mary"})),
            ctx: doc_of(json!({"name": "Mary", "id": "Oracle"})),
        }]
    );
    assert_eq!(
        ctx.acc_vertex["company"][&item(0)],
        vec![VertexRep {
            vertex: doc_of(json!({"name": "Apple"})),
            ctx: doc_of(json!({"name": "John", "id": "Apple"})),
        }]
    );
    assert_eq!(
        ctx.acc_vertex["company"][&item(1)],
        vec![VertexRep {
            vertex: doc_of(json!({"name": "Oracle"})),
            ctx: doc_of(json!({"name": "Mary", "id": "Oracle"})),
        }]
    );
}

#[test]
fn test_bare_transform_pipeline_synthesizes_vertices() {
    let vc = vertex_config(
        r#"
vertices:
-   name: person
    fields: [id]
-   name: company
    fields: [name]
"#,
    );
    let mut anw = pipeline(
        r#"
-   map:
        name: id
        id: name
"#,
    );
    anw.finish_init(&vc, &EdgeConfig::default(), &IndexMap::new(), true)
        .unwrap();

    let ctx = run(&anw, json!([{"name": "John", "id": "Apple"}]));

    assert_eq!(
        ctx.acc_vertex["person"][&item(0)][0].vertex,
        doc_of(json!({"id": "John"}))
    );
    assert_eq!(
        ctx.acc_vertex["company"][&item(0)][0].vertex,
        doc_of(json!({"name": "Apple"}))
    );
}

#[test]
fn test_targeted_transform_rewrites_one_vertex_only() {
    let vc = vertex_config(
        r#"
vertices:
-   name: person
    fields: [id]
-   name: company
    fields: [id]
"#,
    );
    let mut anw = pipeline(
        r#"
-   vertex: person
-   vertex: company
-   target_vertex: person
    map:
        name: id
"#,
    );
    anw.finish_init(&vc, &EdgeConfig::default(), &IndexMap::new(), true)
        .unwrap();

    let ctx = run(&anw, json!([{"name": "John", "id": "Apple"}]));

    assert_eq!(
        ctx.acc_vertex["person"][&item(0)][0].vertex,
        doc_of(json!({"id": "John"}))
    );
    assert_eq!(
        ctx.acc_vertex["company"][&item(0)][0].vertex,
        doc_of(json!({"id": "Apple"}))
    );
}

#[test]
fn test_ancestor_edge_joins_outer_vertex_to_nested_list() {
    let vc = vertex_config("vertices:\n-   name: work\n    fields: [_key]");
    let mut anw = pipeline(
        r#"
-   vertex: work
-   map:
        id: _key
-   key: referenced_works
    apply:
    -   vertex: work
    -   map:
            referenced_works: _key
    -   source: work
        target: work
"#,
    );
    anw.finish_init(&vc, &EdgeConfig::default(), &IndexMap::new(), true)
        .unwrap();

    let ctx = run(
        &anw,
        json!({
            "id": "W1",
            "referenced_works": ["W10", "W11", "W12", "W13", "W14"]
        }),
    );

    let lindexes: Vec<&LocationIndex> = ctx.acc_vertex["work"].keys().collect();
    assert_eq!(lindexes.len(), 6);
    assert_eq!(lindexes.iter().filter(|l| l.depth() == 1).count(), 1);
    assert_eq!(lindexes.iter().filter(|l| l.depth() > 1).count(), 5);

    let edges = &ctx.acc_global[&EdgeId::new("work", "work", None)];
    assert_eq!(edges.len(), 5);
    for (i, edge) in edges.iter().enumerate() {
        assert_eq!(edge.source, doc_of(json!({"_key": "W1"})));
        assert_eq!(edge.target, doc_of(json!({"_key": format!("W1{i}")})));
    }
}

#[test]
fn test_relation_from_key_fans_out_per_mapping_key() {
    let vc = vertex_config(
        r#"
vertices:
-   name: package
    fields: [name, version]
    indexes:
    -   fields: [name]
"#,
    );
    let mut anw = pipeline(
        r#"
-   vertex: package
-   key: dependencies
    any_key: true
    apply:
    -   vertex: package
    -   source: package
        target: package
        relation_from_key: true
"#,
    );
    anw.finish_init(&vc, &EdgeConfig::default(), &IndexMap::new(), true)
        .unwrap();

    let deps = |n: usize, tag: &str| -> Value {
        (0..n).map(|i| json!({"name": format!("{tag}-{i}")})).collect()
    };
    let ctx = run(
        &anw,
        json!({
            "name": "0ad-data-common",
            "version": "0.0.26-1",
            "dependencies": {
                "depends": deps(29, "dep"),
                "pre-depends": deps(3, "pre"),
                "suggests": deps(2, "sug"),
                "breaks": deps(1, "brk")
            }
        }),
    );

    let counts: IndexMap<EdgeId, usize> = ctx
        .acc_global
        .iter()
        .map(|(k, v)| (k.clone(), v.len()))
        .collect();
    let expected: IndexMap<EdgeId, usize> = [
        (EdgeId::new("package", "package", Some("depends".into())), 29),
        (EdgeId::new("package", "package", Some("pre_depends".into())), 3),
        (EdgeId::new("package", "package", Some("suggests".into())), 2),
        (EdgeId::new("package", "package", Some("breaks".into())), 1),
    ]
    .into_iter()
    .collect();
    assert_eq!(counts, expected);

    // every edge hangs off the root package
    for records in ctx.acc_global.values() {
        for record in records {
            assert_eq!(record.source["name"], json!("0ad-data-common"));
        }
    }
}

#[test]
fn test_match_discriminants_pick_endpoint_scopes() {
    let vc = vertex_config(
        r#"
vertices:
-   name: mention
    fields: [text]
    identity: [_key]
"#,
    );
    let mut anw = pipeline(
        r#"
-   key: triple_index
    apply:
    -   vertex: mention
    -   map:
            hash: _key
-   key: triple
    apply:
    -   vertex: mention
    -   map:
            hash: _key
            role: _role
-   source: mention
    target: mention
    match_source: triple_index
    match_target: triple
    weights:
        direct: [_role]
"#,
    );
    anw.finish_init(&vc, &EdgeConfig::default(), &IndexMap::new(), true)
        .unwrap();

    let ctx = run(
        &anw,
        json!([{
            "triple_index": {"hash": "7a440c01"},
            "triple": [
                {"hash": "5e18cc3a", "text": "habitat shifts", "role": "source"},
                {"hash": "0f0f2562", "text": "occurs in", "role": "relation"},
                {"hash": "c7f68d9f", "text": "paleogene", "role": "target"}
            ]
        }]),
    );

    let edges = &ctx.acc_global[&EdgeId::new("mention", "mention", None)];
    assert_eq!(edges.len(), 3);
    for edge in edges {
        assert_eq!(edge.source["_key"], json!("7a440c01"));
    }
    let roles: std::collections::BTreeSet<&str> = edges
        .iter()
        .map(|e| e.weight["_role"].as_str().unwrap())
        .collect();
    assert_eq!(
        roles,
        ["source", "relation", "target"].into_iter().collect()
    );
}

#[test]
fn test_direct_weights_resolve_from_ambient_context() {
    let vc = vertex_config(
        r#"
vertices:
-   name: author
    fields: [_key, display_name]
    identity: [_key]
-   name: institution
    fields: [_key, display_name]
    identity: [_key]
"#,
    );
    let mut anw = pipeline(
        r#"
-   vertex: author
-   foo: split_keep_part
    params:
        sep: "/"
        keep: -1
    input: [id]
    output: [_key]
-   key: last_known_institution
    apply:
    -   vertex: institution
    -   foo: split_keep_part
        params:
            sep: "/"
            keep: -1
        input: [id]
        output: [_key]
-   source: author
    target: institution
    weights:
        direct: [updated_date, created_date]
"#,
    );
    anw.finish_init(&vc, &EdgeConfig::default(), &IndexMap::new(), true)
        .unwrap();

    let ctx = run(
        &anw,
        json!({
            "id": "https://openalex.org/A123",
            "display_name": "A. Author",
            "updated_date": "2023-06-08",
            "created_date": "2023-06-08",
            "last_known_institution": {
                "id": "https://openalex.org/I456",
                "display_name": "Inst"
            }
        }),
    );

    let edges = &ctx.acc_global[&EdgeId::new("author", "institution", None)];
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].source["_key"], json!("A123"));
    assert_eq!(edges[0].target["_key"], json!("I456"));
    assert_eq!(
        edges[0].weight,
        doc_of(json!({"updated_date": "2023-06-08", "created_date": "2023-06-08"}))
    );
}

#[test]
fn test_greedy_flag_gates_auto_edges() {
    let vc = vertex_config(
        r#"
vertices:
-   name: user
    fields: [id]
-   name: post
    fields: [pid]
"#,
    );
    let ec = EdgeConfig::from_yaml_str("edges:\n-   source: user\n    target: post").unwrap();
    let doc = json!([{"id": "u1", "post_id": "p1"}]);
    let steps = r#"
-   vertex: user
-   map:
        post_id: pid
"#;

    // greedy: the configured edge fires as soon as both endpoints exist,
    // even though post was only synthesized from a transform output
    let mut greedy = pipeline(steps);
    greedy.finish_init(&vc, &ec, &IndexMap::new(), true).unwrap();
    let ctx = run(&greedy, doc.clone());
    assert_eq!(ctx.acc_global[&EdgeId::new("user", "post", None)].len(), 1);

    // non-greedy: post was never explicitly routed, so nothing fires
    let mut lazy = pipeline(steps);
    lazy.finish_init(&vc, &ec, &IndexMap::new(), false).unwrap();
    let ctx = run(&lazy, doc);
    assert!(ctx.acc_global.is_empty());
}

#[test]
fn test_vertex_router_routes_on_discriminator() {
    let vc = vertex_config(
        r#"
vertices:
-   name: person
    fields: [id]
-   name: company
    fields: [id]
"#,
    );
    let mut anw = pipeline("-   type_field: kind");
    anw.finish_init(&vc, &EdgeConfig::default(), &IndexMap::new(), true)
        .unwrap();

    let ctx = run(
        &anw,
        json!([
            {"kind": "person", "id": "p1"},
            {"kind": "company", "id": "c1"},
            {"kind": "spaceship", "id": "x1"}
        ]),
    );

    assert_eq!(ctx.acc_vertex["person"][&item(0)][0].vertex, doc_of(json!({"id": "p1"})));
    assert_eq!(ctx.acc_vertex["company"][&item(1)][0].vertex, doc_of(json!({"id": "c1"})));
    assert_eq!(ctx.acc_vertex.len(), 2);
    assert!(ctx.target_vertices.contains("person"));
}

#[test]
fn test_vertex_router_strips_prefix() {
    let vc = vertex_config("vertices:\n-   name: person\n    fields: [id]");
    let mut anw = pipeline("-   type_field: kind\n    prefix: p_");
    anw.finish_init(&vc, &EdgeConfig::default(), &IndexMap::new(), true)
        .unwrap();

    let ctx = run(&anw, json!([{"kind": "person", "p_id": "p9"}]));
    assert_eq!(ctx.acc_vertex["person"][&item(0)][0].vertex, doc_of(json!({"id": "p9"})));
}

#[test]
fn test_vertex_filters_drop_failing_documents() {
    let vc = vertex_config(
        r#"
vertices:
-   name: feature
    fields: [name, value]
    filters:
    -   field: name
        foo: __ne__
        value: Volume
"#,
    );
    let mut anw = pipeline("-   vertex: feature");
    anw.finish_init(&vc, &EdgeConfig::default(), &IndexMap::new(), true)
        .unwrap();

    let ctx = run(
        &anw,
        json!([
            {"name": "Open", "value": 17.9},
            {"name": "Volume", "value": 1000}
        ]),
    );
    assert_eq!(ctx.acc_vertex["feature"].len(), 1);
    assert_eq!(
        ctx.acc_vertex["feature"][&item(0)][0].vertex["name"],
        json!("Open")
    );
}

#[test]
fn test_keep_fields_narrows_emission() {
    let vc = vertex_config("vertices:\n-   name: user\n    fields: [id, email]");
    let mut anw = pipeline("-   vertex: user\n    keep_fields: [id]");
    anw.finish_init(&vc, &EdgeConfig::default(), &IndexMap::new(), true)
        .unwrap();

    let ctx = run(&anw, json!([{"id": "u1", "email": "u1@example.org"}]));
    assert_eq!(ctx.acc_vertex["user"][&item(0)][0].vertex, doc_of(json!({"id": "u1"})));
}

#[test]
fn test_descend_over_missing_key_or_empty_mapping_is_noop() {
    let vc = vertex_config("vertices:\n-   name: user\n    fields: [id]");
    let mut anw = pipeline(
        r#"
-   key: members
    any_key: true
    apply:
    -   vertex: user
"#,
    );
    anw.finish_init(&vc, &EdgeConfig::default(), &IndexMap::new(), true)
        .unwrap();

    let ctx = run(&anw, json!([{"members": {}}, {"other": 1}]));
    assert!(ctx.acc_vertex.is_empty());
    assert!(ctx.acc_global.is_empty());
}

#[test]
fn test_pipeline_without_vertex_steps_emits_no_edges() {
    let vc = vertex_config(
        "vertices:\n-   name: user\n    fields: [id]\n-   name: post\n    fields: [pid]",
    );
    let mut anw = pipeline("-   source: user\n    target: post");
    anw.finish_init(&vc, &EdgeConfig::default(), &IndexMap::new(), true)
        .unwrap();

    let ctx = run(&anw, json!([{"id": "u1", "pid": "p1"}]));
    assert!(ctx.acc_global.is_empty());
}

#[test]
fn test_unknown_vertex_reference_fails_at_init() {
    let vc = vertex_config("vertices:\n-   name: user\n    fields: [id]");
    let mut anw = pipeline("-   vertex: ghost");
    let err = anw
        .finish_init(&vc, &EdgeConfig::default(), &IndexMap::new(), true)
        .unwrap_err();
    assert!(matches!(
        err,
        graflo_core::GrafloError::SchemaRef { kind: "vertex", .. }
    ));
}
