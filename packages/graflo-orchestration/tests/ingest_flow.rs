//! End-to-end ingestion tests: records through the caster into the
//! in-memory sink.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

use graflo_core::{Doc, Schema};
use graflo_orchestration::{Caster, DataSourceRegistry, IngestionParams, InMemorySource};
use graflo_storage::{GraphSink, InMemorySink};

fn cross_schema() -> Arc<Schema> {
    Arc::new(
        Schema::from_yaml_str(
            r#"
general:
    name: cross
vertex_config:
    vertices:
    -   name: person
        fields: [id]
    -   name: company
        fields: [name]
edge_config:
    edges:
    -   source: person
        target: company
resources:
-   resource_name: people
    pipeline:
    -   vertex: person
    -   vertex: company
"#,
        )
        .unwrap(),
    )
}

fn person_records(n: usize) -> Vec<Doc> {
    (0..n)
        .map(|i| {
            json!({"id": format!("person-{i}"), "name": format!("company-{i}")})
                .as_object()
                .unwrap()
                .clone()
        })
        .collect()
}

fn registry_with(records: Vec<Doc>) -> DataSourceRegistry {
    let mut registry = DataSourceRegistry::new();
    registry.register("people", Box::new(InMemorySource::new(records)));
    registry
}

#[tokio::test]
async fn test_ingest_single_core() {
    let caster = Caster::new(cross_schema(), IngestionParams::default());
    let sink = Arc::new(InMemorySink::new());
    caster
        .ingest(registry_with(person_records(5)), sink.clone() as Arc<dyn GraphSink>)
        .await
        .unwrap();

    assert_eq!(sink.vertex_count("person"), 5);
    assert_eq!(sink.vertex_count("company"), 5);
    assert_eq!(sink.edge_count("person_company"), 5);
}

#[tokio::test]
async fn test_ingest_multi_core_queue() {
    let schema = Arc::new(
        Schema::from_yaml_str(
            r#"
general:
    name: two
vertex_config:
    vertices:
    -   name: person
        fields: [id]
    -   name: company
        fields: [name]
resources:
-   resource_name: people
    pipeline:
    -   vertex: person
-   resource_name: companies
    pipeline:
    -   vertex: company
"#,
        )
        .unwrap(),
    );
    let params = IngestionParams {
        n_cores: 3,
        batch_size: 2,
        ..Default::default()
    };
    let caster = Caster::new(schema, params);

    let mut registry = DataSourceRegistry::new();
    let people: Vec<Doc> = (0..7)
        .map(|i| json!({"id": format!("p{i}")}).as_object().unwrap().clone())
        .collect();
    let companies: Vec<Doc> = (0..4)
        .map(|i| json!({"name": format!("c{i}")}).as_object().unwrap().clone())
        .collect();
    registry.register("people", Box::new(InMemorySource::new(people)));
    registry.register("companies", Box::new(InMemorySource::new(companies)));

    let sink = Arc::new(InMemorySink::new());
    caster
        .ingest(registry, sink.clone() as Arc<dyn GraphSink>)
        .await
        .unwrap();

    assert_eq!(sink.vertex_count("person"), 7);
    assert_eq!(sink.vertex_count("company"), 4);
}

#[tokio::test]
async fn test_max_items_caps_each_source() {
    let params = IngestionParams {
        max_items: Some(4),
        ..Default::default()
    };
    let caster = Caster::new(cross_schema(), params);
    let sink = Arc::new(InMemorySink::new());
    caster
        .ingest(registry_with(person_records(10)), sink.clone() as Arc<dyn GraphSink>)
        .await
        .unwrap();
    assert_eq!(sink.vertex_count("person"), 4);
}

#[tokio::test]
async fn test_small_batches_match_large_batches() {
    for batch_size in [1usize, 100] {
        let params = IngestionParams {
            batch_size,
            ..Default::default()
        };
        let caster = Caster::new(cross_schema(), params);
        let sink = Arc::new(InMemorySink::new());
        caster
            .ingest(registry_with(person_records(5)), sink.clone() as Arc<dyn GraphSink>)
            .await
            .unwrap();
        assert_eq!(sink.vertex_count("person"), 5, "batch_size {batch_size}");
        assert_eq!(sink.edge_count("person_company"), 5, "batch_size {batch_size}");
    }
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let params = IngestionParams {
        dry: true,
        ..Default::default()
    };
    let caster = Caster::new(cross_schema(), params);
    let sink = Arc::new(InMemorySink::new());
    caster
        .ingest(registry_with(person_records(5)), sink.clone() as Arc<dyn GraphSink>)
        .await
        .unwrap();
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_init_only_skips_ingestion() {
    let params = IngestionParams {
        init_only: true,
        ..Default::default()
    };
    let caster = Caster::new(cross_schema(), params);
    let sink = Arc::new(InMemorySink::new());
    caster
        .ingest(registry_with(person_records(5)), sink.clone() as Arc<dyn GraphSink>)
        .await
        .unwrap();
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_existing_schema_fails_without_recreate() {
    let schema = cross_schema();
    let sink = Arc::new(InMemorySink::new());

    let caster = Caster::new(Arc::clone(&schema), IngestionParams::default());
    caster
        .ingest(registry_with(person_records(2)), sink.clone() as Arc<dyn GraphSink>)
        .await
        .unwrap();

    // second run against the same sink must be explicit about recreating
    let again = Caster::new(Arc::clone(&schema), IngestionParams::default());
    let err = again
        .ingest(registry_with(person_records(2)), sink.clone() as Arc<dyn GraphSink>)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        graflo_orchestration::CasterError::Storage(graflo_storage::StorageError::SchemaExists)
    ));

    let recreate = Caster::new(
        schema,
        IngestionParams {
            recreate_schema: true,
            ..Default::default()
        },
    );
    recreate
        .ingest(registry_with(person_records(3)), sink.clone() as Arc<dyn GraphSink>)
        .await
        .unwrap();
    assert_eq!(sink.vertex_count("person"), 3);
}

#[tokio::test]
async fn test_datetime_window_filters_rows() {
    let schema = Arc::new(
        Schema::from_yaml_str(
            r#"
general:
    name: dated
vertex_config:
    vertices:
    -   name: event
        fields: [id, happened]
        indexes:
        -   fields: [id]
resources:
-   resource_name: events
    pipeline:
    -   vertex: event
"#,
        )
        .unwrap(),
    );
    let params = IngestionParams {
        datetime_column: Some("happened".into()),
        datetime_after: Some("2014-03-10".into()),
        datetime_before: Some("2014-03-12".into()),
        ..Default::default()
    };
    let caster = Caster::new(schema, params);

    let records: Vec<Doc> = [
        ("e1", "2014-03-09"),
        ("e2", "2014-03-10"),
        ("e3", "2014-03-11"),
        ("e4", "2014-03-12"),
        ("e5", "unparseable"),
    ]
    .iter()
    .map(|(id, happened)| {
        json!({"id": id, "happened": happened})
            .as_object()
            .unwrap()
            .clone()
    })
    .collect();

    let mut registry = DataSourceRegistry::new();
    registry.register("events", Box::new(InMemorySource::new(records)));
    let sink = Arc::new(InMemorySink::new());
    caster
        .ingest(registry, sink.clone() as Arc<dyn GraphSink>)
        .await
        .unwrap();

    let ids: Vec<String> = sink
        .docs("event")
        .iter()
        .map(|d| d["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(sink.vertex_count("event"), 2);
    assert!(ids.contains(&"e2".to_string()));
    assert!(ids.contains(&"e3".to_string()));
}

#[tokio::test]
async fn test_cancellation_observed_at_batch_boundary() {
    let caster = Caster::new(cross_schema(), IngestionParams::default());
    caster.cancellation_token().cancel();
    let sink = Arc::new(InMemorySink::new());
    caster
        .ingest(registry_with(person_records(5)), sink.clone() as Arc<dyn GraphSink>)
        .await
        .unwrap();
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_bad_record_is_dropped_not_fatal() {
    let schema = Arc::new(
        Schema::from_yaml_str(
            r#"
general:
    name: lowered
vertex_config:
    vertices:
    -   name: person
        fields: [id]
resources:
-   resource_name: people
    pipeline:
    -   foo: to_lower
        input: [name]
        output: [id]
"#,
        )
        .unwrap(),
    );
    let caster = Caster::new(schema, IngestionParams::default());

    let records: Vec<Doc> = vec![
        json!({"name": "John"}).as_object().unwrap().clone(),
        json!({"other": 1}).as_object().unwrap().clone(),
        json!({"name": "Mary"}).as_object().unwrap().clone(),
    ];
    let mut registry = DataSourceRegistry::new();
    registry.register("people", Box::new(InMemorySource::new(records)));
    let sink = Arc::new(InMemorySink::new());
    caster
        .ingest(registry, sink.clone() as Arc<dyn GraphSink>)
        .await
        .unwrap();

    assert_eq!(sink.vertex_count("person"), 2);
    let ids: Vec<String> = sink
        .docs("person")
        .iter()
        .map(|d| d["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["john", "mary"]);
}
