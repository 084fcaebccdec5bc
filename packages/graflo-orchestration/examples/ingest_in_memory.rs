//! Minimal end-to-end run: a two-vertex schema, in-memory records, and the
//! in-memory sink standing in for a graph store.
//!
//!     cargo run -p graflo-orchestration --example ingest_in_memory

use serde_json::json;
use std::sync::Arc;

use graflo_core::{Doc, Schema};
use graflo_orchestration::{Caster, DataSourceRegistry, IngestionParams, InMemorySource};
use graflo_storage::{GraphSink, InMemorySink};

const SCHEMA: &str = r#"
general:
    name: people
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
        relation: works_at
resources:
-   resource_name: people
    pipeline:
    -   vertex: person
    -   vertex: company
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let schema = Arc::new(Schema::from_yaml_str(SCHEMA)?);

    let records: Vec<Doc> = vec![
        json!({"id": "john", "name": "Apple"}).as_object().unwrap().clone(),
        json!({"id": "mary", "name": "Oracle"}).as_object().unwrap().clone(),
    ];
    let mut registry = DataSourceRegistry::new();
    registry.register("people", Box::new(InMemorySource::new(records)));

    let sink = Arc::new(InMemorySink::new());
    let caster = Caster::new(schema, IngestionParams::default());
    caster
        .ingest(registry, sink.clone() as Arc<dyn GraphSink>)
        .await?;

    println!("persons:   {}", sink.vertex_count("person"));
    println!("companies: {}", sink.vertex_count("company"));
    println!("edges:     {}", sink.edge_count("person_company"));
    Ok(())
}
