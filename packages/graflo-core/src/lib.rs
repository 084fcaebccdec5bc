/*
 * Graflo Core - schema model and transformation engine
 *
 * Schema-driven interpretation of structured records into graph fragments:
 * - Schema model (vertices, edges, fields, indexes, filters, transforms)
 * - Actor tree (vertex / transform / edge / descend / vertex_router steps)
 * - Location-indexed per-record accumulator for cross-level edge joins
 * - Graph container aggregating batches for the writer
 *
 * Everything is store-agnostic; writing lives in graflo-storage and
 * orchestration in graflo-orchestration.
 */

// Public modules
pub mod actor;
pub mod container;
pub mod context;
pub mod edge;
pub mod errors;
pub mod filter;
pub mod onto;
pub mod resource;
pub mod schema;
pub mod step;
pub mod transform;
pub mod vertex;

// Re-exports
pub use actor::{Actor, ActorWrapper};
pub use container::GraphContainer;
pub use context::{ActionContext, DocAccumulator, EdgeRecord, LocationIndex, PathSeg, VertexRep};
pub use edge::{Edge, EdgeConfig, WeightConfig};
pub use errors::{GrafloError, Result};
pub use filter::{ComparisonOperator, FilterDialect, FilterExpression};
pub use onto::{DbFlavor, Doc, EdgeId, EdgeKind, EncodingType, FieldType, Index, IndexKind, Weight};
pub use resource::{resolve_type_caster, Resource, TypeCaster};
pub use schema::{Schema, SchemaMetadata};
pub use step::normalize_step;
pub use transform::{register_function, DressConfig, Transform, TransformFn};
pub use vertex::{Field, Vertex, VertexConfig};
