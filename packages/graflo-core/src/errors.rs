use thiserror::Error;

pub type Result<T> = std::result::Result<T, GrafloError>;

#[derive(Error, Debug)]
pub enum GrafloError {
    #[error("schema validation failed: {0}")]
    Validation(String),

    #[error("unknown {kind} reference: {name}")]
    SchemaRef { kind: &'static str, name: String },

    #[error("transform '{name}' could not be resolved: {reason}")]
    TransformLoad { name: String, reason: String },

    #[error("unrecognized pipeline step shape: {0}")]
    StepShape(String),

    #[error("record transform failed: {0}")]
    RecordTransform(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GrafloError {
    pub fn validation<E: std::fmt::Display>(e: E) -> Self {
        Self::Validation(e.to_string())
    }

    pub fn vertex_ref(name: impl Into<String>) -> Self {
        Self::SchemaRef {
            kind: "vertex",
            name: name.into(),
        }
    }

    pub fn edge_ref(name: impl Into<String>) -> Self {
        Self::SchemaRef {
            kind: "edge",
            name: name.into(),
        }
    }

    pub fn transform_load<E: std::fmt::Display>(name: impl Into<String>, reason: E) -> Self {
        Self::TransformLoad {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn record<E: std::fmt::Display>(e: E) -> Self {
        Self::RecordTransform(e.to_string())
    }
}
