use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid {field}: {source}")]
    Decode {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("schema validation failed: {0}")]
    Validation(&'static str),
}
