use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid resource id: {0:?}")]
    InvalidId(String),

    #[error("api returned invalid response: {0}")]
    InvalidResponse(String),

    #[error("api error: status={status}, body={body}")]
    Api { status: u16, body: String },
}
