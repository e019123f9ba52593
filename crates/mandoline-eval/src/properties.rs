use serde_json::{Map, Value};

const UNKNOWN: &str = "unknown";

/// Who produced an evaluation: calling client, this server, and the model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentContext {
    pub client: Option<String>,
    pub client_version: Option<String>,
    pub server: Option<String>,
    pub server_version: Option<String>,
    pub model_name: Option<String>,
}

impl EnvironmentContext {
    pub fn to_properties(&self) -> Map<String, Value> {
        let field = |v: &Option<String>| {
            Value::String(v.clone().unwrap_or_else(|| UNKNOWN.to_string()))
        };
        let mut out = Map::new();
        out.insert("client".to_string(), field(&self.client));
        out.insert("client_version".to_string(), field(&self.client_version));
        out.insert("server".to_string(), field(&self.server));
        out.insert("server_version".to_string(), field(&self.server_version));
        out.insert("model_name".to_string(), field(&self.model_name));
        out
    }
}

/// Environment first, caller properties over it, `contentHash` last.
pub fn merge_properties(
    environment: &EnvironmentContext,
    user: Map<String, Value>,
    content_hash: &str,
) -> Map<String, Value> {
    let mut merged = environment.to_properties();
    merged.extend(user);
    merged.insert(
        "contentHash".to_string(),
        Value::String(content_hash.to_string()),
    );
    merged
}
