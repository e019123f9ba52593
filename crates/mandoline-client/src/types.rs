use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricCreate {
    pub name: String,
    pub description: String,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsQuery {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub tags: Option<Vec<String>>,
    pub filters: Option<Map<String, Value>>,
}

impl MetricsQuery {
    /// Query-string pairs. Tags repeat the key; filters travel as one JSON string.
    pub fn to_pairs(&self) -> Result<Vec<(&'static str, String)>, serde_json::Error> {
        let mut pairs = Vec::new();
        if let Some(skip) = self.skip {
            pairs.push(("skip", skip.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        for tag in self.tags.iter().flatten() {
            pairs.push(("tags", tag.clone()));
        }
        if let Some(filters) = self.filters.as_ref().filter(|f| !f.is_empty()) {
            pairs.push(("filters", serde_json::to_string(filters)?));
        }
        Ok(pairs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationCreate {
    pub metric_id: String,
    pub prompt: String,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: String,
    #[serde(default)]
    pub metric_id: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationsQuery {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub metric_id: Option<String>,
    pub include_content: Option<bool>,
}

impl EvaluationsQuery {
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(skip) = self.skip {
            pairs.push(("skip", skip.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(metric_id) = &self.metric_id {
            pairs.push(("metric_id", metric_id.clone()));
        }
        if let Some(include_content) = self.include_content {
            pairs.push(("include_content", include_content.to_string()));
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metric_update_skips_unset_fields() {
        let update = MetricUpdate {
            tags: Some(vec!["security".to_string()]),
            ..MetricUpdate::default()
        };
        let encoded = serde_json::to_value(&update).expect("encode update");
        assert_eq!(encoded, json!({"tags": ["security"]}));
    }

    #[test]
    fn metrics_query_repeats_tags_and_encodes_filters() {
        let mut filters = Map::new();
        filters.insert("name".to_string(), json!("foo"));
        let query = MetricsQuery {
            skip: Some(10),
            limit: None,
            tags: Some(vec!["a".to_string(), "b".to_string()]),
            filters: Some(filters),
        };
        let pairs = query.to_pairs().expect("pairs");
        assert_eq!(
            pairs,
            vec![
                ("skip", "10".to_string()),
                ("tags", "a".to_string()),
                ("tags", "b".to_string()),
                ("filters", r#"{"name":"foo"}"#.to_string()),
            ]
        );
    }

    #[test]
    fn evaluation_keeps_unknown_fields() {
        let raw = r#"{"id":"e1","metric_id":"m1","score":0.5,"model":"x"}"#;
        let parsed: Evaluation = serde_json::from_str(raw).expect("parse evaluation");
        assert_eq!(parsed.metric_id.as_deref(), Some("m1"));
        assert_eq!(parsed.extra.get("model"), Some(&json!("x")));
        let back = serde_json::to_value(&parsed).expect("encode");
        assert_eq!(back["model"], json!("x"));
    }

    #[test]
    fn evaluations_query_pairs_follow_field_order() {
        let query = EvaluationsQuery {
            skip: None,
            limit: Some(5),
            metric_id: Some("m1".to_string()),
            include_content: Some(false),
        };
        assert_eq!(
            query.to_pairs(),
            vec![
                ("limit", "5".to_string()),
                ("metric_id", "m1".to_string()),
                ("include_content", "false".to_string()),
            ]
        );
    }
}
