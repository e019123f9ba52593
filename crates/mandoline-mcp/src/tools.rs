use std::sync::Arc;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use mandoline_client::{
    ClientError, EvaluationApi, EvaluationCreate, EvaluationUpdate, EvaluationsQuery, MetricCreate,
    MetricUpdate, MetricsQuery,
};
use mandoline_eval::{build_prompt_response_pair, merge_properties, EnvironmentContext, PayloadError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, error};

use crate::context::{self, ContextError};
use crate::protocol::{JsonRpcResponse, INVALID_PARAMS, METHOD_NOT_FOUND};
use crate::server::McpServer;

/// Evaluations created through tools never echo the prompt/response text back.
const CREATE_INCLUDE_CONTENT: bool = false;

const SKIP_DESC: &str = "Number of results to skip (default 0).";
const LIMIT_DESC: &str =
    "Maximum results to return (default 100, max 1000). Large payloads can be expensive.";
const INCLUDE_CONTENT_DESC: &str = "When false, omits heavy prompt/response text (default true).";
const FILTERS_DESC: &str = "Server-side field-value filters, e.g., { 'name': 'foo' }. \
    Example: {\"name\": \"foo\"} to filter by exact name match.";
const PROPERTIES_DESC: &str =
    "Optional evaluation metadata (e.g., { branch: 'feature/x', commit: '<sha>' }).";
const METRIC_NAME_DESC: &str = "Descriptive label for the metric.";
const METRIC_DESCRIPTION_DESC: &str = "Detailed explanation of what the metric measures.";
const TAGS_DESC: &str = "Optional labels for organization (e.g., ['security']).";
const METRIC_ID_DESC: &str = "Unique ID of the metric to fetch or modify.";
const METRIC_IDS_DESC: &str = "Array of metric IDs for batch evaluation.";
const METRICS_DESC: &str = "Array of metric definitions for bulk creation.";
const MODEL_NAME_DESC: &str =
    "Identifier of the model that generated the response. Only provide if certain.";
const EVALUATION_ID_DESC: &str = "Unique ID of an existing evaluation.";

#[derive(Debug, Error)]
pub enum ToolError {
    /// Reported as a JSON-RPC invalid-params error rather than a tool result.
    #[error("{0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("{0}")]
    Rejected(&'static str),

    #[error("failed to encode result: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct ToolsCallParams {
    name: String,
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct MetricInput {
    name: String,
    description: String,
    tags: Option<Vec<String>>,
}

impl From<MetricInput> for MetricCreate {
    fn from(input: MetricInput) -> Self {
        Self {
            name: input.name,
            description: input.description,
            tags: input.tags,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BatchMetricsInput {
    metrics: Vec<MetricInput>,
}

#[derive(Debug, Deserialize)]
struct MetricIdInput {
    metric_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct MetricsListInput {
    skip: Option<u64>,
    limit: Option<u64>,
    tags: Option<Vec<String>>,
    filters: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct MetricUpdateInput {
    metric_id: String,
    name: Option<String>,
    description: Option<String>,
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct EvaluationInput {
    metric_id: String,
    prompt: Value,
    response: Value,
    model_name: Option<String>,
    properties: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct BatchEvaluationInput {
    metric_ids: Vec<String>,
    prompt: Value,
    response: Value,
    model_name: Option<String>,
    properties: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct EvaluationIdInput {
    evaluation_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct EvaluationsListInput {
    skip: Option<u64>,
    limit: Option<u64>,
    metric_id: Option<String>,
    include_content: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct EvaluationUpdateInput {
    evaluation_id: String,
    properties: Option<Map<String, Value>>,
}

/// Flattened prompt/response plus the properties every evaluation carries.
struct EvaluationPayload {
    prompt: String,
    response: String,
    properties: Map<String, Value>,
}

impl McpServer {
    pub(crate) fn tools_list_result(&self) -> Value {
        json!({
            "tools": [
                {
                    "name": "create_metric",
                    "description": "Creates a new evaluation metric in Mandoline.",
                    "inputSchema": {
                        "type": "object",
                        "required": ["name", "description"],
                        "properties": metric_properties()
                    }
                },
                {
                    "name": "batch_create_metrics",
                    "description": "Creates multiple metrics in one call.",
                    "inputSchema": {
                        "type": "object",
                        "required": ["metrics"],
                        "properties": {
                            "metrics": {
                                "type": "array",
                                "description": METRICS_DESC,
                                "items": {
                                    "type": "object",
                                    "required": ["name", "description"],
                                    "properties": metric_properties()
                                }
                            }
                        }
                    }
                },
                {
                    "name": "get_metric",
                    "description": "Fetches a metric by its ID.",
                    "inputSchema": {
                        "type": "object",
                        "required": ["metric_id"],
                        "properties": {
                            "metric_id": {"type": "string", "description": METRIC_ID_DESC}
                        }
                    }
                },
                {
                    "name": "get_metrics",
                    "description": "Lists metrics with filtering and pagination.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "skip": {"type": "number", "description": SKIP_DESC},
                            "limit": {"type": "number", "description": LIMIT_DESC},
                            "tags": {"type": "array", "items": {"type": "string"}, "description": TAGS_DESC},
                            "filters": {"type": "object", "additionalProperties": true, "description": FILTERS_DESC}
                        }
                    }
                },
                {
                    "name": "update_metric",
                    "description": "Modifies an existing metric's metadata.",
                    "inputSchema": {
                        "type": "object",
                        "required": ["metric_id"],
                        "properties": {
                            "metric_id": {"type": "string", "description": METRIC_ID_DESC},
                            "name": {"type": "string", "description": METRIC_NAME_DESC},
                            "description": {"type": "string", "description": METRIC_DESCRIPTION_DESC},
                            "tags": {"type": "array", "items": {"type": "string"}, "description": TAGS_DESC}
                        }
                    }
                },
                {
                    "name": "create_evaluation",
                    "description": "Evaluates a single prompt/response pair and returns a score (-1 … +1).",
                    "inputSchema": {
                        "type": "object",
                        "required": ["metric_id", "prompt", "response"],
                        "properties": {
                            "metric_id": {"type": "string", "description": METRIC_ID_DESC},
                            "prompt": prompt_schema(),
                            "response": response_schema(),
                            "model_name": {"type": "string", "description": MODEL_NAME_DESC},
                            "properties": {"type": "object", "additionalProperties": true, "description": PROPERTIES_DESC}
                        }
                    }
                },
                {
                    "name": "batch_create_evaluations",
                    "description": "Evaluates the same pair against multiple metrics in one request.",
                    "inputSchema": {
                        "type": "object",
                        "required": ["metric_ids", "prompt", "response"],
                        "properties": {
                            "metric_ids": {"type": "array", "items": {"type": "string"}, "description": METRIC_IDS_DESC},
                            "prompt": prompt_schema(),
                            "response": response_schema(),
                            "model_name": {"type": "string", "description": MODEL_NAME_DESC},
                            "properties": {"type": "object", "additionalProperties": true, "description": PROPERTIES_DESC}
                        }
                    }
                },
                {
                    "name": "get_evaluation",
                    "description": "Retrieves one evaluation by ID.",
                    "inputSchema": {
                        "type": "object",
                        "required": ["evaluation_id"],
                        "properties": {
                            "evaluation_id": {"type": "string", "description": EVALUATION_ID_DESC}
                        }
                    }
                },
                {
                    "name": "get_evaluations",
                    "description": "Lists evaluations with pagination and filtering.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "skip": {"type": "number", "description": SKIP_DESC},
                            "limit": {"type": "number", "description": LIMIT_DESC},
                            "metric_id": {"type": "string", "description": "Filter to specific metric."},
                            "include_content": {"type": "boolean", "description": INCLUDE_CONTENT_DESC}
                        }
                    }
                },
                {
                    "name": "update_evaluation",
                    "description": "Updates evaluation metadata (score is immutable).",
                    "inputSchema": {
                        "type": "object",
                        "required": ["evaluation_id"],
                        "properties": {
                            "evaluation_id": {"type": "string", "description": EVALUATION_ID_DESC},
                            "properties": {"type": "object", "additionalProperties": true, "description": PROPERTIES_DESC}
                        }
                    }
                },
                {
                    "name": "get_server_health",
                    "description": "Check the server health status.",
                    "inputSchema": {"type": "object", "properties": {}}
                }
            ]
        })
    }

    pub(crate) async fn handle_tools_call(&self, id: Value, params: Value) -> JsonRpcResponse {
        let parsed: ToolsCallParams = match serde_json::from_value(params) {
            Ok(v) => v,
            Err(err) => {
                return JsonRpcResponse::error(id, INVALID_PARAMS, format!("invalid params: {err}"));
            }
        };

        let start = Instant::now();
        let args = parsed.arguments;
        let outcome = match parsed.name.as_str() {
            "create_metric" => self.exec_create_metric(args).await,
            "batch_create_metrics" => self.exec_batch_create_metrics(args).await,
            "get_metric" => self.exec_get_metric(args).await,
            "get_metrics" => self.exec_get_metrics(args).await,
            "update_metric" => self.exec_update_metric(args).await,
            "create_evaluation" => self.exec_create_evaluation(args).await,
            "batch_create_evaluations" => self.exec_batch_create_evaluations(args).await,
            "get_evaluation" => self.exec_get_evaluation(args).await,
            "get_evaluations" => self.exec_get_evaluations(args).await,
            "update_evaluation" => self.exec_update_evaluation(args).await,
            "get_server_health" => self.exec_get_server_health(),
            _ => return JsonRpcResponse::error(id, METHOD_NOT_FOUND, "unknown tool"),
        };
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(result) => {
                debug!(tool = %parsed.name, elapsed_ms, "tool ok");
                JsonRpcResponse::success(id, result)
            }
            Err(ToolError::InvalidArguments(message)) => {
                JsonRpcResponse::error(id, INVALID_PARAMS, message)
            }
            Err(err) => {
                let request_id = context::current().map(|ctx| ctx.request_id);
                error!(tool = %parsed.name, request_id = ?request_id, elapsed_ms, error = %err, "tool error");
                JsonRpcResponse::success(id, tool_error_result(&err))
            }
        }
    }

    fn api_client(&self) -> Result<Arc<dyn EvaluationApi>, ToolError> {
        let api_key = context::require_api_key()?;
        Ok(self.clients.client_for(&api_key)?)
    }

    fn environment(&self, model_name: Option<String>) -> EnvironmentContext {
        let client_info = context::current().and_then(|ctx| ctx.client_info);
        let (client, client_version) = client_info
            .map(|info| (info.name, info.version))
            .unwrap_or_default();
        EnvironmentContext {
            client,
            client_version,
            server: Some(self.info().name.clone()),
            server_version: Some(self.info().version.clone()),
            model_name,
        }
    }

    fn evaluation_payload(
        &self,
        prompt: Value,
        response: Value,
        model_name: Option<String>,
        properties: Option<Map<String, Value>>,
    ) -> Result<EvaluationPayload, ToolError> {
        let pair = build_prompt_response_pair(prompt, response)?;
        let hash = pair.content_hash();
        let properties = merge_properties(
            &self.environment(model_name),
            properties.unwrap_or_default(),
            &hash,
        );
        Ok(EvaluationPayload {
            prompt: pair.prompt,
            response: pair.response,
            properties,
        })
    }

    async fn exec_create_metric(&self, arguments: Option<Value>) -> Result<Value, ToolError> {
        let args: MetricInput = parse_args(arguments)?;
        let client = self.api_client()?;
        let metric = client.create_metric(args.into()).await?;
        json_tool_result(&metric)
    }

    async fn exec_batch_create_metrics(
        &self,
        arguments: Option<Value>,
    ) -> Result<Value, ToolError> {
        let args: BatchMetricsInput = parse_args(arguments)?;
        if args.metrics.is_empty() {
            return Err(ToolError::Rejected("No metrics provided for batch creation"));
        }
        let client = self.api_client()?;
        let creates = args.metrics.into_iter().map(MetricCreate::from).collect();
        let metrics = client.batch_create_metrics(creates).await?;
        json_tool_result(&metrics)
    }

    async fn exec_get_metric(&self, arguments: Option<Value>) -> Result<Value, ToolError> {
        let args: MetricIdInput = parse_args(arguments)?;
        let client = self.api_client()?;
        let metric = client.get_metric(&args.metric_id).await?;
        json_tool_result(&metric)
    }

    async fn exec_get_metrics(&self, arguments: Option<Value>) -> Result<Value, ToolError> {
        let args: MetricsListInput = parse_args(arguments)?;
        let client = self.api_client()?;
        let metrics = client
            .get_metrics(MetricsQuery {
                skip: args.skip,
                limit: args.limit,
                tags: args.tags,
                filters: args.filters,
            })
            .await?;
        json_tool_result(&metrics)
    }

    async fn exec_update_metric(&self, arguments: Option<Value>) -> Result<Value, ToolError> {
        let args: MetricUpdateInput = parse_args(arguments)?;
        let update = MetricUpdate {
            name: args.name.filter(|v| !v.is_empty()),
            description: args.description.filter(|v| !v.is_empty()),
            tags: args.tags,
        };
        let client = self.api_client()?;
        let metric = client.update_metric(&args.metric_id, update).await?;
        json_tool_result(&metric)
    }

    async fn exec_create_evaluation(&self, arguments: Option<Value>) -> Result<Value, ToolError> {
        let args: EvaluationInput = parse_args(arguments)?;
        let payload =
            self.evaluation_payload(args.prompt, args.response, args.model_name, args.properties)?;
        let client = self.api_client()?;
        let evaluation = client
            .create_evaluation(
                EvaluationCreate {
                    metric_id: args.metric_id,
                    prompt: payload.prompt,
                    response: payload.response,
                    properties: Some(payload.properties),
                },
                CREATE_INCLUDE_CONTENT,
            )
            .await?;
        json_tool_result(&evaluation)
    }

    async fn exec_batch_create_evaluations(
        &self,
        arguments: Option<Value>,
    ) -> Result<Value, ToolError> {
        let args: BatchEvaluationInput = parse_args(arguments)?;
        if args.metric_ids.is_empty() {
            return Err(ToolError::Rejected("No metric IDs provided for batch evaluation"));
        }
        let payload =
            self.evaluation_payload(args.prompt, args.response, args.model_name, args.properties)?;
        let client = self.api_client()?;
        let creates = args
            .metric_ids
            .into_iter()
            .map(|metric_id| EvaluationCreate {
                metric_id,
                prompt: payload.prompt.clone(),
                response: payload.response.clone(),
                properties: Some(payload.properties.clone()),
            })
            .collect();
        let evaluations = client
            .batch_create_evaluations(creates, CREATE_INCLUDE_CONTENT)
            .await?;
        json_tool_result(&evaluations)
    }

    async fn exec_get_evaluation(&self, arguments: Option<Value>) -> Result<Value, ToolError> {
        let args: EvaluationIdInput = parse_args(arguments)?;
        let client = self.api_client()?;
        let evaluation = client.get_evaluation(&args.evaluation_id).await?;
        json_tool_result(&evaluation)
    }

    async fn exec_get_evaluations(&self, arguments: Option<Value>) -> Result<Value, ToolError> {
        let args: EvaluationsListInput = parse_args(arguments)?;
        let client = self.api_client()?;
        let evaluations = client
            .get_evaluations(EvaluationsQuery {
                skip: args.skip,
                limit: args.limit,
                metric_id: args.metric_id,
                include_content: Some(args.include_content.unwrap_or(true)),
            })
            .await?;
        json_tool_result(&evaluations)
    }

    async fn exec_update_evaluation(&self, arguments: Option<Value>) -> Result<Value, ToolError> {
        let args: EvaluationUpdateInput = parse_args(arguments)?;
        let client = self.api_client()?;
        let evaluation = client
            .update_evaluation(
                &args.evaluation_id,
                EvaluationUpdate {
                    properties: args.properties,
                },
            )
            .await?;
        json_tool_result(&evaluation)
    }

    fn exec_get_server_health(&self) -> Result<Value, ToolError> {
        let info = self.info();
        json_tool_result(&json!({
            "name": info.name,
            "title": info.title,
            "version": info.version,
            "ok": true,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        }))
    }
}

/// Missing arguments are read as `{}` so all-optional tools accept no input.
fn parse_args<T: for<'de> Deserialize<'de>>(arguments: Option<Value>) -> Result<T, ToolError> {
    let args = match arguments {
        Some(Value::Null) | None => Value::Object(Map::new()),
        Some(v) => v,
    };
    serde_json::from_value(args)
        .map_err(|err| ToolError::InvalidArguments(format!("invalid tool arguments: {err}")))
}

fn json_tool_result<T: Serialize + ?Sized>(data: &T) -> Result<Value, ToolError> {
    let text = serde_json::to_string_pretty(data).map_err(ToolError::Encode)?;
    Ok(json!({
        "content": [{"type": "text", "text": text}]
    }))
}

fn tool_error_result(err: &ToolError) -> Value {
    json!({
        "content": [{"type": "text", "text": format!("Failed: {err}")}],
        "isError": true
    })
}

fn metric_properties() -> Value {
    json!({
        "name": {"type": "string", "description": METRIC_NAME_DESC},
        "description": {"type": "string", "description": METRIC_DESCRIPTION_DESC},
        "tags": {"type": "array", "items": {"type": "string"}, "description": TAGS_DESC}
    })
}

fn chat_message_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "description": description,
        "required": ["role", "content"],
        "properties": {
            "role": {
                "type": "string",
                "enum": ["user", "assistant", "system"],
                "description": "Role of the speaker: 'user', 'assistant', or 'system'. Must match the original conversation exactly."
            },
            "content": {
                "type": "string",
                "description": "Verbatim text of the message. No summarization or truncation; this is the ground-truth transcript line."
            }
        }
    })
}

fn asset_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "description": description,
        "required": ["name", "kind", "content"],
        "properties": {
            "name": {"type": "string", "description": "Handle or path of the resource (e.g., 'utils/pager.py')."},
            "kind": {"type": "string", "enum": ["code", "doc", "data", "config", "log", "other"]},
            "content": {"type": "string", "description": "Full text of the asset. May be truncated with an ellipsis marker like '[…]' as long as intent stays clear."},
            "description": {"type": "string", "description": "Single-line purpose summary."},
            "metadata": {"type": "object", "additionalProperties": true, "description": "Optional key-value info. Set metadata.language when the file has one."}
        }
    })
}

fn invocations_schema(description: &str) -> Value {
    json!({
        "type": "array",
        "description": description,
        "items": {
            "type": "object",
            "required": ["name", "arguments"],
            "properties": {
                "name": {"type": "string", "description": "Name of the tool invoked (e.g., 'web_fetch')."},
                "arguments": {"type": "string", "description": "Raw JSON string passed to the tool (exact, unformatted)."},
                "result": {"type": "string", "description": "Raw text or JSON returned by the tool (optional)."}
            }
        }
    })
}

fn prompt_schema() -> Value {
    json!({
        "type": "object",
        "description": "Complete prompt context including conversation history, assets read, and tool calls executed before the assistant reply being evaluated. Must be provided as an object.",
        "required": ["messages"],
        "properties": {
            "messages": {
                "type": "array",
                "description": "COMPLETE conversation history up to but NOT including the assistant reply being evaluated. Include BOTH user and assistant turns in chronological order.",
                "items": chat_message_schema("One conversation turn.")
            },
            "context_assets": {
                "type": "array",
                "description": "Every asset the assistant read while producing the reply. Omit only if genuinely none were consulted.",
                "items": asset_schema("Asset the assistant read")
            },
            "invocations": invocations_schema("All tool calls executed BEFORE the assistant reply (chronological).")
        }
    })
}

fn response_schema() -> Value {
    json!({
        "type": "object",
        "description": "The assistant's complete response being evaluated, including the message content, generated assets, and any tool calls made. Must be provided as an object.",
        "required": ["message"],
        "properties": {
            "message": chat_message_schema("The assistant's reply for THIS turn (the thing being scored). Must have role 'assistant'."),
            "output_assets": {
                "type": "array",
                "description": "Assets generated in this reply. Include updated docs as well as code/config files.",
                "items": asset_schema("Asset the assistant produced")
            },
            "invocations": invocations_schema("Tool calls executed DURING the assistant reply, if any. Leave empty if the reply had no tool invocations.")
        }
    })
}
