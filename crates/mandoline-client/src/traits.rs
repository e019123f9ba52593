use async_trait::async_trait;

use crate::error::ClientError;
use crate::types::{
    Evaluation, EvaluationCreate, EvaluationUpdate, EvaluationsQuery, Metric, MetricCreate,
    MetricUpdate, MetricsQuery,
};

/// Operations exposed by the Mandoline evaluation API.
#[async_trait]
pub trait EvaluationApi: Send + Sync {
    async fn create_metric(&self, metric: MetricCreate) -> Result<Metric, ClientError>;

    async fn batch_create_metrics(
        &self,
        metrics: Vec<MetricCreate>,
    ) -> Result<Vec<Metric>, ClientError>;

    async fn get_metric(&self, metric_id: &str) -> Result<Metric, ClientError>;

    async fn get_metrics(&self, query: MetricsQuery) -> Result<Vec<Metric>, ClientError>;

    async fn update_metric(
        &self,
        metric_id: &str,
        update: MetricUpdate,
    ) -> Result<Metric, ClientError>;

    async fn create_evaluation(
        &self,
        evaluation: EvaluationCreate,
        include_content: bool,
    ) -> Result<Evaluation, ClientError>;

    async fn batch_create_evaluations(
        &self,
        evaluations: Vec<EvaluationCreate>,
        include_content: bool,
    ) -> Result<Vec<Evaluation>, ClientError>;

    async fn get_evaluation(&self, evaluation_id: &str) -> Result<Evaluation, ClientError>;

    async fn get_evaluations(
        &self,
        query: EvaluationsQuery,
    ) -> Result<Vec<Evaluation>, ClientError>;

    async fn update_evaluation(
        &self,
        evaluation_id: &str,
        update: EvaluationUpdate,
    ) -> Result<Evaluation, ClientError>;
}
