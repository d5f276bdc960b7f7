//! HTTP handlers for the REST API

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use kube::{api::Api, ResourceExt};
use tracing::{error, instrument};

use crate::controller::ControllerState;
use crate::crd::MysqlCluster;

use super::dto::{
    ClusterDetailResponse, ClusterListResponse, ClusterSummary, ErrorResponse, HealthResponse,
};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn health_response(leader: bool) -> HealthResponse {
    HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        leader,
    }
}

/// Health check endpoint
#[instrument(skip(state))]
pub async fn health(State(state): State<Arc<ControllerState>>) -> Json<HealthResponse> {
    Json(health_response(state.is_leader.load(Ordering::Relaxed)))
}

/// Prometheus text exposition of the operator registry
pub async fn metrics() -> Result<String, StatusCode> {
    use prometheus_client::encoding::text::encode;

    let mut buffer = String::new();
    encode(&mut buffer, &crate::controller::metrics::REGISTRY).map_err(|e| {
        error!("Failed to encode metrics: {:?}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(buffer)
}

fn summarize(cluster: &MysqlCluster) -> ClusterSummary {
    let status = cluster.status.clone().unwrap_or_default();
    ClusterSummary {
        name: cluster.name_any(),
        namespace: cluster.namespace().unwrap_or_default(),
        mode: cluster.spec.mode,
        replicas: cluster.spec.replicas,
        phase: status.phase,
        healthy_members: status.healthy_members.len(),
        master: status.master,
    }
}

/// List all MysqlClusters
#[instrument(skip(state))]
pub async fn list_clusters(
    State(state): State<Arc<ControllerState>>,
) -> Result<Json<ClusterListResponse>, ApiError> {
    let api: Api<MysqlCluster> = Api::all(state.client.clone());

    match api.list(&Default::default()).await {
        Ok(clusters) => {
            let items: Vec<ClusterSummary> = clusters.items.iter().map(summarize).collect();
            let total = items.len();
            Ok(Json(ClusterListResponse { items, total }))
        }
        Err(e) => {
            error!("Failed to list clusters: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("list_failed", &e.to_string())),
            ))
        }
    }
}

/// Get a specific MysqlCluster
#[instrument(skip(state), fields(name = %name, namespace = %namespace))]
pub async fn get_cluster(
    State(state): State<Arc<ControllerState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<ClusterDetailResponse>, ApiError> {
    let api: Api<MysqlCluster> = Api::namespaced(state.client.clone(), &namespace);

    match api.get(&name).await {
        Ok(cluster) => Ok(Json(ClusterDetailResponse {
            name: cluster.name_any(),
            namespace: cluster.namespace().unwrap_or_default(),
            mode: cluster.spec.mode,
            version: cluster.spec.version.clone(),
            proxysql_replicas: cluster.spec.proxysql.as_ref().map(|p| p.replicas),
            status: cluster.status.clone().unwrap_or_default(),
            created_at: cluster
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|t| t.0.to_rfc3339()),
        })),
        Err(kube::Error::Api(e)) if e.code == 404 => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                "not_found",
                &format!("MysqlCluster {}/{} not found", namespace, name),
            )),
        )),
        Err(e) => {
            error!("Failed to get cluster {}/{}: {:?}", namespace, name, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("get_failed", &e.to_string())),
            ))
        }
    }
}
