//! HTTP surface of one instance.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use orbitsync_core::{
    Body, BodyPosition, ClockError, Instance, InstanceStatus, LifecycleError, ScaleAck, SnapshotBackend, StopOutcome,
    SyncAck,
};
use orbitsync_env::{HttpTransport, SyncEnvelope, TokioContext, SYNC_ROUTE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub type NodeInstance = Instance<TokioContext, HttpTransport, SnapshotBackend>;

/// Lifecycle errors mapped onto status codes.
#[derive(Debug)]
pub struct ApiError(pub LifecycleError);

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LifecycleError::NotRunning(_) | LifecycleError::CannotStart(_) => StatusCode::SERVICE_UNAVAILABLE,
            LifecycleError::UnknownBody(_) => StatusCode::NOT_FOUND,
            LifecycleError::Clock(ClockError::InvalidScale(_)) => StatusCode::BAD_REQUEST,
            LifecycleError::Clock(ClockError::Computation(_)) | LifecycleError::Computation(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            LifecycleError::ShutdownInterrupted => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PositionsQuery {
    /// Comma-separated body names; absent or empty means all
    pub bodies: Option<String>,
}

impl PositionsQuery {
    fn names(&self) -> Vec<String> {
        self.bodies
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct ScaleQuery {
    pub scale: f64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct SimulatedTimeResponse {
    pub current_simulated_time: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct StopResponse {
    pub status: &'static str,
    pub simulated_seconds: Option<f64>,
    pub saved: Option<bool>,
    pub siblings_notified: Option<usize>,
}

pub fn router(instance: Arc<NodeInstance>) -> Router {
    Router::new()
        .route("/positions", get(positions))
        .route("/simulated_time", get(simulated_time))
        .route("/set_time_scale", post(set_time_scale))
        .route("/speed_up", post(speed_up))
        .route("/slow_down", post(slow_down))
        .route(SYNC_ROUTE, post(sync))
        .route("/stop", post(stop))
        .route("/bodies", get(bodies))
        .route("/status", get(status))
        .with_state(instance)
}

pub async fn positions(
    State(instance): State<Arc<NodeInstance>>,
    Query(query): Query<PositionsQuery>,
) -> Result<Json<Vec<BodyPosition>>, ApiError> {
    Ok(Json(instance.positions(&query.names())?))
}

pub async fn simulated_time(State(instance): State<Arc<NodeInstance>>) -> Result<Json<SimulatedTimeResponse>, ApiError> {
    Ok(Json(SimulatedTimeResponse {
        current_simulated_time: instance.simulated_time()?,
    }))
}

pub async fn set_time_scale(
    State(instance): State<Arc<NodeInstance>>,
    Query(query): Query<ScaleQuery>,
) -> Result<Json<ScaleAck>, ApiError> {
    Ok(Json(instance.set_scale(query.scale).await?))
}

pub async fn speed_up(State(instance): State<Arc<NodeInstance>>) -> Result<Json<ScaleAck>, ApiError> {
    Ok(Json(instance.speed_up().await?))
}

pub async fn slow_down(State(instance): State<Arc<NodeInstance>>) -> Result<Json<ScaleAck>, ApiError> {
    Ok(Json(instance.slow_down().await?))
}

pub async fn sync(
    State(instance): State<Arc<NodeInstance>>,
    Json(envelope): Json<SyncEnvelope>,
) -> Result<Json<SyncAck>, ApiError> {
    Ok(Json(instance.adopt_peer_time(&envelope)?))
}

pub async fn stop(State(instance): State<Arc<NodeInstance>>) -> Result<Json<StopResponse>, ApiError> {
    info!("Stop requested over HTTP");
    let response = match instance.stop().await? {
        StopOutcome::Completed(report) => StopResponse {
            status: "stopped",
            simulated_seconds: Some(report.simulated_seconds),
            saved: Some(report.saved),
            siblings_notified: Some(report.broadcast.delivered.len()),
        },
        StopOutcome::AlreadyStopping => StopResponse {
            status: "already_stopping",
            simulated_seconds: None,
            saved: None,
            siblings_notified: None,
        },
    };
    Ok(Json(response))
}

pub async fn bodies(State(instance): State<Arc<NodeInstance>>) -> Json<Vec<Body>> {
    Json(instance.bodies().iter().cloned().collect())
}

pub async fn status(State(instance): State<Arc<NodeInstance>>) -> Json<InstanceStatus> {
    Json(instance.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbitsync_core::{BodySpec, InstanceConfig, LifecycleState, SnapshotStore};
    use orbitsync_env::{InstanceId, SyncReason};
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime};

    fn temp_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("orbitsync-node-{}-{}-{}", tag, std::process::id(), nanos))
    }

    fn node(tag: &str) -> (Arc<NodeInstance>, Arc<SnapshotBackend>, PathBuf) {
        let dir = temp_dir(tag);
        let store = Arc::new(SnapshotBackend::open(&dir));
        (node_on(Arc::clone(&store)), store, dir)
    }

    fn node_on(store: Arc<SnapshotBackend>) -> Arc<NodeInstance> {
        let config = InstanceConfig::new(
            "test-node",
            vec![
                BodySpec::new("iss", [6771.0, 0.0, 0.0], 5400.0),
                BodySpec::new("polar", [0.0, 7000.0, 0.0], 6000.0).with_plane("YZ"),
            ],
        );
        let transport = Arc::new(HttpTransport::new(InstanceId::from_seed(1), Duration::from_millis(200)).unwrap());
        let instance = Arc::new(Instance::new(&config, TokioContext::shared(), transport, store).unwrap());
        instance.start().unwrap();
        instance
    }

    #[test]
    fn test_positions_query_names() {
        let query = PositionsQuery {
            bodies: Some(" iss, ,polar ".to_string()),
        };
        assert_eq!(query.names(), vec!["iss", "polar"]);
        assert!(PositionsQuery::default().names().is_empty());
    }

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (LifecycleError::NotRunning(LifecycleState::Stopped), StatusCode::SERVICE_UNAVAILABLE),
            (LifecycleError::UnknownBody("x".to_string()), StatusCode::NOT_FOUND),
            (LifecycleError::Clock(ClockError::InvalidScale(-1.0)), StatusCode::BAD_REQUEST),
            (LifecycleError::ShutdownInterrupted, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, code) in cases {
            assert_eq!(ApiError(error).into_response().status(), code);
        }
    }

    #[tokio::test]
    async fn test_query_handlers() {
        let (instance, _store, dir) = node("query");

        let Json(all) = positions(State(Arc::clone(&instance)), Query(PositionsQuery::default()))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let missing = positions(
            State(Arc::clone(&instance)),
            Query(PositionsQuery {
                bodies: Some("hubble".to_string()),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(missing.0, LifecycleError::UnknownBody("hubble".to_string()));

        let Json(time) = simulated_time(State(Arc::clone(&instance))).await.unwrap();
        assert_eq!(time.current_simulated_time.len(), "2024-01-01 00:00:00".len());

        let Json(listed) = bodies(State(Arc::clone(&instance))).await;
        assert_eq!(listed.len(), 2);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_scale_and_sync_handlers() {
        let (instance, _store, dir) = node("scale");

        let Json(ack) = set_time_scale(State(Arc::clone(&instance)), Query(ScaleQuery { scale: 8.0 }))
            .await
            .unwrap();
        assert_eq!(ack.scale, 8.0);
        assert_eq!(ack.siblings_notified, 0);

        let Json(ack) = speed_up(State(Arc::clone(&instance))).await.unwrap();
        assert_eq!(ack.scale, 16.0);
        let Json(ack) = slow_down(State(Arc::clone(&instance))).await.unwrap();
        assert_eq!(ack.scale, 8.0);

        let bad = set_time_scale(State(Arc::clone(&instance)), Query(ScaleQuery { scale: -3.0 })).await;
        assert!(bad.is_err());

        let envelope = SyncEnvelope::new(InstanceId::from_seed(2), 86_400.0, SyncReason::ScaleChange, SystemTime::now());
        let Json(synced) = sync(State(Arc::clone(&instance)), Json(envelope)).await.unwrap();
        assert_eq!(synced.simulated_seconds, 86_400.0);
        assert!(instance.simulated_seconds().unwrap() >= 86_400.0);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_stop_handler_persists_once() {
        let (instance, store, dir) = node("stop");

        let Json(first) = stop(State(Arc::clone(&instance))).await.unwrap();
        assert_eq!(first.status, "stopped");
        assert_eq!(first.saved, Some(true));
        assert!(store.load().unwrap().is_some());

        let Json(second) = stop(State(Arc::clone(&instance))).await.unwrap();
        assert_eq!(second.status, "already_stopping");

        let Json(status) = status(State(Arc::clone(&instance))).await;
        assert_eq!(status.state, LifecycleState::Stopped);
        assert!(simulated_time(State(instance)).await.is_err());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_node_serves_when_store_is_locked() {
        let (holder, store, dir) = node("locked");
        assert!(store.is_available());

        let locked = Arc::new(SnapshotBackend::open(&dir));
        assert!(!locked.is_available());
        let instance = node_on(Arc::clone(&locked));
        assert_eq!(instance.state(), LifecycleState::Running);
        assert!(simulated_time(State(Arc::clone(&instance))).await.is_ok());

        let Json(stopped) = stop(State(instance)).await.unwrap();
        assert_eq!(stopped.status, "stopped");
        assert_eq!(stopped.saved, Some(false));

        stop(State(holder)).await.unwrap();
        let _ = std::fs::remove_dir_all(dir);
    }
}
