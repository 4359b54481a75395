//! Router assembly and the listener loop.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

use super::v0;
use crate::app_event::AppEventBus;
use crate::error::Result;
use crate::prefs::PreferenceStore;
use crate::session::Monitor;
use crate::tracing::prelude::*;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "SafeNest Monitor API",
        description = "Fall detection monitor control surface"
    ),
    tags(
        (name = "health", description = "Liveness"),
        (name = "monitor", description = "Start, stop and acknowledge"),
        (name = "events", description = "App-layer event queue"),
    )
)]
struct ApiDoc;

/// State shared by every handler.
#[derive(Clone)]
pub struct SharedState {
    pub monitor: Monitor,
    pub app_events: AppEventBus,
    pub prefs: Arc<PreferenceStore>,
}

pub fn router(state: SharedState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .nest("/api/v0", v0::routes())
        .split_for_parts();

    router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled.
pub async fn serve(bind: SocketAddr, state: SharedState, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "API server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    debug!("API server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use async_trait::async_trait;
    use http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::alert::RecordingAlertSink;
    use crate::api_client::types::{AcknowledgeResponse, MonitorState, SensorStatus};
    use crate::app_event::AppEvent;
    use crate::config::MonitorConfig;
    use crate::keep_alive::NoopWakeLock;
    use crate::sensor::{
        AccelerometerSource, SampleSink, SamplingRate, SensorError, SensorSubscription,
    };
    use crate::session::Session;

    /// Registers fine and never produces a sample.
    struct SilentSource;

    #[async_trait]
    impl AccelerometerSource for SilentSource {
        async fn subscribe(
            &mut self,
            rate: SamplingRate,
            _sink: SampleSink,
        ) -> std::result::Result<SensorSubscription, SensorError> {
            Ok(SensorSubscription::new(CancellationToken::new(), rate))
        }
    }

    struct TestApp {
        state: SharedState,
        _prefs_dir: tempfile::TempDir,
        _shutdown: tokio_util::sync::DropGuard,
    }

    fn test_app() -> TestApp {
        let prefs_dir = tempfile::tempdir().unwrap();
        let prefs = Arc::new(PreferenceStore::new(prefs_dir.path().join("prefs.json")));
        let (session, monitor) = Session::new(
            MonitorConfig::default(),
            SilentSource,
            RecordingAlertSink::new(),
            Arc::new(NoopWakeLock),
        );
        let shutdown = CancellationToken::new();
        tokio::spawn(session.run(shutdown.clone()));

        TestApp {
            state: SharedState {
                monitor,
                app_events: AppEventBus::new(8),
                prefs,
            },
            _prefs_dir: prefs_dir,
            _shutdown: shutdown.drop_guard(),
        }
    }

    async fn call(app: &TestApp, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router(app.state.clone())
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn should_report_health() {
        let app = test_app();

        let (status, body) = call(&app, "GET", "/api/v0/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }

    #[tokio::test]
    async fn should_start_and_persist_preference() {
        let app = test_app();

        let (status, body) = call(&app, "POST", "/api/v0/monitor/start").await;
        let state: MonitorState = serde_json::from_slice(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert!(state.monitoring);
        assert_eq!(state.sensor, SensorStatus::Active);
        assert!(app.state.prefs.is_enabled().await);

        let (_, body) = call(&app, "GET", "/api/v0/monitor").await;
        let state: MonitorState = serde_json::from_slice(&body).unwrap();
        assert!(state.monitoring);
    }

    #[tokio::test]
    async fn should_stop_and_clear_preference() {
        let app = test_app();
        call(&app, "POST", "/api/v0/monitor/start").await;

        let (status, body) = call(&app, "POST", "/api/v0/monitor/stop").await;
        let state: MonitorState = serde_json::from_slice(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert!(!state.monitoring);
        assert!(!app.state.prefs.is_enabled().await);
    }

    #[tokio::test]
    async fn should_treat_acknowledge_without_check_in_as_noop() {
        let app = test_app();

        let (status, body) = call(&app, "POST", "/api/v0/monitor/acknowledge").await;
        let response: AcknowledgeResponse = serde_json::from_slice(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert!(!response.resolved);
    }

    #[tokio::test]
    async fn should_queue_sos_until_drained() {
        let app = test_app();

        let (status, _) = call(&app, "POST", "/api/v0/sos").await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, body) = call(&app, "POST", "/api/v0/events/drain").await;
        let events: Vec<AppEvent> = serde_json::from_slice(&body).unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(events, vec![AppEvent::WidgetSos]);

        let (_, body) = call(&app, "POST", "/api/v0/events/drain").await;
        assert_eq!(body, b"[]");
    }

    #[tokio::test]
    async fn should_serve_openapi_document() {
        let app = test_app();

        let (status, body) = call(&app, "GET", "/api-docs/openapi.json").await;
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert!(doc["paths"]["/api/v0/monitor/start"].is_object());
    }

    #[tokio::test]
    async fn should_fail_when_session_is_gone() {
        let prefs_dir = tempfile::tempdir().unwrap();
        let (session, monitor) = Session::new(
            MonitorConfig::default(),
            SilentSource,
            RecordingAlertSink::new(),
            Arc::new(NoopWakeLock),
        );
        drop(session);
        let app = TestApp {
            state: SharedState {
                monitor,
                app_events: AppEventBus::new(8),
                prefs: Arc::new(PreferenceStore::new(prefs_dir.path().join("prefs.json"))),
            },
            _prefs_dir: prefs_dir,
            _shutdown: CancellationToken::new().drop_guard(),
        };

        let (status, _) = call(&app, "POST", "/api/v0/monitor/acknowledge").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
