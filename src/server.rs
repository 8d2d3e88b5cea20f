// Router assembly and the HTTP server loop

use axum::{error_handling::HandleErrorLayer, middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{error, info};

use crate::api::{self, AppState};
use crate::config::AppConfig;
use crate::middleware::{handle_layer_error, panic_response, request_id_middleware, tracing_middleware};
use crate::plugin::{attach_plugins, AuthPlugin, Plugin, PluginError, RateLimitPlugin};

/// Full middleware stack, outermost first: request id, request log, timeout,
/// rate limit, auth, panic recovery, handlers.
pub fn build_router(state: AppState, config: &AppConfig) -> Result<Router, PluginError> {
    let plugins: Vec<Arc<dyn Plugin>> = vec![
        Arc::new(AuthPlugin::new(&config.modules.auth)?),
        Arc::new(RateLimitPlugin::new(&config.modules.ratelimit)?),
    ];

    let router = api::router(state).layer(CatchPanicLayer::custom(panic_response));
    let router = attach_plugins(router, plugins);

    Ok(router
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_layer_error))
                .timeout(config.server.request_timeout()),
        )
        .layer(middleware::from_fn(tracing_middleware))
        .layer(middleware::from_fn(request_id_middleware)))
}

pub async fn serve(addr: SocketAddr, router: Router) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "flight gateway listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock_service::MockFlightService;
    use crate::middleware::REQUEST_ID_HEADER;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn gateway(service: MockFlightService, config: &AppConfig) -> Router {
        build_router(AppState::new(Arc::new(service)), config).unwrap()
    }

    fn search_request() -> Request<Body> {
        Request::post("/api/v1/flights/tickets/search")
            .header("content-type", "application/json")
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::from(
                json!({"from": "SHA", "to": "PEK", "date": "2025-05-20"}).to_string(),
            ))
            .unwrap()
    }

    async fn read_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_request_id_is_assigned_or_echoed() {
        let app = gateway(MockFlightService::default(), &AppConfig::default());

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let generated = response.headers().get(REQUEST_ID_HEADER).unwrap();
        assert_eq!(generated.len(), 36);

        let response = app
            .oneshot(
                Request::get("/health")
                    .header(REQUEST_ID_HEADER, "trace-abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "trace-abc");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out_with_json_body() {
        let mut config = AppConfig::default();
        config.server.request_timeout_secs = 1;
        let app = gateway(
            MockFlightService {
                delay: Duration::from_secs(5),
                ..Default::default()
            },
            &config,
        );

        let response = app.oneshot(search_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        assert_eq!(read_json(response).await["code"], 50400);
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_internal_error() {
        let app = gateway(
            MockFlightService {
                panic_on_search: true,
                ..Default::default()
            },
            &AppConfig::default(),
        );

        let response = app.oneshot(search_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        let body = read_json(response).await;
        assert_eq!(body["code"], 50000);
        assert_eq!(body["message"], "Internal server error");
    }

    #[tokio::test]
    async fn test_auth_guards_api_but_not_ping() {
        let mut config = AppConfig::default();
        config.modules.auth.enable = true;
        config.modules.auth.secret = "gateway-test-secret".to_string();
        let token = AuthPlugin::new(&config.modules.auth)
            .unwrap()
            .generate_token(7, "ops")
            .unwrap();
        let app = gateway(MockFlightService::default(), &config);

        let ping = app
            .clone()
            .oneshot(Request::get("/api/v1/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ping.status(), StatusCode::OK);

        let anonymous = app.clone().oneshot(search_request()).await.unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(read_json(anonymous).await["code"], 40100);

        let mut request = search_request();
        request.headers_mut().insert(
            "authorization",
            format!("Bearer {token}").parse().unwrap(),
        );
        let authorized = app.oneshot(request).await.unwrap();
        assert_eq!(authorized.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_after_burst() {
        let mut config = AppConfig::default();
        config.modules.ratelimit.enable = true;
        config.modules.ratelimit.rate = 0.01;
        config.modules.ratelimit.burst = 2;
        config.modules.ratelimit.trust_forwarded_for = true;
        let app = gateway(MockFlightService::default(), &config);

        for _ in 0..2 {
            let response = app.clone().oneshot(search_request()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let limited = app.clone().oneshot(search_request()).await.unwrap();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(read_json(limited).await["code"], 42900);

        // other clients keep their own bucket
        let mut other = search_request();
        other
            .headers_mut()
            .insert("x-forwarded-for", "198.51.100.4".parse().unwrap());
        assert_eq!(app.oneshot(other).await.unwrap().status(), StatusCode::OK);
    }

    #[test]
    fn test_invalid_plugin_config_fails_router_build() {
        let mut config = AppConfig::default();
        config.modules.auth.enable = true;
        let result = build_router(
            AppState::new(Arc::new(MockFlightService::default())),
            &config,
        );
        assert!(matches!(result, Err(PluginError::Init { .. })));
    }
}
