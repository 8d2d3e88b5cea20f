// HTTP surface: error mapping, handlers and routes

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::dto::{
    LoginRequest, LoginResponse, OrderRequest, OrderResponse, SearchOption, SearchResult,
    SmsRequest, SmsResponse,
};
use crate::service::{CallerContext, FlightService, ServiceError};
use crate::session::VendorCredentials;

pub const HEADER_USER_ID: &str = "x-tc-user-id";
pub const HEADER_SEC_TOKEN: &str = "x-tc-sec-token";
pub const HEADER_SECURITY_TOKEN: &str = "x-tc-security-token";
pub const HEADER_DEVICE_ID: &str = "x-tc-device-id";

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Order failed: {message}")]
    OrderFailed { message: String, details: Value },

    #[error("Vendor error: {0}")]
    Vendor(String),

    #[error("Timeout")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::OrderFailed { .. } | ApiError::Vendor(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Business code: HTTP status times 100.
    pub fn code(&self) -> u32 {
        u32::from(self.status().as_u16()) * 100
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let (message, details) = match self {
            ApiError::BadRequest(msg) | ApiError::Unauthorized(msg) | ApiError::Vendor(msg) => {
                (msg, None)
            }
            ApiError::RateLimited => ("Too many requests".to_string(), None),
            ApiError::OrderFailed { message, details } => (message, Some(details)),
            ApiError::Timeout => ("Request timed out".to_string(), None),
            ApiError::Internal(msg) => {
                // not exposed to clients
                tracing::error!(error = %msg, "internal error");
                ("Internal server error".to_string(), None)
            }
        };

        (
            status,
            Json(ErrorBody {
                code,
                message,
                details,
            }),
        )
            .into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidInput(e) => ApiError::BadRequest(e.to_string()),
            ServiceError::Unauthorized(msg) => ApiError::Unauthorized(msg),
            ServiceError::Vendor { message, .. } => ApiError::Vendor(message),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[derive(Clone)]
pub struct AppState {
    service: Arc<dyn FlightService>,
}

impl AppState {
    pub fn new(service: Arc<dyn FlightService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &dyn FlightService {
        self.service.as_ref()
    }
}

pub fn router(state: AppState) -> Router {
    let flights = Router::new()
        .route("/tickets/search", post(search_tickets))
        .route("/tickets/order", post(create_order));
    let members = Router::new()
        .route("/sms", post(send_sms))
        .route("/login", post(login));

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/ping", get(ping))
        .nest("/api/v1/flights", flights)
        .nest("/api/v1/members", members)
        .with_state(state)
}

/// Vendor identity from the `x-tc-*` headers. Blank values count as absent.
pub fn caller_from_headers(headers: &HeaderMap) -> CallerContext {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    };

    let credentials = VendorCredentials {
        member_id: value(HEADER_USER_ID),
        external_member_id: value(HEADER_SEC_TOKEN),
        security_token: value(HEADER_SECURITY_TOKEN),
    };
    let has_any = !credentials.member_id.is_empty()
        || !credentials.external_member_id.is_empty()
        || !credentials.security_token.is_empty();
    let device_id = value(HEADER_DEVICE_ID);

    CallerContext {
        credentials: has_any.then_some(credentials),
        device_id: (!device_id.is_empty()).then_some(device_id),
    }
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn ping() -> Json<Value> {
    Json(json!({"message": "pong"}))
}

async fn search_tickets(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SearchOption>, JsonRejection>,
) -> ApiResult<Json<SearchResult>> {
    let Json(option) = payload?;
    let caller = caller_from_headers(&headers);
    let result = state.service().search(&caller, option).await?;
    Ok(Json(result))
}

async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<OrderRequest>, JsonRejection>,
) -> ApiResult<Json<OrderResponse>> {
    let Json(request) = payload.inspect_err(|e| warn!(error = %e, "order body rejected"))?;
    let caller = caller_from_headers(&headers);
    let response = state.service().create_order(&caller, request).await?;

    if !response.success {
        return Err(ApiError::OrderFailed {
            message: response.message,
            details: json!({"passengerResults": response.passenger_results}),
        });
    }
    Ok(Json(response))
}

async fn send_sms(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SmsRequest>, JsonRejection>,
) -> ApiResult<Json<SmsResponse>> {
    let Json(request) = payload?;
    let caller = caller_from_headers(&headers);
    Ok(Json(state.service().send_sms(&caller, request).await?))
}

async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<LoginResponse>> {
    let Json(request) = payload?;
    let caller = caller_from_headers(&headers);
    Ok(Json(state.service().login(&caller, request).await?))
}


#[cfg(test)]
mod tests {
    use super::mock_service::MockFlightService;
    use super::*;
    use crate::dto::{DtoError, FlightInfo, PassengerOrderResult};
    use crate::error::PipelineError;
    use crate::stages::Stage;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::DateTime;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(service: MockFlightService) -> (Router, Arc<MockFlightService>) {
        let service = Arc::new(service);
        (router(AppState::new(service.clone())), service)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn search_body() -> Value {
        json!({"from": "SHA", "to": "PEK", "date": "2025-05-20"})
    }

    #[tokio::test]
    async fn test_health_and_ping() {
        let (app, _) = app(MockFlightService::default());

        let health = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
        assert_eq!(read_json(health).await["status"], "ok");

        let ping = app
            .oneshot(Request::get("/api/v1/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(read_json(ping).await["message"], "pong");
    }

    #[tokio::test]
    async fn test_search_forwards_vendor_headers() {
        let flight = FlightInfo {
            id: "CA1501".into(),
            flight_number: "CA1501".into(),
            airline: "中国国航".into(),
            departure_time: DateTime::parse_from_rfc3339("2025-05-20T08:00:00+08:00").unwrap(),
            arrival_time: DateTime::parse_from_rfc3339("2025-05-20T10:15:00+08:00").unwrap(),
            origin: "SHA".into(),
            destination: "PEK".into(),
            price: 650.0,
            currency: "CNY".into(),
        };
        let (app, service) = app(MockFlightService {
            search_reply: Ok(SearchResult {
                flights: vec![flight],
                total: 3,
            }),
            ..Default::default()
        });

        let mut request = post_json("/api/v1/flights/tickets/search", search_body());
        let headers = request.headers_mut();
        headers.insert(HEADER_USER_ID, "member-1".parse().unwrap());
        headers.insert(HEADER_SEC_TOKEN, "ext-1".parse().unwrap());
        headers.insert(HEADER_DEVICE_ID, "dev-42".parse().unwrap());

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["total"], 3);
        assert_eq!(body["flights"][0]["flightNumber"], "CA1501");
        assert_eq!(body["flights"][0]["departureTime"], "2025-05-20T08:00:00+08:00");

        let caller = service.last_caller.lock().clone().unwrap();
        let creds = caller.credentials.unwrap();
        assert_eq!(creds.member_id, "member-1");
        assert_eq!(creds.external_member_id, "ext-1");
        assert_eq!(creds.security_token, "");
        assert_eq!(caller.device_id.as_deref(), Some("dev-42"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let (app, service) = app(MockFlightService::default());
        let request = Request::post("/api/v1/flights/tickets/search")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(response).await["code"], 40000);
        assert_eq!(service.call_count(), 0);
    }

    #[tokio::test]
    async fn test_service_errors_map_to_status_codes() {
        let cases = [
            (
                ServiceError::InvalidInput(DtoError::Missing { field: "to".into() }),
                StatusCode::BAD_REQUEST,
                40000,
            ),
            (
                ServiceError::Unauthorized("missing vendor credentials: x-tc-user-id".into()),
                StatusCode::UNAUTHORIZED,
                40100,
            ),
            (
                ServiceError::Vendor {
                    message: "[SearchFlights] 航线不存在".into(),
                    source: PipelineError::VendorProtocol {
                        stage: Stage::SearchFlights,
                        response: "{}".into(),
                    },
                },
                StatusCode::INTERNAL_SERVER_ERROR,
                50000,
            ),
        ];

        for (err, status, code) in cases {
            let expected_message = match &err {
                ServiceError::Vendor { message, .. } => Some(message.clone()),
                _ => None,
            };
            let (app, _) = app(MockFlightService {
                search_reply: Err(err),
                ..Default::default()
            });

            let response = app
                .oneshot(post_json("/api/v1/flights/tickets/search", search_body()))
                .await
                .unwrap();
            assert_eq!(response.status(), status);
            let body = read_json(response).await;
            assert_eq!(body["code"], code);
            if let Some(message) = expected_message {
                assert_eq!(body["message"], message);
            }
        }
    }

    #[tokio::test]
    async fn test_partial_order_failure_is_server_error_with_details() {
        let results = vec![
            PassengerOrderResult {
                success: true,
                passenger_name: "Li Lei".into(),
                order_id: Some("o-1".into()),
                error_message: None,
            },
            PassengerOrderResult {
                success: false,
                passenger_name: "Han Meimei".into(),
                order_id: None,
                error_message: Some("sold out".into()),
            },
        ];
        let (app, _) = app(MockFlightService {
            order_reply: Ok(OrderResponse::aggregate(results)),
            ..Default::default()
        });

        let response = app
            .oneshot(post_json("/api/v1/flights/tickets/order", json!({"flightId": "CA1501"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = read_json(response).await;
        assert_eq!(body["code"], 50000);
        assert_eq!(
            body["message"],
            "Created orders for 1 out of 2 passengers. Failures: Han Meimei: sold out"
        );
        assert_eq!(body["details"]["passengerResults"][0]["orderId"], "o-1");
        assert_eq!(body["details"]["passengerResults"][1]["errorMessage"], "sold out");
    }

    #[tokio::test]
    async fn test_successful_order_returns_response_body() {
        let results = vec![PassengerOrderResult {
            success: true,
            passenger_name: "Li Lei".into(),
            order_id: Some("o-1".into()),
            error_message: None,
        }];
        let (app, _) = app(MockFlightService {
            order_reply: Ok(OrderResponse::aggregate(results)),
            ..Default::default()
        });

        let response = app
            .oneshot(post_json("/api/v1/flights/tickets/order", json!({"flightId": "CA1501"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["passengerResults"][0]["passengerName"], "Li Lei");
    }

    #[tokio::test]
    async fn test_member_login_route() {
        let (app, _) = app(MockFlightService::default());
        let mut request = post_json(
            "/api/v1/members/login",
            json!({"mobile": "13800000000", "verifyCode": "123456"}),
        );
        request
            .headers_mut()
            .insert(HEADER_DEVICE_ID, "dev-1".parse().unwrap());

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["memberId"], "member-13800000000");
        assert_eq!(body["deviceId"], "dev-1");
    }

    #[test]
    fn test_blank_headers_mean_no_credentials() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_USER_ID, "  ".parse().unwrap());
        let caller = caller_from_headers(&headers);
        assert!(caller.credentials.is_none());
        assert!(caller.device_id.is_none());
    }
}
