use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{Channels, ServiceError};
use crate::auth::{self, AuthError, IdentityVerifier, Session};
use crate::mining::MiningError;
use crate::settings;

mod mining;
mod users;

#[derive(Clone)]
pub struct AppState {
    channels: Channels,
    verifier: Arc<dyn IdentityVerifier>,
    secure_cookies: bool,
}

impl AppState {
    pub fn new(channels: Channels, verifier: Arc<dyn IdentityVerifier>, secure_cookies: bool) -> Self {
        AppState {
            channels,
            verifier,
            secure_cookies,
        }
    }
}

/// Rejection for requests without a valid identity token.
pub struct Unauthorized(AuthError);

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        if let AuthError::Provider(e) = &self.0 {
            log::error!("Identity provider failure: {}", e);
        }

        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": self.0.to_string() })),
        )
            .into_response()
    }
}

impl FromRequestParts<AppState> for Session {
    type Rejection = Unauthorized;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let cookies = parts
            .headers
            .get(header::COOKIE)
            .and_then(|value| value.to_str().ok());
        let authorization = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let token = auth::extract_token(cookies, authorization)
            .ok_or(Unauthorized(AuthError::MissingToken))?;

        state.verifier.verify(&token).await.map_err(Unauthorized)
    }
}

fn mining_status(error: &MiningError) -> StatusCode {
    match error {
        MiningError::NotYetEligible(_) | MiningError::AlreadyReferred => StatusCode::CONFLICT,
        MiningError::SelfReferral => StatusCode::BAD_REQUEST,
        MiningError::UnknownCode(_) => StatusCode::NOT_FOUND,
        MiningError::AdNotCompleted(_) => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, tag) = match &self {
            ServiceError::Mining(e) => (mining_status(e), e.tag()),
            ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            _ => {
                log::error!("Request failed: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal")
            }
        };

        let description = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error.".to_string(),
            _ => self.to_string(),
        };

        (
            status,
            Json(json!({ "error": tag, "description": description })),
        )
            .into_response()
    }
}

/// Sends a request built around a fresh response channel and waits for the answer.
async fn dispatch<R, T>(
    channel: &mpsc::Sender<R>,
    name: &str,
    request: impl FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> R,
) -> Result<T, ServiceError> {
    let (response_tx, response_rx) = oneshot::channel();

    channel
        .send(request(response_tx))
        .await
        .map_err(|e| ServiceError::Communication(format!("HTTP => {}", name), e.to_string()))?;

    response_rx
        .await
        .map_err(|e| ServiceError::Communication(format!("{} => HTTP", name), e.to_string()))?
}

#[derive(Deserialize)]
struct SetTokenRequest {
    token: Option<String>,
}

async fn set_token(State(state): State<AppState>, Json(req): Json<SetTokenRequest>) -> Response {
    let token = match req.token.filter(|token| !token.is_empty()) {
        Some(token) => token,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": "Token is required" })),
            )
                .into_response()
        }
    };

    if let Err(e) = state.verifier.verify(&token).await {
        return Unauthorized(e).into_response();
    }

    (
        [(
            header::SET_COOKIE,
            auth::session_cookie(&token, state.secure_cookies),
        )],
        Json(json!({ "success": true })),
    )
        .into_response()
}

pub fn build_router(state: AppState, client_url: &str) -> Result<Router, anyhow::Error> {
    let cors = CorsLayer::new()
        .allow_origin(client_url.parse::<HeaderValue>()?)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/set-token", post(set_token))
        .route(
            "/api/profile",
            get(users::get_profile).post(users::create_profile),
        )
        .route("/api/mining", get(mining::get_status))
        .route("/api/mining/claim", post(mining::claim))
        .route("/api/mining/ad-boost", post(mining::watch_ad))
        .route(
            "/api/referrals",
            get(mining::get_referral_info).post(mining::attribute_referral),
        )
        .route("/api/activities", get(mining::get_activities))
        .route("/api/ad-views", get(mining::get_ad_views))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(app)
}

pub async fn start_http_server(
    channels: Channels,
    verifier: Arc<dyn IdentityVerifier>,
    server: &settings::Server,
    listen: &str,
) -> Result<(), anyhow::Error> {
    let state = AppState::new(channels, verifier, server.production);
    let app = build_router(state, &server.client_url)?;

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::auth::StaticTokenVerifier;
    use crate::mining::MiningParams;
    use crate::repositories::MemoryRepository;
    use crate::services::spawn_services;

    fn router() -> Router {
        let channels = spawn_services(
            Arc::new(MemoryRepository::new()),
            MiningParams::default(),
            "http://localhost:5000".to_string(),
        );
        let verifier = StaticTokenVerifier::new(HashMap::from([
            ("alice-token".to_string(), "alice".to_string()),
            ("bob-token".to_string(), "bob".to_string()),
        ]));

        build_router(
            AppState::new(channels, Arc::new(verifier), false),
            "http://localhost:5173",
        )
        .unwrap()
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let app = router();
        let response = app
            .clone()
            .oneshot(request("GET", "/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_or_unknown_token_is_unauthorized() {
        let app = router();

        let (status, body) = send(&app, request("GET", "/api/mining", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "No authorization token provided");

        let (status, _) = send(&app, request("GET", "/api/profile", Some("nope"), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn set_token_sets_cookie() {
        let app = router();

        let (status, body) = send(&app, request("POST", "/api/set-token", None, Some(json!({})))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Token is required");

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/set-token",
                None,
                Some(json!({ "token": "alice-token" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("firebaseToken=alice-token;"));
        assert!(cookie.contains("HttpOnly"));

        let mut with_cookie = request("GET", "/api/profile", None, None);
        with_cookie
            .headers_mut()
            .insert(header::COOKIE, HeaderValue::from_static("firebaseToken=alice-token"));
        let (status, body) = send(&app, with_cookie).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "alice");
    }

    #[tokio::test]
    async fn mining_requires_a_profile() {
        let app = router();

        let (status, body) = send(&app, request("GET", "/api/mining", Some("alice-token"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NotFound");
    }

    #[tokio::test]
    async fn claim_twice_is_rejected() {
        let app = router();
        send(&app, request("GET", "/api/profile", Some("alice-token"), None)).await;

        let (status, body) = send(&app, request("GET", "/api/mining", Some("alice-token"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["claimable"], true);

        let (status, body) =
            send(&app, request("POST", "/api/mining/claim", Some("alice-token"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["balance"], 0.1);
        assert_eq!(body["activity"]["kind"], "claim");

        let (status, body) =
            send(&app, request("POST", "/api/mining/claim", Some("alice-token"), None)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "NotYetEligible");

        let (_, body) = send(&app, request("GET", "/api/profile", Some("alice-token"), None)).await;
        assert_eq!(body["balance"], 0.1);
    }

    #[tokio::test]
    async fn skipped_ad_grants_no_boost() {
        let app = router();
        send(&app, request("GET", "/api/profile", Some("alice-token"), None)).await;

        let (status, body) = send(
            &app,
            request(
                "POST",
                "/api/mining/ad-boost",
                Some("alice-token"),
                Some(json!({ "outcome": "skipped" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "AdNotCompleted");

        let (_, body) = send(&app, request("GET", "/api/mining", Some("alice-token"), None)).await;
        assert_eq!(body["ad_boost_active"], false);

        let (status, body) = send(
            &app,
            request(
                "POST",
                "/api/mining/ad-boost",
                Some("alice-token"),
                Some(json!({ "outcome": "completed" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ad_boost_time_remaining"], 7200);

        let (_, body) = send(&app, request("GET", "/api/ad-views", Some("alice-token"), None)).await;
        assert_eq!(body.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn referral_flow() {
        let app = router();
        let (_, alice) = send(&app, request("GET", "/api/profile", Some("alice-token"), None)).await;
        let code = alice["referral_code"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            request(
                "POST",
                "/api/profile",
                Some("bob-token"),
                Some(json!({ "referral_code": code })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["created"], true);
        assert_eq!(body["profile"]["referred_by"], "alice");

        let (status, body) = send(
            &app,
            request(
                "POST",
                "/api/referrals",
                Some("bob-token"),
                Some(json!({ "code": code })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "AlreadyReferred");

        let (status, body) = send(
            &app,
            request(
                "POST",
                "/api/referrals",
                Some("alice-token"),
                Some(json!({ "code": "doesnotexist" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "UnknownCode");

        let (_, body) = send(&app, request("GET", "/api/referrals", Some("alice-token"), None)).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["link"], format!("http://localhost:5000?ref={}", code));

        let (_, body) = send(
            &app,
            request("GET", "/api/activities?limit=1", Some("alice-token"), None),
        )
        .await;
        assert_eq!(body[0]["kind"], "referral");
        assert_eq!(body[0]["amount"], "+10%");
    }
}
