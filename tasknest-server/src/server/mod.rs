pub mod auth;
mod config;
pub mod dispatch;
pub mod events;
pub mod provider;
pub mod scan;

use std::sync::Arc;

use crate::server::auth::AuthCtx;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::{Method, StatusCode, header},
    routing::{get, post},
};
use bcrypt::verify;
pub use config::{AppConfig, PushConfig, UserConfig};
use serde::{Deserialize, Serialize};
use tasknest_shared::api;
use tasknest_shared::auth::Role;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

use dispatch::{BestEffortDispatch, DispatchService};
use events::EventNotifier;
use provider::MessagingProvider;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: crate::storage::Store,
    dispatch: Option<DispatchService>,
}

impl AppState {
    /// `provider` is `None` when push credentials are not configured; the
    /// dispatch and scan endpoints then answer 503 while the registry keeps
    /// working.
    pub fn new(
        config: AppConfig,
        store: crate::storage::Store,
        provider: Option<Arc<dyn MessagingProvider>>,
    ) -> Self {
        Self {
            config,
            store,
            dispatch: provider.map(DispatchService::new),
        }
    }

    fn dispatch(&self) -> Result<&DispatchService, AppError> {
        self.dispatch
            .as_ref()
            .ok_or_else(|| AppError::unavailable("push provider not configured"))
    }

    /// Notifier handed to the reminder application for its domain events.
    pub fn event_notifier(&self) -> Option<EventNotifier> {
        let dispatch = self.dispatch.as_ref()?.clone();
        Some(EventNotifier::new(
            BestEffortDispatch::new(dispatch, self.store.clone()),
            self.store.clone(),
        ))
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let private = Router::new()
        .route(
            "/api/v1/household/{household_id}/members/{member_id}/devices",
            post(api_register_device).delete(api_remove_devices),
        )
        .route(
            "/api/v1/household/{household_id}/notifications/dispatch",
            post(api_dispatch),
        )
        .route(
            "/api/v1/household/{household_id}/jobs/due-scan",
            post(api_due_scan),
        )
        .with_state(state.clone())
        .layer(middleware::from_fn(set_auth_span_fields))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            username = tracing::field::Empty,
            role = tracing::field::Empty,
            member_id = tracing::field::Empty,
            device_id = tracing::field::Empty
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/api/v1/auth/login", post(api_auth_login))
        .merge(private)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured

    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    // Put into request extensions for trace layer & handlers
    req.extensions_mut().insert(ReqId(rid.clone()));
    // Call next
    let mut resp = next.run(req).await;
    // Set header on response
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let path = req.uri().path().to_string();
    let mut resp = next.run(req).await;

    // General security headers for all responses
    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("SAMEORIGIN"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );
    // HSTS is only honored on HTTPS; harmless otherwise
    headers.insert(
        HeaderName::from_static("strict-transport-security"),
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );

    // Disable caching for API and health endpoints
    if path == "/healthz" || path.starts_with("/api/") || path == "/api" {
        headers.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
        headers.insert(
            HeaderName::from_static("pragma"),
            HeaderValue::from_static("no-cache"),
        );
        headers.insert(
            HeaderName::from_static("expires"),
            HeaderValue::from_static("0"),
        );
    }

    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        let span = Span::current();
        span.record("username", tracing::field::display(&auth.claims.sub));
        span.record("role", tracing::field::debug(&auth.claims.role));
        if let Some(mid) = &auth.claims.member_id {
            span.record("member_id", tracing::field::display(mid));
        }
        if let Some(did) = &auth.claims.device_id {
            span.record("device_id", tracing::field::display(did));
        }
    }
    Ok(next.run(req).await)
}

fn ensure_household(state: &AppState, household_id: &str) -> Result<(), AppError> {
    if household_id != state.config.household_id {
        return Err(AppError::not_found(format!(
            "household not found: {}",
            household_id
        )));
    }
    Ok(())
}

/// Admins act for the whole household; members only for themselves.
fn ensure_member_access(auth: &AuthCtx, member_id: &str) -> Result<(), AppError> {
    match auth.claims.role {
        Role::Admin => Ok(()),
        Role::Member => {
            if auth.claims.member_id.as_deref() == Some(member_id) {
                Ok(())
            } else {
                Err(AppError::forbidden())
            }
        }
    }
}

fn ensure_admin(auth: &AuthCtx) -> Result<(), AppError> {
    if auth.claims.role == Role::Admin {
        Ok(())
    } else {
        Err(AppError::forbidden())
    }
}

#[derive(Deserialize)]
struct HouseholdMemberPath {
    household_id: String,
    member_id: String,
}

async fn api_register_device(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(p): Path<HouseholdMemberPath>,
    Json(body): Json<api::DeviceRegisterReq>,
) -> Result<StatusCode, AppError> {
    ensure_household(&state, &p.household_id)?;
    ensure_member_access(&auth, &p.member_id)?;
    if body.token.trim().is_empty() {
        return Err(AppError::bad_request("token is required"));
    }
    let exists = state
        .store
        .member_exists(&p.member_id)
        .await
        .map_err(AppError::internal)?;
    if !exists {
        return Err(AppError::not_found(format!(
            "member not found: {}",
            p.member_id
        )));
    }
    state
        .store
        .upsert_device_token(&p.member_id, &body.token, body.platform.as_str())
        .await
        .map_err(AppError::internal)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn api_remove_devices(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(p): Path<HouseholdMemberPath>,
) -> Result<StatusCode, AppError> {
    ensure_household(&state, &p.household_id)?;
    ensure_member_access(&auth, &p.member_id)?;
    let removed = state
        .store
        .delete_device_tokens_for_user(&p.member_id)
        .await
        .map_err(AppError::internal)?;
    tracing::info!(member_id = %p.member_id, removed, "device tokens removed");
    Ok(StatusCode::NO_CONTENT)
}

async fn api_dispatch(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(household_id): Path<String>,
    Json(body): Json<api::DispatchReq>,
) -> Result<Json<api::DispatchResp>, AppError> {
    ensure_household(&state, &household_id)?;
    ensure_admin(&auth)?;
    if body.user_ids.is_empty() {
        return Err(AppError::bad_request("user_ids must not be empty"));
    }
    if body.title.trim().is_empty() || body.body.trim().is_empty() {
        return Err(AppError::bad_request("title and body are required"));
    }
    let dispatch = state.dispatch()?;
    let summary = dispatch
        .send(
            &state.store,
            &body.user_ids,
            &body.title,
            &body.body,
            body.data.as_ref(),
        )
        .await
        .map_err(AppError::internal)?;
    Ok(Json(api::DispatchResp {
        success: true,
        sent: summary.sent,
        failed: summary.failed,
        cleaned: summary.cleaned,
        total_tokens: summary.total_tokens,
    }))
}

async fn api_due_scan(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(household_id): Path<String>,
) -> Result<Json<api::ScanResp>, AppError> {
    ensure_household(&state, &household_id)?;
    ensure_admin(&auth)?;
    let dispatch = state.dispatch()?;
    let summary = scan::run(&state.store, dispatch, state.config.timezone())
        .await
        .map_err(AppError::internal)?;
    Ok(Json(api::ScanResp {
        success: true,
        due_today_users: summary.due_today_users,
        due_today_tasks: summary.due_today_tasks,
        upcoming_users: summary.upcoming_users,
        upcoming_tasks: summary.upcoming_tasks,
        notifications_sent: summary.notifications_sent,
    }))
}

async fn api_auth_login(
    State(state): State<AppState>,
    Json(body): Json<api::AuthReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    // Find user in config
    let user = state
        .config
        .users
        .iter()
        .find(|u| u.username == body.username)
        .ok_or_else(|| {
            tracing::warn!(username=%body.username, "login: unknown username");
            AppError::unauthorized()
        })?;
    if !verify(&body.password, &user.password_hash).map_err(|e| {
        tracing::error!(username=%body.username, error=%e, "login: bcrypt verify failed");
        AppError::internal(e)
    })? {
        tracing::warn!(username=%body.username, "login: invalid password");
        return Err(AppError::unauthorized());
    }
    // For member role, ensure member_id provided
    if user.role == Role::Member && user.member_id.is_none() {
        tracing::error!(username=%body.username, "login: member user missing member_id in config");
        return Err(AppError::internal("member user missing member_id"));
    }
    let token = auth::issue_jwt_for_user(
        &state,
        &user.username,
        user.role,
        user.member_id.clone(),
        None,
    )
    .await?;
    Ok(Json(api::AuthResp { token }))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(String),
    Unavailable(String),
    Internal(String),
}

impl AppError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    fn unauthorized() -> Self {
        Self::Unauthorized
    }
    fn forbidden() -> Self {
        Self::Forbidden
    }
    fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    fn unavailable<T: Into<String>>(msg: T) -> Self {
        Self::Unavailable(msg.into())
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".into(),
                "unauthorized",
                None,
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".into(), "forbidden", None),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, "not_found", None),
            AppError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m, "unavailable", None),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                Some(m),
            ),
        };
        // Log any error responses at ERROR level to file for troubleshooting
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else {
            tracing::error!(status = %status, kind = kind, message = %msg, "request failed");
        }
        let body = axum::Json(ErrorBody { error: msg });
        (status, body).into_response()
    }
}
