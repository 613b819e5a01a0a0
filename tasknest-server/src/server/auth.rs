use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use tasknest_shared::auth::Role;
use tasknest_shared::jwt::{self, JwtClaims};
use tracing::{error, warn};

use super::{AppError, AppState};

/// How many days of inactivity before a user session is considered expired.
const USER_SESSION_IDLE_DAYS: i64 = 14;
/// How many days before mandatory re-login for users.
const USER_TOKEN_TTL_DAYS: i64 = 30;
/// How many days of inactivity before a device session is considered expired.
const DEVICE_SESSION_IDLE_DAYS: i64 = 30;
/// How many days before mandatory re-login for devices.
const DEVICE_TOKEN_TTL_DAYS: i64 = 2 * DEVICE_SESSION_IDLE_DAYS;

#[derive(Clone, Debug)]
pub struct AuthCtx {
    pub claims: JwtClaims,
}

pub async fn require_bearer(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let unauthorized = || Err(AppError::unauthorized());
    let header_val = match req.headers().get(header::AUTHORIZATION) {
        Some(v) => v,
        None => return unauthorized(),
    };
    let header_str = header_val.to_str().map_err(|_| AppError::unauthorized())?;
    let prefix = "Bearer ";
    if !header_str.starts_with(prefix) {
        return unauthorized();
    }
    let token = &header_str[prefix.len()..];

    let claims = match jwt::decode_and_verify(token, state.config.jwt_secret.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error=%e, "auth: jwt decode failed");
            return unauthorized();
        }
    };

    validate_claims(&state, &claims).map_err(|e| {
        tracing::warn!(error=?e, username=%claims.sub, "auth: validate_claims failed");
        // Invalid token, log out the user
        AppError::unauthorized()
    })?;

    if claims.household_id != state.config.household_id {
        tracing::warn!(
            token_household=%claims.household_id,
            config_household=%state.config.household_id,
            "auth: household mismatch"
        );
        return unauthorized();
    }
    let jti = claims.jti.clone();
    let idle_days = if claims.device_id.is_some() {
        DEVICE_SESSION_IDLE_DAYS
    } else {
        USER_SESSION_IDLE_DAYS
    };
    let cutoff = Utc::now() - Duration::days(idle_days);
    match state
        .store
        .touch_session_with_cutoff(&jti, cutoff.naive_utc())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(
                jti = %jti,
                username = %claims.sub,
                cutoff = %cutoff,
                idle_days = idle_days,
                "auth: session missing or expired (last_used_at < cutoff)"
            );
            return unauthorized();
        }
        Err(e) => {
            error!(jti = %jti, error=%e, "auth: touch_session_with_cutoff failed");
            return Err(AppError::internal(e));
        }
    }
    let auth = AuthCtx { claims };
    req.extensions_mut().insert(auth);
    Ok(next.run(req).await)
}

pub async fn issue_jwt_for_user(
    state: &AppState,
    username: &str,
    role: Role,
    member_id: Option<String>,
    device_id: Option<String>,
) -> Result<String, AppError> {
    let jti = uuid::Uuid::new_v4().to_string();
    let ttl_days = if device_id.is_some() {
        DEVICE_TOKEN_TTL_DAYS
    } else {
        USER_TOKEN_TTL_DAYS
    };
    let exp = (Utc::now() + Duration::days(ttl_days)).timestamp();
    let claims = JwtClaims {
        sub: username.to_string(),
        jti: jti.clone(),
        exp,
        role,
        member_id,
        device_id,
        household_id: state.config.household_id.clone(),
    };

    validate_claims(state, &claims)?;

    state
        .store
        .create_session(&jti, username)
        .await
        .map_err(|e| {
            error!(username, error=%e, "login: create_session failed");
            AppError::internal(e)
        })?;
    let token = jwt::encode(&claims, state.config.jwt_secret.as_bytes()).map_err(|e| {
        error!(username, error=%e, "login: jwt encode failed");
        AppError::internal(e)
    })?;
    Ok(token)
}

fn validate_claims(state: &AppState, claims: &JwtClaims) -> Result<(), AppError> {
    if claims.household_id != state.config.household_id {
        warn!(
            username = %claims.sub,
            requested_household = %claims.household_id,
            configured_household = %state.config.household_id,
            "issue_jwt: household mismatch"
        );
        return Err(AppError::forbidden());
    }
    let user = state
        .config
        .users
        .iter()
        .find(|u| u.username == claims.sub)
        .ok_or_else(|| {
            warn!(username = %claims.sub, "issue_jwt: unknown user");
            AppError::forbidden()
        })?;

    match claims.role {
        Role::Admin => {
            if user.role != Role::Admin {
                warn!(
                    username = %claims.sub,
                    requested_role = ?claims.role,
                    actual_role = ?user.role,
                    "issue_jwt: role mismatch"
                );
                return Err(AppError::forbidden());
            }
        }
        Role::Member => {
            if user.role != Role::Member {
                warn!(
                    username = %claims.sub,
                    requested_role = ?claims.role,
                    actual_role = ?user.role,
                    "issue_jwt: role mismatch"
                );
                return Err(AppError::forbidden());
            }
            let member_id = claims.member_id.as_deref().ok_or_else(|| {
                warn!(username = %claims.sub, "issue_jwt: member token missing member_id");
                AppError::forbidden()
            })?;
            let expected_member = user.member_id.as_deref().ok_or_else(|| {
                warn!(
                    username = %claims.sub,
                    "issue_jwt: user missing member binding in config"
                );
                AppError::forbidden()
            })?;
            if expected_member != member_id {
                warn!(
                    username = %claims.sub,
                    expected = expected_member,
                    requested = member_id,
                    "issue_jwt: member mismatch"
                );
                return Err(AppError::forbidden());
            }
            if !state.config.members.iter().any(|m| m.id == member_id) {
                warn!(member_id, "issue_jwt: member not configured");
                return Err(AppError::not_found(format!(
                    "member not found: {}",
                    member_id
                )));
            }
            if let Some(device_id) = claims.device_id.as_deref()
                && device_id.trim().is_empty()
            {
                return Err(AppError::bad_request("device_id cannot be empty"));
            }
        }
    }

    Ok(())
}
