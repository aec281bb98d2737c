use super::error::*;
use crate::application_port::*;
use crate::domain_model::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{self, reject};

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(code: ApiErrorCode, message: impl Into<String>) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub device: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub id: UserId,
    pub email: String,
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
}

pub async fn login(
    body: LoginRequest,
    session_manager: Arc<dyn SessionManager>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let login_input = LoginInput {
        email: body.email,
        password: body.password,
        device: body.device,
    };
    let LoginResult { identity, tokens } = session_manager
        .login(login_input)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    let login_response = LoginResponse {
        id: identity.id,
        email: identity.email,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        access_token_expires_at: tokens.access_token_expires_at,
        refresh_token_expires_at: tokens.refresh_token_expires_at,
    };

    Ok(warp::reply::json(&ApiResponse::ok(login_response)))
}

pub async fn refresh(
    refresh_token: String,
    session_manager: Arc<dyn SessionManager>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let refreshed = session_manager
        .refresh_access_token(&refresh_token)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::with_status(
        warp::reply::json(&ApiResponse::ok(refreshed.tokens)),
        StatusCode::ACCEPTED,
    ))
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub refresh_token: String,
}

pub async fn revoke(
    body: RevokeRequest,
    session_manager: Arc<dyn SessionManager>,
) -> Result<impl warp::Reply, warp::Rejection> {
    session_manager
        .revoke_refresh_token(&body.refresh_token)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(())))
}

#[derive(Debug, Serialize)]
pub struct LogoutAllResponse {
    pub revoked: usize,
}

pub async fn logout_all(
    identity: Identity,
    session_manager: Arc<dyn SessionManager>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let revoked = session_manager
        .revoke_all_sessions(identity.id)
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    Ok(warp::reply::json(&ApiResponse::ok(LogoutAllResponse { revoked })))
}
