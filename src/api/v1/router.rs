use super::error::*;
use super::handler;
use crate::application_port::SessionManager;
use crate::domain_model::Identity;
use std::convert::Infallible;
use std::sync::Arc;
use warp::{Filter, http, reject};

/// Largest JSON body accepted by the credential endpoints.
const MAX_BODY_BYTES: u64 = 16 * 1024;

pub fn routes(
    session_manager: Arc<dyn SessionManager>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let login = warp::post()
        .and(warp::path("login"))
        .and(warp::path::end())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with(session_manager.clone()))
        .and_then(handler::login);

    let refresh = warp::post()
        .and(warp::path("refresh"))
        .and(warp::path::end())
        .and(bearer())
        .and(with(session_manager.clone()))
        .and_then(handler::refresh);

    let revoke = warp::post()
        .and(warp::path("revoke"))
        .and(warp::path::end())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with(session_manager.clone()))
        .and_then(handler::revoke);

    let logout_all = warp::post()
        .and(warp::path("logout_all"))
        .and(warp::path::end())
        .and(with_authentication(session_manager.clone()))
        .and(with(session_manager))
        .and_then(handler::logout_all);

    login.or(refresh).or(revoke).or(logout_all)
}

fn with<ServiceType>(
    service: Arc<ServiceType>,
) -> impl Filter<Extract = (Arc<ServiceType>,), Error = Infallible> + Clone
where
    ServiceType: Send + Sync + ?Sized,
{
    warp::any().map(move || service.clone())
}

/// Extracts the token from `Authorization: Bearer <token>`. A missing header is
/// a malformed request; any other scheme is unauthorized.
fn bearer() -> impl Filter<Extract = (String,), Error = warp::Rejection> + Clone {
    warp::header::<String>(http::header::AUTHORIZATION.as_ref()).and_then(
        |header: String| async move {
            match header.strip_prefix("Bearer ") {
                Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
                _ => Err(reject::custom(ApiErrorCode::Unauthorized)),
            }
        },
    )
}

fn with_authentication(
    session_manager: Arc<dyn SessionManager>,
) -> impl Filter<Extract = (Identity,), Error = warp::Rejection> + Clone {
    bearer().and_then(move |token: String| {
        let session_manager = session_manager.clone();
        async move {
            session_manager
                .authenticate(&token)
                .await
                .map_err(ApiErrorCode::from)
                .map_err(reject::custom)
        }
    })
}
