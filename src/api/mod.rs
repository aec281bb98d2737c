use crate::application_port::SessionManager;
use std::convert::Infallible;
use std::sync::Arc;
use warp::Filter;

pub mod v1;

/// Every versioned route, mounted under `/api`, with rejections rendered as
/// `ApiResponse` errors.
pub fn routes(
    session_manager: Arc<dyn SessionManager>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
    warp::path("api")
        .and(warp::path("v1"))
        .and(v1::routes(session_manager))
        .recover(v1::recover_error)
}
