//! Authentication middleware.
//!
//! Applied to every task route; `/service-info` stays outside. The
//! resolved [`Subject`] travels in request extensions so handlers can
//! scope their store calls without re-validating anything.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, warn};

use crate::auth::Subject;
use crate::errors::PoiesisError;

use super::error::ApiError;
use super::state::AppState;

pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| ApiError(PoiesisError::Auth("missing Authorization header".into())))?;
    let header = header
        .to_str()
        .map_err(|_| ApiError(PoiesisError::Auth("malformed Authorization header".into())))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError(PoiesisError::Auth("expected a Bearer token".into())))?;

    let subject: Subject = state.auth.authenticate(token).await.map_err(|e| {
        warn!(error = %e, "bearer token rejected");
        ApiError(e)
    })?;

    debug!(user_id = %subject.user_id, "request authenticated");
    request.extensions_mut().insert(subject);
    Ok(next.run(request).await)
}
