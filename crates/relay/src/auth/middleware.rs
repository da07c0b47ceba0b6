use crate::{
    auth::jwt::{AccessIdentity, JwtAccessTokenService},
    error::{ErrorCode, RelayError},
};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

const DISPLAY_NAME_PREFIX: &str = "User-";
const DISPLAY_NAME_ID_CHARS: usize = 8;

/// Identity injected into request extensions by [`require_bearer_auth`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
}

impl AuthenticatedUser {
    pub fn from_identity(identity: AccessIdentity) -> Self {
        let display_name = default_display_name(&identity.user_id);
        Self { user_id: identity.user_id, email: identity.email, display_name }
    }
}

/// Placeholder display name until profiles are looked up: `User-` plus the
/// first eight characters of the user id.
pub fn default_display_name(user_id: &str) -> String {
    let short_id = user_id.chars().take(DISPLAY_NAME_ID_CHARS).collect::<String>();
    format!("{DISPLAY_NAME_PREFIX}{short_id}")
}

pub async fn require_bearer_auth(
    State(jwt_service): State<Arc<JwtAccessTokenService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
    {
        Some(token) => token,
        None => return unauthorized_response("missing bearer token"),
    };

    let identity = match jwt_service.validate_access_token(token) {
        Ok(identity) => identity,
        Err(_) => return unauthorized_response("invalid bearer token"),
    };

    request.extensions_mut().insert(AuthenticatedUser::from_identity(identity));

    next.run(request).await
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}

fn unauthorized_response(message: &'static str) -> Response {
    RelayError::new(ErrorCode::AuthInvalidToken, message).into_response()
}
