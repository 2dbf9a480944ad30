use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::jwt::validate_token;

/// Pulls the raw token out of an `Authorization: Bearer ...` header.
pub fn bearer_token<B>(request: &Request<B>) -> Result<&str, AppError> {
    let auth_value = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?
        .to_str()
        .map_err(|_| AppError::Auth("Invalid authorization header format".to_string()))?;

    auth_value
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Auth("Invalid authorization header format".to_string()))
}

// Validates the bearer token and stores the caller as a `User` extension.
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let user = validate_token(bearer_token(&request)?, &config.jwt_secret)
        .map_err(|e| AppError::Auth(e.to_string()))?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

// Must run after `auth_middleware`.
pub async fn require_clinician(request: Request<Body>, next: Next) -> Result<Response, AppError> {
    let user = extract_user(&request)?;
    if !user.is_clinician() {
        debug!("User {} with role {:?} refused clinician route", user.id, user.role);
        return Err(AppError::Forbidden(
            "Only doctors and admins may scan patient codes".to_string(),
        ));
    }
    Ok(next.run(request).await)
}

pub fn extract_user<B>(request: &Request<B>) -> Result<User, AppError> {
    request
        .extensions()
        .get::<User>()
        .cloned()
        .ok_or_else(|| AppError::Auth("User not found in request extensions".to_string()))
}
