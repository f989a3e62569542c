//! Token verification middleware.
//!
//! The console sends an HS256 JWT in the `token` header. The middleware
//! validates signature and expiry, then attaches the caller's user id to
//! the request for handlers to record on writes. Health probes are mounted
//! outside the guarded router and stay public.

use crate::errors::AppError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jwt_compact::{
    AlgorithmExt, TimeOptions, UntrustedToken,
    alg::{Hs256, Hs256Key},
};
use serde::{Deserialize, Serialize};

/// Authenticated caller, available to handlers as an extension.
#[derive(Clone, Copy, Debug)]
pub struct AuthUser {
    pub id: i64,
}

/// Custom claims carried by console tokens.
#[derive(Serialize, Deserialize, Debug)]
pub struct TokenClaims {
    pub id: i64,
}

pub async fn token_verifier(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get("token")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("Missing Token"))?;

    let user = verify_token(token, &state.token_key)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Validate a raw token string into an [`AuthUser`].
pub fn verify_token(token: &str, key: &Hs256Key) -> Result<AuthUser, AppError> {
    let untrusted =
        UntrustedToken::new(token).map_err(|_| AppError::unauthorized("Token Parse Error"))?;
    let token: jwt_compact::Token<TokenClaims> = Hs256
        .validator(key)
        .validate(&untrusted)
        .map_err(|_| AppError::unauthorized("Token Parse Error"))?;
    token
        .claims()
        .validate_expiration(&TimeOptions::default())
        .map_err(|_| AppError::unauthorized("Token Expired"))?;
    Ok(AuthUser {
        id: token.claims().custom.id,
    })
}
