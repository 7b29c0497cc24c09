use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;

/// The caller's `Authorization: Bearer <key>`, recorded as the owner of uploaded content.
///
/// Keys are not verified here; a missing header yields `None`.
pub struct ApiKey(pub Option<String>);

impl<S> FromRequestParts<S> for ApiKey
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(header) = parts.headers.get("Authorization") else {
            return Ok(ApiKey(None));
        };
        let value = header
            .to_str()
            .map_err(|_| AppError::Validation("Authorization header is not valid text".into()))?;
        let key = value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::Validation("Authorization must be a Bearer key".into()))?;
        Ok(ApiKey(Some(key.to_string())))
    }
}
