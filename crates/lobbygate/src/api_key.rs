//! Extracts the caller's raw API key from request headers.
//!
//! Accepted forms, checked in order:
//!
//! - `X-Api-Key: lgk_...`
//! - `Authorization: Bearer lgk_...`
//!
//! Extraction never rejects. A request without a key reaches the
//! authenticator as `None` so the rejection lands in the usage ledger.

use std::convert::Infallible;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use lobbygate_gateway::RawApiKey;

pub const API_KEY_HEADER: &str = "x-api-key";

/// The presented key, if any. Not yet checked against the registry.
pub struct PresentedKey(pub Option<RawApiKey>);

#[async_trait]
impl<S> FromRequestParts<S> for PresentedKey
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header_key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        let bearer = || {
            parts
                .headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        Ok(Self(header_key.or_else(bearer).map(RawApiKey::new)))
    }
}
