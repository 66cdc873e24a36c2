use axum::async_trait;
use axum::{
    extract::FromRequestParts,
    headers::{authorization::Bearer, Authorization},
    http::{request::Parts, HeaderMap, StatusCode},
    TypedHeader,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Deserialize)]
struct Claims {
    sub: Uuid,
    role: String,
    #[serde(default)]
    company_id: Option<Uuid>,
    #[allow(dead_code)]
    exp: usize,
}

/// Caller identity from a token minted by the external identity provider.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: String,
    pub company_id: Option<Uuid>,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    /// Company-scoped endpoints are open to that company's users and to admins.
    pub fn require_company(&self, company_id: Uuid) -> Result<(), AppError> {
        if self.is_admin() || self.company_id == Some(company_id) {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token_opt = cookie_token(&parts.headers).or_else(|| bearer_token(&parts.headers));
        let token = token_opt.ok_or((StatusCode::UNAUTHORIZED, "Missing token".into()))?;
        let secret = crate::config::JWT_SECRET.as_str();
        let decoded = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid token".into()))?;
        Ok(AuthUser {
            user_id: decoded.claims.sub,
            role: decoded.claims.role,
            company_id: decoded.claims.company_id,
        })
    }
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    cookies
        .split(';')
        .find_map(|c| c.trim().strip_prefix("auth_token=").map(|s| s.to_string()))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|s| s.to_string())
}

/// The external scheduler, authenticated by `CRON_SECRET`.
pub struct CronCaller;

/// The quote intake flow, authenticated by `INTAKE_API_TOKEN`.
pub struct IntakeCaller;

#[async_trait]
impl<S> FromRequestParts<S> for CronCaller
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        require_bearer(parts, state, crate::config::CRON_SECRET.as_str()).await?;
        Ok(CronCaller)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for IntakeCaller
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        require_bearer(parts, state, crate::config::INTAKE_API_TOKEN.as_str()).await?;
        Ok(IntakeCaller)
    }
}

async fn require_bearer<S>(
    parts: &mut Parts,
    state: &S,
    expected: &str,
) -> Result<(), (StatusCode, String)>
where
    S: Send + Sync,
{
    let TypedHeader(Authorization(bearer)) =
        TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
            .await
            .map_err(|_| (StatusCode::UNAUTHORIZED, "Missing token".to_string()))?;
    if constant_time_eq(bearer.token().as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "Invalid token".into()))
    }
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .zip(right)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
