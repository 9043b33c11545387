use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, TypedHeader},
    headers::{authorization::Bearer, Authorization},
    http::{header, request::Parts, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// The verified caller. Serialises as one flat object: `id`, `roles`, then
/// every other claim of the token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

impl Principal {
    /// A principal with no claims beyond its id and roles.
    pub fn new(id: impl Into<String>, roles: &[&str]) -> Self {
        Self {
            id: id.into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            claims: Map::new(),
        }
    }

    /// Builds a principal from decoded token claims. The identifier is the
    /// Azure object id (`oid`), or `sub` for tokens without one.
    pub fn from_claims(mut claims: Map<String, Value>) -> Option<Self> {
        let id = claims
            .get("oid")
            .or_else(|| claims.get("sub"))
            .and_then(Value::as_str)?
            .to_string();
        let roles = match claims.remove("roles") {
            Some(Value::Array(roles)) => roles
                .into_iter()
                .filter_map(|r| match r {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            Some(Value::String(role)) => vec![role],
            _ => Vec::new(),
        };
        claims.remove("id");
        Some(Self { id, roles, claims })
    }
}

/// Validates bearer tokens. Implementations are initialised once and shared
/// by every request.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Principal, AuthError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid token")]
    InvalidToken,
    #[error("internal server error")]
    InternalServer,
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    Arc<dyn TokenVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AuthError::InvalidToken)?;
        let verifier = <Arc<dyn TokenVerifier> as FromRef<S>>::from_ref(state);
        verifier.verify(bearer.token()).await
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token"),
            AuthError::InternalServer => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };
        tracing::debug!("{}, {}", status, error_message);

        let body = Json(json!({
            "error": error_message,
        }));
        let mut response = (status, body).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
