use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::auth::Principal;

/// The principal was authenticated but lacks the role a route requires.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("User does not have the required role: {role}")]
pub struct Forbidden {
    pub role: String,
}

/// Lets `principal` through iff it holds `required_role` exactly.
pub fn authorize(required_role: &str, principal: Principal) -> Result<Principal, Forbidden> {
    if principal.roles.iter().any(|role| role == required_role) {
        Ok(principal)
    } else {
        Err(Forbidden {
            role: required_role.to_string(),
        })
    }
}

impl IntoResponse for Forbidden {
    fn into_response(self) -> Response {
        tracing::debug!("{}, {}", StatusCode::FORBIDDEN, self);

        let body = Json(json!({
            "error": self.to_string(),
            "role": self.role,
        }));
        (StatusCode::FORBIDDEN, body).into_response()
    }
}
