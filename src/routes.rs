use axum::{routing::get, Json, Router};

use crate::auth::Principal;
use crate::guard::{self, Forbidden};
use crate::AppState;

/// A `GET` resource that only principals holding `role` may read.
#[derive(Debug, Clone, Copy)]
pub struct ProtectedRoute {
    pub path: &'static str,
    pub role: &'static str,
}

pub const PROTECTED_ROUTES: &[ProtectedRoute] = &[
    ProtectedRoute {
        path: "/sge",
        role: "sge",
    },
    ProtectedRoute {
        path: "/nw",
        role: "nw",
    },
];

pub fn protected(routes: &[ProtectedRoute]) -> Router<AppState> {
    routes.iter().fold(Router::new(), |router, route| {
        let role = route.role;
        router.route(
            route.path,
            get(move |principal: Principal| protected_resource(role, principal)),
        )
    })
}

// The principal extractor has already authenticated the caller.
async fn protected_resource(
    role: &'static str,
    principal: Principal,
) -> Result<Json<Principal>, Forbidden> {
    let principal = guard::authorize(role, principal)?;
    tracing::debug!(id = %principal.id, role, "access granted");
    Ok(Json(principal))
}
