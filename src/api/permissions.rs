use crate::{
    auth::auth::AuthUser,
    error::ApiError,
    model::{permissions::Permissions, role::Role},
    utils::response,
};
use actix_web::Responder;
use serde::Serialize;
use strum::IntoEnumIterator;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct RolePermissions {
    pub role: Role,
    #[schema(example = "مدخل بيانات")]
    pub role_label: String,
    pub permissions: Permissions,
}

impl RolePermissions {
    fn of(role: Role) -> Self {
        Self {
            role,
            role_label: role.label().to_string(),
            permissions: Permissions::for_role(role),
        }
    }
}

/// Caller's role and capability flags
#[utoipa::path(
    get,
    path = "/api/permissions",
    responses((status = 200, body = RolePermissions)),
    security(("bearer_auth" = [])),
    tag = "Permissions"
)]
pub async fn my_permissions(auth: AuthUser) -> impl Responder {
    response::ok(RolePermissions::of(auth.role))
}

/// Capability matrix of every role (admin only)
#[utoipa::path(
    get,
    path = "/api/permissions/roles",
    responses((status = 200, body = [RolePermissions]), (status = 403)),
    security(("bearer_auth" = [])),
    tag = "Permissions"
)]
pub async fn role_matrix(auth: AuthUser) -> Result<impl Responder, ApiError> {
    auth.require_admin()?;
    let roles: Vec<RolePermissions> = Role::iter().map(RolePermissions::of).collect();
    Ok(response::ok(roles))
}
