use crate::{
    error::ApiError,
    model::{
        permissions::{Capability, Permissions},
        role::Role,
    },
    models::Claims,
};
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload};
use futures::future::{Ready, ready};

/// The authenticated caller, placed in request extensions by the auth middleware.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
    pub permissions: Permissions,
    pub claims: Claims,
}

impl AuthUser {
    pub fn from_claims(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id,
            username: claims.sub.clone(),
            role: claims.role,
            permissions: Permissions::for_role(claims.role),
            claims,
        }
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.permissions.allows(capability)
    }

    pub fn require(&self, capability: Capability) -> Result<(), ApiError> {
        if self.can(capability) {
            Ok(())
        } else {
            tracing::info!(
                user_id = self.user_id,
                role = %self.role,
                capability = %capability,
                "Permission denied"
            );
            Err(ApiError::forbidden("ليس لديك صلاحية للقيام بهذه العملية"))
        }
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(ApiError::forbidden("هذه العملية متاحة لمدير النظام فقط"))
        }
    }
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthUser>()
                .cloned()
                .ok_or_else(|| ApiError::unauthorized("يجب تسجيل الدخول أولاً")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{ResponseError, http::StatusCode};

    fn user(role: Role) -> AuthUser {
        AuthUser::from_claims(Claims {
            user_id: 7,
            sub: "hala".into(),
            role,
            iat: 0,
            exp: 60,
            jti: "auth-user-test".into(),
        })
    }

    #[test]
    fn require_follows_the_role_matrix() {
        let clerk = user(Role::DataEntry);
        assert!(clerk.require(Capability::ManageProjects).is_ok());

        let err = clerk.require(Capability::ViewSafe).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn only_admins_pass_require_admin() {
        assert!(user(Role::Admin).require_admin().is_ok());
        assert!(user(Role::Partners).require_admin().is_err());
    }
}
