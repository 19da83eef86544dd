use crate::auth::auth::AuthUser;
use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::error::ApiError;
use crate::utils::session_guard;
use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, ResponseError,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    web::Data,
};

/// Bearer-token gate for the protected scope.
pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    match authenticate(&req).await {
        Ok(auth_user) => {
            req.extensions_mut().insert(auth_user);
            next.call(req).await
        }
        Err(err) => {
            tracing::debug!(path = %req.path(), reason = %err, "Rejected unauthenticated request");
            let resp = err.error_response();
            Ok(req.into_response(resp))
        }
    }
}

async fn authenticate(req: &ServiceRequest) -> Result<AuthUser, ApiError> {
    let config = req
        .app_data::<Data<Config>>()
        .ok_or_else(|| ApiError::internal("App config missing"))?;

    let header_value = req
        .headers()
        .get("Authorization")
        .ok_or_else(|| ApiError::unauthorized("رمز الدخول مفقود"))?
        .to_str()
        .map_err(|_| ApiError::unauthorized("ترويسة التفويض غير صالحة"))?;

    let token = header_value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::unauthorized("يجب أن تبدأ ترويسة التفويض بـ Bearer"))?;

    let claims = verify_token(token, &config.jwt_secret)
        .map_err(|_| ApiError::unauthorized("رمز الدخول غير صالح أو منتهي الصلاحية"))?;

    if session_guard::is_revoked(&claims).await {
        return Err(ApiError::unauthorized("تم إنهاء الجلسة، يرجى تسجيل الدخول مجدداً"));
    }

    Ok(AuthUser::from_claims(claims))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::generate_token;
    use crate::model::role::Role;
    use actix_web::{App, HttpResponse, http::StatusCode, middleware::from_fn, test, web};

    fn config() -> Config {
        Config::from_lookup(|k| match k {
            "JWT_SECRET" => Some("middleware-test-secret".to_string()),
            _ => None,
        })
        .unwrap()
    }

    async fn whoami(user: AuthUser) -> HttpResponse {
        HttpResponse::Ok().body(format!("{}:{}", user.username, user.role))
    }

    macro_rules! app {
        () => {
            test::init_service(
                App::new().app_data(Data::new(config())).service(
                    web::scope("/api")
                        .wrap(from_fn(auth_middleware))
                        .route("/whoami", web::get().to(whoami)),
                ),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn missing_header_is_401_with_envelope() {
        let app = app!();
        let req = test::TestRequest::get().uri("/api/whoami").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(body["message"].is_string());
    }

    #[actix_web::test]
    async fn non_bearer_scheme_is_rejected() {
        let app = app!();
        let req = test::TestRequest::get()
            .uri("/api/whoami")
            .insert_header(("Authorization", "Basic YWRtaW46YWRtaW4="))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn garbage_token_is_rejected() {
        let app = app!();
        let req = test::TestRequest::get()
            .uri("/api/whoami")
            .insert_header(("Authorization", "Bearer not.a.jwt"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn valid_token_reaches_the_handler() {
        let app = app!();
        let (token, _) = generate_token(
            5,
            "layla".into(),
            Role::DataEntry,
            "middleware-test-secret",
            600,
        )
        .unwrap();

        let req = test::TestRequest::get()
            .uri("/api/whoami")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert_eq!(body, "layla:data_entry");
    }

    #[actix_web::test]
    async fn revoked_token_is_rejected() {
        let app = app!();
        let (token, claims) =
            generate_token(6, "omar".into(), Role::Admin, "middleware-test-secret", 600).unwrap();
        session_guard::revoke_jti(&claims.jti).await;

        let req = test::TestRequest::get()
            .uri("/api/whoami")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
