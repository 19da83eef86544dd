use crate::{
    api::{contractors, employees, expenses, permissions, projects, reports, transactions, users},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
    error::ApiError,
    utils::response,
};
use actix_governor::{
    Governor, GovernorConfig, GovernorConfigBuilder, PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware,
};
use actix_web::{HttpResponse, Resource, Responder, middleware::from_fn, web};
use serde_json::json;

type Limiter = GovernorConfig<PeerIpKeyExtractor, NoOpMiddleware>;

/// Rate limiter state; built once so every worker shares the same buckets.
#[derive(Clone)]
pub struct Limiters {
    login: Limiter,
    protected: Limiter,
}

impl Limiters {
    pub fn new(config: &Config) -> Self {
        Self {
            login: build_limiter(config.rate_login_per_min),
            protected: build_limiter(config.rate_protected_per_min),
        }
    }
}

fn build_limiter(requests_per_min: u32) -> Limiter {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / requests_per_min as u64).max(1);

    GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .unwrap_or_default()
}

async fn method_not_allowed() -> Result<HttpResponse, ApiError> {
    Err(ApiError::MethodNotAllowed)
}

pub async fn not_found() -> Result<HttpResponse, ApiError> {
    Err(ApiError::not_found("المسار المطلوب غير موجود"))
}

async fn health() -> impl Responder {
    response::ok(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// A resource answering 405 for methods it does not route.
fn resource(path: &str) -> Resource {
    web::resource(path).default_service(web::to(method_not_allowed))
}

fn extractor_configs(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().limit(1 << 20).error_handler(|err, _| {
        ApiError::bad_request(format!("بيانات الطلب غير صالحة: {err}")).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _| {
        ApiError::bad_request(format!("معاملات الاستعلام غير صالحة: {err}")).into()
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _| {
        ApiError::bad_request(format!("المسار غير صالح: {err}")).into()
    }));
}

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config, limiters: &Limiters) {
    let prefix = config.api_prefix.trim_end_matches('/');

    extractor_configs(cfg);

    // Public routes. Registered as exact resources ahead of the protected scope,
    // which would otherwise claim every path under the prefix.
    cfg.service(
        resource(&format!("{prefix}/auth/login"))
            .wrap(Governor::new(&limiters.login))
            .route(web::post().to(handlers::login)),
    )
    .service(resource(&format!("{prefix}/health")).route(web::get().to(health)));

    // Protected routes
    cfg.service(
        web::scope(prefix)
            .wrap(from_fn(auth_middleware))
            .wrap(Governor::new(&limiters.protected))
            // auth
            .service(resource("/auth/logout").route(web::post().to(handlers::logout)))
            .service(resource("/auth/verify").route(web::get().to(handlers::verify)))
            .service(
                resource("/auth/profile")
                    .route(web::get().to(handlers::get_profile))
                    .route(web::put().to(handlers::update_profile)),
            )
            .service(
                resource("/auth/profile/password").route(web::put().to(handlers::change_password)),
            )
            // permissions
            .service(resource("/permissions").route(web::get().to(permissions::my_permissions)))
            .service(resource("/permissions/roles").route(web::get().to(permissions::role_matrix)))
            // users
            .service(
                resource("/users")
                    .route(web::get().to(users::list_users))
                    .route(web::post().to(users::create_user)),
            )
            .service(
                resource("/users/username-available")
                    .route(web::get().to(users::username_available)),
            )
            .service(
                resource("/users/{id}")
                    .route(web::get().to(users::get_user))
                    .route(web::put().to(users::update_user))
                    .route(web::delete().to(users::delete_user)),
            )
            // projects
            .service(
                resource("/projects")
                    .route(web::get().to(projects::list_projects))
                    .route(web::post().to(projects::create_project)),
            )
            .service(
                resource("/projects/{id}")
                    .route(web::get().to(projects::get_project))
                    .route(web::put().to(projects::update_project))
                    .route(web::delete().to(projects::delete_project)),
            )
            // employees & payroll
            .service(
                resource("/employees")
                    .route(web::get().to(employees::list_employees))
                    .route(web::post().to(employees::create_employee)),
            )
            .service(
                resource("/employees/{id}")
                    .route(web::get().to(employees::get_employee))
                    .route(web::put().to(employees::update_employee))
                    .route(web::delete().to(employees::delete_employee)),
            )
            .service(resource("/employees/{id}/pay").route(web::post().to(employees::pay_salary)))
            .service(resource("/payroll/summary").route(web::get().to(employees::payroll_summary)))
            // contractors
            .service(
                resource("/contractors")
                    .route(web::get().to(contractors::list_contractors))
                    .route(web::post().to(contractors::create_contractor)),
            )
            .service(
                resource("/contractors/{id}")
                    .route(web::get().to(contractors::get_contractor))
                    .route(web::put().to(contractors::update_contractor))
                    .route(web::delete().to(contractors::delete_contractor)),
            )
            // safe
            .service(
                resource("/transactions")
                    .route(web::get().to(transactions::list_transactions))
                    .route(web::post().to(transactions::create_transaction)),
            )
            .service(
                resource("/transactions/{id}")
                    .route(web::get().to(transactions::get_transaction))
                    .route(web::delete().to(transactions::void_transaction)),
            )
            .service(resource("/safe/balance").route(web::get().to(transactions::safe_balance)))
            // expenses
            .service(
                resource("/expenses")
                    .route(web::get().to(expenses::list_expenses))
                    .route(web::post().to(expenses::create_expense)),
            )
            .service(resource("/expenses/pending-count").route(web::get().to(expenses::pending_count)))
            .service(
                resource("/expenses/{id}")
                    .route(web::get().to(expenses::get_expense))
                    .route(web::put().to(expenses::update_expense)),
            )
            .service(resource("/expenses/{id}/approve").route(web::post().to(expenses::approve_expense)))
            .service(resource("/expenses/{id}/reject").route(web::post().to(expenses::reject_expense)))
            .service(resource("/expenses/{id}/pay").route(web::post().to(expenses::pay_expense)))
            // reports
            .service(resource("/dashboard").route(web::get().to(reports::dashboard)))
            .service(resource("/reports/summary").route(web::get().to(reports::summary)))
            .service(resource("/reports/projects").route(web::get().to(reports::project_spending)))
            .service(resource("/reports/monthly").route(web::get().to(reports::monthly))),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::jwt::generate_token, model::role::Role};
    use actix_web::{App, http::StatusCode, test};
    use sqlx::postgres::PgPoolOptions;
    use std::net::SocketAddr;

    const SECRET: &str = "routes-test-secret";

    fn config() -> Config {
        Config::from_lookup(|k| match k {
            "JWT_SECRET" => Some(SECRET.to_string()),
            _ => None,
        })
        .unwrap()
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn bearer(role: Role) -> (&'static str, String) {
        let (token, _) = generate_token(21, "route-tester".into(), role, SECRET, 600).unwrap();
        ("Authorization", format!("Bearer {token}"))
    }

    macro_rules! app {
        () => {{
            let config = config();
            let limiters = Limiters::new(&config);
            // Never connects: every request below is answered before touching the database.
            let pool = PgPoolOptions::new()
                .connect_lazy("postgres://postgres@localhost/unused")
                .unwrap();
            test::init_service(
                App::new()
                    .app_data(web::Data::new(pool))
                    .app_data(web::Data::new(config.clone()))
                    .configure(|cfg| configure(cfg, &config, &limiters))
                    .default_service(web::to(not_found)),
            )
            .await
        }};
    }

    #[actix_web::test]
    async fn health_is_public() {
        let app = app!();
        let req = test::TestRequest::get().uri("/api/health").peer_addr(peer()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn protected_routes_need_a_token() {
        let app = app!();
        let req = test::TestRequest::get().uri("/api/projects").peer_addr(peer()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn partners_cannot_create_projects() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/api/projects")
            .peer_addr(peer())
            .insert_header(bearer(Role::Partners))
            .set_json(json!({ "name": "مستودع" }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
    }

    #[actix_web::test]
    async fn partners_cannot_record_safe_movements() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/api/transactions")
            .peer_addr(peer())
            .insert_header(bearer(Role::Partners))
            .set_json(json!({ "type": "inflow", "amount": 100.0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn data_entry_cannot_read_the_safe() {
        let app = app!();
        let req = test::TestRequest::get()
            .uri("/api/safe/balance")
            .peer_addr(peer())
            .insert_header(bearer(Role::DataEntry))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn data_entry_cannot_approve_expenses() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/api/expenses/3/approve")
            .peer_addr(peer())
            .insert_header(bearer(Role::DataEntry))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn data_entry_cannot_cancel_a_project_through_update() {
        let app = app!();
        let req = test::TestRequest::put()
            .uri("/api/projects/4")
            .peer_addr(peer())
            .insert_header(bearer(Role::DataEntry))
            .set_json(json!({ "status": "cancelled" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn unknown_employee_status_filter_is_400() {
        let app = app!();
        let req = test::TestRequest::get()
            .uri("/api/employees?status=retired")
            .peer_addr(peer())
            .insert_header(bearer(Role::Admin))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn unrouted_method_is_405() {
        let app = app!();
        let req = test::TestRequest::patch()
            .uri("/api/safe/balance")
            .peer_addr(peer())
            .insert_header(bearer(Role::Admin))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[actix_web::test]
    async fn unknown_path_is_404_envelope() {
        let app = app!();
        let req = test::TestRequest::get()
            .uri("/api/nothing-here")
            .peer_addr(peer())
            .insert_header(bearer(Role::Admin))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
    }

    #[actix_web::test]
    async fn malformed_json_is_400_envelope() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .peer_addr(peer())
            .insert_header(("Content-Type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
    }

    #[actix_web::test]
    async fn non_numeric_id_is_400() {
        let app = app!();
        let req = test::TestRequest::get()
            .uri("/api/projects/abc")
            .peer_addr(peer())
            .insert_header(bearer(Role::Admin))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
