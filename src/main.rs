use actix_cors::Cors;
use actix_web::http::header;
use actix_web::middleware::{Logger, NormalizePath};
use actix_web::web::{self, Data};
use actix_web::{App, HttpServer};
use std::io;

mod api;
mod auth;
mod config;
mod db;
mod docs;
mod error;
mod model;
mod models;
mod routes;
mod utils;

use config::Config;
use db::{init_db, run_migrations};

use crate::docs::ApiDoc;
use crate::routes::Limiters;
use crate::utils::{session_guard, username_index};
use tracing::{error, info, warn};
use tracing_appender::rolling;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

fn cors(config: &Config) -> Cors {
    let cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .max_age(3600);

    if config.allows_any_origin() {
        cors.allow_any_origin()
    } else {
        config
            .cors_origins
            .iter()
            .fold(cors, |cors, origin| cors.allowed_origin(origin))
    }
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return Err(io::Error::other(e));
        }
    };

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(config.log_level)
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!(addr = %config.server_addr, "Server starting...");

    let pool = init_db(&config).await.map_err(|e| {
        error!(error = %e, "Failed to connect to database");
        io::Error::other(e)
    })?;

    if config.run_migrations {
        run_migrations(&pool).await.map_err(|e| {
            error!(error = %e, "Migrations failed");
            io::Error::other(e)
        })?;
        info!("Migrations applied");
    }

    if let Some((username, password)) = &config.bootstrap_admin {
        if let Err(e) = auth::handlers::bootstrap_admin(&pool, username, password).await {
            error!(error = %e, "Failed to bootstrap admin account");
        }
    }

    let pool_for_index_warmup = pool.clone();
    let pool_for_guard_warmup = pool.clone();

    actix_web::rt::spawn(async move {
        if let Err(e) = username_index::warmup_username_index(&pool_for_index_warmup, 100).await {
            warn!(error = %e, "Failed to warm up username index");
        }
    });

    actix_web::rt::spawn(async move {
        if let Err(e) = session_guard::warmup_session_guard(&pool_for_guard_warmup, 500).await {
            warn!(error = %e, "Failed to warm up session guard");
        }
    });

    // Shared across workers so rate limits are per process, not per worker.
    let limiters = Limiters::new(&config);
    let server_addr = config.server_addr.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(NormalizePath::trim())
            .wrap(cors(&config))
            .service(
                // wildcard {_:.*} matches the UI's JS/CSS assets
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(Data::new(pool.clone()))
            .app_data(Data::new(config.clone()))
            .configure(|cfg| routes::configure(cfg, &config, &limiters))
            .default_service(web::to(routes::not_found))
    })
    .bind(server_addr)?
    .run()
    .await
}
