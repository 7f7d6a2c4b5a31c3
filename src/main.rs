use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer, Responder, get};

mod api;
mod auth;
mod config;
mod db;
mod docs;
mod error;
mod model;
mod models;
mod routes;
mod service;
mod utils;

use config::Config;
use db::{init_db, run_migrations};

use crate::docs::ApiDoc;
use crate::service::biometric::BiometricClient;
use crate::service::storage::UploadStore;
use crate::utils::{code_cache, username_filter};
use tracing::{error, info};
use tracing_appender::rolling;
use utoipa::OpenApi; // ← needed for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

#[get("/")]
async fn index() -> impl Responder {
    "Training Academy API"
}

fn startup_error(context: &str, e: impl std::fmt::Display) -> std::io::Error {
    error!("{context}: {e}");
    std::io::Error::other(format!("{context}: {e}"))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = Config::from_env().map_err(|e| std::io::Error::other(format!("{e:#}")))?;

    // Rolling daily log
    let file_appender = rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(if config.is_development() {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    error::expose_internal_details(config.is_development());
    info!(addr = %config.server_addr, env = %config.app_env, "Server starting...");

    let pool = init_db(&config.database_url)
        .await
        .map_err(|e| startup_error("Database connection failed", e))?;

    if config.run_migrations {
        run_migrations(&pool)
            .await
            .map_err(|e| startup_error("Migrations failed", e))?;
        info!("Migrations applied");
    }

    let biometric_client = BiometricClient::new(config.biometric_timeout_secs)
        .map_err(|e| startup_error("HTTP client setup failed", e))?;
    let upload_store = UploadStore::new(&config.upload_dir, config.max_upload_bytes);

    let pool_for_filter_warmup = pool.clone();
    let pool_for_cache_warmup = pool.clone();
    // Clone values for the closure (avoid move issues)
    let server_addr = config.server_addr.clone();
    let config_data = config.clone();

    actix_web::rt::spawn(async move {
        if let Err(e) = username_filter::warmup_username_filter(&pool_for_filter_warmup, 100).await
        {
            error!("Failed to warmup username filter: {e:?}");
        }
    });

    actix_web::rt::spawn(async move {
        if let Err(e) = code_cache::warmup_code_cache(&pool_for_cache_warmup).await {
            error!("Failed to warmup biometric code cache: {e:?}");
        }
    });

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // ← important: wildcard {_:.*} to match JS/CSS files
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(Data::new(pool.clone()))
            .app_data(Data::new(config.clone()))
            .app_data(Data::new(biometric_client.clone()))
            .app_data(Data::new(upload_store.clone()))
            .service(index)
            // Configure auth + protected routes with rate limiting
            .configure(|cfg| routes::configure(cfg, config_data.clone()))
    })
    .bind(server_addr)?
    .run()
    .await
}
