mod db;
mod routes;
mod storage;
mod vision;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use db::Database;
use routes::configure_routes;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use storage::csv_sink::CsvSink;
use storage::uploads::UploadStore;
use vision::client::VisionClient;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let frontend_dir = env::var("FRONTEND_DIR").unwrap_or_else(|_| {
        if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
            format!("{}/../build", manifest_dir)
        } else {
            "./build".to_string()
        }
    });

    let upload_dir =
        PathBuf::from(env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string()));
    std::fs::create_dir_all(&upload_dir)?;
    let upload_store = UploadStore::new(upload_dir);

    let database_path =
        PathBuf::from(env::var("DATABASE_PATH").unwrap_or_else(|_| "keywords.db".to_string()));
    let database = Database::new(database_path).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Database initialization failed: {:?}", e),
        )
    })?;

    let csv_path =
        PathBuf::from(env::var("CSV_PATH").unwrap_or_else(|_| "keywords.csv".to_string()));
    let csv_sink = CsvSink::new(csv_path).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("CSV sink initialization failed: {:?}", e),
        )
    })?;

    let credentials_path = env::var("GOOGLE_APPLICATION_CREDENTIALS")
        .unwrap_or_else(|_| "service-account.json".to_string());
    let vision_timeout = env::var("VISION_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30);
    let vision_client = VisionClient::from_key_file(
        Path::new(&credentials_path),
        Duration::from_secs(vision_timeout),
    )
    .map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Vision client initialization failed: {:?}", e),
        )
    })?;
    log::info!("Vision client ready (credentials: {})", credentials_path);

    let port = env::var("PORT").unwrap_or_else(|_| "4000".to_string());
    let bind_address = format!("0.0.0.0:{}", port);

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(web::Data::new(upload_store.clone()))
            .app_data(web::Data::new(vision_client.clone()))
            .app_data(web::Data::new(database.clone()))
            .app_data(web::Data::new(csv_sink.clone()))
            .configure(|cfg| configure_routes(cfg, frontend_dir.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
