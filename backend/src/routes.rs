use actix_files::{Files, NamedFile};
use actix_multipart::Multipart;
use actix_web::dev::{fn_service, ServiceRequest, ServiceResponse};
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use log::{error, info};
use serde::Serialize;
use shared::UploadResponse;
use std::io::Write;

use crate::db::{Database, RepositoryError};
use crate::storage::csv_sink::{CsvSink, CsvSinkError};
use crate::storage::uploads::{UploadStore, UploadStoreError};
use crate::vision::client::{VisionClient, VisionError};

const IMAGE_FIELD: &str = "image";

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No file uploaded under field 'image'")]
    MissingFile,
    #[error("Failed to read multipart field: {0}")]
    Intake(String),
    #[error("Temp storage error: {0}")]
    Storage(#[from] UploadStoreError),
    #[error("Label detection error: {0}")]
    LabelDetection(#[from] VisionError),
    #[error("Keyword persistence error: {0}")]
    Database(#[from] RepositoryError),
    #[error("CSV persistence error: {0}")]
    CsvSink(#[from] CsvSinkError),
}

impl UploadError {
    fn status(&self) -> StatusCode {
        match self {
            UploadError::MissingFile | UploadError::Intake(_) => StatusCode::BAD_REQUEST,
            UploadError::Storage(_)
            | UploadError::LabelDetection(_)
            | UploadError::Database(_)
            | UploadError::CsvSink(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    // The client only ever sees a generic message; the cause goes to the log.
    fn public_message(&self) -> &'static str {
        match self {
            UploadError::MissingFile => "No image file was uploaded",
            UploadError::Intake(_) => "Failed to read the uploaded file",
            _ => "Image analysis failed",
        }
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, frontend_dir: String) {
    let index_file = format!("{}/index.html", frontend_dir);
    cfg.service(web::resource("/upload").route(web::post().to(handle_upload)))
        .service(
            Files::new("/", frontend_dir)
                .index_file("index.html")
                .default_handler(fn_service(move |req: ServiceRequest| {
                    let index_file = index_file.clone();
                    async move {
                        let (req, _) = req.into_parts();
                        let file = NamedFile::open_async(&index_file).await?;
                        let res = file.into_response(&req);
                        Ok(ServiceResponse::new(req, res))
                    }
                })),
        );
}

async fn handle_upload(
    payload: Multipart,
    uploads: web::Data<UploadStore>,
    vision: web::Data<VisionClient>,
    database: web::Data<Database>,
    csv_sink: web::Data<CsvSink>,
) -> HttpResponse {
    match run_upload(payload, &uploads, &vision, &database, &csv_sink).await {
        Ok(response) => {
            info!(
                "Analyzed '{}' into {} keywords",
                response.filename,
                response.keywords.len()
            );
            HttpResponse::Ok().json(response)
        }
        Err(err) => {
            error!("Upload pipeline failed: {:?}", err);
            HttpResponse::build(err.status()).json(ErrorResponse {
                error: err.public_message().to_string(),
            })
        }
    }
}

// Intake -> label detection -> SQLite -> CSV -> response. The first failing
// step short-circuits everything after it; the temp file is removed when
// `temp_upload` leaves scope on either path.
async fn run_upload(
    mut payload: Multipart,
    uploads: &UploadStore,
    vision: &VisionClient,
    database: &Database,
    csv_sink: &CsvSink,
) -> Result<UploadResponse, UploadError> {
    let (image_data, filename) = read_image_field(&mut payload).await?;
    let temp_upload = uploads.persist(&image_data).await?;

    let keywords = vision.detect_labels(temp_upload.path()).await?;

    database.insert_keywords(&filename, &keywords).await?;
    csv_sink.append(&filename, &keywords, Utc::now()).await?;

    Ok(UploadResponse {
        message: "Upload and analysis succeeded".to_string(),
        filename,
        keywords,
    })
}

async fn read_image_field(payload: &mut Multipart) -> Result<(Vec<u8>, String), UploadError> {
    while let Ok(Some(mut field)) = payload.try_next().await {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or(IMAGE_FIELD)
            .to_string();

        let mut image_data = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk.map_err(|err| UploadError::Intake(err.to_string()))?;
            image_data
                .write_all(&data)
                .map_err(|err| UploadError::Intake(err.to_string()))?;
        }

        if image_data.is_empty() {
            return Err(UploadError::MissingFile);
        }
        return Ok((image_data, filename));
    }

    Err(UploadError::MissingFile)
}
