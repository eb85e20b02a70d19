use crate::engine::EngineHandle;
use crate::error::ApiError;
use crate::images::ImageStore;
use crate::store::{FaceStore, Student};
use crate::upload::TempUpload;
use attendo_core::{Descriptor, EuclideanMatcher, Matcher};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::path::PathBuf;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Multipart field carrying the photo.
const IMAGE_FIELD: &str = "faceImage";

#[derive(Clone)]
pub struct AppState {
    pub store: FaceStore,
    pub engine: EngineHandle,
    pub images: Option<ImageStore>,
    pub upload_dir: PathBuf,
    pub match_threshold: f32,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/register", post(handler_register))
        .route("/mark-attendance", post(handler_mark_attendance))
        .route("/students", get(handler_students))
        .route("/manual-attendance", post(handler_manual_attendance))
        .route("/status", get(handler_status))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Default)]
struct UploadForm {
    image: Option<(Option<String>, Vec<u8>)>,
    name: String,
    details: String,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                IMAGE_FIELD => {
                    let file_name = field.file_name().map(str::to_string);
                    let bytes = field.bytes().await?;
                    form.image = Some((file_name, bytes.to_vec()));
                }
                "name" => form.name = field.text().await?,
                "details" => form.details = field.text().await?,
                other => tracing::debug!(field = other, "ignoring unknown form field"),
            }
        }
        Ok(form)
    }

    async fn stage_image(&mut self, upload_dir: &std::path::Path) -> Result<TempUpload, ApiError> {
        let (file_name, bytes) = self
            .image
            .take()
            .ok_or(ApiError::BadRequest("No image uploaded"))?;
        Ok(TempUpload::write(upload_dir, file_name.as_deref(), &bytes).await?)
    }
}

async fn handler_register(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<String, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.stage_image(&state.upload_dir).await?;

    let image = match &state.images {
        Some(images) => {
            let url = images.upload(upload.original_name(), upload.read().await?).await?;
            images.fetch(&url).await?
        }
        None => upload.read().await?,
    };
    let descriptor = state.engine.encode(image).await?;
    drop(upload);

    let Some(descriptor) = descriptor else {
        tracing::info!(name = %form.name, "register: no face detected");
        return Ok("No face detected".to_string());
    };

    let face_id = state
        .store
        .insert_face(form.name.clone(), form.details, &descriptor)
        .await?;
    tracing::info!(face_id, name = %form.name, "face registered");
    Ok("Face registered successfully".to_string())
}

async fn handler_mark_attendance(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<String, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let upload = form.stage_image(&state.upload_dir).await?;
    let descriptor = state.engine.encode(upload.read().await?).await?;
    drop(upload);

    let Some(descriptor) = descriptor else {
        tracing::info!("mark-attendance: no face detected");
        return Ok("No face detected".to_string());
    };

    mark_matched(&state, &descriptor).await
}

async fn mark_matched(state: &AppState, descriptor: &Descriptor) -> Result<String, ApiError> {
    let gallery = state.store.load_gallery().await?;
    let result = EuclideanMatcher.find(descriptor, &gallery, state.match_threshold);

    let (true, Some(face_id), Some(name)) = (result.matched, result.face_id, result.name) else {
        tracing::info!(
            gallery = gallery.len(),
            closest = result.distance,
            threshold = state.match_threshold,
            "face not recognized"
        );
        return Ok("Face not recognized".to_string());
    };

    state.store.record_attendance(face_id, today()).await?;
    tracing::info!(face_id, name = %name, distance = result.distance, "attendance marked");
    Ok(format!(
        "Attendance marked for {name} (distance: {:.4})",
        result.distance
    ))
}

async fn handler_students(State(state): State<AppState>) -> Result<Json<Vec<Student>>, ApiError> {
    Ok(Json(state.store.list_students().await?))
}

async fn handler_manual_attendance(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<String, ApiError> {
    // An unreadable body is treated like one without a selection.
    let body = body.map(|Json(v)| v).unwrap_or_else(|rejection| {
        tracing::debug!(error = %rejection, "manual attendance body not JSON");
        Value::Null
    });
    let ids = match body.get("studentIds").and_then(Value::as_array) {
        Some(ids) if !ids.is_empty() => ids,
        _ => return Err(ApiError::BadRequest("No students selected")),
    };
    let ids = ids
        .iter()
        .map(Value::as_i64)
        .collect::<Option<Vec<i64>>>()
        .ok_or(ApiError::BadRequest("Student ids must be integers"))?;

    tracing::info!(?ids, "manual attendance");
    state.store.record_many(ids, today()).await?;
    Ok("Manual attendance submitted".to_string())
}

async fn handler_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let enrolled = state.store.count_faces().await?;
    Ok(Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "enrolled": enrolled,
        "match_threshold": state.match_threshold,
        "image_store": state.images.as_ref().map(ImageStore::cloud_name).unwrap_or("disabled"),
    })))
}

fn today() -> chrono::NaiveDate {
    chrono::Utc::now().date_naive()
}
