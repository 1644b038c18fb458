use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use garde::Validate;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::access::Action;
use crate::models::job::{ImportJob, JobStatus, Page};
use crate::models::patch::CorrectionPatch;
use crate::routes::auth::AuthUser;
use crate::routes::error::ApiError;
use crate::services::queue::{PassKind, QueuedPass};
use crate::services::report_codec;
use crate::services::storage::ObjectStore;

const DEFAULT_PAGE_SIZE: u32 = 20;

/// Where the error report of a job is served from.
pub fn error_report_ref(id: Uuid) -> String {
    format!("/imports/{id}/error-report")
}

#[derive(Debug, Deserialize, Validate)]
pub struct ListQuery {
    #[garde(length(min = 1, max = 150))]
    pub owner: Option<String>,

    #[garde(skip)]
    pub status: Option<JobStatus>,

    #[garde(range(min = 1))]
    pub page: Option<u32>,

    #[garde(range(min = 1, max = 100))]
    pub page_size: Option<u32>,
}

async fn load_job(state: &AppState, id: Uuid) -> Result<ImportJob, ApiError> {
    queries::get_job(&state.db, id)
        .await?
        .ok_or(ApiError::NotFound(id))
}

/// Queue a pass; if that fails the job is marked failed so it is not left
/// in `PROCESSING` with nobody working on it.
async fn enqueue_pass(state: &AppState, pass: QueuedPass) -> Result<(), ApiError> {
    if let Err(e) = state.queue.enqueue(&pass).await {
        queries::fail_pass(&state.db, pass.job_id, "validation queue unavailable").await?;
        return Err(e.into());
    }
    metrics::counter!("import_passes_queued_total").increment(1);
    Ok(())
}

/// POST /imports: upload a source file as a new `PENDING` job.
pub async fn create_import(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ImportJob>), ApiError> {
    user.require(Action::Upload)?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        if matches!(name.as_deref(), Some("file") | Some("fichero_original")) {
            let file_name = field.file_name().unwrap_or("upload.csv").to_string();
            let data = field.bytes().await?;
            upload = Some((file_name, data));
        }
    }

    let (file_name, data) =
        upload.ok_or_else(|| ApiError::BadRequest("no file uploaded".to_string()))?;
    if data.is_empty() {
        return Err(ApiError::BadRequest("uploaded file is empty".to_string()));
    }

    let id = Uuid::new_v4();
    let key = ObjectStore::original_key(id, &file_name);
    state.storage.upload(&key, &data, "text/csv").await?;

    let job = queries::create_job(&state.db, id, &key, user.username()).await?;
    metrics::counter!("imports_created_total").increment(1);
    metrics::histogram!("import_upload_bytes").record(data.len() as f64);

    tracing::info!(job_id = %id, owner = %job.owner, bytes = data.len(), "import created");
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /imports: paginated listing, newest first.
pub async fn list_imports(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<ImportJob>>, ApiError> {
    user.require(Action::View)?;
    query
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let page = query.page.unwrap_or(1);
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    let (results, count) = queries::list_jobs(
        &state.db,
        query.owner.as_deref(),
        query.status,
        page,
        page_size,
    )
    .await?;

    let (next, previous) = page_links(page, page_size, count);
    Ok(Json(Page {
        count,
        next,
        previous,
        results,
    }))
}

/// Neighbouring page numbers, if those pages exist.
fn page_links(page: u32, page_size: u32, count: u64) -> (Option<u32>, Option<u32>) {
    let shown = u64::from(page) * u64::from(page_size);
    let next = page.checked_add(1).filter(|_| shown < count);
    let previous = page.checked_sub(1).filter(|p| *p >= 1);
    (next, previous)
}

/// GET /imports/{id}
pub async fn get_import(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ImportJob>, ApiError> {
    user.require(Action::View)?;
    Ok(Json(load_job(&state, id).await?))
}

/// GET /imports/{id}/error-report: the latest incident set as report text.
pub async fn get_error_report(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    user.require(Action::View)?;

    let job = load_job(&state, id).await?;
    if !job.has_error_report() {
        return Err(ApiError::NotFound(id));
    }

    let incidents = queries::load_incidents(&state.db, id).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        report_codec::encode_report(&incidents),
    ))
}

/// POST /imports/{id}/process: start the first validation pass.
pub async fn process_import(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ImportJob>, ApiError> {
    user.require(Action::Process)?;

    let current = load_job(&state, id).await?;
    let log_line = format!("[PROCESSING] requested by {}", user.username());
    let job = queries::start_processing(&state.db, id, &log_line)
        .await?
        .ok_or_else(|| {
            ApiError::Conflict(format!(
                "import is {}, only PENDING imports can be processed",
                current.status
            ))
        })?;

    enqueue_pass(&state, QueuedPass::new(id, PassKind::Initial)).await?;

    tracing::info!(job_id = %id, "validation pass queued");
    Ok(Json(job))
}

/// POST /imports/{id}/apply-corrections: store a patch and re-validate.
pub async fn apply_corrections(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<ImportJob>, ApiError> {
    user.require(Action::EditRecord)?;

    let mut patch_text = None;
    let mut form_job_id = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("corrections") | Some("correcciones") => {
                let bytes = field.bytes().await?;
                let text = String::from_utf8(bytes.to_vec()).map_err(|_| {
                    ApiError::BadRequest("correction patch is not valid UTF-8".to_string())
                })?;
                patch_text = Some(text);
            }
            Some("job_id") | Some("importacion_id") => form_job_id = Some(field.text().await?),
            _ => {}
        }
    }

    if let Some(form_id) = form_job_id {
        if form_id.trim() != id.to_string() {
            return Err(ApiError::BadRequest(
                "job_id does not match the import in the path".to_string(),
            ));
        }
    }

    let text = patch_text
        .ok_or_else(|| ApiError::BadRequest("no correction patch uploaded".to_string()))?;
    let patch =
        CorrectionPatch::from_wire(&text).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if patch.is_empty() {
        return Err(ApiError::BadRequest("correction patch is empty".to_string()));
    }

    let current = load_job(&state, id).await?;
    let (job, applied) = queries::apply_corrections(&state.db, id, &patch)
        .await?
        .ok_or_else(|| {
            ApiError::Conflict(format!(
                "import is {}, corrections are only accepted in ERROR",
                current.status
            ))
        })?;

    enqueue_pass(&state, QueuedPass::new(id, PassKind::Revalidation)).await?;
    metrics::counter!("import_corrections_applied_total").increment(applied as u64);

    tracing::info!(job_id = %id, submitted = patch.len(), applied, "corrections stored");
    Ok(Json(job))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_bounds() {
        let ok = ListQuery {
            owner: None,
            status: Some(JobStatus::Error),
            page: Some(1),
            page_size: Some(100),
        };
        assert!(ok.validate().is_ok());

        let too_big = ListQuery {
            owner: None,
            status: None,
            page: None,
            page_size: Some(101),
        };
        assert!(too_big.validate().is_err());

        let page_zero = ListQuery {
            owner: Some(String::new()),
            status: None,
            page: Some(0),
            page_size: None,
        };
        assert!(page_zero.validate().is_err());
    }

    #[test]
    fn test_page_links() {
        assert_eq!(page_links(1, 20, 0), (None, None));
        assert_eq!(page_links(1, 20, 41), (Some(2), None));
        assert_eq!(page_links(3, 20, 41), (None, Some(2)));
        assert_eq!(page_links(u32::MAX, 1, 10), (None, Some(u32::MAX - 1)));
        assert_eq!(page_links(u32::MAX, u32::MAX, u64::MAX), (None, Some(u32::MAX - 1)));
    }

    #[test]
    fn test_error_report_ref() {
        let id = Uuid::nil();
        assert_eq!(
            error_report_ref(id),
            "/imports/00000000-0000-0000-0000-000000000000/error-report"
        );
    }
}
