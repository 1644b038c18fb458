use huella_import::{
    app_state::AppState,
    config::AppConfig,
    db::{self, queries},
    models::job::{ImportJob, JobStatus},
    routes::imports::error_report_ref,
    services::{
        queue::{PassQueue, QueuedPass},
        storage::{ObjectStore, StorageError},
        tokens::TokenVerifier,
        validation::{RecordValidator, SourceError},
    },
};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const MAX_ATTEMPTS: u32 = 3;
const POLL_INTERVAL_MS: u64 = 1000;

#[derive(Debug, thiserror::Error)]
enum PassError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("could not read source file: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

impl PassError {
    /// Retrying cannot help: the uploaded file itself is unusable.
    fn is_permanent(&self) -> bool {
        matches!(self, PassError::Source(_))
    }
}

/// The processing-log message when a failed pass should end the job, or
/// `None` when it should be queued again.
fn failure_message(error: &PassError, attempt: u32) -> Option<String> {
    if error.is_permanent() {
        Some(error.to_string())
    } else if attempt + 1 >= MAX_ATTEMPTS {
        Some(format!("validation failed after {MAX_ATTEMPTS} attempts: {error}"))
    } else {
        None
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting huella validation worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url, 5)
        .await
        .expect("Failed to connect to database");

    let storage = ObjectStore::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize object storage");

    let queue = PassQueue::new(&config.redis_url).expect("Failed to initialize validation queue");

    let state = AppState::new(db_pool, storage, queue, TokenVerifier::new(&config.jwt_secret));

    tracing::info!("Worker ready, waiting for validation passes");

    loop {
        match process_next_pass(&state).await {
            Ok(true) => {
                tracing::debug!("Pass handled, checking for next one");
            }
            Ok(false) => {
                tracing::trace!("Queue empty, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error handling pass, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Handle the next queued pass.
/// Returns Ok(true) if a pass was taken off the queue, Ok(false) if it was empty.
async fn process_next_pass(state: &AppState) -> Result<bool, Box<dyn std::error::Error>> {
    let pass = match state.queue.dequeue().await? {
        Some(pass) => pass,
        None => return Ok(false),
    };

    tracing::info!(
        job_id = %pass.job_id,
        kind = ?pass.kind,
        attempt = pass.attempt,
        "Running validation pass"
    );

    match run_pass(state, &pass).await {
        Ok(Some(job)) => {
            tracing::info!(job_id = %job.id, status = %job.status, "Validation pass finished");
        }
        Ok(None) => {
            tracing::warn!(job_id = %pass.job_id, "Import is no longer processing, pass dropped");
        }
        Err(e) => match failure_message(&e, pass.attempt) {
            Some(message) => {
                tracing::error!(job_id = %pass.job_id, error = %e, "Validation pass failed, giving up");
                queries::fail_pass(&state.db, pass.job_id, &message).await?;
            }
            None => {
                tracing::warn!(job_id = %pass.job_id, error = %e, "Validation pass failed, re-queued");
                state.queue.enqueue(&pass.retried()).await?;
            }
        },
    }

    state.queue.complete(&pass).await?;
    Ok(true)
}

/// Validate the source file of a `PROCESSING` job with its stored
/// corrections applied, and record the new incident set.
async fn run_pass(state: &AppState, pass: &QueuedPass) -> Result<Option<ImportJob>, PassError> {
    let job = match queries::get_job(&state.db, pass.job_id).await? {
        Some(job) if job.status == JobStatus::Processing => job,
        _ => return Ok(None),
    };

    let start = Instant::now();
    let bytes = state.storage.download(&job.original_file_ref).await?;

    let corrections = queries::load_corrections(&state.db, job.id).await?;
    let gazetteer = queries::municipality_names(&state.db).await?;

    let findings = RecordValidator::new(gazetteer).validate_source(&bytes, &corrections)?;

    tracing::info!(
        job_id = %job.id,
        corrections = corrections.len(),
        incidents = findings.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Source file validated"
    );

    Ok(queries::complete_pass(&state.db, job.id, &findings, &error_report_ref(job.id)).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreadable_source_fails_job_at_once() {
        let error = PassError::from(SourceError::NotUtf8(12));
        let message = failure_message(&error, 0).unwrap();
        assert!(message.starts_with("source file is not valid UTF-8"));
    }

    #[test]
    fn test_infrastructure_errors_are_retried() {
        let error = PassError::from(StorageError::Config("bucket missing".into()));
        assert_eq!(failure_message(&error, 0), None);
        assert_eq!(failure_message(&error, MAX_ATTEMPTS - 2), None);
        assert!(failure_message(&error, MAX_ATTEMPTS - 1)
            .unwrap()
            .starts_with("validation failed after 3 attempts"));
    }
}
