use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::incident::Incident;
use crate::models::job::{ImportJob, JobStatus};
use crate::models::patch::CorrectionPatch;
use crate::services::validation::{Correction, Finding};

const JOB_COLUMNS: &str =
    "id, status, original_file_ref, error_report_ref, processing_log, owner, created_at";

/// Append `$2` as a new line of the processing log.
const APPEND_LOG: &str = "processing_log = CASE WHEN processing_log = '' THEN $2 \
                          ELSE processing_log || E'\\n' || $2 END";

fn job_from_row(row: &PgRow) -> Result<ImportJob, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(ImportJob {
        id: row.try_get("id")?,
        status,
        original_file_ref: row.try_get("original_file_ref")?,
        error_report_ref: row.try_get("error_report_ref")?,
        processing_log: row.try_get("processing_log")?,
        owner: row.try_get("owner")?,
        created_at: row.try_get("created_at")?,
    })
}

fn line_param(line_number: u32) -> i32 {
    i32::try_from(line_number).unwrap_or(i32::MAX)
}

/// Insert a new `PENDING` job.
pub async fn create_job(
    pool: &PgPool,
    id: Uuid,
    original_file_ref: &str,
    owner: &str,
) -> Result<ImportJob, sqlx::Error> {
    let row = sqlx::query(&format!(
        "INSERT INTO import_jobs (id, status, original_file_ref, owner) \
         VALUES ($1, 'PENDING', $2, $3) \
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(id)
    .bind(original_file_ref)
    .bind(owner)
    .fetch_one(pool)
    .await?;

    job_from_row(&row)
}

pub async fn get_job(pool: &PgPool, id: Uuid) -> Result<Option<ImportJob>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM import_jobs WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// One page of jobs, newest first, plus the total matching the filter.
pub async fn list_jobs(
    pool: &PgPool,
    owner: Option<&str>,
    status: Option<JobStatus>,
    page: u32,
    page_size: u32,
) -> Result<(Vec<ImportJob>, u64), sqlx::Error> {
    let status = status.map(|s| s.to_string());
    let filter = "($1::text IS NULL OR owner = $1) AND ($2::text IS NULL OR status = $2)";

    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM import_jobs WHERE {filter}"
    ))
    .bind(owner)
    .bind(status.as_deref())
    .fetch_one(pool)
    .await?;

    let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);
    let rows = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM import_jobs WHERE {filter} \
         ORDER BY created_at DESC, id LIMIT $3 OFFSET $4"
    ))
    .bind(owner)
    .bind(status.as_deref())
    .bind(i64::from(page_size))
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()?;
    Ok((jobs, u64::try_from(count).unwrap_or(0)))
}

/// Move a `PENDING` job to `PROCESSING`. `None` if the job is in any other state.
pub async fn start_processing(
    pool: &PgPool,
    id: Uuid,
    log_line: &str,
) -> Result<Option<ImportJob>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "UPDATE import_jobs SET status = 'PROCESSING', {APPEND_LOG}, updated_at = NOW() \
         WHERE id = $1 AND status = 'PENDING' \
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(id)
    .bind(log_line)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Store a patch against a job in `ERROR` and move it back to `PROCESSING`.
///
/// Each entry is resolved to the target of the current incident on that line;
/// lines without an incident are ignored. Returns the updated job and the
/// number of corrections stored, or `None` if the job is not in `ERROR`.
pub async fn apply_corrections(
    pool: &PgPool,
    id: Uuid,
    patch: &CorrectionPatch,
) -> Result<Option<(ImportJob, usize)>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM import_jobs WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

    if status.as_deref() != Some(JobStatus::Error.as_ref()) {
        tx.rollback().await?;
        return Ok(None);
    }

    let mut applied = 0usize;
    for (line_number, value) in patch.iter() {
        let result = sqlx::query(
            r#"
            INSERT INTO import_corrections (job_id, line_number, target, value)
            SELECT job_id, line_number, target, $3
            FROM import_incidents
            WHERE job_id = $1 AND line_number = $2
            ON CONFLICT (job_id, line_number, target)
            DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(id)
        .bind(line_param(line_number))
        .bind(value)
        .execute(&mut *tx)
        .await?;

        applied += result.rows_affected() as usize;
    }

    let mut log_line = format!("[CORRECTIONS APPLIED] {applied} records");
    let ignored = patch.len().saturating_sub(applied);
    if ignored > 0 {
        log_line.push_str(&format!(" ({ignored} without a matching incident ignored)"));
    }

    let row = sqlx::query(&format!(
        "UPDATE import_jobs SET status = 'PROCESSING', {APPEND_LOG}, updated_at = NOW() \
         WHERE id = $1 \
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(id)
    .bind(&log_line)
    .fetch_one(&mut *tx)
    .await?;

    let job = job_from_row(&row)?;
    tx.commit().await?;

    Ok(Some((job, applied)))
}

/// Record the outcome of a validation pass on a `PROCESSING` job.
///
/// Replaces the incident set. With findings the job moves to `ERROR` and
/// gets `report_ref`; without, to `COMPLETED`. An earlier report ref is
/// never cleared.
pub async fn complete_pass(
    pool: &PgPool,
    id: Uuid,
    findings: &[Finding],
    report_ref: &str,
) -> Result<Option<ImportJob>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM import_incidents WHERE job_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    for finding in findings {
        let incident = &finding.incident;
        sqlx::query(
            r#"
            INSERT INTO import_incidents
                (job_id, line_number, target, original_value, error_message, suggestions)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(line_param(incident.line_number))
        .bind(finding.target.to_string())
        .bind(&incident.original_value)
        .bind(&incident.error_message)
        .bind(&incident.suggestions)
        .execute(&mut *tx)
        .await?;
    }

    let (status, report_ref, log_line) = if findings.is_empty() {
        (
            JobStatus::Completed,
            None,
            "[COMPLETED] all records valid".to_string(),
        )
    } else {
        (
            JobStatus::Error,
            Some(report_ref),
            format!("[VALIDATION] {} incidents", findings.len()),
        )
    };

    let row = sqlx::query(&format!(
        "UPDATE import_jobs SET status = $3, error_report_ref = COALESCE($4, error_report_ref), \
         {APPEND_LOG}, updated_at = NOW() \
         WHERE id = $1 AND status = 'PROCESSING' \
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(id)
    .bind(&log_line)
    .bind(status.to_string())
    .bind(report_ref)
    .fetch_optional(&mut *tx)
    .await?;

    match row {
        Some(row) => {
            let job = job_from_row(&row)?;
            tx.commit().await?;
            Ok(Some(job))
        }
        None => {
            tx.rollback().await?;
            Ok(None)
        }
    }
}

/// Give up on a pass: the job moves to `ERROR` with `[ERROR] <message>` logged.
pub async fn fail_pass(
    pool: &PgPool,
    id: Uuid,
    message: &str,
) -> Result<Option<ImportJob>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "UPDATE import_jobs SET status = 'ERROR', {APPEND_LOG}, updated_at = NOW() \
         WHERE id = $1 AND status = 'PROCESSING' \
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(id)
    .bind(format!("[ERROR] {message}"))
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Incidents of the latest pass, in line order.
pub async fn load_incidents(pool: &PgPool, id: Uuid) -> Result<Vec<Incident>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT line_number, original_value, error_message, suggestions
        FROM import_incidents
        WHERE job_id = $1
        ORDER BY line_number
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let line_number: i32 = row.try_get("line_number")?;
            Ok(Incident {
                line_number: u32::try_from(line_number).unwrap_or_default(),
                original_value: row.try_get("original_value")?,
                error_message: row.try_get("error_message")?,
                suggestions: row.try_get("suggestions")?,
                correction: String::new(),
            })
        })
        .collect()
}

pub async fn load_corrections(pool: &PgPool, id: Uuid) -> Result<Vec<Correction>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT line_number, target, value FROM import_corrections WHERE job_id = $1",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let mut corrections = Vec::with_capacity(rows.len());
    for row in &rows {
        let line_number: i32 = row.try_get("line_number")?;
        let target: String = row.try_get("target")?;
        match target.parse() {
            Ok(target) => corrections.push(Correction {
                line_number: u32::try_from(line_number).unwrap_or_default(),
                target,
                value: row.try_get("value")?,
            }),
            Err(e) => tracing::warn!(job_id = %id, line = line_number, error = %e, "skipping stored correction"),
        }
    }
    Ok(corrections)
}

/// All gazetteer names.
pub async fn municipality_names(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT name FROM municipalities ORDER BY name")
        .fetch_all(pool)
        .await
}
