use huella_import::{
    config::AppConfig,
    db::{self, queries},
    models::job::JobStatus,
    models::patch::CorrectionPatch,
    services::{
        extractor,
        queue::{PassKind, PassQueue, QueuedPass},
        report_codec,
        storage::ObjectStore,
        validation::{RecordValidator, MIN_COLUMNS},
    },
};
use uuid::Uuid;

fn record(postal_code: &str, locality: &str) -> String {
    let mut fields = vec![String::new(); MIN_COLUMNS];
    fields[0] = "1001".into();
    fields[1] = postal_code.into();
    fields[2] = "Asturias".into();
    fields[3] = locality.into();
    fields.join(";")
}

fn gazetteer() -> RecordValidator {
    RecordValidator::new(vec!["Lugones".into(), "Llanera".into(), "Oviedo".into()])
}

/// Integration test: one import through two validation passes.
///
/// Covers object storage, the pass queue and every job query:
/// PENDING -> PROCESSING -> ERROR -> (corrections) -> PROCESSING -> COMPLETED.
///
/// Note: This requires running PostgreSQL, Redis and S3-compatible storage
/// configured via environment variables.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_full_integration() {
    let config = AppConfig::from_env().expect("Failed to load config");

    let db_pool = db::init_pool(&config.database_url, 5)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");

    let storage = ObjectStore::new(
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize storage");
    let queue = PassQueue::new(&config.redis_url).expect("Failed to initialize queue");

    // 1. Upload the source file and register the job
    let source = format!(
        "{}\n{}\n{}\n",
        record("33420", "Lugones"),
        record("33420", "Lugonez"),
        record("3342", "Oviedo")
    );
    let id = Uuid::new_v4();
    let key = ObjectStore::original_key(id, "huella.csv");
    storage
        .upload(&key, source.as_bytes(), "text/csv")
        .await
        .expect("Upload failed");

    let job = queries::create_job(&db_pool, id, &key, "integration")
        .await
        .expect("Failed to create job");
    assert_eq!(job.status, JobStatus::Pending);
    assert!(!job.has_error_report());

    // 2. Start processing; a second start is refused
    let job = queries::start_processing(&db_pool, id, "[PROCESSING] requested by integration")
        .await
        .expect("Query failed")
        .expect("Job was not PENDING");
    assert_eq!(job.status, JobStatus::Processing);
    assert!(queries::start_processing(&db_pool, id, "again")
        .await
        .expect("Query failed")
        .is_none());

    // 3. Queue round trip
    let pass = QueuedPass::new(id, PassKind::Initial);
    queue.enqueue(&pass).await.expect("Failed to enqueue");
    let dequeued = queue
        .dequeue()
        .await
        .expect("Failed to dequeue")
        .expect("Queue was empty");
    assert_eq!(dequeued.job_id, id);

    // 4. First pass: two incidents
    let downloaded = storage.download(&key).await.expect("Download failed");
    let findings = gazetteer()
        .validate_source(&downloaded, &[])
        .expect("Source did not parse");
    assert_eq!(findings.len(), 2);

    let report_ref = format!("/imports/{id}/error-report");
    let job = queries::complete_pass(&db_pool, id, &findings, &report_ref)
        .await
        .expect("Query failed")
        .expect("Job was not PROCESSING");
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.error_report_ref.as_deref(), Some(report_ref.as_str()));

    let report = report_codec::encode_report(
        &queries::load_incidents(&db_pool, id)
            .await
            .expect("Failed to load incidents"),
    );
    let incidents = extractor::extract(&report).expect("Report did not decode");
    let lines: Vec<u32> = incidents.iter().map(|i| i.line_number).collect();
    assert_eq!(lines, vec![2, 3]);

    // 5. Correct both lines
    let mut patch = CorrectionPatch::new();
    patch.insert(2, "Lugones");
    patch.insert(3, "03342");
    patch.insert(99, "ignored");
    let (job, applied) = queries::apply_corrections(&db_pool, id, &patch)
        .await
        .expect("Query failed")
        .expect("Job was not in ERROR");
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(applied, 2);

    // 6. Second pass with the stored corrections: clean
    let corrections = queries::load_corrections(&db_pool, id)
        .await
        .expect("Failed to load corrections");
    let findings = gazetteer()
        .validate_source(&downloaded, &corrections)
        .expect("Source did not parse");
    assert!(findings.is_empty());

    let job = queries::complete_pass(&db_pool, id, &findings, &report_ref)
        .await
        .expect("Query failed")
        .expect("Job was not PROCESSING");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.error_report_ref.as_deref(), Some(report_ref.as_str()));
    assert!(job.processing_log.contains("[CORRECTIONS APPLIED] 2 records"));

    // Corrections are refused once the job is complete
    assert!(queries::apply_corrections(&db_pool, id, &patch)
        .await
        .expect("Query failed")
        .is_none());

    queue.complete(&dequeued).await.expect("Failed to complete pass");
}

/// Validator findings survive the trip through the report format.
#[test]
fn test_findings_round_trip_through_report() {
    let source = format!(
        "{}\n\n{}\n",
        record("33420", "Lugonez"),
        record("3342", "Oviedo")
    );
    let incidents: Vec<_> = gazetteer()
        .validate_file(&source, &[])
        .expect("Source did not parse")
        .into_iter()
        .map(|finding| finding.incident)
        .collect();

    let decoded = extractor::extract(&report_codec::encode_report(&incidents))
        .expect("Report did not decode");

    assert_eq!(decoded, incidents);
    assert_eq!(decoded[0].line_number, 1);
    assert_eq!(decoded[1].line_number, 3);
    assert_eq!(decoded[1].suggestions, vec!["03342"]);
}
