//! Test doubles for the import pipeline.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use huella_import::error::PipelineError;
use huella_import::models::access::{Role, UserContext};
use huella_import::models::job::{ImportJob, JobFilter, JobStatus, Page};
use huella_import::models::patch::CorrectionPatch;
use huella_import::services::backend::ImportBackend;
use uuid::Uuid;

pub fn admin() -> UserContext {
    UserContext::new("admin", vec![Role::Admin])
}

pub fn engineer() -> UserContext {
    UserContext::new("pablo", vec![Role::Engineering])
}

pub fn technician() -> UserContext {
    UserContext::new("marta", vec![Role::Technician])
}

pub fn report_ref(id: Uuid) -> String {
    format!("/imports/{id}/error-report")
}

#[derive(Default)]
struct FakeState {
    jobs: HashMap<Uuid, ImportJob>,
    order: Vec<Uuid>,
    reports: HashMap<String, String>,
    applied: Vec<String>,
    calls: Vec<&'static str>,
    fail_next_apply: Option<(u16, String)>,
}

/// In-memory backend that enforces the job state machine the way the real
/// API does. Validation passes are finished by the test via `finish_pass`.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete the running pass: with a report the job goes to ERROR,
    /// without one to COMPLETED.
    pub fn finish_pass(&self, id: Uuid, report: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        let job = state.jobs.get_mut(&id).expect("unknown job");
        assert_eq!(job.status, JobStatus::Processing, "no pass is running");

        match report {
            Some(text) => {
                job.status = JobStatus::Error;
                job.error_report_ref = Some(report_ref(id));
                job.processing_log.push_str("\n[VALIDATION] incidents found");
                let text = text.to_string();
                state.reports.insert(report_ref(id), text);
            }
            None => {
                job.status = JobStatus::Completed;
                job.processing_log.push_str("\n[COMPLETED] all records valid");
                if job.error_report_ref.is_some() {
                    state.reports.insert(report_ref(id), "#v1\n".to_string());
                }
            }
        }
    }

    pub fn set_status(&self, id: Uuid, status: JobStatus) {
        let mut state = self.state.lock().unwrap();
        state.jobs.get_mut(&id).expect("unknown job").status = status;
    }

    pub fn set_report(&self, id: Uuid, text: &str) {
        self.state
            .lock()
            .unwrap()
            .reports
            .insert(report_ref(id), text.to_string());
    }

    pub fn drop_report(&self, id: Uuid) {
        self.state.lock().unwrap().reports.remove(&report_ref(id));
    }

    pub fn fail_next_apply(&self, status: u16, message: &str) {
        self.state.lock().unwrap().fail_next_apply = Some((status, message.to_string()));
    }

    pub fn applied_patches(&self) -> Vec<String> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn status_of(&self, id: Uuid) -> JobStatus {
        self.state.lock().unwrap().jobs[&id].status
    }

    fn conflict(id: Uuid, status: JobStatus) -> PipelineError {
        PipelineError::Conflict {
            job_id: id,
            message: format!("import is {status}"),
        }
    }
}

impl ImportBackend for FakeBackend {
    async fn create_import(
        &self,
        file_name: &str,
        _contents: Vec<u8>,
    ) -> Result<ImportJob, PipelineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("create");

        let id = Uuid::new_v4();
        let job = ImportJob {
            id,
            status: JobStatus::Pending,
            original_file_ref: format!("imports/originals/{id}/{file_name}"),
            error_report_ref: None,
            processing_log: String::new(),
            owner: "fake".to_string(),
            created_at: Utc::now(),
        };
        state.jobs.insert(id, job.clone());
        state.order.push(id);
        Ok(job)
    }

    async fn get_import(&self, id: Uuid) -> Result<ImportJob, PipelineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("get");
        state.jobs.get(&id).cloned().ok_or(PipelineError::NotFound(id))
    }

    async fn list_imports(&self, filter: &JobFilter) -> Result<Page<ImportJob>, PipelineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("list");

        let results: Vec<ImportJob> = state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.jobs.get(id))
            .filter(|job| filter.status.map_or(true, |s| job.status == s))
            .filter(|job| filter.owner.as_deref().map_or(true, |o| job.owner == o))
            .cloned()
            .collect();

        Ok(Page {
            count: results.len() as u64,
            next: None,
            previous: None,
            results,
        })
    }

    async fn process_import(&self, id: Uuid) -> Result<ImportJob, PipelineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("process");

        let job = state.jobs.get_mut(&id).ok_or(PipelineError::NotFound(id))?;
        if job.status != JobStatus::Pending {
            return Err(Self::conflict(id, job.status));
        }
        job.status = JobStatus::Processing;
        job.processing_log.push_str("[PROCESSING] requested");
        Ok(job.clone())
    }

    async fn apply_corrections(
        &self,
        id: Uuid,
        patch: &CorrectionPatch,
    ) -> Result<ImportJob, PipelineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("apply");

        if let Some((status, message)) = state.fail_next_apply.take() {
            return Err(PipelineError::Backend { status, message });
        }

        let job = state.jobs.get_mut(&id).ok_or(PipelineError::NotFound(id))?;
        if job.status != JobStatus::Error {
            return Err(Self::conflict(id, job.status));
        }
        job.status = JobStatus::Processing;
        job.processing_log
            .push_str(&format!("\n[CORRECTIONS APPLIED] {} records", patch.len()));
        let job = job.clone();
        state.applied.push(patch.to_wire());
        Ok(job)
    }

    async fn fetch_report(&self, report_ref: &str) -> Result<String, PipelineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("report");
        state
            .reports
            .get(report_ref)
            .cloned()
            .ok_or_else(|| PipelineError::Backend {
                status: 404,
                message: "report not found".to_string(),
            })
    }
}
