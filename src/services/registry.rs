use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::access::{Action, UserContext};
use crate::models::job::{ImportJob, JobFilter, JobStatus, Page};
use crate::services::backend::ImportBackend;
use crate::services::corrections::CorrectionBuffer;
use crate::services::extractor::IncidentSet;
use crate::services::policy;
use crate::services::report_codec::ReportError;

/// Outcome of a correction submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Nothing was corrected; the backend was not contacted.
    Empty,
    /// Corrections were sent; holds the re-fetched job. Callers should
    /// refresh their incident set from it.
    Applied(ImportJob),
}

/// A failed submission hands the untouched buffer back for a retry.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct SubmitFailure {
    pub error: PipelineError,
    pub buffer: CorrectionBuffer,
}

/// Client-side view of the import jobs held by the backend.
///
/// Every operation is checked against the authorization policy first. Jobs
/// read from the backend are cached until the next mutating call on them.
pub struct ImportRegistry<B> {
    backend: B,
    cache: RwLock<HashMap<Uuid, ImportJob>>,
}

impl<B: ImportBackend> ImportRegistry<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn remember(&self, job: &ImportJob) {
        self.cache.write().await.insert(job.id, job.clone());
    }

    async fn invalidate(&self, id: Uuid) {
        self.cache.write().await.remove(&id);
    }

    async fn fetch(&self, id: Uuid) -> Result<ImportJob, PipelineError> {
        let job = self.backend.get_import(id).await?;
        self.remember(&job).await;
        Ok(job)
    }

    /// After the backend refuses a transition, re-read the job so the caller
    /// sees its real state.
    async fn resync(&self, id: Uuid, attempted: &'static str, error: PipelineError) -> PipelineError {
        if !matches!(error, PipelineError::Conflict { .. }) {
            return error;
        }
        self.invalidate(id).await;
        match self.fetch(id).await {
            Ok(job) => PipelineError::InvalidTransition {
                job_id: id,
                status: job.status,
                attempted,
            },
            Err(e) => {
                warn!(job_id = %id, error = %e, "could not resync job after conflict");
                error
            }
        }
    }

    /// Upload a source file as a new `PENDING` job.
    pub async fn create(
        &self,
        user: &UserContext,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<ImportJob, PipelineError> {
        policy::require(user, Action::Upload)?;

        let job = self.backend.create_import(file_name, contents).await?;
        self.remember(&job).await;

        info!(job_id = %job.id, file = %file_name, "import uploaded");
        Ok(job)
    }

    /// Cached read of one job.
    pub async fn get(&self, user: &UserContext, id: Uuid) -> Result<ImportJob, PipelineError> {
        policy::require(user, Action::View)?;

        if let Some(job) = self.cache.read().await.get(&id) {
            return Ok(job.clone());
        }
        self.fetch(id).await
    }

    /// Uncached read of one job.
    pub async fn reload(&self, user: &UserContext, id: Uuid) -> Result<ImportJob, PipelineError> {
        policy::require(user, Action::View)?;
        self.fetch(id).await
    }

    pub async fn list(
        &self,
        user: &UserContext,
        filter: &JobFilter,
    ) -> Result<Page<ImportJob>, PipelineError> {
        policy::require(user, Action::View)?;

        let page = self.backend.list_imports(filter).await?;
        let mut cache = self.cache.write().await;
        for job in &page.results {
            cache.insert(job.id, job.clone());
        }
        Ok(page)
    }

    /// Start the validation pass of a `PENDING` job.
    pub async fn process(&self, user: &UserContext, id: Uuid) -> Result<ImportJob, PipelineError> {
        policy::require(user, Action::Process)?;

        let current = self.fetch(id).await?;
        if current.status != JobStatus::Pending {
            return Err(PipelineError::InvalidTransition {
                job_id: id,
                status: current.status,
                attempted: "process",
            });
        }

        self.invalidate(id).await;
        let job = match self.backend.process_import(id).await {
            Ok(job) => job,
            Err(e) => return Err(self.resync(id, "process", e).await),
        };
        self.remember(&job).await;

        info!(job_id = %id, status = %job.status, "import sent for processing");
        Ok(job)
    }

    /// Re-read the job and rebuild `set` from its current error report.
    ///
    /// If the report cannot be fetched or decoded, `set` keeps its previous
    /// incidents and the error is returned.
    pub async fn refresh_incidents(
        &self,
        user: &UserContext,
        set: &mut IncidentSet,
    ) -> Result<ImportJob, PipelineError> {
        policy::require(user, Action::View)?;

        let job = self.fetch(set.job_id()).await?;
        match job.error_report_ref.as_deref().filter(|r| !r.is_empty()) {
            None => set.clear(),
            Some(report_ref) => {
                let raw = self.backend.fetch_report(report_ref).await.map_err(|e| {
                    PipelineError::ExtractionFailed(ReportError::Unreadable(e.display_message()))
                })?;
                set.refresh(report_ref, &raw)?;
            }
        }
        Ok(job)
    }

    /// Send every buffered correction for re-validation.
    ///
    /// An empty patch is a successful no-op. On any failure the buffer comes
    /// back unchanged inside [`SubmitFailure`].
    pub async fn submit_corrections(
        &self,
        user: &UserContext,
        buffer: CorrectionBuffer,
    ) -> Result<Submission, SubmitFailure> {
        if let Err(error) = policy::require(user, Action::EditRecord) {
            return Err(SubmitFailure { error, buffer });
        }

        let patch = buffer.build_patch();
        let id = buffer.job_id();
        if patch.is_empty() {
            info!(job_id = %id, "no corrections to submit");
            return Ok(Submission::Empty);
        }

        self.invalidate(id).await;
        let applied = match self.backend.apply_corrections(id, &patch).await {
            Ok(job) => job,
            Err(e) => {
                let error = self.resync(id, "apply corrections", e).await;
                warn!(job_id = %id, error = %error, "correction submission failed");
                return Err(SubmitFailure { error, buffer });
            }
        };

        info!(job_id = %id, corrections = patch.len(), "corrections submitted");

        let job = match self.fetch(id).await {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = %id, error = %e, "re-fetch after submission failed");
                self.remember(&applied).await;
                applied
            }
        };
        Ok(Submission::Applied(job))
    }
}
