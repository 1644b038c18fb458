use std::future::Future;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::PipelineError;
use crate::models::access::Action;
use crate::models::job::{ImportJob, JobFilter, Page};
use crate::models::patch::CorrectionPatch;

/// The import endpoints the pipeline consumes.
///
/// The backend owns job state; implementations only transport requests and
/// map failures onto [`PipelineError`].
pub trait ImportBackend: Send + Sync {
    fn create_import(
        &self,
        file_name: &str,
        contents: Vec<u8>,
    ) -> impl Future<Output = Result<ImportJob, PipelineError>> + Send;

    fn get_import(&self, id: Uuid) -> impl Future<Output = Result<ImportJob, PipelineError>> + Send;

    fn list_imports(
        &self,
        filter: &JobFilter,
    ) -> impl Future<Output = Result<Page<ImportJob>, PipelineError>> + Send;

    fn process_import(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<ImportJob, PipelineError>> + Send;

    fn apply_corrections(
        &self,
        id: Uuid,
        patch: &CorrectionPatch,
    ) -> impl Future<Output = Result<ImportJob, PipelineError>> + Send;

    /// Download the raw text behind an `error_report_ref`.
    fn fetch_report(
        &self,
        report_ref: &str,
    ) -> impl Future<Output = Result<String, PipelineError>> + Send;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    detail: Option<String>,
}

/// [`ImportBackend`] over the REST API, authenticated with a bearer token.
pub struct HttpBackend {
    http: Client,
    base_url: String,
    token: String,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, PipelineError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Report refs may be absolute URLs or paths relative to the API.
    fn resolve(&self, report_ref: &str) -> String {
        if report_ref.starts_with("http://") || report_ref.starts_with("https://") {
            report_ref.to_string()
        } else {
            format!("{}/{}", self.base_url, report_ref.trim_start_matches('/'))
        }
    }

    /// Whether `url` points into the API, and may carry the bearer token.
    fn is_api_url(&self, url: &str) -> bool {
        url == self.base_url
            || url
                .strip_prefix(&self.base_url)
                .is_some_and(|rest| rest.starts_with('/') || rest.starts_with('?'))
    }

    /// Map non-success responses onto the pipeline taxonomy.
    async fn check(
        response: Response,
        action: Action,
        job_id: Option<Uuid>,
    ) -> Result<Response, PipelineError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|body| body.error.or(body.detail))
            .unwrap_or(text);

        tracing::warn!(status = status.as_u16(), %action, message = %message, "backend rejected request");

        Err(match (status, job_id) {
            (StatusCode::FORBIDDEN, _) => PipelineError::Forbidden(action),
            (StatusCode::NOT_FOUND, Some(id)) => PipelineError::NotFound(id),
            (StatusCode::CONFLICT, Some(id)) => PipelineError::Conflict {
                job_id: id,
                message,
            },
            _ => PipelineError::Backend {
                status: status.as_u16(),
                message,
            },
        })
    }
}

impl ImportBackend for HttpBackend {
    async fn create_import(
        &self,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<ImportJob, PipelineError> {
        let form = Form::new().part(
            "file",
            Part::bytes(contents)
                .file_name(file_name.to_string())
                .mime_str("text/csv")?,
        );

        let response = self
            .http
            .post(self.url("/imports"))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;

        let response = Self::check(response, Action::Upload, None).await?;
        Ok(response.json().await?)
    }

    async fn get_import(&self, id: Uuid) -> Result<ImportJob, PipelineError> {
        let response = self
            .http
            .get(self.url(&format!("/imports/{id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let response = Self::check(response, Action::View, Some(id)).await?;
        Ok(response.json().await?)
    }

    async fn list_imports(&self, filter: &JobFilter) -> Result<Page<ImportJob>, PipelineError> {
        let response = self
            .http
            .get(self.url("/imports"))
            .query(&filter.query_pairs())
            .bearer_auth(&self.token)
            .send()
            .await?;

        let response = Self::check(response, Action::View, None).await?;
        Ok(response.json().await?)
    }

    async fn process_import(&self, id: Uuid) -> Result<ImportJob, PipelineError> {
        let response = self
            .http
            .post(self.url(&format!("/imports/{id}/process")))
            .bearer_auth(&self.token)
            .send()
            .await?;

        let response = Self::check(response, Action::Process, Some(id)).await?;
        Ok(response.json().await?)
    }

    async fn apply_corrections(
        &self,
        id: Uuid,
        patch: &CorrectionPatch,
    ) -> Result<ImportJob, PipelineError> {
        let form = Form::new()
            .part(
                "corrections",
                Part::text(patch.to_wire())
                    .file_name("corrections.csv")
                    .mime_str("text/plain")?,
            )
            .text("job_id", id.to_string());

        let response = self
            .http
            .post(self.url(&format!("/imports/{id}/apply-corrections")))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;

        let response = Self::check(response, Action::EditRecord, Some(id)).await?;
        Ok(response.json().await?)
    }

    async fn fetch_report(&self, report_ref: &str) -> Result<String, PipelineError> {
        let url = self.resolve(report_ref);
        let mut request = self.http.get(&url);
        if self.is_api_url(&url) {
            request = request.bearer_auth(&self.token);
        } else {
            tracing::debug!(%url, "report is hosted outside the API, sending no credentials");
        }

        let response = request.send().await?;

        let response = Self::check(response, Action::View, None).await?;
        Ok(response.text().await?)
    }
}
