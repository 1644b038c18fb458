use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::incident::Incident;
use crate::models::patch::CorrectionPatch;
use crate::services::extractor::IncidentSet;

/// Unsubmitted fixes for one incident set, keyed by line number.
///
/// Lives only for one editing session; dropping it loses the edits, which
/// is fine because the server-side report is still there.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionBuffer {
    job_id: Uuid,
    incidents: Vec<Incident>,
}

impl CorrectionBuffer {
    /// Start a session. Corrections already present in the report are kept.
    pub fn new(set: &IncidentSet) -> Self {
        Self {
            job_id: set.job_id(),
            incidents: set.incidents().to_vec(),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn incidents(&self) -> &[Incident] {
        &self.incidents
    }

    fn incident_mut(&mut self, line_number: u32) -> Result<&mut Incident, PipelineError> {
        self.incidents
            .iter_mut()
            .find(|i| i.line_number == line_number)
            .ok_or(PipelineError::UnknownIncident(line_number))
    }

    /// Overwrite the proposed value for a line. An empty value clears it.
    pub fn set_correction(
        &mut self,
        line_number: u32,
        value: impl Into<String>,
    ) -> Result<(), PipelineError> {
        self.incident_mut(line_number)?.correction = value.into();
        Ok(())
    }

    /// Same as [`set_correction`](Self::set_correction); the value is not
    /// checked against the incident's suggestions.
    pub fn select_suggestion(
        &mut self,
        line_number: u32,
        suggestion: &str,
    ) -> Result<(), PipelineError> {
        self.set_correction(line_number, suggestion)
    }

    pub fn correction(&self, line_number: u32) -> Option<&str> {
        self.incidents
            .iter()
            .find(|i| i.line_number == line_number)
            .map(|i| i.correction.as_str())
            .filter(|c| !c.trim().is_empty())
    }

    /// Incidents that still have no correction.
    pub fn pending(&self) -> usize {
        self.incidents.iter().filter(|i| !i.is_corrected()).count()
    }

    /// Every corrected incident; uncorrected ones are left out entirely.
    pub fn build_patch(&self) -> CorrectionPatch {
        let mut patch = CorrectionPatch::new();
        for incident in self.incidents.iter().filter(|i| i.is_corrected()) {
            patch.insert(incident.line_number, incident.correction.clone());
        }
        patch
    }
}
