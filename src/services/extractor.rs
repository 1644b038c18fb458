use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::incident::Incident;
use crate::services::report_codec;

/// Turn a raw error report into incidents, in report order.
///
/// Pure and deterministic: the same text always yields the same sequence.
pub fn extract(raw_report: &str) -> Result<Vec<Incident>, PipelineError> {
    match report_codec::decode_report(raw_report) {
        Ok(incidents) => {
            debug!(incidents = incidents.len(), "extracted incidents from report");
            Ok(incidents)
        }
        Err(e) => {
            warn!(error = %e, "error report rejected");
            Err(PipelineError::ExtractionFailed(e))
        }
    }
}

/// Incidents currently shown for one job, tied to the report they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentSet {
    job_id: Uuid,
    report_ref: Option<String>,
    incidents: Vec<Incident>,
}

impl IncidentSet {
    pub fn empty(job_id: Uuid) -> Self {
        Self {
            job_id,
            report_ref: None,
            incidents: Vec::new(),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn report_ref(&self) -> Option<&str> {
        self.report_ref.as_deref()
    }

    pub fn incidents(&self) -> &[Incident] {
        &self.incidents
    }

    pub fn get(&self, line_number: u32) -> Option<&Incident> {
        self.incidents.iter().find(|i| i.line_number == line_number)
    }

    pub fn len(&self) -> usize {
        self.incidents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.incidents.is_empty()
    }

    /// Rebuild from a freshly fetched report. On failure the current
    /// incidents are left as they were.
    pub fn refresh(&mut self, report_ref: &str, raw_report: &str) -> Result<(), PipelineError> {
        let incidents = extract(raw_report)?;
        self.report_ref = Some(report_ref.to_string());
        self.incidents = incidents;
        Ok(())
    }

    /// The job has no error report any more.
    pub fn clear(&mut self) {
        self.report_ref = None;
        self.incidents.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_extract_is_deterministic() {
        let raw = "3|Lugo|unknown locality|Lugones\n\n7|1500|bad postal code|01500\n";
        let first = extract(raw).unwrap();
        assert_eq!(first, extract(raw).unwrap());
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].suggestions, vec!["01500"]);
    }

    #[test]
    fn test_failed_refresh_keeps_previous_incidents() {
        let mut set = IncidentSet::empty(Uuid::new_v4());
        set.refresh("/imports/a/error-report", "3|a|b\n7|c|d").unwrap();
        assert_eq!(set.len(), 2);

        let err = set
            .refresh("/imports/a/error-report?v2", "x|broken")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExtractionFailed);
        assert_eq!(set.len(), 2);
        assert_eq!(set.report_ref(), Some("/imports/a/error-report"));
    }

    #[test]
    fn test_lookup_by_line_number() {
        let mut set = IncidentSet::empty(Uuid::new_v4());
        set.refresh("r", "7|c|d\n3|a|b").unwrap();
        assert_eq!(set.get(3).map(|i| i.original_value.as_str()), Some("a"));
        assert!(set.get(1).is_none());
        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.report_ref(), None);
    }
}
