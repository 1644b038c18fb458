use serde::{Deserialize, Serialize};

/// One line of an uploaded file that failed validation.
///
/// `line_number` is the 1-based row in the original upload and is the only
/// key corrections may be addressed by.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Incident {
    pub line_number: u32,
    pub original_value: String,
    pub error_message: String,
    /// Candidate replacements, best first.
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Proposed value; blank means "no correction".
    #[serde(default)]
    pub correction: String,
}

impl Incident {
    pub fn new(
        line_number: u32,
        original_value: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            line_number,
            original_value: original_value.into(),
            error_message: error_message.into(),
            suggestions: Vec::new(),
            correction: String::new(),
        }
    }

    pub fn with_suggestions<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggestions = suggestions.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_corrected(&self) -> bool {
        !self.correction.trim().is_empty()
    }
}
