use std::collections::BTreeMap;

use crate::services::report_codec::{self, ReportError};

/// Line-indexed set of accepted corrections sent back for re-validation.
///
/// Values are stored trimmed; inserting a blank value for a line is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrectionPatch {
    entries: BTreeMap<u32, String>,
}

impl CorrectionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, line_number: u32, value: impl Into<String>) {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return;
        }
        let value = if trimmed.len() == value.len() {
            value
        } else {
            trimmed.to_string()
        };
        self.entries.insert(line_number, value);
    }

    pub fn get(&self, line_number: u32) -> Option<&str> {
        self.entries.get(&line_number).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in ascending line order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.entries.iter().map(|(line, value)| (*line, value.as_str()))
    }

    pub fn to_wire(&self) -> String {
        report_codec::encode_patch(self)
    }

    pub fn from_wire(text: &str) -> Result<Self, ReportError> {
        report_codec::decode_patch(text)
    }
}
