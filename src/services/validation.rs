use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use strsim::jaro_winkler;

use crate::models::incident::Incident;

/// Minimum number of `;`-separated columns in a huella record.
pub const MIN_COLUMNS: usize = 27;

const DELIMITER: u8 = b';';
const POSTAL_CODE_COLUMN: usize = 1;
const LOCALITY_COLUMN: usize = 3;

/// Threshold for fuzzy locality matching (0.0 - 1.0).
const MATCH_THRESHOLD: f64 = 0.85;

const MAX_SUGGESTIONS: usize = 3;

/// What a correction for an incident replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// The whole raw record.
    Record,
    /// One column, 0-based.
    Field(usize),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Record => write!(f, "record"),
            Target::Field(idx) => write!(f, "field:{idx}"),
        }
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "record" {
            return Ok(Target::Record);
        }
        s.strip_prefix("field:")
            .and_then(|idx| idx.parse().ok())
            .map(Target::Field)
            .ok_or_else(|| format!("unknown correction target {s:?}"))
    }
}

/// An incident plus the part of the record it is about.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub target: Target,
    pub incident: Incident,
}

/// A stored correction, already resolved to its target.
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub line_number: u32,
    pub target: Target,
    pub value: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source file is not valid UTF-8 (invalid byte at offset {0})")]
    NotUtf8(usize),

    #[error("source file could not be parsed: {0}")]
    Csv(#[from] csv::Error),
}

fn record_reader(text: &str) -> csv::Reader<&[u8]> {
    ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes())
}

/// Parse one `;`-separated record, honouring quoted fields.
pub fn parse_record(text: &str) -> Result<StringRecord, SourceError> {
    match record_reader(text).records().next() {
        Some(record) => Ok(record?),
        None => Ok(StringRecord::new()),
    }
}

/// Render a record as a single line, quoting fields that need it.
pub fn write_record(record: &StringRecord) -> Result<String, SourceError> {
    let mut writer = WriterBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(record)?;

    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    let line = String::from_utf8(bytes)
        .map_err(|e| SourceError::NotUtf8(e.utf8_error().valid_up_to()))?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|field| field.trim().is_empty()) && record.len() <= 1
}

/// Validates huella records against structural rules and the municipality
/// gazetteer.
pub struct RecordValidator {
    municipalities: Vec<String>,
    known: HashSet<String>,
}

impl RecordValidator {
    pub fn new(municipalities: Vec<String>) -> Self {
        let known = municipalities.iter().map(|m| m.to_lowercase()).collect();
        Self {
            municipalities,
            known,
        }
    }

    /// Validate an uploaded file as stored. It must be UTF-8.
    pub fn validate_source(
        &self,
        bytes: &[u8],
        corrections: &[Correction],
    ) -> Result<Vec<Finding>, SourceError> {
        let text = std::str::from_utf8(bytes).map_err(|e| SourceError::NotUtf8(e.valid_up_to()))?;
        self.validate_file(text, corrections)
    }

    /// Validate every non-blank record of `text` after overlaying `corrections`.
    ///
    /// Line numbers are the 1-based line each record starts on. At most one
    /// finding is reported per line: the first rule that fails.
    pub fn validate_file(
        &self,
        text: &str,
        corrections: &[Correction],
    ) -> Result<Vec<Finding>, SourceError> {
        if self.known.is_empty() {
            tracing::warn!("municipality gazetteer is empty, locality check disabled");
        }

        let mut reader = record_reader(text);
        let mut findings = Vec::new();
        for result in reader.records() {
            let record = result?;
            if is_blank(&record) {
                continue;
            }
            let Some(line_number) = record
                .position()
                .and_then(|p| u32::try_from(p.line()).ok())
            else {
                continue;
            };

            let record = apply_corrections(&record, line_number, corrections)?;
            if let Some(finding) = self.validate_record(line_number, &record)? {
                findings.push(finding);
            }
        }
        Ok(findings)
    }

    pub fn validate_record(
        &self,
        line_number: u32,
        record: &StringRecord,
    ) -> Result<Option<Finding>, SourceError> {
        if record.len() < MIN_COLUMNS {
            return Ok(Some(Finding {
                target: Target::Record,
                incident: Incident::new(
                    line_number,
                    write_record(record)?,
                    format!(
                        "expected at least {MIN_COLUMNS} columns, found {}",
                        record.len()
                    ),
                ),
            }));
        }

        let postal_code = &record[POSTAL_CODE_COLUMN];
        if !is_postal_code(postal_code) {
            return Ok(Some(Finding {
                target: Target::Field(POSTAL_CODE_COLUMN),
                incident: Incident::new(line_number, postal_code, "invalid postal code")
                    .with_suggestions(suggest_postal_code(postal_code)),
            }));
        }

        let locality = &record[LOCALITY_COLUMN];
        if !self.known.is_empty() && !self.known.contains(&locality.trim().to_lowercase()) {
            return Ok(Some(Finding {
                target: Target::Field(LOCALITY_COLUMN),
                incident: Incident::new(line_number, locality, "unknown locality")
                    .with_suggestions(self.suggest_locality(locality)),
            }));
        }

        Ok(None)
    }

    /// Closest gazetteer names, best first.
    fn suggest_locality(&self, value: &str) -> Vec<String> {
        let needle = value.trim().to_lowercase();
        let mut scored: Vec<(f64, &String)> = self
            .municipalities
            .iter()
            .map(|name| (jaro_winkler(&needle, &name.to_lowercase()), name))
            .filter(|(score, _)| *score >= MATCH_THRESHOLD)
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));

        let mut seen = HashSet::new();
        scored
            .into_iter()
            .map(|(_, name)| name.clone())
            .filter(|name| seen.insert(name.to_lowercase()))
            .take(MAX_SUGGESTIONS)
            .collect()
    }
}

fn is_postal_code(value: &str) -> bool {
    value.len() == 5 && value.bytes().all(|b| b.is_ascii_digit())
}

fn suggest_postal_code(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    if is_postal_code(trimmed) {
        return vec![trimmed.to_string()];
    }
    if trimmed.len() == 4 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return vec![format!("0{trimmed}")];
    }
    Vec::new()
}

/// Overlay the corrections for one line: a record replacement first, then
/// field values.
pub fn apply_corrections(
    record: &StringRecord,
    line_number: u32,
    corrections: &[Correction],
) -> Result<StringRecord, SourceError> {
    let for_line: Vec<&Correction> = corrections
        .iter()
        .filter(|c| c.line_number == line_number)
        .collect();

    let base = match for_line.iter().find(|c| c.target == Target::Record) {
        Some(replacement) => parse_record(&replacement.value)?,
        None => record.clone(),
    };

    let field_fixes: Vec<(usize, &str)> = for_line
        .iter()
        .filter_map(|c| match c.target {
            Target::Field(idx) => Some((idx, c.value.as_str())),
            Target::Record => None,
        })
        .collect();

    if field_fixes.is_empty() {
        return Ok(base);
    }

    let mut fields: Vec<&str> = base.iter().collect();
    for (idx, value) in field_fixes {
        if let Some(slot) = fields.get_mut(idx) {
            *slot = value;
        }
    }
    Ok(StringRecord::from(fields))
}
