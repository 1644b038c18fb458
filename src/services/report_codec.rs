//! Line-oriented wire format shared by error reports and correction patches.
//!
//! Report line: `lineNumber|originalValue|errorMessage|suggestions|correction`
//! with suggestions separated by `,`. Patch line: `lineNumber|value`.
//!
//! Values are escaped with a backslash: `\\`, `\|`, `\,`, `\n` and `\r`.
//! A report may open with a `#v<N>` version header; other `#` lines are
//! comments.

use crate::models::incident::Incident;
use crate::models::patch::CorrectionPatch;

/// Only version of the report format this crate reads and writes.
pub const REPORT_VERSION: u32 = 1;

const FIELD_DELIMITER: char = '|';
const LIST_DELIMITER: char = ',';
const ESCAPE: char = '\\';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    #[error("report line {line}: invalid line number {value:?}")]
    InvalidLineNumber { line: usize, value: String },

    #[error("report line {line}: line number {line_number} appears more than once")]
    DuplicateLine { line: usize, line_number: u32 },

    #[error("unsupported report version {0:?}")]
    UnsupportedVersion(String),

    #[error("patch line {line}: expected `lineNumber|value`")]
    MalformedPatchLine { line: usize },

    #[error("report could not be read: {0}")]
    Unreadable(String),
}

/// Escape a single field value.
pub fn escape_field(value: &str) -> String {
    escape_with(value, &[FIELD_DELIMITER])
}

fn escape_list_item(value: &str) -> String {
    escape_with(value, &[FIELD_DELIMITER, LIST_DELIMITER])
}

fn escape_with(value: &str, specials: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            ESCAPE => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c if specials.contains(&c) => {
                out.push(ESCAPE);
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// Undo [`escape_field`]. Unknown escapes decode to the escaped character and
/// a trailing lone backslash is kept as-is.
pub fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != ESCAPE {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push(ESCAPE),
        }
    }
    out
}

/// Split on every `delimiter` that is not escaped, leaving escapes intact.
fn split_unescaped(raw: &str, delimiter: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (idx, ch) in raw.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == ESCAPE {
            escaped = true;
        } else if ch == delimiter {
            parts.push(&raw[start..idx]);
            start = idx + ch.len_utf8();
        }
    }
    parts.push(&raw[start..]);
    parts
}

/// Non-blank, non-comment lines with their 1-based position in `text`.
///
/// Fails if a `#v` header on the first meaningful line names another version.
/// The `<N>` of a `#v<N>` header, given the text after `#`.
fn version_header(comment: &str) -> Option<&str> {
    comment
        .strip_prefix('v')
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
}

fn content_lines(text: &str) -> Result<Vec<(usize, &str)>, ReportError> {
    let mut lines = Vec::new();
    let mut seen_content = false;
    for (idx, line) in text.split('\n').enumerate() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(comment) = trimmed.strip_prefix('#') {
            if !seen_content {
                if let Some(version) = version_header(comment) {
                    if version.parse::<u32>().ok() != Some(REPORT_VERSION) {
                        return Err(ReportError::UnsupportedVersion(version.to_string()));
                    }
                }
            }
            seen_content = true;
            continue;
        }
        seen_content = true;
        lines.push((idx + 1, line));
    }
    Ok(lines)
}

fn parse_line_number(raw: &str, line: usize) -> Result<u32, ReportError> {
    match raw.trim().parse::<u32>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(ReportError::InvalidLineNumber {
            line,
            value: raw.trim().to_string(),
        }),
    }
}

/// Decode a raw error report into incidents, in file order.
///
/// Short lines are accepted: missing trailing fields are empty.
pub fn decode_report(text: &str) -> Result<Vec<Incident>, ReportError> {
    let mut incidents: Vec<Incident> = Vec::new();
    for (line, raw) in content_lines(text)? {
        let fields = split_unescaped(raw, FIELD_DELIMITER);
        let field = |i: usize| fields.get(i).copied().unwrap_or("");

        let line_number = parse_line_number(field(0), line)?;
        if incidents.iter().any(|i| i.line_number == line_number) {
            return Err(ReportError::DuplicateLine { line, line_number });
        }

        let suggestions = if field(3).is_empty() {
            Vec::new()
        } else {
            split_unescaped(field(3), LIST_DELIMITER)
                .into_iter()
                .map(unescape)
                .filter(|s| !s.is_empty())
                .collect()
        };

        incidents.push(Incident {
            line_number,
            original_value: unescape(field(1)),
            error_message: unescape(field(2)),
            suggestions,
            correction: unescape(field(4)),
        });
    }
    Ok(incidents)
}

/// Render incidents as a versioned report.
pub fn encode_report(incidents: &[Incident]) -> String {
    let mut out = format!("#v{REPORT_VERSION}\n");
    for incident in incidents {
        let suggestions = incident
            .suggestions
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| escape_list_item(s))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&format!(
            "{}|{}|{}|{}|{}\n",
            incident.line_number,
            escape_field(&incident.original_value),
            escape_field(&incident.error_message),
            suggestions,
            escape_field(&incident.correction),
        ));
    }
    out
}

/// Render a patch as `lineNumber|value` lines, ascending, no trailing newline.
pub fn encode_patch(patch: &CorrectionPatch) -> String {
    patch
        .iter()
        .map(|(line_number, value)| format!("{}|{}", line_number, escape_field(value)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a patch file. Values are trimmed, blank values are skipped and the
/// last entry for a line number wins.
pub fn decode_patch(text: &str) -> Result<CorrectionPatch, ReportError> {
    let mut patch = CorrectionPatch::new();
    for (line, raw) in content_lines(text)? {
        let fields = split_unescaped(raw, FIELD_DELIMITER);
        if fields.len() < 2 {
            return Err(ReportError::MalformedPatchLine { line });
        }
        let line_number = parse_line_number(fields[0], line)?;
        patch.insert(line_number, unescape(fields[1]).trim());
    }
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_report_is_empty() {
        assert!(decode_report("").unwrap().is_empty());
        assert!(decode_report("\n   \n\t\r\n").unwrap().is_empty());
    }

    #[test]
    fn test_well_formed_line() {
        let incidents = decode_report("5|123 Main|bad zip|10001,10002|").unwrap();
        assert_eq!(incidents.len(), 1);
        let inc = &incidents[0];
        assert_eq!(inc.line_number, 5);
        assert_eq!(inc.original_value, "123 Main");
        assert_eq!(inc.error_message, "bad zip");
        assert_eq!(inc.suggestions, vec!["10001", "10002"]);
        assert_eq!(inc.correction, "");
    }

    #[test]
    fn test_short_lines_default_to_empty() {
        let incidents = decode_report("7|Calle Mayor\n9").unwrap();
        assert_eq!(incidents[0].line_number, 7);
        assert_eq!(incidents[0].error_message, "");
        assert!(incidents[0].suggestions.is_empty());
        assert_eq!(incidents[1].line_number, 9);
        assert_eq!(incidents[1].original_value, "");
    }

    #[test]
    fn test_file_order_is_kept() {
        let incidents = decode_report("12|a|x\n3|b|y\n7|c|z\n").unwrap();
        let lines: Vec<u32> = incidents.iter().map(|i| i.line_number).collect();
        assert_eq!(lines, vec![12, 3, 7]);
    }

    #[test]
    fn test_preseeded_correction() {
        let incidents = decode_report("4|Lugo|unknown locality|Lugo,Lugones|Lugones").unwrap();
        assert_eq!(incidents[0].correction, "Lugones");
        assert!(incidents[0].is_corrected());
    }

    #[test]
    fn test_escaped_delimiters() {
        let incidents = decode_report(r"2|a\|b|line\none|x\,y,z|").unwrap();
        assert_eq!(incidents[0].original_value, "a|b");
        assert_eq!(incidents[0].error_message, "line\none");
        assert_eq!(incidents[0].suggestions, vec!["x,y", "z"]);
    }

    #[test]
    fn test_encoded_report_reads_back() {
        let incidents = vec![
            Incident::new(3, "A Coruña|15001", "two\nlines").with_suggestions(["a,b", "c\\d"]),
            Incident::new(8, "", "missing"),
        ];
        let text = encode_report(&incidents);
        assert!(text.starts_with("#v1\n"));
        assert_eq!(decode_report(&text).unwrap(), incidents);
    }

    #[test]
    fn test_version_header() {
        assert!(decode_report("#v1\n1|a|b").is_ok());
        assert_eq!(
            decode_report("#v2\n1|a|b"),
            Err(ReportError::UnsupportedVersion("2".into()))
        );
        // a later header-like line is just a comment
        assert_eq!(decode_report("1|a|b\n#v9").unwrap().len(), 1);
    }

    #[test]
    fn test_comment_starting_with_v_is_not_a_header() {
        assert_eq!(decode_report("#validation report\n5|a|b").unwrap().len(), 1);
        assert_eq!(decode_report("# version\n5|a|b").unwrap().len(), 1);
        assert_eq!(decode_report("#v \n5|a|b").unwrap().len(), 1);
        assert_eq!(
            decode_report("#v 3\n5|a|b"),
            Err(ReportError::UnsupportedVersion("3".into()))
        );
    }

    #[test]
    fn test_empty_suggestions_are_not_written() {
        let incidents = vec![Incident::new(2, "x", "bad").with_suggestions(["", "a", ""])];
        let text = encode_report(&incidents);
        assert!(text.contains("|bad|a|"));
        assert_eq!(decode_report(&text).unwrap()[0].suggestions, vec!["a"]);
    }

    #[test]
    fn test_invalid_line_numbers() {
        assert_eq!(
            decode_report("\nabc|x|y"),
            Err(ReportError::InvalidLineNumber {
                line: 2,
                value: "abc".into()
            })
        );
        assert!(matches!(
            decode_report("0|x|y"),
            Err(ReportError::InvalidLineNumber { .. })
        ));
        assert_eq!(
            decode_report("4|x|y\n4|z|w"),
            Err(ReportError::DuplicateLine {
                line: 2,
                line_number: 4
            })
        );
    }

    #[test]
    fn test_patch_wire_form() {
        let mut patch = CorrectionPatch::new();
        patch.insert(5, "10001");
        assert_eq!(encode_patch(&patch), "5|10001");

        patch.insert(2, "x|y");
        assert_eq!(encode_patch(&patch), "2|x\\|y\n5|10001");
    }

    #[test]
    fn test_patch_reads_back_unchanged() {
        let mut patch = CorrectionPatch::new();
        patch.insert(3, " Lugones ");
        patch.insert(4, "   ");
        patch.insert(9, "a|b\nc");
        assert_eq!(patch.len(), 2);
        assert_eq!(decode_patch(&encode_patch(&patch)).unwrap(), patch);
    }

    #[test]
    fn test_decode_patch() {
        let patch = decode_patch(" 3 | Lugones \n\n7|\n3|Lugo\n").unwrap();
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.get(3), Some("Lugo"));

        assert_eq!(
            decode_patch("3"),
            Err(ReportError::MalformedPatchLine { line: 1 })
        );
    }
}
