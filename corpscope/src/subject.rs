use std::fmt;

use crate::error::AnalysisError;

pub const MAX_SUBJECT_CHARS: usize = 100;

/// Canonical company identifier.
///
/// Two inputs name the same subject when their keys are equal: whitespace is
/// trimmed and collapsed, then the text is lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubjectKey {
    display: String,
    key: String,
}

impl SubjectKey {
    pub fn parse(raw: &str) -> Result<Self, AnalysisError> {
        let display = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if display.is_empty() {
            return Err(AnalysisError::InputInvalid("company name is required".to_string()));
        }
        if display.chars().count() > MAX_SUBJECT_CHARS {
            return Err(AnalysisError::InputInvalid(format!(
                "company name must be at most {} characters",
                MAX_SUBJECT_CHARS
            )));
        }

        let key = display.to_lowercase();
        Ok(Self { display, key })
    }

    /// Cleaned-up name as typed, used for searching and prompting
    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn report_key(&self) -> String {
        format!("report:{}", self.key)
    }

    pub fn lock_key(&self) -> String {
        format!("lock:{}", self.key)
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}
