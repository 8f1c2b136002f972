//! Job kinds and their parameters

use super::JobError;
use crate::collaborator::MaintenanceOperation;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// What a bulk job does. Unknown names parse to [`JobKind::Custom`].
///
/// A `Custom` kind never carries a built-in name; [`JobKind::custom`] and
/// [`JobKind::validate`] reject one, so every kind survives a round trip
/// through its wire name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobKind {
    /// Download dated items from a registered source
    Download,
    /// OCR a set of documents
    Ocr,
    /// Extract entities from a set of documents
    EntityExtraction,
    /// Bulk import
    Import,
    /// Bulk export
    Export,
    /// Database maintenance
    Maintenance,
    /// Handler registered under this name
    Custom(String),
}

impl JobKind {
    /// Wire name
    pub fn as_str(&self) -> &str {
        match self {
            Self::Download => "download",
            Self::Ocr => "ocr",
            Self::EntityExtraction => "entity_extraction",
            Self::Import => "import",
            Self::Export => "export",
            Self::Maintenance => "maintenance",
            Self::Custom(name) => name,
        }
    }

    /// Custom kind for a registered handler name
    pub fn custom(name: impl Into<String>) -> Result<Self, JobError> {
        let kind = Self::Custom(name.into());
        match kind.custom_name_error() {
            Some(message) => Err(JobError::Validation {
                kind: kind.to_string(),
                message,
            }),
            None => Ok(kind),
        }
    }

    fn custom_name_error(&self) -> Option<String> {
        let Self::Custom(name) = self else {
            return None;
        };
        if name.trim().is_empty() {
            return Some("custom job kind needs a name".to_string());
        }
        match Self::from(name.as_str()) {
            Self::Custom(_) => None,
            _ => Some(format!("'{name}' is a built-in job kind and cannot name a custom one")),
        }
    }

    /// Parameters that must be present for this kind
    pub fn required_parameters(&self) -> &'static [&'static str] {
        match self {
            Self::Download => &["source_id"],
            Self::Ocr | Self::EntityExtraction => &["document_ids"],
            Self::Import => &["source_type", "source_path"],
            Self::Export => &["format", "output_path"],
            Self::Maintenance => &["operation"],
            Self::Custom(_) => &[],
        }
    }

    /// Check parameters before anything runs
    pub fn validate(&self, params: &JobParameters) -> Result<(), JobError> {
        let invalid = |message: String| JobError::Validation {
            kind: self.to_string(),
            message,
        };

        if let Some(message) = self.custom_name_error() {
            return Err(invalid(message));
        }

        for name in self.required_parameters() {
            match params.get(name) {
                None | Some(Value::Null) => {
                    return Err(invalid(format!("missing required parameter '{name}'")));
                }
                Some(Value::String(s)) if s.trim().is_empty() => {
                    return Err(invalid(format!("parameter '{name}' must not be empty")));
                }
                _ => {}
            }
        }

        match self {
            Self::Download => {
                params.str_param("source_id").map_err(invalid)?;
                let start = params.date_param("start_date").map_err(invalid)?;
                let end = params.date_param("end_date").map_err(invalid)?;
                if let (Some(start), Some(end)) = (start, end) {
                    if end < start {
                        return Err(invalid(format!("end_date {end} is before start_date {start}")));
                    }
                }
                params.year_param().map_err(invalid)?;
            }
            Self::Ocr | Self::EntityExtraction => {
                let ids = params.string_list("document_ids").map_err(invalid)?;
                if ids.is_empty() {
                    return Err(invalid("parameter 'document_ids' must not be empty".to_string()));
                }
            }
            Self::Import => {
                params.str_param("source_type").map_err(invalid)?;
                params.str_param("source_path").map_err(invalid)?;
            }
            Self::Export => {
                params.str_param("format").map_err(invalid)?;
                params.str_param("output_path").map_err(invalid)?;
            }
            Self::Maintenance => {
                params
                    .str_param("operation")
                    .map_err(invalid)?
                    .parse::<MaintenanceOperation>()
                    .map_err(invalid)?;
            }
            Self::Custom(_) => {}
        }
        Ok(())
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for JobKind {
    fn from(s: &str) -> Self {
        match s {
            "download" => Self::Download,
            "ocr" => Self::Ocr,
            "entity_extraction" => Self::EntityExtraction,
            "import" => Self::Import,
            "export" => Self::Export,
            "maintenance" => Self::Maintenance,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for JobKind {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<JobKind> for String {
    fn from(kind: JobKind) -> Self {
        kind.as_str().to_string()
    }
}

impl FromStr for JobKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

/// String-keyed job parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParameters(pub Map<String, Value>);

impl JobParameters {
    /// Empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert a value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Raw value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Underlying map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Required string parameter
    pub fn str_param(&self, key: &str) -> Result<&str, String> {
        match self.0.get(key) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(format!("parameter '{key}' must be a string (got {other})")),
            None => Err(format!("missing required parameter '{key}'")),
        }
    }

    /// Optional string parameter
    pub fn opt_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Optional boolean; accepts `true`/`false` and their string forms
    pub fn bool_param(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.as_str(), "true" | "1" | "yes"),
            _ => false,
        }
    }

    /// List of strings; a comma-separated string is accepted too
    pub fn string_list(&self, key: &str) -> Result<Vec<String>, String> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    other => Err(format!("parameter '{key}' contains a non-string item: {other}")),
                })
                .collect(),
            Some(Value::String(s)) => Ok(s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()),
            Some(other) => Err(format!("parameter '{key}' must be a list (got {other})")),
        }
    }

    /// Optional `YYYY-MM-DD` date
    pub fn date_param(&self, key: &str) -> Result<Option<NaiveDate>, String> {
        match self.opt_str(key) {
            None => match self.0.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(other) => Err(format!("parameter '{key}' must be a YYYY-MM-DD string (got {other})")),
            },
            Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(Some)
                .map_err(|e| format!("parameter '{key}' is not a YYYY-MM-DD date: {e}")),
        }
    }

    /// Optional `year` given as a number or a string
    pub fn year_param(&self) -> Result<Option<i32>, String> {
        let parsed = match self.0.get("year") {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Number(n)) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
            Some(Value::String(s)) => s.trim().parse::<i32>().ok(),
            Some(_) => None,
        };
        match parsed {
            Some(year) if (1000..=9999).contains(&year) => Ok(Some(year)),
            _ => Err("parameter 'year' must be a four-digit year".to_string()),
        }
    }
}

impl From<Map<String, Value>> for JobParameters {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
