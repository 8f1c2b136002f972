//! Registry of dated download sources
//!
//! Each source has a URL template with date placeholders and, for
//! multi-part items, a `{page}` placeholder.

use crate::config::SourceSpec;
use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;

/// Placeholders accepted in URL templates
pub const PLACEHOLDERS: [&str; 5] = ["date", "yyyy", "mm", "dd", "page"];

/// Registry of configured sources
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<String, SourceSpec>,
}

impl SourceRegistry {
    /// Build and validate a registry
    pub fn from_specs(specs: &[SourceSpec]) -> Result<Self, RegistryError> {
        let mut sources = HashMap::new();
        for spec in specs {
            validate_spec(spec)?;
            if sources.insert(spec.id.clone(), spec.clone()).is_some() {
                return Err(RegistryError::Duplicate(spec.id.clone()));
            }
        }
        Ok(Self { sources })
    }

    /// Get a source by id
    pub fn get(&self, id: &str) -> Option<&SourceSpec> {
        self.sources.get(id)
    }

    /// Get a source by id or fail
    pub fn require(&self, id: &str) -> Result<&SourceSpec, RegistryError> {
        self.get(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// All source ids, sorted
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of sources
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Check a source definition
pub fn validate_spec(spec: &SourceSpec) -> Result<(), RegistryError> {
    let invalid = |reason: String| RegistryError::InvalidTemplate {
        id: spec.id.clone(),
        reason,
    };

    if spec.id.trim().is_empty() {
        return Err(invalid("source id must not be empty".to_string()));
    }
    if spec.max_pages == 0 {
        return Err(invalid("max_pages must be at least 1".to_string()));
    }

    let template = &spec.url_template;
    let mut rest = template.as_str();
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| invalid(format!("unclosed placeholder in '{template}'")))?;
        let name = &after[..close];
        if !PLACEHOLDERS.contains(&name) {
            return Err(invalid(format!(
                "unknown placeholder '{{{name}}}' (expected one of: {})",
                PLACEHOLDERS.join(", ")
            )));
        }
        rest = &after[close + 1..];
    }

    if !template.contains("{date}") && !template.contains("{yyyy}") {
        return Err(invalid(format!(
            "template '{template}' needs a {{date}} or {{yyyy}} component"
        )));
    }
    Ok(())
}

/// Whether items of this source span several pages
pub fn is_paginated(spec: &SourceSpec) -> bool {
    spec.url_template.contains("{page}")
}

/// Fill a template for one date and page
pub fn render_url(spec: &SourceSpec, date: NaiveDate, page: u32) -> String {
    spec.url_template
        .replace("{date}", &date.format("%Y-%m-%d").to_string())
        .replace("{yyyy}", &format!("{:04}", date.year()))
        .replace("{mm}", &format!("{:02}", date.month()))
        .replace("{dd}", &format!("{:02}", date.day()))
        .replace("{page}", &page.to_string())
}

/// Registry errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// Unknown source id
    #[error("unknown source: {0}")]
    NotFound(String),

    /// Source id defined twice
    #[error("duplicate source: {0}")]
    Duplicate(String),

    /// Malformed source definition
    #[error("invalid source '{id}': {reason}")]
    InvalidTemplate {
        /// Source id
        id: String,
        /// What is wrong
        reason: String,
    },
}
