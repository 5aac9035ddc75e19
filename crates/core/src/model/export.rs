use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::ids::TopicId;
use crate::model::record::{ProgressRecord, TopicNote};
use crate::stats::ProgressRatio;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ImportError {
    #[error("import file is missing the `{0}` field")]
    MissingField(&'static str),

    #[error("import file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Full-record export document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordExport {
    pub data: ProgressRecord,
    pub exported_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_progress: Option<ProgressRatio>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}

impl RecordExport {
    #[must_use]
    pub fn new(data: ProgressRecord, exported_at: DateTime<Utc>) -> Self {
        Self {
            data,
            exported_at,
            overall_progress: None,
            last_sync: None,
        }
    }

    /// Parse an import file. Only the presence of a top-level `data` field is checked
    /// before the record itself is decoded.
    ///
    /// # Errors
    ///
    /// Returns `ImportError` if the text is not JSON or has no `data` field.
    pub fn parse(text: &str) -> Result<Self, ImportError> {
        parse_with_field(text, "data")
    }
}

/// Notes-only export document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotesExport {
    pub notes: BTreeMap<TopicId, TopicNote>,
    pub exported_at: DateTime<Utc>,
}

impl NotesExport {
    /// # Errors
    ///
    /// Returns `ImportError` if the text is not JSON or has no `notes` field.
    pub fn parse(text: &str) -> Result<Self, ImportError> {
        parse_with_field(text, "notes")
    }
}

fn parse_with_field<T: DeserializeOwned>(
    text: &str,
    field: &'static str,
) -> Result<T, ImportError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get(field).is_none() {
        return Err(ImportError::MissingField(field));
    }
    Ok(serde_json::from_value(value)?)
}

/// Date-stamped export file name, e.g. `study-progress-2023-11-14.json`.
#[must_use]
pub fn export_file_name(kind: &str, at: DateTime<Utc>) -> String {
    format!("study-{kind}-{}.json", at.format("%Y-%m-%d"))
}
