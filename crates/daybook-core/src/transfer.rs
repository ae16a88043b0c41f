use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::dates::{date_key_in_month, is_month_key};
use crate::model::{Dataset, DayRecord, Moment, MonthCollection};

pub const EXPORT_VERSION: u64 = 1;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Import is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Import/export IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported export version {0}")]
    UnsupportedVersion(u64),
    #[error("Unrecognized import: {0}")]
    Unrecognized(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEnvelope {
    pub version: u64,
    pub exported_at: String,
    pub months: Dataset,
    #[serde(default)]
    pub moments: Vec<Moment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub months: usize,
    pub days: usize,
    pub moments: usize,
    pub dropped_months: Vec<String>,
    pub dropped_days: usize,
    pub dropped_moments: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportedData {
    pub months: Dataset,
    pub moments: Vec<Moment>,
    pub report: ImportReport,
}

pub fn export_json(
    months: &Dataset,
    moments: &[Moment],
    exported_at: &str,
) -> Result<String, TransferError> {
    let envelope = ExportEnvelope {
        version: EXPORT_VERSION,
        exported_at: exported_at.to_string(),
        months: months.clone(),
        moments: moments.to_vec(),
    };
    Ok(serde_json::to_string_pretty(&envelope)?)
}

/// Accepts an export envelope or a bare month map. Entries that do not
/// fit the data model are dropped and counted rather than failing the
/// whole import.
pub fn parse_import(raw: &str) -> Result<ImportedData, TransferError> {
    let value: Value = serde_json::from_str(raw)?;
    let Value::Object(root) = value else {
        return Err(TransferError::Unrecognized(
            "expected a JSON object".to_string(),
        ));
    };

    let mut imported = ImportedData::default();
    let months = if is_envelope(&root) {
        let version = root
            .get("version")
            .and_then(Value::as_u64)
            .ok_or_else(|| TransferError::Unrecognized("version is not a number".to_string()))?;
        if version > EXPORT_VERSION {
            return Err(TransferError::UnsupportedVersion(version));
        }
        if let Some(Value::Array(moments)) = root.get("moments") {
            for entry in moments {
                match serde_json::from_value::<Moment>(entry.clone()) {
                    Ok(moment) if !moment.id.trim().is_empty() => imported.moments.push(moment),
                    _ => imported.report.dropped_moments += 1,
                }
            }
        }
        match root.get("months") {
            Some(Value::Object(months)) => months.clone(),
            _ => {
                return Err(TransferError::Unrecognized(
                    "months is not an object".to_string(),
                ))
            }
        }
    } else {
        root
    };

    for (month_key, month_value) in months {
        let Some(month) = parse_month(&month_key, month_value, &mut imported.report) else {
            imported.report.dropped_months.push(month_key);
            continue;
        };
        imported.report.days += month.len();
        imported.months.insert(month_key, month);
    }
    imported.report.months = imported.months.len();
    imported.report.moments = imported.moments.len();
    debug!(
        months = imported.report.months,
        days = imported.report.days,
        dropped_days = imported.report.dropped_days,
        "parsed import"
    );
    Ok(imported)
}

fn parse_month(month_key: &str, value: Value, report: &mut ImportReport) -> Option<MonthCollection> {
    if !is_month_key(month_key) {
        return None;
    }
    let Value::Object(days) = value else {
        return None;
    };
    let mut month = MonthCollection::new();
    for (day_key, day_value) in days {
        if !date_key_in_month(&day_key, month_key) {
            report.dropped_days += 1;
            continue;
        }
        match serde_json::from_value::<DayRecord>(day_value) {
            Ok(day) => {
                month.insert(day_key, day);
            }
            Err(_) => report.dropped_days += 1,
        }
    }
    Some(month)
}

pub fn write_export(path: &Path, body: &str) -> Result<(), TransferError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, body)?;
    Ok(())
}

pub fn read_import(path: &Path) -> Result<ImportedData, TransferError> {
    let raw = fs::read_to_string(path)?;
    parse_import(&raw)
}

fn is_envelope(root: &Map<String, Value>) -> bool {
    root.contains_key("months") && root.contains_key("version")
}
