//! Raw extract loading.
//!
//! Source systems export one CSV per relation into a flat directory. All
//! columns are read as raw text; identifiers, codes, and mixed-layout dates
//! get typed later by preprocessing. The loader checks the full relation set
//! up front so an incomplete export is reported in one pass instead of
//! failing file by file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use polars::prelude::{AnyValue, CsvReadOptions, DataFrame, SerReader};
use tracing::debug;

use registry_model::{RegistryError, Result};

use crate::hash::sha256_hex_file;

/// Relations the pipeline cannot run without.
pub const REQUIRED_RELATIONS: [&str; 3] = ["demographics", "pharma", "interventions"];

/// Relations carried through when present but not needed by any indicator.
pub const OPTIONAL_RELATIONS: [&str; 2] = ["diagnoses", "physical_exams"];

/// One raw relation as delivered, plus the content hash that pins it.
#[derive(Debug, Clone)]
pub struct RawExtract {
    pub relation: String,
    pub path: PathBuf,
    pub frame: DataFrame,
    pub content_hash: String,
}

/// The full set of raw relations found in an extract directory.
#[derive(Debug, Clone, Default)]
pub struct RawBundle {
    pub extracts: BTreeMap<String, RawExtract>,
}

impl RawBundle {
    pub fn frame(&self, relation: &str) -> Option<&DataFrame> {
        self.extracts.get(relation).map(|extract| &extract.frame)
    }

    /// Frame for a relation the caller cannot proceed without.
    pub fn required_frame(&self, relation: &str) -> Result<&DataFrame> {
        self.frame(relation)
            .ok_or_else(|| RegistryError::MissingRelations {
                missing: vec![relation.to_string()],
            })
    }

    /// Content hashes keyed by relation name, for manifest pinning.
    pub fn content_hashes(&self) -> BTreeMap<String, String> {
        self.extracts
            .iter()
            .map(|(name, extract)| (name.clone(), extract.content_hash.clone()))
            .collect()
    }
}

/// Load every registry relation found under `dir`.
///
/// All required relations are checked before any file is parsed, so a
/// half-complete export surfaces as a single [`RegistryError::MissingRelations`]
/// naming everything that is absent. Optional relations are picked up when
/// present and skipped silently otherwise.
pub fn load_raw_dir(dir: &Path) -> Result<RawBundle> {
    let mut missing = Vec::new();
    for relation in REQUIRED_RELATIONS {
        if !relation_path(dir, relation).is_file() {
            missing.push(relation.to_string());
        }
    }
    if !missing.is_empty() {
        return Err(RegistryError::MissingRelations { missing });
    }

    let mut bundle = RawBundle::default();
    for relation in REQUIRED_RELATIONS.iter().chain(OPTIONAL_RELATIONS.iter()) {
        let path = relation_path(dir, relation);
        if !path.is_file() {
            continue;
        }
        let frame = read_raw_frame(&path, relation)?;
        let content_hash = sha256_hex_file(&path)?;
        debug!(
            relation,
            rows = frame.height(),
            columns = frame.width(),
            hash = %content_hash,
            "loaded raw relation"
        );
        bundle.extracts.insert(
            (*relation).to_string(),
            RawExtract {
                relation: (*relation).to_string(),
                path,
                frame,
                content_hash,
            },
        );
    }
    Ok(bundle)
}

fn relation_path(dir: &Path, relation: &str) -> PathBuf {
    dir.join(format!("{relation}.csv"))
}

/// Read one relation CSV into an all-string frame.
///
/// Schema inference is disabled so subject identifiers, ATC codes, and
/// mixed-layout date cells stay exactly as exported.
pub fn read_raw_frame(path: &Path, relation: &str) -> Result<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .map_err(|e| RegistryError::Ingest {
            relation: relation.to_string(),
            message: e.to_string(),
        })?
        .finish()
        .map_err(|e| RegistryError::Ingest {
            relation: relation.to_string(),
            message: e.to_string(),
        })
}

/// Check a relation frame for the columns a pipeline stage needs, reporting
/// every missing column at once.
pub fn require_columns(frame: &DataFrame, relation: &str, columns: &[&str]) -> Result<()> {
    let present: Vec<&str> = frame
        .get_column_names()
        .iter()
        .map(|name| name.as_str())
        .collect();
    let missing: Vec<String> = columns
        .iter()
        .filter(|column| !present.contains(*column))
        .map(|column| (*column).to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(RegistryError::MissingColumns {
            relation: relation.to_string(),
            columns: missing,
        })
    }
}

/// String value of one cell, with nulls collapsing to the empty string.
pub fn column_value(frame: &DataFrame, name: &str, idx: usize) -> String {
    match frame.column(name) {
        Ok(column) => cell_to_string(column.get(idx).unwrap_or(AnyValue::Null)),
        Err(_) => String::new(),
    }
}

fn cell_to_string(value: AnyValue<'_>) -> String {
    match value {
        AnyValue::Null => String::new(),
        AnyValue::String(s) => s.to_string(),
        AnyValue::StringOwned(s) => s.to_string(),
        other => other.to_string(),
    }
}
