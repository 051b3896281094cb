//! On-disk registry store.
//!
//! One store directory holds everything derived from a raw delivery:
//!
//! - `snapshot/*.csv`: the normalized relations, typed and date-canonical
//! - `derived/*.csv`: the cohort relation and the age index cells
//! - `cache/indicator_<id>.json`: cached indicator series
//! - `manifest.json`: content hashes pinning raw inputs and outputs, plus
//!   the span and bucket set the age index was built over
//!
//! The manifest is written last during a rebuild, so its presence marks a
//! complete store. Query surfaces refuse to load a store without one.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use csv::{ReaderBuilder, StringRecord, Writer};
use serde::{Deserialize, Serialize};
use tracing::debug;

use registry_model::{
    AgeBucket, AtcCode, DispensationRecord, InterventionRecord, RegistryError, Result, SubjectId,
    SubjectRecord,
};

use crate::age_index::{AgeIndex, AgeIndexRow};
use crate::cache::IndicatorCache;
use crate::cohort::{CohortIndex, CohortRow};
use crate::datetime::{canonicalize_date, format_date};
use crate::hash::sha256_hex;
use crate::snapshot::Snapshot;

const MANIFEST_VERSION: &str = "1.0";

fn default_manifest_version() -> String {
    MANIFEST_VERSION.to_string()
}

/// Year span and bucket labels the age index was built over. Persisted rows
/// only carry populated cells, so reloading needs this to re-materialize the
/// empty ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeIndexSpan {
    pub start_year: i32,
    pub end_year: i32,
    pub buckets: Vec<String>,
}

impl AgeIndexSpan {
    pub fn of(index: &AgeIndex) -> Self {
        let years = index.years();
        Self {
            start_year: *years.start(),
            end_year: *years.end(),
            buckets: index.buckets().iter().map(ToString::to_string).collect(),
        }
    }

    fn parsed_buckets(&self) -> Result<Vec<AgeBucket>> {
        self.buckets
            .iter()
            .map(|label| AgeBucket::parse_label(label))
            .collect()
    }
}

/// Content-hash manifest for one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreManifest {
    #[serde(default = "default_manifest_version")]
    pub version: String,
    pub saved_at: Option<String>,
    /// Raw input file hashes keyed by relation name.
    pub raw_inputs: BTreeMap<String, String>,
    /// Normalized snapshot relation hashes keyed by relation name.
    pub snapshot: BTreeMap<String, String>,
    /// Derived relation hashes keyed by relation name.
    pub derived: BTreeMap<String, String>,
    pub age_index: AgeIndexSpan,
}

impl StoreManifest {
    pub fn new(
        raw_inputs: BTreeMap<String, String>,
        snapshot: BTreeMap<String, String>,
        derived: BTreeMap<String, String>,
        age_index: AgeIndexSpan,
    ) -> Self {
        Self {
            version: default_manifest_version(),
            saved_at: Some(Utc::now().to_rfc3339()),
            raw_inputs,
            snapshot,
            derived,
            age_index,
        }
    }
}

/// The three batch outputs a query session borrows.
#[derive(Debug, Clone)]
pub struct BatchOutputs {
    pub snapshot: Snapshot,
    pub cohorts: CohortIndex,
    pub age_index: AgeIndex,
}

impl BatchOutputs {
    pub fn session(&self) -> crate::session::QuerySession<'_> {
        crate::session::QuerySession::new(&self.snapshot, &self.cohorts, &self.age_index)
    }
}

/// Handle on one store directory.
///
/// Opening is lazy: nothing is touched on disk until a write, and reads
/// report missing pieces as errors naming what to do about them.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    root: PathBuf,
}

impl RegistryStore {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.root.join("snapshot")
    }

    pub fn derived_dir(&self) -> PathBuf {
        self.root.join("derived")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    /// The indicator cache living inside this store.
    pub fn cache(&self) -> IndicatorCache {
        IndicatorCache::new(self.cache_dir())
    }

    /// Reads the manifest, `None` when the store was never completed.
    pub fn read_manifest(&self) -> Result<Option<StoreManifest>> {
        let path = self.manifest_path();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let manifest = serde_json::from_str(&contents).map_err(|err| {
            RegistryError::Store(format!("unreadable manifest {}: {err}", path.display()))
        })?;
        Ok(Some(manifest))
    }

    pub fn write_manifest(&self, manifest: &StoreManifest) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let path = self.manifest_path();
        let json = serde_json::to_string_pretty(manifest).map_err(|err| {
            RegistryError::Store(format!("failed to serialize manifest: {err}"))
        })?;
        fs::write(&path, json)?;
        debug!(path = %path.display(), "manifest written");
        Ok(())
    }

    /// Writes the three snapshot relations, returning their content hashes
    /// keyed by relation name.
    pub fn write_snapshot(&self, snapshot: &Snapshot) -> Result<BTreeMap<String, String>> {
        let dir = self.snapshot_dir();
        fs::create_dir_all(&dir)?;
        let mut hashes = BTreeMap::new();

        let mut writer = Writer::from_writer(Vec::new());
        write_record(
            &mut writer,
            [
                "ID_SUBJECT",
                "DT_BIRTH",
                "DT_DEATH",
                "GENDER",
                "CIVIL_STATUS",
                "JOB_COND",
                "EDU_LEVEL",
            ],
        )?;
        for record in snapshot.subjects.values() {
            write_record(
                &mut writer,
                [
                    record.id.as_str(),
                    &format_date(record.birth_date),
                    &record.death_date.map(format_date).unwrap_or_default(),
                    record.gender.as_code(),
                    record.civil_status.as_code(),
                    record.job_condition.as_code(),
                    record.education_level.as_code(),
                ],
            )?;
        }
        hashes.insert(
            "demographics".to_string(),
            persist(&dir.join("demographics.csv"), writer)?,
        );

        let mut writer = Writer::from_writer(Vec::new());
        write_record(&mut writer, ["ID_SUBJECT", "DT_PRESCR", "ATC_CHAR"])?;
        for record in &snapshot.dispensations {
            write_record(
                &mut writer,
                [
                    record.subject.as_str(),
                    &format_date(record.date),
                    record.atc.as_str(),
                ],
            )?;
        }
        hashes.insert(
            "pharma".to_string(),
            persist(&dir.join("pharma.csv"), writer)?,
        );

        let mut writer = Writer::from_writer(Vec::new());
        write_record(&mut writer, ["ID_SUBJECT", "DT_INT", "TYPE_INT"])?;
        for record in &snapshot.interventions {
            write_record(
                &mut writer,
                [
                    record.subject.as_str(),
                    &format_date(record.date),
                    &record
                        .type_code
                        .map(|code| code.to_string())
                        .unwrap_or_default(),
                ],
            )?;
        }
        hashes.insert(
            "interventions".to_string(),
            persist(&dir.join("interventions.csv"), writer)?,
        );

        debug!(dir = %dir.display(), "snapshot relations written");
        Ok(hashes)
    }

    pub fn read_snapshot(&self) -> Result<Snapshot> {
        let dir = self.snapshot_dir();
        let mut snapshot = Snapshot::default();

        let path = dir.join("demographics.csv");
        for record in read_relation(&path)? {
            let id = SubjectId::new(field(&record, 0, &path)?)?;
            let subject = SubjectRecord {
                id: id.clone(),
                birth_date: stored_date(field(&record, 1, &path)?, &path)?,
                death_date: optional_stored_date(field(&record, 2, &path)?, &path)?,
                gender: field(&record, 3, &path)?.parse()?,
                civil_status: field(&record, 4, &path)?.parse()?,
                job_condition: field(&record, 5, &path)?.parse()?,
                education_level: field(&record, 6, &path)?.parse()?,
            };
            snapshot.subjects.insert(id, subject);
        }

        let path = dir.join("pharma.csv");
        for record in read_relation(&path)? {
            snapshot.dispensations.push(DispensationRecord {
                subject: SubjectId::new(field(&record, 0, &path)?)?,
                date: stored_date(field(&record, 1, &path)?, &path)?,
                atc: AtcCode::new(field(&record, 2, &path)?)?,
            });
        }

        let path = dir.join("interventions.csv");
        for record in read_relation(&path)? {
            let raw_type = field(&record, 2, &path)?;
            let type_code = if raw_type.is_empty() {
                None
            } else {
                Some(raw_type.parse::<i32>().map_err(|_| {
                    RegistryError::Store(format!(
                        "{}: bad intervention type {raw_type:?}",
                        path.display()
                    ))
                })?)
            };
            snapshot.interventions.push(InterventionRecord {
                subject: SubjectId::new(field(&record, 0, &path)?)?,
                date: stored_date(field(&record, 1, &path)?, &path)?,
                type_code,
            });
        }

        Ok(snapshot)
    }

    /// Writes the cohort relation, returning its content hash.
    pub fn write_cohorts(&self, cohorts: &CohortIndex) -> Result<String> {
        let dir = self.derived_dir();
        fs::create_dir_all(&dir)?;
        let mut writer = Writer::from_writer(Vec::new());
        write_record(&mut writer, ["ID_SUBJECT", "ID_DISORDER", "YEAR_OF_ONSET"])?;
        for row in cohorts.rows() {
            write_record(
                &mut writer,
                [
                    row.subject.as_str(),
                    row.disorder.as_code(),
                    &row.year_of_onset.to_string(),
                ],
            )?;
        }
        persist(&dir.join("cohort.csv"), writer)
    }

    pub fn read_cohorts(&self) -> Result<CohortIndex> {
        let path = self.derived_dir().join("cohort.csv");
        let mut rows = Vec::new();
        for record in read_relation(&path)? {
            rows.push(CohortRow {
                subject: SubjectId::new(field(&record, 0, &path)?)?,
                disorder: field(&record, 1, &path)?.parse()?,
                year_of_onset: stored_year(field(&record, 2, &path)?, &path)?,
            });
        }
        Ok(CohortIndex::from_rows(rows))
    }

    /// Writes the age index cells, returning their content hash.
    pub fn write_age_index(&self, index: &AgeIndex) -> Result<String> {
        let dir = self.derived_dir();
        fs::create_dir_all(&dir)?;
        let mut writer = Writer::from_writer(Vec::new());
        write_record(&mut writer, ["YEAR", "AGE_BUCKET", "ID_SUBJECT"])?;
        for row in index.rows() {
            write_record(
                &mut writer,
                [
                    &row.year.to_string(),
                    &row.bucket.to_string(),
                    row.subject.as_str(),
                ],
            )?;
        }
        persist(&dir.join("age_index.csv"), writer)
    }

    pub fn read_age_index(&self, span: &AgeIndexSpan) -> Result<AgeIndex> {
        let path = self.derived_dir().join("age_index.csv");
        let mut rows = Vec::new();
        for record in read_relation(&path)? {
            rows.push(AgeIndexRow {
                year: stored_year(field(&record, 0, &path)?, &path)?,
                bucket: AgeBucket::parse_label(field(&record, 1, &path)?)?,
                subject: SubjectId::new(field(&record, 2, &path)?)?,
            });
        }
        Ok(AgeIndex::from_rows(
            rows,
            span.start_year..=span.end_year,
            &span.parsed_buckets()?,
        ))
    }

    /// Loads the complete batch output set for querying.
    ///
    /// Requires a manifest; a store that was never rebuilt (or whose rebuild
    /// never finished) is refused rather than partially loaded.
    pub fn load_batch(&self) -> Result<BatchOutputs> {
        let manifest = self.read_manifest()?.ok_or_else(|| {
            RegistryError::Store(format!(
                "no manifest at {}; run a rebuild first",
                self.manifest_path().display()
            ))
        })?;
        Ok(BatchOutputs {
            snapshot: self.read_snapshot()?,
            cohorts: self.read_cohorts()?,
            age_index: self.read_age_index(&manifest.age_index)?,
        })
    }
}

fn write_record<const N: usize>(writer: &mut Writer<Vec<u8>>, record: [&str; N]) -> Result<()> {
    writer
        .write_record(record)
        .map_err(|err| RegistryError::Store(format!("failed to encode csv record: {err}")))
}

/// Flushes the writer, hashes the serialized bytes, and writes the file.
fn persist(path: &Path, writer: Writer<Vec<u8>>) -> Result<String> {
    let bytes = writer
        .into_inner()
        .map_err(|err| RegistryError::Store(format!("{}: {err}", path.display())))?;
    let digest = sha256_hex(&bytes);
    fs::write(path, bytes)?;
    Ok(digest)
}

fn read_relation(path: &Path) -> Result<Vec<StringRecord>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|err| RegistryError::Store(format!("{}: {err}", path.display())))?;
    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(
            record.map_err(|err| RegistryError::Store(format!("{}: {err}", path.display())))?,
        );
    }
    Ok(rows)
}

fn field<'r>(record: &'r StringRecord, idx: usize, path: &Path) -> Result<&'r str> {
    record.get(idx).ok_or_else(|| {
        RegistryError::Store(format!("{}: record is missing column {idx}", path.display()))
    })
}

fn stored_date(text: &str, path: &Path) -> Result<NaiveDate> {
    canonicalize_date(text).ok_or_else(|| {
        RegistryError::Store(format!("{}: bad stored date {text:?}", path.display()))
    })
}

fn optional_stored_date(text: &str, path: &Path) -> Result<Option<NaiveDate>> {
    if text.is_empty() {
        return Ok(None);
    }
    stored_date(text, path).map(Some)
}

fn stored_year(text: &str, path: &Path) -> Result<i32> {
    text.parse::<i32>().map_err(|_| {
        RegistryError::Store(format!("{}: bad stored year {text:?}", path.display()))
    })
}
