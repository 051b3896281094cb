//! Batch rebuild orchestration.
//!
//! One rebuild runs the three batch stages in order: preprocess the raw
//! extracts into the snapshot, derive the cohort relation, derive the age
//! index. Each stage is hash-guarded: it reruns only when its inputs differ
//! from what the store manifest pinned, when its output file is missing, or
//! when the caller forces it. A rerun anywhere invalidates the indicator
//! cache; a fully skipped rebuild leaves it intact.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::Path;

use chrono::{Datelike, Utc};
use tracing::{debug, info};

use registry_model::{Result, default_buckets};

use crate::age_index::AgeIndex;
use crate::cohort::CohortIndex;
use crate::ingest::{REQUIRED_RELATIONS, load_raw_dir};
use crate::preprocess::{PreprocessReport, build_snapshot};
use crate::snapshot::Snapshot;
use crate::store::{AgeIndexSpan, RegistryStore, StoreManifest};

/// Whether one batch stage recomputed its output or reused the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Rebuilt,
    Reused,
}

impl StageOutcome {
    pub fn ran(self) -> bool {
        matches!(self, StageOutcome::Rebuilt)
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageOutcome::Rebuilt => write!(f, "rebuilt"),
            StageOutcome::Reused => write!(f, "up to date"),
        }
    }
}

/// What one rebuild did, stage by stage, plus the row counts the store now
/// holds.
#[derive(Debug, Clone)]
pub struct RebuildReport {
    pub preprocess: StageOutcome,
    pub cohorts: StageOutcome,
    pub age_index: StageOutcome,
    /// Row accounting from preprocessing, absent when the snapshot was
    /// reused.
    pub row_report: Option<PreprocessReport>,
    pub subjects: usize,
    pub dispensations: usize,
    pub interventions: usize,
    pub cohort_rows: usize,
    pub years: RangeInclusive<i32>,
    /// Cached indicator relations dropped by this rebuild.
    pub cache_relations_dropped: usize,
}

impl RebuildReport {
    pub fn up_to_date(&self) -> bool {
        !self.preprocess.ran() && !self.cohorts.ran() && !self.age_index.ran()
    }
}

/// Run the batch phase against `store` from the raw extracts under
/// `raw_dir`.
///
/// `force` reruns every stage regardless of hashes. The manifest is written
/// last, so an interrupted rebuild leaves no manifest and the next one
/// starts from the top.
pub fn rebuild(raw_dir: &Path, store: &RegistryStore, force: bool) -> Result<RebuildReport> {
    let bundle = load_raw_dir(raw_dir)?;
    let raw_hashes = bundle.content_hashes();
    let previous = store.read_manifest()?;

    let snapshot_on_disk = REQUIRED_RELATIONS
        .iter()
        .all(|relation| store.snapshot_dir().join(format!("{relation}.csv")).is_file());
    let raw_unchanged = previous
        .as_ref()
        .is_some_and(|manifest| manifest.raw_inputs == raw_hashes);
    let run_preprocess = force || !raw_unchanged || !snapshot_on_disk;

    let (snapshot, snapshot_hashes, row_report) = match (&previous, run_preprocess) {
        (Some(manifest), false) => {
            debug!("raw extracts unchanged, reusing stored snapshot");
            (store.read_snapshot()?, manifest.snapshot.clone(), None)
        }
        _ => {
            let (snapshot, report) = build_snapshot(&bundle)?;
            let hashes = store.write_snapshot(&snapshot)?;
            (snapshot, hashes, Some(report))
        }
    };

    let previous_cohort_hash = previous
        .as_ref()
        .and_then(|manifest| manifest.derived.get("cohort").cloned());
    let snapshot_unchanged = previous
        .as_ref()
        .is_some_and(|manifest| manifest.snapshot == snapshot_hashes);
    let run_cohorts = force
        || !snapshot_unchanged
        || previous_cohort_hash.is_none()
        || !store.derived_dir().join("cohort.csv").is_file();

    let (cohorts, cohort_hash) = match (&previous, run_cohorts) {
        (Some(_), false) => {
            debug!("snapshot unchanged, reusing stored cohort relation");
            (
                store.read_cohorts()?,
                previous_cohort_hash.clone().unwrap_or_default(),
            )
        }
        _ => {
            let cohorts = CohortIndex::build(&snapshot);
            let hash = store.write_cohorts(&cohorts)?;
            (cohorts, hash)
        }
    };

    let previous_age_hash = previous
        .as_ref()
        .and_then(|manifest| manifest.derived.get("age_index").cloned());
    let cohort_unchanged = previous_cohort_hash.as_deref() == Some(cohort_hash.as_str());
    let run_age_index = force
        || !snapshot_unchanged
        || !cohort_unchanged
        || previous_age_hash.is_none()
        || !store.derived_dir().join("age_index.csv").is_file();

    let (span, age_hash) = match (&previous, run_age_index) {
        (Some(manifest), false) => {
            debug!("cohorts unchanged, reusing stored age index");
            (
                manifest.age_index.clone(),
                previous_age_hash.clone().unwrap_or_default(),
            )
        }
        _ => {
            let index = AgeIndex::build(
                &snapshot,
                &cohorts,
                year_span(&snapshot, &cohorts),
                &default_buckets(),
            );
            let hash = store.write_age_index(&index)?;
            (AgeIndexSpan::of(&index), hash)
        }
    };

    let any_ran = run_preprocess || run_cohorts || run_age_index;
    let cache_relations_dropped = if any_ran {
        store.cache().invalidate_all()?
    } else {
        0
    };

    let report = RebuildReport {
        preprocess: outcome(run_preprocess),
        cohorts: outcome(run_cohorts),
        age_index: outcome(run_age_index),
        row_report,
        subjects: snapshot.subjects.len(),
        dispensations: snapshot.dispensations.len(),
        interventions: snapshot.interventions.len(),
        cohort_rows: cohorts.len(),
        years: span.start_year..=span.end_year,
        cache_relations_dropped,
    };

    if !any_ran {
        info!(store = %store.root().display(), "store already up to date");
        return Ok(report);
    }

    let mut derived = BTreeMap::new();
    derived.insert("cohort".to_string(), cohort_hash);
    derived.insert("age_index".to_string(), age_hash);
    store.write_manifest(&StoreManifest::new(
        raw_hashes,
        snapshot_hashes,
        derived,
        span,
    ))?;

    info!(
        preprocess = %report.preprocess,
        cohorts = %report.cohorts,
        age_index = %report.age_index,
        subjects = report.subjects,
        cohort_rows = report.cohort_rows,
        cache_relations_dropped,
        "rebuild finished"
    );
    Ok(report)
}

fn outcome(ran: bool) -> StageOutcome {
    if ran {
        StageOutcome::Rebuilt
    } else {
        StageOutcome::Reused
    }
}

/// Year span the age index covers: earliest cohort onset through the last
/// recorded event. Falls back to the current year when the extracts carry
/// no events at all.
fn year_span(snapshot: &Snapshot, cohorts: &CohortIndex) -> RangeInclusive<i32> {
    let end = snapshot.max_event_year();
    let start = cohorts.min_onset_year();
    match (start, end) {
        (Some(start), Some(end)) if start <= end => start..=end,
        (Some(start), _) => start..=start,
        (None, Some(end)) => end..=end,
        (None, None) => {
            let current = Utc::now().year();
            current..=current
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use registry_model::{
        CacheKey, CohortRule, DemographicFilter, Disorder, IndicatorSeries, IndicatorValue,
        default_buckets,
    };
    use tempfile::TempDir;

    fn write_relation(dir: &Path, relation: &str, content: &str) {
        fs::write(dir.join(format!("{relation}.csv")), content).unwrap();
    }

    fn seed_raw(dir: &Path) {
        write_relation(
            dir,
            "demographics",
            "ID_SUBJECT,DT_BIRTH,DT_DEATH,GENDER,CIVIL_STATUS,JOB_COND,EDU_LEVEL\n\
             s1,1990-07-01,,M,Married,Employed,3\n\
             s2,1950-02-28,2019-11-03,F,Other,Pension,1\n",
        );
        write_relation(
            dir,
            "pharma",
            "ID_SUBJECT,DT_PRESCR,ATC_CHAR\ns1,2015-03-10,N05AH03\n",
        );
        write_relation(
            dir,
            "interventions",
            "ID_SUBJECT,DT_INT,TYPE_INT\ns1,2016-06-20,4\ns2,2017-01-05,\n",
        );
    }

    fn seed_cache(store: &RegistryStore) -> String {
        let key = CacheKey {
            disorder: Disorder::Schizophrenia,
            cohort_rule: Some(CohortRule::Prevalent),
            age_buckets: default_buckets(),
            demographics: DemographicFilter::default(),
        };
        let signature = key.canonical_signature();
        let mut series = IndicatorSeries::default();
        series.push(2015, IndicatorValue::percentage(1, 2, vec![3]));
        store.cache().put("ea1", &signature, &series).unwrap();
        signature
    }

    #[test]
    fn first_rebuild_runs_every_stage() {
        let raw = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        seed_raw(raw.path());
        let store = RegistryStore::open(out.path().join("store"));

        let report = rebuild(raw.path(), &store, false).unwrap();
        assert!(report.preprocess.ran());
        assert!(report.cohorts.ran());
        assert!(report.age_index.ran());
        assert_eq!(report.subjects, 2);
        assert_eq!(report.cohort_rows, 1);
        assert_eq!(report.years, 2015..=2017);
        assert_eq!(report.cache_relations_dropped, 0);

        let batch = store.load_batch().unwrap();
        assert_eq!(batch.snapshot.subjects.len(), 2);
        assert_eq!(batch.cohorts.len(), 1);
        assert_eq!(batch.age_index.years(), 2015..=2017);
    }

    #[test]
    fn unchanged_raw_reuses_every_stage() {
        let raw = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        seed_raw(raw.path());
        let store = RegistryStore::open(out.path().join("store"));

        rebuild(raw.path(), &store, false).unwrap();
        let signature = seed_cache(&store);

        let report = rebuild(raw.path(), &store, false).unwrap();
        assert!(report.up_to_date());
        assert!(report.row_report.is_none());
        // A fully skipped rebuild leaves cached series alone.
        assert_eq!(report.cache_relations_dropped, 0);
        assert!(store.cache().contains("ea1", &signature).unwrap());
    }

    #[test]
    fn force_reruns_and_drops_the_cache() {
        let raw = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        seed_raw(raw.path());
        let store = RegistryStore::open(out.path().join("store"));

        rebuild(raw.path(), &store, false).unwrap();
        let signature = seed_cache(&store);

        let report = rebuild(raw.path(), &store, true).unwrap();
        assert!(report.preprocess.ran());
        assert!(report.cohorts.ran());
        assert!(report.age_index.ran());
        assert_eq!(report.cache_relations_dropped, 1);
        assert!(!store.cache().contains("ea1", &signature).unwrap());
    }

    #[test]
    fn raw_edit_cascades_to_every_stage() {
        let raw = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        seed_raw(raw.path());
        let store = RegistryStore::open(out.path().join("store"));

        rebuild(raw.path(), &store, false).unwrap();
        let signature = seed_cache(&store);

        write_relation(
            raw.path(),
            "pharma",
            "ID_SUBJECT,DT_PRESCR,ATC_CHAR\ns1,2015-03-10,N05AH03\ns2,2018-05-01,N06AB06\n",
        );
        let report = rebuild(raw.path(), &store, false).unwrap();
        assert!(report.preprocess.ran());
        assert!(report.cohorts.ran());
        assert!(report.age_index.ran());
        assert_eq!(report.years, 2015..=2018);
        assert!(!store.cache().contains("ea1", &signature).unwrap());
    }

    #[test]
    fn cosmetic_raw_edit_stops_at_the_snapshot() {
        let raw = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        seed_raw(raw.path());
        let store = RegistryStore::open(out.path().join("store"));

        rebuild(raw.path(), &store, false).unwrap();

        // Padding inside the id field changes the raw hash but normalizes
        // away, so the snapshot hash matches and the cascade stops.
        write_relation(
            raw.path(),
            "pharma",
            "ID_SUBJECT,DT_PRESCR,ATC_CHAR\ns1 ,2015-03-10,N05AH03\n",
        );
        let report = rebuild(raw.path(), &store, false).unwrap();
        assert!(report.preprocess.ran());
        assert!(!report.cohorts.ran());
        assert!(!report.age_index.ran());
    }

    #[test]
    fn missing_snapshot_file_forces_preprocessing() {
        let raw = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        seed_raw(raw.path());
        let store = RegistryStore::open(out.path().join("store"));

        rebuild(raw.path(), &store, false).unwrap();
        fs::remove_file(store.snapshot_dir().join("pharma.csv")).unwrap();

        let report = rebuild(raw.path(), &store, false).unwrap();
        assert!(report.preprocess.ran());
        assert!(!report.cohorts.ran());
        store.load_batch().unwrap();
    }
}
