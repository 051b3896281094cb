//! Snapshot construction from raw extracts.
//!
//! Preprocessing runs three passes in a fixed order. Pharma is slimmed to the
//! qualifying ATC families first, demographics is slimmed to subjects that
//! still dispense, and interventions is slimmed to the surviving subjects.
//! Rows are typed as they are copied out of the frames; a malformed row is
//! dropped and counted, never fatal, while a malformed categorical cell falls
//! back to the field's unknown sentinel.

use std::collections::{BTreeMap, BTreeSet};

use polars::prelude::{DataFrame, Expr, IntoLazy, col, lit};
use tracing::info;

use registry_model::{
    AtcCode, CivilStatus, DispensationRecord, Disorder, EducationLevel, Gender,
    InterventionRecord, JobCondition, RegistryError, Result, SubjectId, SubjectRecord,
};

use crate::datetime::canonicalize_date;
use crate::ingest::{RawBundle, column_value, require_columns};
use crate::snapshot::Snapshot;

pub const DEMOGRAPHICS_COLUMNS: [&str; 7] = [
    "ID_SUBJECT",
    "DT_BIRTH",
    "DT_DEATH",
    "GENDER",
    "CIVIL_STATUS",
    "JOB_COND",
    "EDU_LEVEL",
];
pub const PHARMA_COLUMNS: [&str; 3] = ["ID_SUBJECT", "DT_PRESCR", "ATC_CHAR"];
pub const INTERVENTION_COLUMNS: [&str; 3] = ["ID_SUBJECT", "DT_INT", "TYPE_INT"];

/// Row accounting for one preprocessing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreprocessReport {
    pub subjects_kept: usize,
    pub subjects_dropped: usize,
    pub dispensations_kept: usize,
    pub dispensations_dropped: usize,
    pub interventions_kept: usize,
    pub interventions_dropped: usize,
}

/// Build a typed snapshot from a loaded raw bundle.
///
/// Schema problems (missing relations or columns) fail the whole run; row
/// problems only shrink it and are tallied in the report.
pub fn build_snapshot(bundle: &RawBundle) -> Result<(Snapshot, PreprocessReport)> {
    let demographics = bundle.required_frame("demographics")?;
    let pharma = bundle.required_frame("pharma")?;
    let interventions = bundle.required_frame("interventions")?;
    require_columns(demographics, "demographics", &DEMOGRAPHICS_COLUMNS)?;
    require_columns(pharma, "pharma", &PHARMA_COLUMNS)?;
    require_columns(interventions, "interventions", &INTERVENTION_COLUMNS)?;

    let slimmed = slim_pharma(pharma)?;
    let (dispensations, dispensations_dropped) = type_dispensations(&slimmed);
    let dispensing: BTreeSet<SubjectId> = dispensations
        .iter()
        .map(|record| record.subject.clone())
        .collect();
    let (subjects, subjects_dropped) = type_subjects(demographics, &dispensing);
    let (interventions, interventions_dropped) = type_interventions(interventions, &subjects);

    let report = PreprocessReport {
        subjects_kept: subjects.len(),
        subjects_dropped,
        dispensations_kept: dispensations.len(),
        dispensations_dropped,
        interventions_kept: interventions.len(),
        interventions_dropped,
    };
    info!(
        subjects = report.subjects_kept,
        dispensations = report.dispensations_kept,
        interventions = report.interventions_kept,
        dropped_rows = subjects_dropped + dispensations_dropped + interventions_dropped,
        "snapshot built"
    );

    Ok((
        Snapshot {
            subjects,
            dispensations,
            interventions,
        },
        report,
    ))
}

/// Keep only dispensations in the qualifying ATC families. Runs as a lazy
/// columnar filter because pharma is by far the widest relation.
fn slim_pharma(frame: &DataFrame) -> Result<DataFrame> {
    let atc = col("ATC_CHAR").str().to_uppercase();
    let mut keep = family_filter(&atc, Disorder::QUALIFYING_ATC_PREFIXES[0]);
    for prefix in &Disorder::QUALIFYING_ATC_PREFIXES[1..] {
        keep = keep.or(family_filter(&atc, prefix));
    }
    frame
        .clone()
        .lazy()
        .filter(keep)
        .collect()
        .map_err(|e| RegistryError::Ingest {
            relation: "pharma".to_string(),
            message: e.to_string(),
        })
}

fn family_filter(atc: &Expr, prefix: &str) -> Expr {
    atc.clone().str().starts_with(lit(prefix))
}

fn type_dispensations(frame: &DataFrame) -> (Vec<DispensationRecord>, usize) {
    let mut records = Vec::with_capacity(frame.height());
    let mut dropped = 0usize;
    for idx in 0..frame.height() {
        let subject = SubjectId::new(column_value(frame, "ID_SUBJECT", idx));
        let date = canonicalize_date(&column_value(frame, "DT_PRESCR", idx));
        let atc = AtcCode::new(column_value(frame, "ATC_CHAR", idx));
        let (Ok(subject), Some(date), Ok(atc)) = (subject, date, atc) else {
            dropped += 1;
            continue;
        };
        records.push(DispensationRecord { subject, date, atc });
    }
    (records, dropped)
}

fn type_subjects(
    frame: &DataFrame,
    dispensing: &BTreeSet<SubjectId>,
) -> (BTreeMap<SubjectId, SubjectRecord>, usize) {
    let mut subjects = BTreeMap::new();
    let mut dropped = 0usize;
    for idx in 0..frame.height() {
        let Ok(id) = SubjectId::new(column_value(frame, "ID_SUBJECT", idx)) else {
            dropped += 1;
            continue;
        };
        // Slimming: demographics only keeps subjects that still dispense.
        if !dispensing.contains(&id) {
            continue;
        }
        let Some(birth_date) = canonicalize_date(&column_value(frame, "DT_BIRTH", idx)) else {
            dropped += 1;
            continue;
        };
        let record = SubjectRecord {
            id: id.clone(),
            birth_date,
            death_date: canonicalize_date(&column_value(frame, "DT_DEATH", idx)),
            gender: Gender::from_code_or_unknown(&column_value(frame, "GENDER", idx)),
            civil_status: CivilStatus::from_code_or_unknown(&column_value(
                frame,
                "CIVIL_STATUS",
                idx,
            )),
            job_condition: JobCondition::from_code_or_unknown(&column_value(
                frame, "JOB_COND", idx,
            )),
            education_level: EducationLevel::from_code_or_unknown(&column_value(
                frame, "EDU_LEVEL", idx,
            )),
        };
        subjects.insert(id, record);
    }
    (subjects, dropped)
}

fn type_interventions(
    frame: &DataFrame,
    subjects: &BTreeMap<SubjectId, SubjectRecord>,
) -> (Vec<InterventionRecord>, usize) {
    let mut records = Vec::new();
    let mut dropped = 0usize;
    for idx in 0..frame.height() {
        let subject = SubjectId::new(column_value(frame, "ID_SUBJECT", idx));
        let date = canonicalize_date(&column_value(frame, "DT_INT", idx));
        let (Ok(subject), Some(date)) = (subject, date) else {
            dropped += 1;
            continue;
        };
        if !subjects.contains_key(&subject) {
            continue;
        }
        records.push(InterventionRecord {
            subject,
            date,
            type_code: parse_type_code(&column_value(frame, "TYPE_INT", idx)),
        });
    }
    (records, dropped)
}

/// Intervention type codes arrive as integers, sometimes with a decimal tail
/// after spreadsheet round-trips. Anything unparseable is `None`, which the
/// type-slot folding treats as the residual slot.
fn parse_type_code(raw: &str) -> Option<i32> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let digits = trimmed.strip_suffix(".0").unwrap_or(trimmed);
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::load_raw_dir;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_relation(dir: &Path, relation: &str, content: &str) {
        std::fs::write(dir.join(format!("{relation}.csv")), content).unwrap();
    }

    fn seeded_bundle(dir: &TempDir) -> RawBundle {
        write_relation(
            dir.path(),
            "demographics",
            "ID_SUBJECT,DT_BIRTH,DT_DEATH,GENDER,CIVIL_STATUS,JOB_COND,EDU_LEVEL\n\
             s1,1980-04-02,,M,Married,Employed,5\n\
             s2,14/06/1992,,F,Unmarried,Unemployed,3.0\n\
             s3,1975-01-01,2018-03-01,F,Other,Pension,9\n\
             s4,1990-05-05,,M,Married,Employed,4\n\
             s5,not-a-date,,F,Married,Employed,2\n",
        );
        write_relation(
            dir.path(),
            "pharma",
            "ID_SUBJECT,DT_PRESCR,ATC_CHAR\n\
             s1,2015-01-10,N05AH03\n\
             s2,2016-03-04,n06ab06\n\
             s3,2014-07-07,N05AN01\n\
             s4,2015-09-09,A10BA02\n\
             s5,2015-02-02,N05AH02\n\
             s1,bad-date,N05AH03\n",
        );
        write_relation(
            dir.path(),
            "interventions",
            "ID_SUBJECT,DT_INT,TYPE_INT\n\
             s1,2015-02-01,2\n\
             s2,2016-04-01,7.0\n\
             s3,2014-08-01,\n\
             s4,2015-10-01,3\n\
             s9,2015-10-01,1\n",
        );
        load_raw_dir(dir.path()).unwrap()
    }

    #[test]
    fn slims_to_qualifying_families_and_dispensing_subjects() {
        let dir = TempDir::new().unwrap();
        let bundle = seeded_bundle(&dir);
        let (snapshot, report) = build_snapshot(&bundle).unwrap();

        // s4 only dispenses insulin, s5 has no parseable birth date.
        let kept: Vec<&str> = snapshot.subjects.keys().map(SubjectId::as_str).collect();
        assert_eq!(kept, vec!["s1", "s2", "s3"]);
        assert_eq!(report.subjects_dropped, 1);

        // The insulin row is slimmed away, the bad-date row is dropped.
        assert_eq!(snapshot.dispensations.len(), 4);
        assert_eq!(report.dispensations_dropped, 1);
    }

    #[test]
    fn lowercase_atc_codes_survive_slimming() {
        let dir = TempDir::new().unwrap();
        let bundle = seeded_bundle(&dir);
        let (snapshot, _) = build_snapshot(&bundle).unwrap();

        let s2 = SubjectId::new("s2").unwrap();
        let codes: Vec<&str> = snapshot
            .dispensations
            .iter()
            .filter(|record| record.subject == s2)
            .map(|record| record.atc.as_str())
            .collect();
        assert_eq!(codes, vec!["N06AB06"]);
    }

    #[test]
    fn interventions_follow_the_surviving_subjects() {
        let dir = TempDir::new().unwrap();
        let bundle = seeded_bundle(&dir);
        let (snapshot, _) = build_snapshot(&bundle).unwrap();

        // s4 dropped with its demographics row, s9 never existed.
        let subjects: Vec<&str> = snapshot
            .interventions
            .iter()
            .map(|record| record.subject.as_str())
            .collect();
        assert_eq!(subjects, vec!["s1", "s2", "s3"]);
    }

    #[test]
    fn categorical_cells_type_through_sentinels() {
        let dir = TempDir::new().unwrap();
        let bundle = seeded_bundle(&dir);
        let (snapshot, _) = build_snapshot(&bundle).unwrap();

        let s2 = &snapshot.subjects[&SubjectId::new("s2").unwrap()];
        assert_eq!(s2.gender, Gender::Female);
        assert_eq!(s2.education_level, EducationLevel::UpperSecondary);
        assert_eq!(s2.birth_date, canonicalize_date("1992-06-14").unwrap());

        let s3 = &snapshot.subjects[&SubjectId::new("s3").unwrap()];
        assert_eq!(s3.civil_status, CivilStatus::Other);
        assert!(!s3.alive_at(2018));
    }

    #[test]
    fn type_codes_parse_with_decimal_tails() {
        assert_eq!(parse_type_code("2"), Some(2));
        assert_eq!(parse_type_code("7.0"), Some(7));
        assert_eq!(parse_type_code(" 9 "), Some(9));
        assert_eq!(parse_type_code(""), None);
        assert_eq!(parse_type_code("x"), None);
    }

    #[test]
    fn missing_columns_fail_before_any_typing() {
        let dir = TempDir::new().unwrap();
        write_relation(
            dir.path(),
            "demographics",
            "ID_SUBJECT,DT_BIRTH\ns1,1980-04-02\n",
        );
        write_relation(dir.path(), "pharma", "ID_SUBJECT,DT_PRESCR,ATC_CHAR\n");
        write_relation(dir.path(), "interventions", "ID_SUBJECT,DT_INT,TYPE_INT\n");
        let bundle = load_raw_dir(dir.path()).unwrap();

        let err = build_snapshot(&bundle).unwrap_err();
        match err {
            RegistryError::MissingColumns { relation, columns } => {
                assert_eq!(relation, "demographics");
                assert_eq!(
                    columns,
                    vec!["DT_DEATH", "GENDER", "CIVIL_STATUS", "JOB_COND", "EDU_LEVEL"]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
