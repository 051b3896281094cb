//! Query sessions and ephemeral stratified sets.
//!
//! A [`QuerySession`] borrows the batch outputs (snapshot, cohorts, age
//! index) read-only and materializes [`StratifiedSet`]s on demand. Sets are
//! named relations scoped to the session: each carries a collision-free
//! generated name, registers itself while alive, and unregisters when
//! dropped. Indicator computations run entirely inside one session, so a
//! session that ends with zero active sets has provably released everything
//! it created.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;

use chrono::Utc;
use tracing::debug;

use registry_model::{RegistryError, Result, StratificationQuery, SubjectId};

use crate::age_index::AgeIndex;
use crate::cohort::CohortIndex;
use crate::snapshot::Snapshot;

#[derive(Debug)]
pub struct QuerySession<'a> {
    snapshot: &'a Snapshot,
    cohorts: &'a CohortIndex,
    age_index: &'a AgeIndex,
    active: RefCell<BTreeSet<String>>,
    counter: Cell<u64>,
}

impl<'a> QuerySession<'a> {
    pub fn new(snapshot: &'a Snapshot, cohorts: &'a CohortIndex, age_index: &'a AgeIndex) -> Self {
        Self {
            snapshot,
            cohorts,
            age_index,
            active: RefCell::new(BTreeSet::new()),
            counter: Cell::new(0),
        }
    }

    pub fn snapshot(&self) -> &'a Snapshot {
        self.snapshot
    }

    pub fn cohorts(&self) -> &'a CohortIndex {
        self.cohorts
    }

    pub fn age_index(&self) -> &'a AgeIndex {
        self.age_index
    }

    /// Ephemeral sets currently alive in this session. Zero once every
    /// stratified set has been released.
    pub fn active_set_count(&self) -> usize {
        self.active.borrow().len()
    }

    /// Materialize the set of subjects matching one resolved filter
    /// combination.
    ///
    /// Bucket membership is a union across the requested buckets; the four
    /// demographic filters then apply as a conjunction. Parameters are
    /// validated in full before any set is touched, so a failed call leaves
    /// nothing behind. An empty bucket list or a combination matching nobody
    /// yields a valid empty set, not an error.
    pub fn stratify(&self, query: &StratificationQuery) -> Result<StratifiedSet<'_>> {
        let year = query.year_of_inclusion;
        if !self.age_index.contains_year(year) {
            return Err(RegistryError::parameter(
                "year_of_inclusion",
                year.to_string(),
                self.age_index.years().map(|y| y.to_string()),
            ));
        }
        for bucket in &query.age_buckets {
            if !self.age_index.is_indexed_bucket(*bucket) {
                return Err(RegistryError::parameter(
                    "age_bucket",
                    bucket.to_string(),
                    self.age_index.buckets().iter().map(ToString::to_string),
                ));
            }
        }

        let mut union: BTreeSet<SubjectId> = BTreeSet::new();
        for bucket in &query.age_buckets {
            if let Some(cell) = self.age_index.members(year, *bucket) {
                union.extend(cell.iter().cloned());
            }
        }
        let members: BTreeSet<SubjectId> = union
            .into_iter()
            .filter(|id| {
                self.snapshot
                    .subject(id)
                    .is_some_and(|record| query.demographics.matches(record))
            })
            .collect();

        let name = self.next_name();
        self.active.borrow_mut().insert(name.clone());
        debug!(set = %name, members = members.len(), year, "stratified set materialized");
        Ok(StratifiedSet {
            session: self,
            name,
            members,
        })
    }

    /// Time-suffixed name, unique within the session by counter even when two
    /// calls land on the same microsecond.
    fn next_name(&self) -> String {
        let counter = self.counter.get();
        self.counter.set(counter + 1);
        format!("stratified_{}_{counter}", Utc::now().format("%H%M%S%f"))
    }

    fn release_name(&self, name: &str) {
        self.active.borrow_mut().remove(name);
        debug!(set = %name, "stratified set released");
    }
}

/// An ephemeral named subject set produced by one [`QuerySession::stratify`]
/// call.
///
/// The set unregisters itself from its session when dropped, so every exit
/// path releases it, including early returns and errors in the caller.
/// [`StratifiedSet::release`] exists for call sites where the handoff should
/// read explicitly.
#[derive(Debug)]
pub struct StratifiedSet<'s> {
    session: &'s QuerySession<'s>,
    name: String,
    members: BTreeSet<SubjectId>,
}

impl StratifiedSet<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &BTreeSet<SubjectId> {
        &self.members
    }

    pub fn contains(&self, subject: &SubjectId) -> bool {
        self.members.contains(subject)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Release the set now. Dropping it does the same; this form makes the
    /// end of the set's life explicit at the call site.
    pub fn release(self) {}
}

impl Drop for StratifiedSet<'_> {
    fn drop(&mut self) {
        self.session.release_name(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use registry_model::{
        AgeBucket, AtcCode, CivilStatus, DemographicFilter, DispensationRecord, EducationLevel,
        FieldFilter, Gender, JobCondition, SubjectRecord, default_buckets,
    };

    struct Fixture {
        snapshot: Snapshot,
        cohorts: CohortIndex,
        age_index: AgeIndex,
    }

    fn subject_record(id: &str, birth_year: i32, gender: Gender, job: JobCondition) -> SubjectRecord {
        SubjectRecord {
            id: SubjectId::new(id).unwrap(),
            birth_date: NaiveDate::from_ymd_opt(birth_year, 7, 1).unwrap(),
            death_date: None,
            gender,
            civil_status: CivilStatus::Married,
            job_condition: job,
            education_level: EducationLevel::UpperSecondary,
        }
    }

    fn fixture_with_buckets(buckets: &[AgeBucket]) -> Fixture {
        let mut snapshot = Snapshot::default();
        for (id, birth, gender, job) in [
            ("s20", 2000, Gender::Female, JobCondition::Employed),
            ("s45", 1975, Gender::Male, JobCondition::Employed),
            ("s70", 1950, Gender::Female, JobCondition::Pension),
            ("s30", 1990, Gender::Female, JobCondition::Unknown),
        ] {
            let record = subject_record(id, birth, gender, job);
            snapshot.subjects.insert(record.id.clone(), record);
        }
        for id in ["s20", "s45", "s70", "s30"] {
            snapshot.dispensations.push(DispensationRecord {
                subject: SubjectId::new(id).unwrap(),
                date: NaiveDate::from_ymd_opt(2015, 6, 15).unwrap(),
                atc: AtcCode::new("N05AH03").unwrap(),
            });
        }
        let cohorts = CohortIndex::build(&snapshot);
        let age_index = AgeIndex::build(&snapshot, &cohorts, 2015..=2020, buckets);
        Fixture {
            snapshot,
            cohorts,
            age_index,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_buckets(&default_buckets())
    }

    fn query(year: i32, labels: &[&str]) -> StratificationQuery {
        StratificationQuery {
            year_of_inclusion: year,
            age_buckets: labels.iter().map(|label| label.parse().unwrap()).collect(),
            demographics: DemographicFilter::default(),
        }
    }

    fn id(raw: &str) -> SubjectId {
        SubjectId::new(raw).unwrap()
    }

    #[test]
    fn buckets_union_and_exclude_out_of_range_ages() {
        let buckets = [
            AgeBucket::new(18, 40).unwrap(),
            AgeBucket::new(41, 64).unwrap(),
        ];
        let fx = fixture_with_buckets(&buckets);
        let session = QuerySession::new(&fx.snapshot, &fx.cohorts, &fx.age_index);

        let set = session.stratify(&query(2020, &["18-40", "41-64"])).unwrap();
        let members: Vec<&str> = set.members().iter().map(SubjectId::as_str).collect();
        assert_eq!(members, vec!["s20", "s30", "s45"]);
        assert!(!set.contains(&id("s70")));
        set.release();
    }

    #[test]
    fn bucket_order_does_not_change_membership() {
        let fx = fixture();
        let session = QuerySession::new(&fx.snapshot, &fx.cohorts, &fx.age_index);

        let forward = session.stratify(&query(2020, &["15-25", "41-64"])).unwrap();
        let reverse = session.stratify(&query(2020, &["41-64", "15-25"])).unwrap();
        assert_eq!(forward.members(), reverse.members());
    }

    #[test]
    fn demographic_filters_conjoin() {
        let fx = fixture();
        let session = QuerySession::new(&fx.snapshot, &fx.cohorts, &fx.age_index);

        let mut q = query(2020, &["all"]);
        q.demographics.gender = FieldFilter::Equals(Gender::Female);
        q.demographics.job_condition = FieldFilter::Equals(JobCondition::Employed);
        let set = session.stratify(&q).unwrap();
        let members: Vec<&str> = set.members().iter().map(SubjectId::as_str).collect();
        assert_eq!(members, vec!["s20"]);
    }

    #[test]
    fn unknown_only_and_any_except_unknown_partition_the_field() {
        let fx = fixture();
        let session = QuerySession::new(&fx.snapshot, &fx.cohorts, &fx.age_index);

        let mut unknown_only = query(2020, &["all"]);
        unknown_only.demographics.job_condition = FieldFilter::UnknownOnly;
        let unknowns = session.stratify(&unknown_only).unwrap();

        let mut except_unknown = query(2020, &["all"]);
        except_unknown.demographics.job_condition = FieldFilter::AnyExceptUnknown;
        let known = session.stratify(&except_unknown).unwrap();

        assert_eq!(unknowns.len() + known.len(), 4);
        assert!(unknowns.contains(&id("s30")));
        assert!(!known.contains(&id("s30")));
    }

    #[test]
    fn empty_bucket_list_yields_a_valid_empty_set() {
        let fx = fixture();
        let session = QuerySession::new(&fx.snapshot, &fx.cohorts, &fx.age_index);

        let set = session.stratify(&query(2020, &[])).unwrap();
        assert!(set.is_empty());
        assert_eq!(session.active_set_count(), 1);
        set.release();
        assert_eq!(session.active_set_count(), 0);
    }

    #[test]
    fn names_never_collide_within_a_session() {
        let fx = fixture();
        let session = QuerySession::new(&fx.snapshot, &fx.cohorts, &fx.age_index);

        let mut names = BTreeSet::new();
        let sets: Vec<StratifiedSet<'_>> = (0..32)
            .map(|_| session.stratify(&query(2020, &["all"])).unwrap())
            .collect();
        for set in &sets {
            assert!(names.insert(set.name().to_string()), "{}", set.name());
        }
        assert_eq!(session.active_set_count(), 32);
    }

    #[test]
    fn every_exit_path_releases_the_set() {
        let fx = fixture();
        let session = QuerySession::new(&fx.snapshot, &fx.cohorts, &fx.age_index);

        // Implicit drop.
        {
            let _set = session.stratify(&query(2020, &["all"])).unwrap();
            assert_eq!(session.active_set_count(), 1);
        }
        assert_eq!(session.active_set_count(), 0);

        // Early return out of a fallible helper.
        fn shortcut(session: &QuerySession<'_>, q: &StratificationQuery) -> Result<usize> {
            let set = session.stratify(q)?;
            if set.is_empty() {
                return Ok(0);
            }
            let count = set.len();
            set.release();
            Ok(count)
        }
        let empty = StratificationQuery {
            year_of_inclusion: 2020,
            age_buckets: Vec::new(),
            demographics: DemographicFilter::default(),
        };
        assert_eq!(shortcut(&session, &empty).unwrap(), 0);
        assert_eq!(shortcut(&session, &query(2020, &["all"])).unwrap(), 4);
        assert_eq!(session.active_set_count(), 0);
    }

    #[test]
    fn failed_validation_registers_nothing() {
        let fx = fixture();
        let session = QuerySession::new(&fx.snapshot, &fx.cohorts, &fx.age_index);

        let err = session.stratify(&query(1999, &["all"])).unwrap_err();
        match err {
            RegistryError::InvalidParameter { field, allowed, .. } => {
                assert_eq!(field, "year_of_inclusion");
                assert_eq!(allowed.first().map(String::as_str), Some("2015"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = session.stratify(&query(2020, &["17-33"])).unwrap_err();
        match err {
            RegistryError::InvalidParameter { field, value, .. } => {
                assert_eq!(field, "age_bucket");
                assert_eq!(value, "17-33");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(session.active_set_count(), 0);
    }
}
