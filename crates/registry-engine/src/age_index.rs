//! Per-year age stratification index.
//!
//! For every year of inclusion and every tracked age bucket, the index holds
//! the set of subjects who are alive that year, sit in at least one cohort,
//! and whose calendar-year age falls in the bucket. The 18-25 slot is always
//! indexed alongside the standard buckets because the incident-young-adult
//! cohort rule reads it.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

use tracing::info;

use registry_model::{AgeBucket, SubjectId, default_buckets};

use crate::cohort::CohortIndex;
use crate::snapshot::Snapshot;

/// One persisted index cell membership: a subject in a (year, bucket) cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgeIndexRow {
    pub year: i32,
    pub bucket: AgeBucket,
    pub subject: SubjectId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgeIndex {
    cells: BTreeMap<(i32, AgeBucket), BTreeSet<SubjectId>>,
    years: RangeInclusive<i32>,
    buckets: Vec<AgeBucket>,
}

/// The configured buckets plus the 18-25 slot, deduplicated and ordered.
fn with_young_adult_slot(buckets: &[AgeBucket]) -> Vec<AgeBucket> {
    let mut indexed: BTreeSet<AgeBucket> = buckets.iter().copied().collect();
    indexed.insert(AgeBucket::YOUNG_ADULT);
    indexed.into_iter().collect()
}

impl AgeIndex {
    /// Index every (year, bucket) cell across the given year span and bucket
    /// set. The 18-25 slot is appended to whatever set the caller configures;
    /// [`default_buckets`] is the usual choice.
    ///
    /// Cells are materialized even when empty, so lookups inside the span
    /// always succeed and an empty cell is distinguishable from an
    /// out-of-span year.
    pub fn build(
        snapshot: &Snapshot,
        cohorts: &CohortIndex,
        years: RangeInclusive<i32>,
        buckets: &[AgeBucket],
    ) -> Self {
        let buckets = with_young_adult_slot(buckets);
        let mut cells: BTreeMap<(i32, AgeBucket), BTreeSet<SubjectId>> = BTreeMap::new();
        for year in years.clone() {
            for bucket in &buckets {
                cells.insert((year, *bucket), BTreeSet::new());
            }
        }

        let in_cohort = cohorts.subjects();
        for (id, record) in &snapshot.subjects {
            if !in_cohort.contains(id) {
                continue;
            }
            for year in years.clone() {
                if !record.alive_at(year) {
                    continue;
                }
                let age = record.age_at(year);
                for bucket in &buckets {
                    if bucket.contains(age) {
                        if let Some(cell) = cells.get_mut(&(year, *bucket)) {
                            cell.insert(id.clone());
                        }
                    }
                }
            }
        }

        let index = Self {
            cells,
            years,
            buckets,
        };
        info!(
            years = ?index.years,
            cells = index.cells.len(),
            memberships = index.cells.values().map(BTreeSet::len).sum::<usize>(),
            "age index built"
        );
        index
    }

    /// Rebuild from persisted rows plus the span and bucket set recorded
    /// alongside them.
    pub fn from_rows(
        rows: impl IntoIterator<Item = AgeIndexRow>,
        years: RangeInclusive<i32>,
        buckets: &[AgeBucket],
    ) -> Self {
        let buckets = with_young_adult_slot(buckets);
        let mut cells: BTreeMap<(i32, AgeBucket), BTreeSet<SubjectId>> = BTreeMap::new();
        for year in years.clone() {
            for bucket in &buckets {
                cells.insert((year, *bucket), BTreeSet::new());
            }
        }
        for row in rows {
            if let Some(cell) = cells.get_mut(&(row.year, row.bucket)) {
                cell.insert(row.subject);
            }
        }
        Self {
            cells,
            years,
            buckets,
        }
    }

    pub fn years(&self) -> RangeInclusive<i32> {
        self.years.clone()
    }

    pub fn contains_year(&self, year: i32) -> bool {
        self.years.contains(&year)
    }

    pub fn buckets(&self) -> &[AgeBucket] {
        &self.buckets
    }

    pub fn is_indexed_bucket(&self, bucket: AgeBucket) -> bool {
        self.buckets.contains(&bucket)
    }

    /// Subjects in one (year, bucket) cell. `None` when the year is outside
    /// the span or the bucket is not indexed.
    pub fn members(&self, year: i32, bucket: AgeBucket) -> Option<&BTreeSet<SubjectId>> {
        self.cells.get(&(year, bucket))
    }

    /// Membership in the special 18-25 slot for a given year.
    pub fn in_young_adult_slot(&self, year: i32, subject: &SubjectId) -> bool {
        self.members(year, AgeBucket::YOUNG_ADULT)
            .is_some_and(|cell| cell.contains(subject))
    }

    /// Persisted-row view in deterministic (year, bucket, subject) order.
    pub fn rows(&self) -> impl Iterator<Item = AgeIndexRow> + '_ {
        self.cells.iter().flat_map(|((year, bucket), members)| {
            members.iter().map(|subject| AgeIndexRow {
                year: *year,
                bucket: *bucket,
                subject: subject.clone(),
            })
        })
    }
}
