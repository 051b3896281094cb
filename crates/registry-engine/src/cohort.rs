//! Cohort derivation.
//!
//! A subject enters a disorder's cohort with the year of their first
//! qualifying dispensation. One subject can sit in several cohorts at once
//! when their dispensations span drug families, with an independent onset
//! year in each.

use std::collections::{BTreeMap, BTreeSet};

use tracing::info;

use registry_model::{Disorder, SubjectId};

use crate::snapshot::Snapshot;

/// One persisted cohort row: the subject, the disorder, and the year of the
/// earliest qualifying event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortRow {
    pub subject: SubjectId,
    pub disorder: Disorder,
    pub year_of_onset: i32,
}

/// Onset years keyed by disorder and subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CohortIndex {
    by_disorder: BTreeMap<Disorder, BTreeMap<SubjectId, i32>>,
}

impl CohortIndex {
    /// Derive cohorts from a snapshot's dispensations.
    pub fn build(snapshot: &Snapshot) -> Self {
        let mut by_disorder: BTreeMap<Disorder, BTreeMap<SubjectId, i32>> = BTreeMap::new();
        for record in &snapshot.dispensations {
            let year = record.year();
            for disorder in Disorder::ALL {
                if !disorder.qualifies(&record.atc) {
                    continue;
                }
                let entry = by_disorder
                    .entry(disorder)
                    .or_default()
                    .entry(record.subject.clone())
                    .or_insert(year);
                if year < *entry {
                    *entry = year;
                }
            }
        }
        let index = Self { by_disorder };
        info!(rows = index.len(), subjects = index.subjects().len(), "cohorts derived");
        index
    }

    /// Rebuild the index from persisted rows.
    pub fn from_rows(rows: impl IntoIterator<Item = CohortRow>) -> Self {
        let mut by_disorder: BTreeMap<Disorder, BTreeMap<SubjectId, i32>> = BTreeMap::new();
        for row in rows {
            let entry = by_disorder
                .entry(row.disorder)
                .or_default()
                .entry(row.subject)
                .or_insert(row.year_of_onset);
            if row.year_of_onset < *entry {
                *entry = row.year_of_onset;
            }
        }
        Self { by_disorder }
    }

    pub fn onset_year(&self, disorder: Disorder, subject: &SubjectId) -> Option<i32> {
        self.by_disorder.get(&disorder)?.get(subject).copied()
    }

    /// Members of one disorder's cohort with their onset years.
    pub fn members(&self, disorder: Disorder) -> Option<&BTreeMap<SubjectId, i32>> {
        self.by_disorder.get(&disorder)
    }

    /// Every subject present in at least one cohort.
    pub fn subjects(&self) -> BTreeSet<&SubjectId> {
        self.by_disorder
            .values()
            .flat_map(BTreeMap::keys)
            .collect()
    }

    /// Total cohort rows across all disorders.
    pub fn len(&self) -> usize {
        self.by_disorder.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_disorder.values().all(BTreeMap::is_empty)
    }

    /// Earliest onset year across every cohort. Anchors the year span the
    /// age index covers.
    pub fn min_onset_year(&self) -> Option<i32> {
        self.by_disorder
            .values()
            .flat_map(BTreeMap::values)
            .copied()
            .min()
    }

    /// Earliest onset year within one disorder's cohort. Anchors that
    /// disorder's series axis.
    pub fn min_onset_year_for(&self, disorder: Disorder) -> Option<i32> {
        self.by_disorder
            .get(&disorder)
            .and_then(|members| members.values().copied().min())
    }

    /// Persisted-row view in deterministic (disorder, subject) order.
    pub fn rows(&self) -> impl Iterator<Item = CohortRow> + '_ {
        self.by_disorder.iter().flat_map(|(disorder, members)| {
            members.iter().map(|(subject, year)| CohortRow {
                subject: subject.clone(),
                disorder: *disorder,
                year_of_onset: *year,
            })
        })
    }
}
