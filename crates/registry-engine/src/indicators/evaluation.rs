//! Evaluation indicators: access to care for the admitted cohort.
//!
//! Both indicators share one shape: a denominator of stratified subjects
//! admitted to the cohort under the requested rule, a numerator of those
//! with at least one qualifying event in the year of inclusion, and the
//! per-subject event-count distribution behind the numerator.

use std::collections::{BTreeMap, BTreeSet};

use registry_model::{Disorder, IndicatorValue, Result, SubjectId};

use crate::indicators::{IndicatorComputer, IndicatorRequest, admitted_members};
use crate::session::{QuerySession, StratifiedSet};

/// `ea1`: share of the admitted cohort with at least one community
/// intervention in the year of inclusion.
pub struct InterventionAccess;

impl IndicatorComputer for InterventionAccess {
    fn id(&self) -> &'static str {
        "ea1"
    }

    fn description(&self) -> &'static str {
        "Access to interventions: share of the cohort reached in the year of inclusion"
    }

    fn uses_cohort_rule(&self) -> bool {
        true
    }

    fn compute(
        &self,
        session: &QuerySession<'_>,
        set: &StratifiedSet<'_>,
        request: &IndicatorRequest,
    ) -> Result<IndicatorValue> {
        let year = request.year_of_inclusion;
        let denominator = admitted_members(
            session,
            set,
            request.disorder,
            request.cohort_rule,
            year,
        );
        let events = session
            .snapshot()
            .interventions
            .iter()
            .filter(|record| record.year() == year)
            .map(|record| &record.subject);
        Ok(access_value(denominator.len() as u64, events, &denominator))
    }
}

/// `ea4`: share of the schizophrenia cohort with at least one antipsychotic
/// dispensation in the year of inclusion.
///
/// The disorder is fixed; the request's disorder selection is ignored.
pub struct PsychotropicAccess;

impl IndicatorComputer for PsychotropicAccess {
    fn id(&self) -> &'static str {
        "ea4"
    }

    fn description(&self) -> &'static str {
        "Access to antipsychotic treatment in the schizophrenia cohort"
    }

    fn uses_cohort_rule(&self) -> bool {
        true
    }

    fn effective_disorder(&self, _requested: Disorder) -> Disorder {
        Disorder::Schizophrenia
    }

    fn compute(
        &self,
        session: &QuerySession<'_>,
        set: &StratifiedSet<'_>,
        request: &IndicatorRequest,
    ) -> Result<IndicatorValue> {
        let year = request.year_of_inclusion;
        let denominator = admitted_members(
            session,
            set,
            Disorder::Schizophrenia,
            request.cohort_rule,
            year,
        );
        let events = session
            .snapshot()
            .dispensations
            .iter()
            .filter(|record| {
                record.year() == year && Disorder::Schizophrenia.qualifies(&record.atc)
            })
            .map(|record| &record.subject);
        Ok(access_value(denominator.len() as u64, events, &denominator))
    }
}

/// Folds qualifying events into the access percentage and distribution.
///
/// Each event whose subject sits in the denominator adds to that subject's
/// tally; the numerator is the number of reached subjects and the
/// distribution lists their tallies largest first.
fn access_value<'e>(
    denominator: u64,
    events: impl Iterator<Item = &'e SubjectId>,
    admitted: &BTreeSet<SubjectId>,
) -> IndicatorValue {
    let mut per_subject: BTreeMap<&SubjectId, u64> = BTreeMap::new();
    for subject in events {
        if admitted.contains(subject) {
            *per_subject.entry(subject).or_insert(0) += 1;
        }
    }
    let numerator = per_subject.len() as u64;
    let mut distribution: Vec<u64> = per_subject.into_values().collect();
    distribution.sort_unstable_by(|a, b| b.cmp(a));
    IndicatorValue::percentage(numerator, denominator, distribution)
}
