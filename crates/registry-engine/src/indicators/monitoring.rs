//! Monitoring indicators: treated prevalence, treated incidence, and the
//! intervention mix.
//!
//! All three bind their own temporal rule instead of consulting the
//! request's cohort rule: prevalence and the intervention mix look at every
//! onset up to the year of inclusion, incidence at onsets landing exactly in
//! it.

use std::collections::BTreeMap;

use registry_model::{
    ANY_TYPE_SLOT, CohortRule, Disorder, INTERVENTION_TYPE_SLOTS, IndicatorValue, Result,
};

use crate::indicators::{IndicatorComputer, IndicatorRequest, admitted_members};
use crate::session::{QuerySession, StratifiedSet};

/// `ma1`: stratified subjects in care for any tracked disorder by the year
/// of inclusion, next to those in care for the selected one.
pub struct TreatedPrevalence;

impl IndicatorComputer for TreatedPrevalence {
    fn id(&self) -> &'static str {
        "ma1"
    }

    fn description(&self) -> &'static str {
        "Treated prevalence: subjects in care by the year of inclusion"
    }

    fn compute(
        &self,
        session: &QuerySession<'_>,
        set: &StratifiedSet<'_>,
        request: &IndicatorRequest,
    ) -> Result<IndicatorValue> {
        let year = request.year_of_inclusion;
        Ok(count_split(session, set, request.disorder, |onset| {
            onset <= year
        }))
    }
}

/// `ma2`: stratified subjects whose care for the disorder starts exactly in
/// the year of inclusion.
pub struct TreatedIncidence;

impl IndicatorComputer for TreatedIncidence {
    fn id(&self) -> &'static str {
        "ma2"
    }

    fn description(&self) -> &'static str {
        "Treated incidence: subjects entering care in the year of inclusion"
    }

    fn compute(
        &self,
        session: &QuerySession<'_>,
        set: &StratifiedSet<'_>,
        request: &IndicatorRequest,
    ) -> Result<IndicatorValue> {
        let year = request.year_of_inclusion;
        Ok(count_split(session, set, request.disorder, |onset| {
            onset == year
        }))
    }
}

/// Distinct-subject counts over the stratified set: subjects with an
/// admitted onset for any tracked disorder, and for the selected one.
fn count_split(
    session: &QuerySession<'_>,
    set: &StratifiedSet<'_>,
    disorder: Disorder,
    admits: impl Fn(i32) -> bool,
) -> IndicatorValue {
    let mut all = 0u64;
    let mut selected = 0u64;
    for subject in set.members() {
        let onset = |candidate: Disorder| session.cohorts().onset_year(candidate, subject);
        if Disorder::ALL
            .into_iter()
            .any(|candidate| onset(candidate).is_some_and(&admits))
        {
            all += 1;
        }
        if onset(disorder).is_some_and(&admits) {
            selected += 1;
        }
    }
    IndicatorValue::CountSplit { all, selected }
}

/// `mb2`: intervention events in the year of inclusion for the disorder's
/// prevalent cohort, split by type slot.
///
/// The counts map always carries slots 1 through 7, 9, and the `any_type`
/// total, zeros included, so consumers see a stable shape.
pub struct InterventionMix;

impl IndicatorComputer for InterventionMix {
    fn id(&self) -> &'static str {
        "mb2"
    }

    fn description(&self) -> &'static str {
        "Intervention mix: events in the year of inclusion by type slot"
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
            CohortRule::Prevalent,
            year,
        );

        let mut counts: BTreeMap<String, u64> = INTERVENTION_TYPE_SLOTS
            .iter()
            .map(|slot| (slot.to_string(), 0))
            .collect();
        counts.insert(ANY_TYPE_SLOT.to_string(), 0);

        for record in &session.snapshot().interventions {
            if record.year() != year || !denominator.contains(&record.subject) {
                continue;
            }
            if let Some(count) = counts.get_mut(&record.type_slot().to_string()) {
                *count += 1;
            }
            if let Some(total) = counts.get_mut(ANY_TYPE_SLOT) {
                *total += 1;
            }
        }
        Ok(IndicatorValue::TypeCounts { counts })
    }
}
