//! Indicator computers and their registry.
//!
//! Each indicator is a unit struct implementing [`IndicatorComputer`],
//! registered in the [`IndicatorRegistry`] under its lowercase id. Computers
//! are pure: they read the session's batch outputs and a stratified set and
//! produce one [`IndicatorValue`] per call, leaving persistence and year
//! iteration to the series layer.
//!
//! # Registered indicators
//!
//! - `ma1` treated prevalence
//! - `ma2` treated incidence
//! - `mb2` intervention mix by type
//! - `ea1` access to interventions
//! - `ea4` access to antipsychotic treatment

mod evaluation;
mod monitoring;

pub use evaluation::{InterventionAccess, PsychotropicAccess};
pub use monitoring::{InterventionMix, TreatedIncidence, TreatedPrevalence};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use registry_model::{
    CohortRule, Disorder, IndicatorValue, RegistryError, Result, SubjectId,
};

use crate::session::{QuerySession, StratifiedSet};

/// One indicator call: which disorder, which cohort rule, which year.
///
/// Every request carries a cohort rule; computers that fix their own
/// membership rule (the monitoring family) ignore it, and
/// [`IndicatorComputer::uses_cohort_rule`] tells the cache layer whether the
/// rule belongs in the call's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorRequest {
    pub disorder: Disorder,
    pub cohort_rule: CohortRule,
    pub year_of_inclusion: i32,
}

impl IndicatorRequest {
    pub fn new(disorder: Disorder, cohort_rule: CohortRule, year_of_inclusion: i32) -> Self {
        Self {
            disorder,
            cohort_rule,
            year_of_inclusion,
        }
    }
}

/// Computation logic for one indicator.
///
/// Implementors are unit structs registered in
/// [`IndicatorRegistry::default_set`]; they never create or release
/// stratified sets themselves, the caller owns the set's lifetime.
pub trait IndicatorComputer: Send + Sync {
    /// Lowercase indicator id, unique within the registry.
    fn id(&self) -> &'static str;

    /// One-line human-readable description.
    fn description(&self) -> &'static str;

    /// Whether the cohort rule participates in this indicator's result.
    ///
    /// The monitoring indicators bind their own temporal rule and return
    /// false; their cached results are shared across cohort selections.
    fn uses_cohort_rule(&self) -> bool {
        false
    }

    /// The disorder this indicator actually reports on.
    ///
    /// Most indicators follow the request; `ea4` pins schizophrenia, so its
    /// cache identity and year axis never depend on the selection.
    fn effective_disorder(&self, requested: Disorder) -> Disorder {
        requested
    }

    /// Compute the value for one stratified set and one request.
    fn compute(
        &self,
        session: &QuerySession<'_>,
        set: &StratifiedSet<'_>,
        request: &IndicatorRequest,
    ) -> Result<IndicatorValue>;
}

impl std::fmt::Debug for dyn IndicatorComputer + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IndicatorComputer({})", self.id())
    }
}

/// Registry of indicator computers indexed by id.
///
/// Lookup is case-folding but otherwise strict: an unknown id is a parameter
/// error naming the registered ids, never a silent fallback.
pub struct IndicatorRegistry {
    computers: BTreeMap<&'static str, Box<dyn IndicatorComputer>>,
}

impl IndicatorRegistry {
    pub fn new() -> Self {
        Self {
            computers: BTreeMap::new(),
        }
    }

    /// Registers a computer under its id, replacing any previous entry.
    pub fn register(&mut self, computer: Box<dyn IndicatorComputer>) {
        self.computers.insert(computer.id(), computer);
    }

    /// Looks up a computer by id.
    pub fn get(&self, id: &str) -> Result<&dyn IndicatorComputer> {
        let folded = id.trim().to_ascii_lowercase();
        self.computers
            .get(folded.as_str())
            .map(|computer| computer.as_ref())
            .ok_or_else(|| RegistryError::parameter("indicator", id, self.ids()))
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.computers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.computers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.computers.is_empty()
    }

    /// Builds a registry with the full indicator set.
    pub fn default_set() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(TreatedPrevalence));
        registry.register(Box::new(TreatedIncidence));
        registry.register(Box::new(InterventionMix));
        registry.register(Box::new(InterventionAccess));
        registry.register(Box::new(PsychotropicAccess));
        registry
    }
}

impl Default for IndicatorRegistry {
    fn default() -> Self {
        Self::default_set()
    }
}

/// Cached registry with the full indicator set.
static DEFAULT_REGISTRY: OnceLock<IndicatorRegistry> = OnceLock::new();

/// Returns the shared registry with all indicators registered.
pub fn default_registry() -> &'static IndicatorRegistry {
    DEFAULT_REGISTRY.get_or_init(IndicatorRegistry::default_set)
}

/// Subjects of the stratified set admitted to the disorder cohort under one
/// membership rule for one year of inclusion.
pub(crate) fn admitted_members(
    session: &QuerySession<'_>,
    set: &StratifiedSet<'_>,
    disorder: Disorder,
    rule: CohortRule,
    year: i32,
) -> BTreeSet<SubjectId> {
    let Some(cohort) = session.cohorts().members(disorder) else {
        return BTreeSet::new();
    };
    cohort
        .iter()
        .filter(|(subject, onset)| {
            set.contains(subject)
                && rule.admits(
                    **onset,
                    year,
                    session.age_index().in_young_adult_slot(year, subject),
                )
        })
        .map(|(subject, _)| subject.clone())
        .collect()
}
