//! Disorder codes and cohort-membership rules.

use std::fmt;
use std::str::FromStr;

use crate::error::RegistryError;
use crate::ids::AtcCode;

/// Mental-health disorder tracked by the registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum Disorder {
    Schizophrenia,
    Depression,
    BipolarDisorder,
}

impl Disorder {
    pub const ALL: [Disorder; 3] = [
        Disorder::Schizophrenia,
        Disorder::Depression,
        Disorder::BipolarDisorder,
    ];

    /// ATC prefixes whose dispensations mark treatment for any tracked
    /// disorder. Slimming keeps exactly these families.
    pub const QUALIFYING_ATC_PREFIXES: [&'static str; 5] =
        ["N05A", "N06A", "N03AX09", "N03AG01", "N03AF01"];

    pub fn as_code(&self) -> &'static str {
        match self {
            Disorder::Schizophrenia => "SCHIZO",
            Disorder::Depression => "DEPRE",
            Disorder::BipolarDisorder => "BIPO",
        }
    }

    /// Whether a dispensation with this ATC code counts as treatment for the
    /// disorder. Lithium (N05AN) and the mood-stabilizing anticonvulsants
    /// identify bipolar disorder; the rest of the N05A family identifies
    /// schizophrenia.
    pub fn qualifies(&self, atc: &AtcCode) -> bool {
        match self {
            Disorder::Schizophrenia => atc.has_prefix("N05A") && !atc.has_prefix("N05AN"),
            Disorder::Depression => atc.has_prefix("N06A"),
            Disorder::BipolarDisorder => {
                atc.has_prefix("N05AN")
                    || atc.has_prefix("N03AX09")
                    || atc.has_prefix("N03AG01")
                    || atc.has_prefix("N03AF01")
            }
        }
    }
}

impl fmt::Display for Disorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

impl FromStr for Disorder {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "SCHIZO" => Ok(Disorder::Schizophrenia),
            "DEPRE" => Ok(Disorder::Depression),
            "BIPO" => Ok(Disorder::BipolarDisorder),
            other => Err(RegistryError::parameter(
                "disorder",
                other,
                ["SCHIZO", "DEPRE", "BIPO"],
            )),
        }
    }
}

/// Onset-based membership rule applied when an indicator narrows a cohort to
/// a year of inclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CohortRule {
    /// Onset in or before the year of inclusion.
    Prevalent,
    /// Onset exactly in the year of inclusion.
    Incident,
    /// Onset exactly in the year of inclusion, with the subject aged 18-25
    /// that year.
    IncidentYoungAdult,
}

impl CohortRule {
    pub const ALL: [CohortRule; 3] = [
        CohortRule::Prevalent,
        CohortRule::Incident,
        CohortRule::IncidentYoungAdult,
    ];

    pub fn as_code(&self) -> &'static str {
        match self {
            CohortRule::Prevalent => "PREVALENT",
            CohortRule::Incident => "INCIDENT",
            CohortRule::IncidentYoungAdult => "INCIDENT_18_25",
        }
    }

    /// Whether a subject with the given onset year belongs under this rule.
    ///
    /// `in_young_adult_slot` is the subject's membership in the per-year
    /// 18-25 age slot; only [`CohortRule::IncidentYoungAdult`] consults it.
    pub fn admits(&self, onset_year: i32, year_of_inclusion: i32, in_young_adult_slot: bool) -> bool {
        match self {
            CohortRule::Prevalent => onset_year <= year_of_inclusion,
            CohortRule::Incident => onset_year == year_of_inclusion,
            CohortRule::IncidentYoungAdult => {
                onset_year == year_of_inclusion && in_young_adult_slot
            }
        }
    }
}

impl fmt::Display for CohortRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

impl FromStr for CohortRule {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "PREVALENT" => Ok(CohortRule::Prevalent),
            "INCIDENT" => Ok(CohortRule::Incident),
            "INCIDENT_18_25" => Ok(CohortRule::IncidentYoungAdult),
            other => Err(RegistryError::parameter(
                "cohort",
                other,
                ["PREVALENT", "INCIDENT", "INCIDENT_18_25"],
            )),
        }
    }
}
