//! Subject demographics: categorical attributes and the subject record.
//!
//! Each categorical field carries an explicit unknown sentinel. Preprocessing
//! maps malformed source values onto that sentinel instead of failing, so by
//! the time a record reaches the query layer every field holds a value from
//! its fixed domain.

use chrono::{Datelike, NaiveDate};
use std::fmt;
use std::str::FromStr;

use crate::error::RegistryError;
use crate::filter::Categorical;
use crate::ids::SubjectId;

/// Subject gender as recorded in the demographics extract.
///
/// `U` is the unknown sentinel; source rows with anything other than `M` or
/// `F` are normalized to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Gender {
    Male,
    Female,
    Unknown,
}

impl Gender {
    pub fn as_code(&self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
            Gender::Unknown => "U",
        }
    }

    /// Lenient parse used during preprocessing: out-of-domain values become
    /// the unknown sentinel rather than an error.
    pub fn from_code_or_unknown(code: &str) -> Self {
        code.parse().unwrap_or(Gender::Unknown)
    }
}

impl Categorical for Gender {
    const FIELD: &'static str = "gender";
    const ANY_TOKEN: &'static str = "A";
    const ANY_EXCEPT_UNKNOWN_TOKEN: &'static str = "A-U";

    fn unknown() -> Self {
        Gender::Unknown
    }

    fn all() -> &'static [Self] {
        &[Gender::Male, Gender::Female, Gender::Unknown]
    }

    fn as_code(&self) -> &'static str {
        Gender::as_code(self)
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

impl FromStr for Gender {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "M" => Ok(Gender::Male),
            "F" => Ok(Gender::Female),
            "U" => Ok(Gender::Unknown),
            other => Err(RegistryError::parameter("gender", other, ["M", "F", "U"])),
        }
    }
}

/// Civil status; `Other` doubles as the unknown sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CivilStatus {
    Unmarried,
    Married,
    MarriedNoLonger,
    Other,
}

impl CivilStatus {
    pub fn as_code(&self) -> &'static str {
        match self {
            CivilStatus::Unmarried => "Unmarried",
            CivilStatus::Married => "Married",
            CivilStatus::MarriedNoLonger => "Married_no_long",
            CivilStatus::Other => "Other",
        }
    }

    pub fn from_code_or_unknown(code: &str) -> Self {
        code.parse().unwrap_or(CivilStatus::Other)
    }
}

impl Categorical for CivilStatus {
    const FIELD: &'static str = "civil_status";
    const ANY_TOKEN: &'static str = "All";
    const ANY_EXCEPT_UNKNOWN_TOKEN: &'static str = "All-Other";

    fn unknown() -> Self {
        CivilStatus::Other
    }

    fn all() -> &'static [Self] {
        &[
            CivilStatus::Unmarried,
            CivilStatus::Married,
            CivilStatus::MarriedNoLonger,
            CivilStatus::Other,
        ]
    }

    fn as_code(&self) -> &'static str {
        CivilStatus::as_code(self)
    }
}

impl fmt::Display for CivilStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

impl FromStr for CivilStatus {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Unmarried" => Ok(CivilStatus::Unmarried),
            "Married" => Ok(CivilStatus::Married),
            "Married_no_long" => Ok(CivilStatus::MarriedNoLonger),
            "Other" => Ok(CivilStatus::Other),
            other => Err(RegistryError::parameter(
                "civil_status",
                other,
                ["Unmarried", "Married", "Married_no_long", "Other"],
            )),
        }
    }
}

/// Employment situation at extract time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum JobCondition {
    Employed,
    Unemployed,
    Pension,
    Unknown,
}

impl JobCondition {
    pub fn as_code(&self) -> &'static str {
        match self {
            JobCondition::Employed => "Employed",
            JobCondition::Unemployed => "Unemployed",
            JobCondition::Pension => "Pension",
            JobCondition::Unknown => "Unknown",
        }
    }

    pub fn from_code_or_unknown(code: &str) -> Self {
        code.parse().unwrap_or(JobCondition::Unknown)
    }
}

impl Categorical for JobCondition {
    const FIELD: &'static str = "job_condition";
    const ANY_TOKEN: &'static str = "All";
    const ANY_EXCEPT_UNKNOWN_TOKEN: &'static str = "All-Unknown";

    fn unknown() -> Self {
        JobCondition::Unknown
    }

    fn all() -> &'static [Self] {
        &[
            JobCondition::Employed,
            JobCondition::Unemployed,
            JobCondition::Pension,
            JobCondition::Unknown,
        ]
    }

    fn as_code(&self) -> &'static str {
        JobCondition::as_code(self)
    }
}

impl fmt::Display for JobCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

impl FromStr for JobCondition {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Employed" => Ok(JobCondition::Employed),
            "Unemployed" => Ok(JobCondition::Unemployed),
            "Pension" => Ok(JobCondition::Pension),
            "Unknown" => Ok(JobCondition::Unknown),
            other => Err(RegistryError::parameter(
                "job_condition",
                other,
                ["Employed", "Unemployed", "Pension", "Unknown"],
            )),
        }
    }
}

/// Highest attained education level, ISCED 2011 scale.
///
/// The ordinal codes `0`..`8` are the ISCED levels; `9` is the unknown
/// sentinel. Variant order matches the scale so the derived `Ord` is the
/// ordinal order with unknown last.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum EducationLevel {
    EarlyChildhood,
    Primary,
    LowerSecondary,
    UpperSecondary,
    PostSecondary,
    ShortCycleTertiary,
    Bachelor,
    Master,
    Doctoral,
    Unknown,
}

impl EducationLevel {
    pub fn as_code(&self) -> &'static str {
        match self {
            EducationLevel::EarlyChildhood => "0",
            EducationLevel::Primary => "1",
            EducationLevel::LowerSecondary => "2",
            EducationLevel::UpperSecondary => "3",
            EducationLevel::PostSecondary => "4",
            EducationLevel::ShortCycleTertiary => "5",
            EducationLevel::Bachelor => "6",
            EducationLevel::Master => "7",
            EducationLevel::Doctoral => "8",
            EducationLevel::Unknown => "9",
        }
    }

    pub fn from_code_or_unknown(code: &str) -> Self {
        code.parse().unwrap_or(EducationLevel::Unknown)
    }
}

impl Categorical for EducationLevel {
    const FIELD: &'static str = "education_level";
    const ANY_TOKEN: &'static str = "All";
    const ANY_EXCEPT_UNKNOWN_TOKEN: &'static str = "All-Unknown";

    fn unknown() -> Self {
        EducationLevel::Unknown
    }

    fn all() -> &'static [Self] {
        &[
            EducationLevel::EarlyChildhood,
            EducationLevel::Primary,
            EducationLevel::LowerSecondary,
            EducationLevel::UpperSecondary,
            EducationLevel::PostSecondary,
            EducationLevel::ShortCycleTertiary,
            EducationLevel::Bachelor,
            EducationLevel::Master,
            EducationLevel::Doctoral,
            EducationLevel::Unknown,
        ]
    }

    fn as_code(&self) -> &'static str {
        EducationLevel::as_code(self)
    }
}

impl fmt::Display for EducationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

impl FromStr for EducationLevel {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Source extracts carry the level as a plain digit, sometimes with a
        // decimal tail ("3.0") after spreadsheet round-trips.
        let trimmed = s.trim();
        let digits = trimmed.strip_suffix(".0").unwrap_or(trimmed);
        match digits {
            "0" => Ok(EducationLevel::EarlyChildhood),
            "1" => Ok(EducationLevel::Primary),
            "2" => Ok(EducationLevel::LowerSecondary),
            "3" => Ok(EducationLevel::UpperSecondary),
            "4" => Ok(EducationLevel::PostSecondary),
            "5" => Ok(EducationLevel::ShortCycleTertiary),
            "6" => Ok(EducationLevel::Bachelor),
            "7" => Ok(EducationLevel::Master),
            "8" => Ok(EducationLevel::Doctoral),
            "9" => Ok(EducationLevel::Unknown),
            other => Err(RegistryError::parameter(
                "education_level",
                other,
                ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"],
            )),
        }
    }
}

/// One normalized subject row from the demographics relation.
///
/// Immutable once the snapshot is built. `birth_date` is always present
/// because rows with an unparseable birth date are dropped during
/// preprocessing; `death_date` is optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectRecord {
    pub id: SubjectId,
    pub birth_date: NaiveDate,
    pub death_date: Option<NaiveDate>,
    pub gender: Gender,
    pub civil_status: CivilStatus,
    pub job_condition: JobCondition,
    pub education_level: EducationLevel,
}

impl SubjectRecord {
    /// Age in the given year, computed as `year - birth_year`.
    ///
    /// Month and day of birth are ignored on purpose; ages are calendar-year
    /// ages throughout the registry.
    pub fn age_at(&self, year: i32) -> i32 {
        year - self.birth_date.year()
    }

    /// Alive in the given year: no death recorded, or the death year is
    /// strictly after it.
    pub fn alive_at(&self, year: i32) -> bool {
        match self.death_date {
            None => true,
            Some(death) => death.year() > year,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(birth: &str, death: Option<&str>) -> SubjectRecord {
        SubjectRecord {
            id: SubjectId::new("S1").unwrap(),
            birth_date: birth.parse().unwrap(),
            death_date: death.map(|d| d.parse().unwrap()),
            gender: Gender::Female,
            civil_status: CivilStatus::Married,
            job_condition: JobCondition::Employed,
            education_level: EducationLevel::UpperSecondary,
        }
    }

    #[test]
    fn age_ignores_month_and_day() {
        let late_birthday = subject("1980-12-31", None);
        assert_eq!(late_birthday.age_at(2020), 40);
        let early_birthday = subject("1980-01-01", None);
        assert_eq!(early_birthday.age_at(2020), 40);
    }

    #[test]
    fn alive_requires_death_year_strictly_greater() {
        let deceased = subject("1950-06-15", Some("2018-03-01"));
        assert!(deceased.alive_at(2017));
        assert!(!deceased.alive_at(2018));
        assert!(!deceased.alive_at(2019));
        assert!(subject("1950-06-15", None).alive_at(2100));
    }

    #[test]
    fn lenient_parses_fall_back_to_sentinels() {
        assert_eq!(Gender::from_code_or_unknown("banana"), Gender::Unknown);
        assert_eq!(
            CivilStatus::from_code_or_unknown(""),
            CivilStatus::Other
        );
        assert_eq!(
            JobCondition::from_code_or_unknown("NA"),
            JobCondition::Unknown
        );
        assert_eq!(
            EducationLevel::from_code_or_unknown("99"),
            EducationLevel::Unknown
        );
    }

    #[test]
    fn education_level_accepts_decimal_tail() {
        assert_eq!(
            "3.0".parse::<EducationLevel>().unwrap(),
            EducationLevel::UpperSecondary
        );
    }

    #[test]
    fn education_level_orders_by_scale() {
        assert!(EducationLevel::Primary < EducationLevel::Master);
        assert!(EducationLevel::Doctoral < EducationLevel::Unknown);
    }
}
