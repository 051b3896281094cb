//! Typed demographic filter expressions.
//!
//! Every demographic field on a stratification request resolves to one
//! [`FieldFilter`] variant; a [`DemographicFilter`] conjoins the four fields.
//! Filters are parsed from the selector tokens the dashboard exposes (for
//! gender: `A`, `A-U`, `M`, `F`, `U`) and render back to the same tokens when
//! a cache signature is built, so a signature round-trips the exact widget
//! vocabulary.

use crate::demographics::{CivilStatus, EducationLevel, Gender, JobCondition, SubjectRecord};
use crate::error::{RegistryError, Result};

/// A demographic category with a fixed value domain and an unknown sentinel.
pub trait Categorical: Copy + Eq + Sized + 'static {
    /// Field name used in parameter errors, e.g. `"gender"`.
    const FIELD: &'static str;
    /// Selector token matching every value, e.g. `"A"` or `"All"`.
    const ANY_TOKEN: &'static str;
    /// Selector token matching every value except the unknown sentinel.
    const ANY_EXCEPT_UNKNOWN_TOKEN: &'static str;

    fn unknown() -> Self;
    fn all() -> &'static [Self];
    fn as_code(&self) -> &'static str;

    fn is_unknown(&self) -> bool {
        *self == Self::unknown()
    }
}

/// Predicate over one demographic field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFilter<T: Categorical> {
    /// Matches every value.
    Any,
    /// Matches every value except the unknown sentinel.
    AnyExceptUnknown,
    /// Matches one specific category.
    Equals(T),
    /// Matches only the unknown sentinel.
    UnknownOnly,
}

impl<T: Categorical> FieldFilter<T> {
    pub fn matches(&self, value: T) -> bool {
        match self {
            FieldFilter::Any => true,
            FieldFilter::AnyExceptUnknown => !value.is_unknown(),
            FieldFilter::Equals(expected) => value == *expected,
            FieldFilter::UnknownOnly => value.is_unknown(),
        }
    }

    /// Parse a selector token into a filter.
    ///
    /// The unknown sentinel's own code parses to [`FieldFilter::UnknownOnly`],
    /// so selecting "Other" on civil status behaves as unknown-only.
    pub fn parse_token(token: &str) -> Result<Self> {
        let token = token.trim();
        if token == T::ANY_TOKEN {
            return Ok(FieldFilter::Any);
        }
        if token == T::ANY_EXCEPT_UNKNOWN_TOKEN {
            return Ok(FieldFilter::AnyExceptUnknown);
        }
        for value in T::all() {
            if value.as_code() == token {
                return if value.is_unknown() {
                    Ok(FieldFilter::UnknownOnly)
                } else {
                    Ok(FieldFilter::Equals(*value))
                };
            }
        }
        Err(RegistryError::parameter(
            T::FIELD,
            token,
            Self::allowed_tokens(),
        ))
    }

    /// The selector token this filter renders to in a cache signature.
    pub fn token(&self) -> &'static str {
        match self {
            FieldFilter::Any => T::ANY_TOKEN,
            FieldFilter::AnyExceptUnknown => T::ANY_EXCEPT_UNKNOWN_TOKEN,
            FieldFilter::Equals(value) => value.as_code(),
            FieldFilter::UnknownOnly => T::unknown().as_code(),
        }
    }

    pub fn allowed_tokens() -> Vec<String> {
        let mut tokens = vec![
            T::ANY_TOKEN.to_string(),
            T::ANY_EXCEPT_UNKNOWN_TOKEN.to_string(),
        ];
        tokens.extend(T::all().iter().map(|value| value.as_code().to_string()));
        tokens
    }
}

impl<T: Categorical> Default for FieldFilter<T> {
    fn default() -> Self {
        FieldFilter::Any
    }
}

/// Conjunction of the four demographic field predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DemographicFilter {
    pub gender: FieldFilter<Gender>,
    pub civil_status: FieldFilter<CivilStatus>,
    pub job_condition: FieldFilter<JobCondition>,
    pub education_level: FieldFilter<EducationLevel>,
}

impl DemographicFilter {
    /// Filter matching every subject.
    pub fn any() -> Self {
        Self::default()
    }

    /// Parse the four selector tokens, rejecting the first out-of-domain one.
    pub fn parse(
        gender: &str,
        civil_status: &str,
        job_condition: &str,
        education_level: &str,
    ) -> Result<Self> {
        Ok(Self {
            gender: FieldFilter::parse_token(gender)?,
            civil_status: FieldFilter::parse_token(civil_status)?,
            job_condition: FieldFilter::parse_token(job_condition)?,
            education_level: FieldFilter::parse_token(education_level)?,
        })
    }

    pub fn matches(&self, subject: &SubjectRecord) -> bool {
        self.gender.matches(subject.gender)
            && self.civil_status.matches(subject.civil_status)
            && self.job_condition.matches(subject.job_condition)
            && self.education_level.matches(subject.education_level)
    }

    /// Tokens in signature order: gender, civil status, job, education.
    pub fn signature_tokens(&self) -> [&'static str; 4] {
        [
            self.gender.token(),
            self.civil_status.token(),
            self.job_condition.token(),
            self.education_level.token(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gender_tokens_parse_to_expected_variants() {
        assert_eq!(
            FieldFilter::<Gender>::parse_token("A").unwrap(),
            FieldFilter::Any
        );
        assert_eq!(
            FieldFilter::<Gender>::parse_token("A-U").unwrap(),
            FieldFilter::AnyExceptUnknown
        );
        assert_eq!(
            FieldFilter::<Gender>::parse_token("F").unwrap(),
            FieldFilter::Equals(Gender::Female)
        );
        assert_eq!(
            FieldFilter::<Gender>::parse_token("U").unwrap(),
            FieldFilter::UnknownOnly
        );
    }

    #[test]
    fn out_of_domain_token_names_value_and_allowed_set() {
        let err = FieldFilter::<Gender>::parse_token("X").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("gender"));
        assert!(message.contains("\"X\""));
        assert!(message.contains("A-U"));
    }

    #[test]
    fn unknown_sentinel_code_parses_to_unknown_only() {
        let filter = FieldFilter::<CivilStatus>::parse_token("Other").unwrap();
        assert_eq!(filter, FieldFilter::UnknownOnly);
        assert!(filter.matches(CivilStatus::Other));
        assert!(!filter.matches(CivilStatus::Married));
    }

    #[test]
    fn any_except_unknown_excludes_sentinel_only() {
        let filter = FieldFilter::<JobCondition>::AnyExceptUnknown;
        assert!(filter.matches(JobCondition::Employed));
        assert!(filter.matches(JobCondition::Pension));
        assert!(!filter.matches(JobCondition::Unknown));
    }

    #[test]
    fn filter_tokens_round_trip() {
        for token in FieldFilter::<EducationLevel>::allowed_tokens() {
            let filter = FieldFilter::<EducationLevel>::parse_token(&token).unwrap();
            let parsed_again = FieldFilter::<EducationLevel>::parse_token(filter.token()).unwrap();
            assert_eq!(filter, parsed_again);
        }
    }
}
