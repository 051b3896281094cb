//! Age buckets for stratification.

use std::fmt;
use std::str::FromStr;

use crate::error::{RegistryError, Result};

/// Oldest age the registry tracks; the open-ended bucket forms close at it.
pub const MAX_TRACKED_AGE: i32 = 150;

/// Youngest age the registry tracks.
pub const MIN_TRACKED_AGE: i32 = 1;

/// An inclusive age interval.
///
/// The derived ordering sorts by `(min, max)`, which is the canonical order
/// cache signatures rely on (equivalent to `min + max/1000` for any age
/// below 1000).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct AgeBucket {
    min: i32,
    max: i32,
}

impl AgeBucket {
    /// The synthetic "any age" bucket covering the whole tracked range.
    pub const FULL_RANGE: AgeBucket = AgeBucket {
        min: MIN_TRACKED_AGE,
        max: MAX_TRACKED_AGE,
    };

    /// The 18-25 slot backing the onset-age cohort rule.
    pub const YOUNG_ADULT: AgeBucket = AgeBucket { min: 18, max: 25 };

    pub fn new(min: i32, max: i32) -> Result<Self> {
        if min < MIN_TRACKED_AGE || max > MAX_TRACKED_AGE || min > max {
            return Err(RegistryError::parameter(
                "age_bucket",
                format!("{min}-{max}"),
                [format!(
                    "intervals within {MIN_TRACKED_AGE}..={MAX_TRACKED_AGE} with min <= max"
                )],
            ));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> i32 {
        self.min
    }

    pub fn max(&self) -> i32 {
        self.max
    }

    pub fn contains(&self, age: i32) -> bool {
        age >= self.min && age <= self.max
    }

    /// Render for a cache signature: `(min-max)`.
    pub fn signature_fragment(&self) -> String {
        format!("({}-{})", self.min, self.max)
    }

    /// Parse a selector label.
    ///
    /// Accepted forms: `all`, `a-b`, `a+` (open above), `a-` (open below).
    pub fn parse_label(label: &str) -> Result<Self> {
        let trimmed = label.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(Self::FULL_RANGE);
        }
        if let Some(min) = trimmed.strip_suffix('+') {
            let min = parse_age(min, label)?;
            return Self::new(min, MAX_TRACKED_AGE);
        }
        if let Some((left, right)) = trimmed.split_once('-') {
            if right.is_empty() {
                let max = parse_age(left, label)?;
                return Self::new(MIN_TRACKED_AGE, max);
            }
            let min = parse_age(left, label)?;
            let max = parse_age(right, label)?;
            return Self::new(min, max);
        }
        Err(bad_label(label))
    }
}

impl fmt::Display for AgeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::FULL_RANGE {
            return f.write_str("all");
        }
        if self.max == MAX_TRACKED_AGE {
            return write!(f, "{}+", self.min);
        }
        if self.min == MIN_TRACKED_AGE {
            return write!(f, "{}-", self.max);
        }
        write!(f, "{}-{}", self.min, self.max)
    }
}

impl FromStr for AgeBucket {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_label(s)
    }
}

fn parse_age(text: &str, label: &str) -> Result<i32> {
    text.trim()
        .parse::<i32>()
        .map_err(|_| bad_label(label))
}

fn bad_label(label: &str) -> RegistryError {
    RegistryError::parameter(
        "age_bucket",
        label,
        ["all", "<min>-<max>", "<min>+", "<max>-"],
    )
}

/// The bucket set the dashboard stratifies by, plus [`AgeBucket::FULL_RANGE`]
/// which is always indexed.
pub fn default_buckets() -> Vec<AgeBucket> {
    vec![
        AgeBucket::FULL_RANGE,
        AgeBucket {
            min: MIN_TRACKED_AGE,
            max: 14,
        },
        AgeBucket { min: 15, max: 25 },
        AgeBucket { min: 26, max: 40 },
        AgeBucket { min: 41, max: 64 },
        AgeBucket {
            min: 65,
            max: MAX_TRACKED_AGE,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn labels_parse_to_expected_intervals() {
        assert_eq!(AgeBucket::parse_label("all").unwrap(), AgeBucket::FULL_RANGE);
        assert_eq!(
            AgeBucket::parse_label("15-25").unwrap(),
            AgeBucket::new(15, 25).unwrap()
        );
        assert_eq!(
            AgeBucket::parse_label("65+").unwrap(),
            AgeBucket::new(65, MAX_TRACKED_AGE).unwrap()
        );
        assert_eq!(
            AgeBucket::parse_label("14-").unwrap(),
            AgeBucket::new(MIN_TRACKED_AGE, 14).unwrap()
        );
    }

    #[test]
    fn bad_labels_are_parameter_errors() {
        for label in ["", "abc", "-25", "40-30", "200+", "0-10"] {
            assert!(AgeBucket::parse_label(label).is_err(), "label {label:?}");
        }
    }

    #[test]
    fn display_round_trips_the_label_forms() {
        for label in ["all", "15-25", "65+", "14-"] {
            let bucket = AgeBucket::parse_label(label).unwrap();
            assert_eq!(bucket.to_string(), label);
            assert_eq!(AgeBucket::parse_label(&bucket.to_string()).unwrap(), bucket);
        }
    }

    #[test]
    fn ordering_matches_signature_sort() {
        let mut buckets = vec![
            AgeBucket::new(41, 64).unwrap(),
            AgeBucket::FULL_RANGE,
            AgeBucket::new(1, 14).unwrap(),
            AgeBucket::new(15, 25).unwrap(),
        ];
        buckets.sort_unstable();
        let rendered: Vec<String> = buckets.iter().map(AgeBucket::signature_fragment).collect();
        assert_eq!(rendered, ["(1-14)", "(1-150)", "(15-25)", "(41-64)"]);
    }

    #[test]
    fn containment_is_inclusive() {
        let bucket = AgeBucket::new(18, 25).unwrap();
        assert!(bucket.contains(18));
        assert!(bucket.contains(25));
        assert!(!bucket.contains(17));
        assert!(!bucket.contains(26));
    }

    proptest! {
        #[test]
        fn every_valid_interval_round_trips_its_label(
            min in MIN_TRACKED_AGE..=MAX_TRACKED_AGE,
            span in 0i32..=60,
        ) {
            let max = (min + span).min(MAX_TRACKED_AGE);
            let bucket = AgeBucket::new(min, max).unwrap();
            prop_assert_eq!(AgeBucket::parse_label(&bucket.to_string()).unwrap(), bucket);
        }

        #[test]
        fn containment_matches_the_interval(
            min in MIN_TRACKED_AGE..=MAX_TRACKED_AGE,
            span in 0i32..=40,
            age in -5..=200,
        ) {
            let max = (min + span).min(MAX_TRACKED_AGE);
            let bucket = AgeBucket::new(min, max).unwrap();
            prop_assert_eq!(bucket.contains(age), age >= min && age <= max);
        }
    }
}
