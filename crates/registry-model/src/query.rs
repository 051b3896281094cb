//! Stratification queries and cache keys.

use crate::bucket::AgeBucket;
use crate::disorder::{CohortRule, Disorder};
use crate::filter::DemographicFilter;

/// One resolved stratification request: which year, which age buckets, which
/// demographic conjunction.
///
/// The bucket list is a union of selections; an empty list is valid and
/// stratifies to the empty set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StratificationQuery {
    pub year_of_inclusion: i32,
    pub age_buckets: Vec<AgeBucket>,
    pub demographics: DemographicFilter,
}

impl StratificationQuery {
    pub fn new(
        year_of_inclusion: i32,
        age_buckets: Vec<AgeBucket>,
        demographics: DemographicFilter,
    ) -> Self {
        Self {
            year_of_inclusion,
            age_buckets,
            demographics,
        }
    }
}

/// Identity of one indicator call site, minus the year axis.
///
/// The indicator id itself is not part of the key; each indicator has its
/// own backing store and the signature is the row key within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub disorder: Disorder,
    pub cohort_rule: Option<CohortRule>,
    pub age_buckets: Vec<AgeBucket>,
    pub demographics: DemographicFilter,
}

impl CacheKey {
    /// Canonical signature: disorder code, optional cohort code, the bucket
    /// list sorted and rendered `(min-max)_(min-max)`, then the four
    /// demographic tokens, all joined with `_`.
    ///
    /// Sorting makes the signature independent of bucket order, so two
    /// logically identical filter sets always collide.
    pub fn canonical_signature(&self) -> String {
        let mut buckets = self.age_buckets.clone();
        buckets.sort_unstable();
        let bucket_fragment: Vec<String> =
            buckets.iter().map(AgeBucket::signature_fragment).collect();

        let mut parts: Vec<String> = vec![self.disorder.as_code().to_string()];
        if let Some(rule) = self.cohort_rule {
            parts.push(rule.as_code().to_string());
        }
        parts.push(bucket_fragment.join("_"));
        parts.extend(
            self.demographics
                .signature_tokens()
                .iter()
                .map(|token| (*token).to_string()),
        );
        parts.join("_")
    }

    /// The stratification this key implies for one year of inclusion.
    pub fn query_for_year(&self, year: i32) -> StratificationQuery {
        StratificationQuery::new(year, self.age_buckets.clone(), self.demographics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demographics::Gender;
    use crate::filter::FieldFilter;
    use proptest::prelude::*;

    fn key(buckets: Vec<AgeBucket>) -> CacheKey {
        CacheKey {
            disorder: Disorder::Schizophrenia,
            cohort_rule: Some(CohortRule::Prevalent),
            age_buckets: buckets,
            demographics: DemographicFilter {
                gender: FieldFilter::Equals(Gender::Female),
                ..DemographicFilter::any()
            },
        }
    }

    #[test]
    fn signature_layout_is_stable() {
        let signature = key(vec![
            AgeBucket::new(15, 25).unwrap(),
            AgeBucket::new(26, 40).unwrap(),
        ])
        .canonical_signature();
        assert_eq!(signature, "SCHIZO_PREVALENT_(15-25)_(26-40)_F_All_All_All");
    }

    #[test]
    fn bucket_order_does_not_change_the_signature() {
        let forward = key(vec![
            AgeBucket::new(15, 25).unwrap(),
            AgeBucket::new(41, 64).unwrap(),
        ]);
        let reversed = key(vec![
            AgeBucket::new(41, 64).unwrap(),
            AgeBucket::new(15, 25).unwrap(),
        ]);
        assert_eq!(
            forward.canonical_signature(),
            reversed.canonical_signature()
        );
    }

    #[test]
    fn cohort_rule_is_omitted_when_absent() {
        let mut without_rule = key(vec![AgeBucket::FULL_RANGE]);
        without_rule.cohort_rule = None;
        assert_eq!(
            without_rule.canonical_signature(),
            "SCHIZO_(1-150)_F_All_All_All"
        );
    }

    #[test]
    fn query_for_year_carries_buckets_and_demographics() {
        let key = key(vec![AgeBucket::new(15, 25).unwrap()]);
        let query = key.query_for_year(2019);
        assert_eq!(query.year_of_inclusion, 2019);
        assert_eq!(query.age_buckets, key.age_buckets);
        assert_eq!(query.demographics, key.demographics);
    }

    proptest! {
        #[test]
        fn any_bucket_permutation_shares_one_signature(
            seed in proptest::collection::vec((1..=120i32, 0..=30i32), 1..5)
        ) {
            let buckets: Vec<AgeBucket> = seed
                .into_iter()
                .map(|(min, span)| AgeBucket::new(min, min + span).unwrap())
                .collect();
            let mut shuffled = buckets.clone();
            shuffled.reverse();
            prop_assert_eq!(
                key(buckets).canonical_signature(),
                key(shuffled).canonical_signature()
            );
        }
    }
}
