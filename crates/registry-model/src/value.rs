//! Typed indicator results and year series.
//!
//! These are the envelopes the cache persists and the presentation layer
//! consumes; one [`IndicatorValue`] per year of inclusion, collected into an
//! [`IndicatorSeries`] with the years as the x axis.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Result of one indicator computation for one year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorValue {
    /// A plain count.
    Count { count: u64 },
    /// A count over the whole qualifying population next to the count for
    /// the selected disorder.
    CountSplit { all: u64, selected: u64 },
    /// A share of the denominator population in `0..=1`, with the
    /// per-subject event-count distribution behind the numerator.
    Percentage {
        percentage: f64,
        distribution: Vec<u64>,
    },
    /// Event counts keyed by reporting slot.
    TypeCounts { counts: BTreeMap<String, u64> },
}

impl IndicatorValue {
    /// Percentage with the zero-denominator and empty-numerator conventions
    /// applied: denominator 0 yields 0.0, an empty distribution becomes the
    /// degenerate `[0, 0]` so downstream statistics never see an empty list.
    pub fn percentage(numerator: u64, denominator: u64, mut distribution: Vec<u64>) -> Self {
        let percentage = if denominator == 0 {
            0.0
        } else {
            numerator as f64 / denominator as f64
        };
        if distribution.is_empty() {
            distribution = vec![0, 0];
        }
        IndicatorValue::Percentage {
            percentage,
            distribution,
        }
    }

    /// The defined zero value for an empty stratified population.
    pub fn empty_percentage() -> Self {
        Self::percentage(0, 0, Vec::new())
    }
}

/// Ordered year series for one indicator and one filter combination.
///
/// `years` and `values` stay parallel; push through [`IndicatorSeries::push`]
/// to keep them that way.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IndicatorSeries {
    pub years: Vec<i32>,
    pub values: Vec<IndicatorValue>,
}

impl IndicatorSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, year: i32, value: IndicatorValue) {
        self.years.push(year);
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.years.len()
    }

    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &IndicatorValue)> {
        self.years.iter().copied().zip(self.values.iter())
    }
}
