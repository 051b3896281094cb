//! Cached indicator series over the year axis.
//!
//! [`IndicatorService`] answers one question: the full year series for an
//! indicator under one filter combination. It serves from the cache when the
//! canonical signature is already stored, otherwise it stratifies once per
//! year, computes, releases each set, and upserts the whole series before
//! returning it.

use std::ops::RangeInclusive;

use tracing::info;

use registry_model::{
    AgeBucket, CacheKey, CohortRule, DemographicFilter, Disorder, IndicatorSeries, Result,
};

use crate::cache::IndicatorCache;
use crate::indicators::{IndicatorComputer, IndicatorRegistry, IndicatorRequest};
use crate::session::QuerySession;

/// One series request: everything but the year axis, which the service
/// derives from the disorder's cohort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRequest {
    pub disorder: Disorder,
    pub cohort_rule: CohortRule,
    pub age_buckets: Vec<AgeBucket>,
    pub demographics: DemographicFilter,
}

/// A served series plus how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesOutcome {
    pub indicator: &'static str,
    pub signature: String,
    pub from_cache: bool,
    pub series: IndicatorSeries,
}

/// Query-time facade over one session, one registry, and one cache.
pub struct IndicatorService<'a> {
    session: &'a QuerySession<'a>,
    registry: &'a IndicatorRegistry,
    cache: &'a IndicatorCache,
}

impl<'a> IndicatorService<'a> {
    pub fn new(
        session: &'a QuerySession<'a>,
        registry: &'a IndicatorRegistry,
        cache: &'a IndicatorCache,
    ) -> Self {
        Self {
            session,
            registry,
            cache,
        }
    }

    /// The year series for one indicator and one filter combination.
    ///
    /// The cache key uses the indicator's effective disorder and includes
    /// the cohort rule only when the indicator consults it, so logically
    /// identical calls always land on the same entry.
    pub fn series(&self, indicator: &str, request: &SeriesRequest) -> Result<SeriesOutcome> {
        let computer = self.registry.get(indicator)?;
        let key = Self::cache_key(computer, request);
        let signature = key.canonical_signature();

        if let Some(series) = self.cache.get(computer.id(), &signature)? {
            info!(indicator = computer.id(), signature = %signature, "series served from cache");
            return Ok(SeriesOutcome {
                indicator: computer.id(),
                signature,
                from_cache: true,
                series,
            });
        }
        self.compute_and_store(computer, request, &key, signature)
    }

    /// Computes the series fresh and refreshes the cached entry, even when
    /// a stored one exists.
    pub fn recompute(&self, indicator: &str, request: &SeriesRequest) -> Result<SeriesOutcome> {
        let computer = self.registry.get(indicator)?;
        let key = Self::cache_key(computer, request);
        let signature = key.canonical_signature();
        self.compute_and_store(computer, request, &key, signature)
    }

    fn cache_key(computer: &dyn IndicatorComputer, request: &SeriesRequest) -> CacheKey {
        CacheKey {
            disorder: computer.effective_disorder(request.disorder),
            cohort_rule: computer.uses_cohort_rule().then_some(request.cohort_rule),
            age_buckets: request.age_buckets.clone(),
            demographics: request.demographics,
        }
    }

    fn compute_and_store(
        &self,
        computer: &dyn IndicatorComputer,
        request: &SeriesRequest,
        key: &CacheKey,
        signature: String,
    ) -> Result<SeriesOutcome> {
        let mut series = IndicatorSeries::new();
        for year in self.series_years(key.disorder) {
            let set = self.session.stratify(&key.query_for_year(year))?;
            let value = computer.compute(
                self.session,
                &set,
                &IndicatorRequest::new(key.disorder, request.cohort_rule, year),
            )?;
            set.release();
            series.push(year, value);
        }
        self.cache.put(computer.id(), &signature, &series)?;
        info!(
            indicator = computer.id(),
            signature = %signature,
            years = series.len(),
            "series computed and cached"
        );
        Ok(SeriesOutcome {
            indicator: computer.id(),
            signature,
            from_cache: false,
            series,
        })
    }

    /// Year axis for one disorder: from the cohort's earliest onset to the
    /// end of the indexed span. An empty cohort gets the whole span.
    fn series_years(&self, disorder: Disorder) -> RangeInclusive<i32> {
        let span = self.session.age_index().years();
        let start = self
            .session
            .cohorts()
            .min_onset_year_for(disorder)
            .map_or(*span.start(), |onset| onset.clamp(*span.start(), *span.end()));
        start..=*span.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use registry_model::{
        AtcCode, CivilStatus, DispensationRecord, EducationLevel, Gender, IndicatorValue,
        InterventionRecord, JobCondition, SubjectId, SubjectRecord, default_buckets,
    };
    use tempfile::TempDir;

    use crate::age_index::AgeIndex;
    use crate::cohort::CohortIndex;
    use crate::indicators::default_registry;
    use crate::snapshot::Snapshot;

    struct Fixture {
        snapshot: Snapshot,
        cohorts: CohortIndex,
        age_index: AgeIndex,
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn id(raw: &str) -> SubjectId {
        SubjectId::new(raw).unwrap()
    }

    /// Alice enters schizophrenia care in 2015, bob depression care in 2016;
    /// nobody is in the bipolar cohort.
    fn fixture() -> Fixture {
        let mut snapshot = Snapshot::default();
        for (raw, birth_year) in [("alice", 1990), ("bob", 1980)] {
            let record = SubjectRecord {
                id: id(raw),
                birth_date: date(birth_year, 7, 1),
                death_date: None,
                gender: Gender::Female,
                civil_status: CivilStatus::Married,
                job_condition: JobCondition::Employed,
                education_level: EducationLevel::UpperSecondary,
            };
            snapshot.subjects.insert(record.id.clone(), record);
        }
        for (raw, year, atc) in [("alice", 2015, "N05AH03"), ("bob", 2016, "N06AB06")] {
            snapshot.dispensations.push(DispensationRecord {
                subject: id(raw),
                date: date(year, 3, 10),
                atc: AtcCode::new(atc).unwrap(),
            });
        }
        snapshot.interventions.push(InterventionRecord {
            subject: id("alice"),
            date: date(2017, 6, 20),
            type_code: Some(1),
        });
        let cohorts = CohortIndex::build(&snapshot);
        let age_index = AgeIndex::build(&snapshot, &cohorts, 2015..=2020, &default_buckets());
        Fixture {
            snapshot,
            cohorts,
            age_index,
        }
    }

    fn request(disorder: Disorder, rule: CohortRule) -> SeriesRequest {
        SeriesRequest {
            disorder,
            cohort_rule: rule,
            age_buckets: vec!["all".parse().unwrap()],
            demographics: DemographicFilter::default(),
        }
    }

    #[test]
    fn computes_once_then_serves_from_cache() {
        let fx = fixture();
        let dir = TempDir::new().unwrap();
        let session = QuerySession::new(&fx.snapshot, &fx.cohorts, &fx.age_index);
        let cache = IndicatorCache::new(dir.path());
        let service = IndicatorService::new(&session, default_registry(), &cache);

        let req = request(Disorder::Schizophrenia, CohortRule::Prevalent);
        let first = service.series("ma1", &req).unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.series.years, vec![2015, 2016, 2017, 2018, 2019, 2020]);
        assert_eq!(
            first.series.values[0],
            IndicatorValue::CountSplit { all: 1, selected: 1 }
        );
        assert_eq!(
            first.series.values[1],
            IndicatorValue::CountSplit { all: 2, selected: 1 }
        );

        let second = service.series("ma1", &req).unwrap();
        assert!(second.from_cache);
        assert_eq!(second.series, first.series);
        assert_eq!(second.signature, first.signature);
        assert_eq!(session.active_set_count(), 0);
    }

    #[test]
    fn recompute_refreshes_instead_of_serving_the_cache() {
        let fx = fixture();
        let dir = TempDir::new().unwrap();
        let session = QuerySession::new(&fx.snapshot, &fx.cohorts, &fx.age_index);
        let cache = IndicatorCache::new(dir.path());
        let service = IndicatorService::new(&session, default_registry(), &cache);

        let req = request(Disorder::Schizophrenia, CohortRule::Prevalent);
        let first = service.series("ma1", &req).unwrap();
        let refreshed = service.recompute("ma1", &req).unwrap();
        assert!(!refreshed.from_cache);
        assert_eq!(refreshed.series, first.series);

        let served = service.series("ma1", &req).unwrap();
        assert!(served.from_cache);
        assert_eq!(session.active_set_count(), 0);
    }

    #[test]
    fn year_axis_starts_at_the_disorder_onset() {
        let fx = fixture();
        let dir = TempDir::new().unwrap();
        let session = QuerySession::new(&fx.snapshot, &fx.cohorts, &fx.age_index);
        let cache = IndicatorCache::new(dir.path());
        let service = IndicatorService::new(&session, default_registry(), &cache);

        let outcome = service
            .series("ma1", &request(Disorder::Depression, CohortRule::Prevalent))
            .unwrap();
        assert_eq!(outcome.series.years, vec![2016, 2017, 2018, 2019, 2020]);
    }

    #[test]
    fn empty_cohort_spans_the_whole_index() {
        let fx = fixture();
        let dir = TempDir::new().unwrap();
        let session = QuerySession::new(&fx.snapshot, &fx.cohorts, &fx.age_index);
        let cache = IndicatorCache::new(dir.path());
        let service = IndicatorService::new(&session, default_registry(), &cache);

        let outcome = service
            .series(
                "ma1",
                &request(Disorder::BipolarDisorder, CohortRule::Prevalent),
            )
            .unwrap();
        assert_eq!(outcome.series.years, vec![2015, 2016, 2017, 2018, 2019, 2020]);
        assert!(
            outcome
                .series
                .values
                .iter()
                .all(|value| *value == IndicatorValue::CountSplit { all: 0, selected: 0 })
        );
    }

    #[test]
    fn monitoring_series_are_shared_across_cohort_rules() {
        let fx = fixture();
        let dir = TempDir::new().unwrap();
        let session = QuerySession::new(&fx.snapshot, &fx.cohorts, &fx.age_index);
        let cache = IndicatorCache::new(dir.path());
        let service = IndicatorService::new(&session, default_registry(), &cache);

        let prevalent = service
            .series("ma1", &request(Disorder::Schizophrenia, CohortRule::Prevalent))
            .unwrap();
        let incident = service
            .series("ma1", &request(Disorder::Schizophrenia, CohortRule::Incident))
            .unwrap();
        assert!(incident.from_cache);
        assert_eq!(incident.signature, prevalent.signature);
    }

    #[test]
    fn evaluation_series_are_keyed_by_cohort_rule() {
        let fx = fixture();
        let dir = TempDir::new().unwrap();
        let session = QuerySession::new(&fx.snapshot, &fx.cohorts, &fx.age_index);
        let cache = IndicatorCache::new(dir.path());
        let service = IndicatorService::new(&session, default_registry(), &cache);

        let prevalent = service
            .series("ea1", &request(Disorder::Schizophrenia, CohortRule::Prevalent))
            .unwrap();
        let incident = service
            .series("ea1", &request(Disorder::Schizophrenia, CohortRule::Incident))
            .unwrap();
        assert!(!incident.from_cache);
        assert_ne!(incident.signature, prevalent.signature);
    }

    #[test]
    fn pinned_disorder_shares_one_entry_across_selections() {
        let fx = fixture();
        let dir = TempDir::new().unwrap();
        let session = QuerySession::new(&fx.snapshot, &fx.cohorts, &fx.age_index);
        let cache = IndicatorCache::new(dir.path());
        let service = IndicatorService::new(&session, default_registry(), &cache);

        let first = service
            .series("ea4", &request(Disorder::Depression, CohortRule::Prevalent))
            .unwrap();
        assert!(first.signature.starts_with("SCHIZO"));
        let second = service
            .series("ea4", &request(Disorder::Schizophrenia, CohortRule::Prevalent))
            .unwrap();
        assert!(second.from_cache);
    }

    #[test]
    fn unknown_indicator_is_a_parameter_error() {
        let fx = fixture();
        let dir = TempDir::new().unwrap();
        let session = QuerySession::new(&fx.snapshot, &fx.cohorts, &fx.age_index);
        let cache = IndicatorCache::new(dir.path());
        let service = IndicatorService::new(&session, default_registry(), &cache);

        let err = service
            .series("nope", &request(Disorder::Schizophrenia, CohortRule::Prevalent))
            .unwrap_err();
        assert!(err.to_string().contains("indicator"));
        assert_eq!(session.active_set_count(), 0);
    }
}
