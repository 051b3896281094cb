//! Typed snapshot of the registry after preprocessing.
//!
//! The snapshot is the boundary between raw text extracts and everything
//! downstream: once built, every record in it is fully typed and every date
//! is canonical. Cohorts, the age index, and the indicators only ever read
//! from here.

use std::collections::BTreeMap;

use registry_model::{DispensationRecord, InterventionRecord, SubjectId, SubjectRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Demographic record per subject, keyed for deterministic iteration.
    pub subjects: BTreeMap<SubjectId, SubjectRecord>,
    pub dispensations: Vec<DispensationRecord>,
    pub interventions: Vec<InterventionRecord>,
}

impl Snapshot {
    pub fn subject(&self, id: &SubjectId) -> Option<&SubjectRecord> {
        self.subjects.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// Latest year any event was recorded, across both event relations.
    /// `None` when the snapshot holds no events at all.
    pub fn max_event_year(&self) -> Option<i32> {
        let dispensed = self.dispensations.iter().map(DispensationRecord::year).max();
        let intervened = self.interventions.iter().map(InterventionRecord::year).max();
        match (dispensed, intervened) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use registry_model::AtcCode;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn max_event_year_spans_both_relations() {
        let subject = SubjectId::new("s1").unwrap();
        let mut snapshot = Snapshot::default();
        assert_eq!(snapshot.max_event_year(), None);

        snapshot.dispensations.push(DispensationRecord {
            subject: subject.clone(),
            date: date(2014, 6, 1),
            atc: AtcCode::new("N05AH03").unwrap(),
        });
        assert_eq!(snapshot.max_event_year(), Some(2014));

        snapshot.interventions.push(InterventionRecord {
            subject,
            date: date(2019, 2, 10),
            type_code: Some(4),
        });
        assert_eq!(snapshot.max_event_year(), Some(2019));
    }
}
