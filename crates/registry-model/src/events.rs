//! Event records: pharmacy dispensations and community interventions.

use chrono::{Datelike, NaiveDate};

use crate::ids::{AtcCode, SubjectId};

/// Intervention type slots reported by the intervention-mix indicator.
///
/// Codes 1 through 7 are the recognized intervention types; 9 collects
/// everything else, including records with no type at all.
pub const INTERVENTION_TYPE_SLOTS: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 9];

/// Slot label for the total across all types.
pub const ANY_TYPE_SLOT: &str = "any_type";

/// One pharmacy dispensation row. Append-only within a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispensationRecord {
    pub subject: SubjectId,
    pub date: NaiveDate,
    pub atc: AtcCode,
}

impl DispensationRecord {
    pub fn year(&self) -> i32 {
        self.date.year()
    }
}

/// One community-intervention row. `type_code` is absent when the source
/// carried no type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterventionRecord {
    pub subject: SubjectId,
    pub date: NaiveDate,
    pub type_code: Option<i32>,
}

impl InterventionRecord {
    pub fn year(&self) -> i32 {
        self.date.year()
    }

    /// Fold the raw type code into its reporting slot: 1..=7 keep their
    /// code, anything else (9, unknown, out of range) lands in slot 9.
    pub fn type_slot(&self) -> u8 {
        match self.type_code {
            Some(code @ 1..=7) => code as u8,
            _ => 9,
        }
    }
}
