pub mod bucket;
pub mod demographics;
pub mod disorder;
pub mod error;
pub mod events;
pub mod filter;
pub mod ids;
pub mod query;
pub mod value;

pub use bucket::{AgeBucket, MAX_TRACKED_AGE, MIN_TRACKED_AGE, default_buckets};
pub use demographics::{CivilStatus, EducationLevel, Gender, JobCondition, SubjectRecord};
pub use disorder::{CohortRule, Disorder};
pub use error::{RegistryError, Result};
pub use events::{
    ANY_TYPE_SLOT, DispensationRecord, INTERVENTION_TYPE_SLOTS, InterventionRecord,
};
pub use filter::{Categorical, DemographicFilter, FieldFilter};
pub use ids::{AtcCode, SubjectId};
pub use query::{CacheKey, StratificationQuery};
pub use value::{IndicatorSeries, IndicatorValue};
