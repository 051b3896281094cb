pub mod age_index;
pub mod cache;
pub mod cohort;
pub mod datetime;
pub mod hash;
pub mod indicators;
pub mod ingest;
pub mod preprocess;
pub mod rebuild;
pub mod series;
pub mod session;
pub mod snapshot;
pub mod store;

pub use age_index::{AgeIndex, AgeIndexRow};
pub use cache::IndicatorCache;
pub use cohort::{CohortIndex, CohortRow};
pub use datetime::{canonicalize_date, format_date};
pub use hash::{sha256_hex, sha256_hex_file};
pub use indicators::{
    IndicatorComputer, IndicatorRegistry, IndicatorRequest, InterventionAccess, InterventionMix,
    PsychotropicAccess, TreatedIncidence, TreatedPrevalence, default_registry,
};
pub use ingest::{
    OPTIONAL_RELATIONS, REQUIRED_RELATIONS, RawBundle, RawExtract, load_raw_dir, read_raw_frame,
};
pub use preprocess::{PreprocessReport, build_snapshot};
pub use rebuild::{RebuildReport, StageOutcome, rebuild};
pub use series::{IndicatorService, SeriesOutcome, SeriesRequest};
pub use session::{QuerySession, StratifiedSet};
pub use snapshot::Snapshot;
pub use store::{AgeIndexSpan, BatchOutputs, RegistryStore, StoreManifest};
