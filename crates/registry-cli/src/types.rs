use std::collections::BTreeMap;
use std::path::PathBuf;

use registry_engine::{RebuildReport, SeriesOutcome, StoreManifest};
use registry_model::{CohortRule, Disorder};

#[derive(Debug)]
pub struct RebuildView {
    pub store_dir: PathBuf,
    pub report: RebuildReport,
}

#[derive(Debug)]
pub struct QueryView {
    pub description: &'static str,
    /// Disorder the series actually reports on, after any pinning.
    pub disorder: Disorder,
    pub cohort_rule: CohortRule,
    pub outcome: SeriesOutcome,
    /// Display window over the computed years, when `--years` was given.
    pub year_window: Option<(i32, i32)>,
}

#[derive(Debug)]
pub struct StatusView {
    pub store_dir: PathBuf,
    pub manifest: Option<StoreManifest>,
    /// Cached indicator ids with their stored signature count.
    pub cache_entries: BTreeMap<String, usize>,
}
