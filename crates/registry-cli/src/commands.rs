use std::time::Instant;

use anyhow::{Context, Result, bail};
use comfy_table::Table;
use tracing::{info, info_span};

use registry_engine::{IndicatorService, RegistryStore, SeriesRequest, default_registry, rebuild};
use registry_model::{AgeBucket, CohortRule, DemographicFilter, Disorder, default_buckets};

use crate::cli::{CohortArg, DisorderArg, QueryArgs, RebuildArgs, StatusArgs};
use crate::summary::apply_table_style;
use crate::types::{QueryView, RebuildView, StatusView};

pub fn run_rebuild(args: &RebuildArgs) -> Result<RebuildView> {
    let store_dir = args
        .store_dir
        .clone()
        .unwrap_or_else(|| args.raw_dir.join("store"));
    let store = RegistryStore::open(&store_dir);
    let span = info_span!(
        "rebuild",
        raw_dir = %args.raw_dir.display(),
        store_dir = %store_dir.display()
    );
    let start = Instant::now();
    let report = span
        .in_scope(|| rebuild(&args.raw_dir, &store, args.force))
        .with_context(|| format!("rebuild store at {}", store_dir.display()))?;
    info!(
        duration_ms = start.elapsed().as_millis(),
        up_to_date = report.up_to_date(),
        "rebuild command finished"
    );
    Ok(RebuildView { store_dir, report })
}

pub fn run_query(args: &QueryArgs) -> Result<QueryView> {
    let span = info_span!("query", indicator = %args.indicator);
    let _guard = span.enter();

    // =========================================================================
    // Stage 1: Resolve parameters before touching the store
    // =========================================================================
    let registry = default_registry();
    let computer = registry.get(&args.indicator)?;
    let request = series_request(args)?;
    let year_window = args
        .years
        .as_deref()
        .map(parse_year_window)
        .transpose()
        .context("parse --years")?;

    // =========================================================================
    // Stage 2: Load the persisted batch outputs
    // =========================================================================
    let store = RegistryStore::open(&args.store_dir);
    let load_start = Instant::now();
    let batch = store
        .load_batch()
        .with_context(|| format!("load store at {}", args.store_dir.display()))?;
    info!(
        subjects = batch.snapshot.subjects.len(),
        cohort_rows = batch.cohorts.len(),
        duration_ms = load_start.elapsed().as_millis(),
        "store loaded"
    );

    // =========================================================================
    // Stage 3: Serve the series
    // =========================================================================
    let session = batch.session();
    let cache = store.cache();
    let service = IndicatorService::new(&session, registry, &cache);
    let serve_start = Instant::now();
    let outcome = if args.no_cache {
        service.recompute(computer.id(), &request)
    } else {
        service.series(computer.id(), &request)
    }
    .with_context(|| format!("serve indicator {}", computer.id()))?;
    info!(
        from_cache = outcome.from_cache,
        years = outcome.series.len(),
        duration_ms = serve_start.elapsed().as_millis(),
        "series served"
    );

    Ok(QueryView {
        description: computer.description(),
        disorder: computer.effective_disorder(request.disorder),
        cohort_rule: request.cohort_rule,
        outcome,
        year_window,
    })
}

pub fn run_status(args: &StatusArgs) -> Result<StatusView> {
    let store = RegistryStore::open(&args.store_dir);
    let manifest = store
        .read_manifest()
        .with_context(|| format!("read manifest at {}", args.store_dir.display()))?;
    let cache_entries = store.cache().entries().context("scan indicator cache")?;
    Ok(StatusView {
        store_dir: args.store_dir.clone(),
        manifest,
        cache_entries,
    })
}

pub fn run_indicators() -> Result<()> {
    let registry = default_registry();
    let mut table = Table::new();
    table.set_header(vec!["Indicator", "Cohort rule", "Description"]);
    apply_table_style(&mut table);
    for id in registry.ids() {
        let computer = registry.get(id)?;
        let keyed = if computer.uses_cohort_rule() { "yes" } else { "-" };
        table.add_row(vec![id, keyed, computer.description()]);
    }
    println!("{table}");
    Ok(())
}

fn series_request(args: &QueryArgs) -> Result<SeriesRequest> {
    let age_buckets = if args.buckets.is_empty() {
        default_buckets()
    } else {
        args.buckets
            .iter()
            .map(|label| AgeBucket::parse_label(label))
            .collect::<Result<Vec<_>, _>>()?
    };
    let demographics = DemographicFilter::parse(
        &args.gender,
        &args.civil_status,
        &args.job_condition,
        &args.education,
    )?;
    Ok(SeriesRequest {
        disorder: disorder(args.disorder),
        cohort_rule: cohort_rule(args.cohort),
        age_buckets,
        demographics,
    })
}

fn disorder(arg: DisorderArg) -> Disorder {
    match arg {
        DisorderArg::Schizophrenia => Disorder::Schizophrenia,
        DisorderArg::Depression => Disorder::Depression,
        DisorderArg::Bipolar => Disorder::BipolarDisorder,
    }
}

fn cohort_rule(arg: CohortArg) -> CohortRule {
    match arg {
        CohortArg::Prevalent => CohortRule::Prevalent,
        CohortArg::Incident => CohortRule::Incident,
        CohortArg::IncidentYoungAdult => CohortRule::IncidentYoungAdult,
    }
}

/// Parse a `START-END` display window; a bare year means a one-year window.
fn parse_year_window(raw: &str) -> Result<(i32, i32)> {
    let trimmed = raw.trim();
    let (start, end) = match trimmed.split_once('-') {
        Some((start, end)) => (start.trim().parse()?, end.trim().parse()?),
        None => {
            let year: i32 = trimmed.parse()?;
            (year, year)
        }
    };
    if start > end {
        bail!("year window {start}-{end} is reversed");
    }
    Ok((start, end))
}
