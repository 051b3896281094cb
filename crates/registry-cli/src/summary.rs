use std::collections::BTreeSet;

use comfy_table::modifiers::{UTF8_ROUND_CORNERS, UTF8_SOLID_INNER_BORDERS};
use comfy_table::presets::{UTF8_FULL, UTF8_FULL_CONDENSED};
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use registry_engine::StageOutcome;
use registry_model::IndicatorValue;

use crate::types::{QueryView, RebuildView, StatusView};

pub fn print_rebuild(view: &RebuildView) {
    let report = &view.report;
    println!("Store: {}", view.store_dir.display());
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Stage"),
        header_cell("Outcome"),
        header_cell("Detail"),
    ]);
    apply_report_table_style(&mut table);
    table.add_row(vec![
        Cell::new("Snapshot"),
        outcome_cell(report.preprocess),
        Cell::new(format!(
            "{} subjects, {} dispensations, {} interventions",
            report.subjects, report.dispensations, report.interventions
        )),
    ]);
    table.add_row(vec![
        Cell::new("Cohorts"),
        outcome_cell(report.cohorts),
        Cell::new(format!("{} disorder episodes", report.cohort_rows)),
    ]);
    table.add_row(vec![
        Cell::new("Age index"),
        outcome_cell(report.age_index),
        Cell::new(format!(
            "years {}-{}",
            report.years.start(),
            report.years.end()
        )),
    ]);
    println!("{table}");
    if let Some(rows) = report.row_report {
        let mut table = Table::new();
        table.set_header(vec![
            header_cell("Relation"),
            header_cell("Kept"),
            header_cell("Dropped"),
        ]);
        apply_report_table_style(&mut table);
        align_column(&mut table, 1, CellAlignment::Right);
        align_column(&mut table, 2, CellAlignment::Right);
        table.add_row(vec![
            Cell::new("demographics"),
            Cell::new(rows.subjects_kept),
            count_cell(rows.subjects_dropped, Color::Yellow),
        ]);
        table.add_row(vec![
            Cell::new("pharma"),
            Cell::new(rows.dispensations_kept),
            count_cell(rows.dispensations_dropped, Color::Yellow),
        ]);
        table.add_row(vec![
            Cell::new("interventions"),
            Cell::new(rows.interventions_kept),
            count_cell(rows.interventions_dropped, Color::Yellow),
        ]);
        println!();
        println!("Preprocessing:");
        println!("{table}");
    }
    if report.up_to_date() {
        println!("Cache: untouched");
    } else if report.cache_relations_dropped > 0 {
        println!(
            "Cache: {} indicator stores dropped",
            report.cache_relations_dropped
        );
    } else {
        println!("Cache: empty");
    }
}

pub fn print_query(view: &QueryView) {
    let outcome = &view.outcome;
    println!("Indicator: {} - {}", outcome.indicator, view.description);
    println!("Disorder: {}", view.disorder);
    println!("Cohort rule: {}", view.cohort_rule);
    println!("Signature: {}", outcome.signature);
    println!(
        "Source: {}",
        if outcome.from_cache { "cache" } else { "computed" }
    );
    let rows: Vec<(i32, &IndicatorValue)> = outcome
        .series
        .years
        .iter()
        .copied()
        .zip(outcome.series.values.iter())
        .filter(|(year, _)| {
            view.year_window
                .is_none_or(|(start, end)| (start..=end).contains(year))
        })
        .collect();
    if rows.is_empty() {
        println!("No years inside the requested window.");
        return;
    }
    let mut table = Table::new();
    match rows[0].1 {
        IndicatorValue::Count { .. } => {
            table.set_header(vec![header_cell("Year"), header_cell("Count")]);
            apply_report_table_style(&mut table);
            align_column(&mut table, 1, CellAlignment::Right);
            for (year, value) in &rows {
                if let IndicatorValue::Count { count } = value {
                    table.add_row(vec![Cell::new(year), Cell::new(count)]);
                }
            }
        }
        IndicatorValue::CountSplit { .. } => {
            table.set_header(vec![
                header_cell("Year"),
                header_cell("All disorders"),
                header_cell("Selected"),
            ]);
            apply_report_table_style(&mut table);
            align_column(&mut table, 1, CellAlignment::Right);
            align_column(&mut table, 2, CellAlignment::Right);
            for (year, value) in &rows {
                if let IndicatorValue::CountSplit { all, selected } = value {
                    table.add_row(vec![Cell::new(year), Cell::new(all), Cell::new(selected)]);
                }
            }
        }
        IndicatorValue::Percentage { .. } => {
            table.set_header(vec![
                header_cell("Year"),
                header_cell("Share"),
                header_cell("Events per subject"),
            ]);
            apply_report_table_style(&mut table);
            align_column(&mut table, 1, CellAlignment::Right);
            for (year, value) in &rows {
                if let IndicatorValue::Percentage {
                    percentage,
                    distribution,
                } = value
                {
                    table.add_row(vec![
                        Cell::new(year),
                        Cell::new(format!("{:.1}%", percentage * 100.0)),
                        Cell::new(join_counts(distribution)),
                    ]);
                }
            }
        }
        IndicatorValue::TypeCounts { .. } => {
            let mut type_keys = BTreeSet::new();
            for (_, value) in &rows {
                if let IndicatorValue::TypeCounts { counts } = value {
                    type_keys.extend(counts.keys().cloned());
                }
            }
            let mut header = vec![header_cell("Year")];
            header.extend(type_keys.iter().map(|key| header_cell(key)));
            table.set_header(header);
            apply_report_table_style(&mut table);
            for index in 1..=type_keys.len() {
                align_column(&mut table, index, CellAlignment::Right);
            }
            for (year, value) in &rows {
                if let IndicatorValue::TypeCounts { counts } = value {
                    let mut cells = vec![Cell::new(year)];
                    cells.extend(
                        type_keys
                            .iter()
                            .map(|key| Cell::new(counts.get(key).copied().unwrap_or(0))),
                    );
                    table.add_row(cells);
                }
            }
        }
    }
    println!("{table}");
}

pub fn print_status(view: &StatusView) {
    println!("Store: {}", view.store_dir.display());
    let Some(manifest) = &view.manifest else {
        println!("No manifest; run a rebuild first.");
        return;
    };
    println!("Version: {}", manifest.version);
    println!("Saved: {}", manifest.saved_at.as_deref().unwrap_or("-"));
    println!(
        "Age index: years {}-{}, buckets {}",
        manifest.age_index.start_year,
        manifest.age_index.end_year,
        manifest.age_index.buckets.join(", ")
    );
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Kind"),
        header_cell("Relation"),
        header_cell("Digest"),
    ]);
    apply_report_table_style(&mut table);
    for (kind, relations) in [
        ("raw", &manifest.raw_inputs),
        ("snapshot", &manifest.snapshot),
        ("derived", &manifest.derived),
    ] {
        for (relation, digest) in relations {
            table.add_row(vec![
                Cell::new(kind),
                Cell::new(relation),
                dim_cell(short_digest(digest)),
            ]);
        }
    }
    println!("{table}");
    if view.cache_entries.is_empty() {
        println!("Cache: empty");
    } else {
        let mut table = Table::new();
        table.set_header(vec![header_cell("Indicator"), header_cell("Cached series")]);
        apply_report_table_style(&mut table);
        align_column(&mut table, 1, CellAlignment::Right);
        for (indicator, count) in &view.cache_entries {
            table.add_row(vec![Cell::new(indicator), Cell::new(count)]);
        }
        println!();
        println!("Cache:");
        println!("{table}");
    }
}

pub fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(100);
}

fn apply_report_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120);
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}

fn outcome_cell(outcome: StageOutcome) -> Cell {
    match outcome {
        StageOutcome::Rebuilt => Cell::new("rebuilt")
            .fg(Color::Green)
            .add_attribute(Attribute::Bold),
        StageOutcome::Reused => dim_cell("up to date"),
    }
}

fn count_cell(value: usize, color: Color) -> Cell {
    if value > 0 {
        Cell::new(value).fg(color).add_attribute(Attribute::Bold)
    } else {
        dim_cell(value)
    }
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn dim_cell<T: ToString>(value: T) -> Cell {
    Cell::new(value).fg(Color::DarkGrey)
}

fn short_digest(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

fn join_counts(counts: &[u64]) -> String {
    counts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
