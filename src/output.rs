use crate::classify::{classify, classify_table, Band};
use crate::dashboards::{Report, View, ViewData};
use crate::normalize::NormalizeReport;
use crate::types::{AggregateTable, DerivedRow, PivotTable, Ratio};
use crate::util::{format_number, format_percent};
use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tabled::{builder::Builder, settings::Style};

/// A rectangular grid of rendered cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableView {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// How cells are rendered: `Display` for the terminal, `Export` for CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Display,
    Export,
}

pub fn table_view(data: &ViewData, mode: Mode) -> TableView {
    match data {
        ViewData::Summary(t) => summary_view(t, mode),
        ViewData::Register { dimensions, measures, ratios, rows } => {
            register_view(dimensions, measures, ratios, rows, mode)
        }
        ViewData::Pivot(p) => pivot_view(p, mode),
    }
}

fn summary_view(table: &AggregateTable, mode: Mode) -> TableView {
    // count tables carry no measures; their only figure is the row count
    let counts_only = table.measures.is_empty() && table.ratios.is_empty();
    let mut headers = table.keys.clone();
    if counts_only {
        headers.push("Count".to_string());
    }
    headers.extend(table.measures.iter().cloned());
    push_ratio_headers(&mut headers, &table.ratios, mode);

    let rows = table
        .rows()
        .map(|row| {
            let mut cells = row.key.clone();
            if counts_only {
                cells.push(measure_cell(Some(row.count as f64), mode));
            }
            cells.extend(table.measures.iter().map(|m| measure_cell(row.measure(m), mode)));
            for name in &table.ratios {
                push_ratio_cells(&mut cells, row.ratio(name).unwrap_or(Ratio::Undefined), mode);
            }
            cells
        })
        .collect();
    TableView { headers, rows }
}

fn register_view(
    dimensions: &[String],
    measures: &[String],
    ratios: &[String],
    rows: &[DerivedRow],
    mode: Mode,
) -> TableView {
    let mut headers: Vec<String> = dimensions.iter().chain(measures.iter()).cloned().collect();
    push_ratio_headers(&mut headers, ratios, mode);

    let rows = rows
        .iter()
        .map(|derived| {
            let mut cells: Vec<String> = dimensions
                .iter()
                .map(|d| derived.row.dimension(d).unwrap_or_default().to_string())
                .collect();
            cells.extend(measures.iter().map(|m| measure_cell(derived.row.measure(m), mode)));
            for name in ratios {
                push_ratio_cells(&mut cells, derived.ratio(name).unwrap_or(Ratio::Undefined), mode);
            }
            cells
        })
        .collect();
    TableView { headers, rows }
}

fn pivot_view(pivot: &PivotTable, mode: Mode) -> TableView {
    let mut headers = vec![pivot.row_field.clone()];
    headers.extend(pivot.column_labels.iter().cloned());
    let rows = pivot
        .row_labels
        .iter()
        .zip(&pivot.cells)
        .map(|(label, cells)| {
            let mut out = vec![label.clone()];
            out.extend(cells.iter().map(|r| ratio_cell(*r, mode)));
            out
        })
        .collect();
    TableView { headers, rows }
}

fn push_ratio_headers(headers: &mut Vec<String>, ratios: &[String], mode: Mode) {
    for name in ratios {
        headers.push(name.clone());
        if mode == Mode::Export {
            headers.push(format!("{} band", name));
        }
    }
}

fn push_ratio_cells(cells: &mut Vec<String>, ratio: Ratio, mode: Mode) {
    cells.push(ratio_cell(ratio, mode));
    if mode == Mode::Export {
        cells.push(classify(ratio).to_string());
    }
}

fn measure_cell(v: Option<f64>, mode: Mode) -> String {
    match (v, mode) {
        (Some(v), Mode::Display) => format_number(v, 0),
        (Some(v), Mode::Export) => v.to_string(),
        (None, Mode::Display) => "-".to_string(),
        (None, Mode::Export) => String::new(),
    }
}

fn ratio_cell(ratio: Ratio, mode: Mode) -> String {
    match (ratio, mode) {
        (Ratio::Value(v), Mode::Display) => format!("{} [{}]", format_percent(v), classify(ratio)),
        (Ratio::Value(v), Mode::Export) => format!("{:.4}", v),
        (Ratio::Undefined, Mode::Display) => "n/a".to_string(),
        (Ratio::Undefined, Mode::Export) => String::new(),
    }
}

pub fn render_markdown(view: &TableView) -> String {
    let mut builder = Builder::default();
    builder.push_record(view.headers.clone());
    for row in &view.rows {
        builder.push_record(row.clone());
    }
    builder.build().with(Style::markdown()).to_string()
}

/// Print a view's title and at most `max_rows` rows (the total row of a
/// summary is always kept).
pub fn preview_view(view: &View, max_rows: usize) {
    println!("{}\n", view.title);
    let mut table = table_view(&view.data, Mode::Display);
    if table.rows.is_empty() {
        println!("(no rows)\n");
        return;
    }
    if table.rows.len() > max_rows {
        let keep_total = matches!(view.data, ViewData::Summary(_));
        let last = table.rows.pop();
        table.rows.truncate(max_rows);
        if let (true, Some(total)) = (keep_total, last) {
            table.rows.push(total);
        }
    }
    println!("{}\n", render_markdown(&table));
}

pub fn write_csv(path: &Path, view: &TableView) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    wtr.write_record(&view.headers)?;
    for r in &view.rows {
        wtr.write_record(r)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let s = serde_json::to_string_pretty(value)?;
    std::fs::write(path, s).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct ExportView<'a> {
    #[serde(flatten)]
    view: &'a View,
    bands: Vec<Vec<Band>>,
}

#[derive(Debug, Serialize)]
struct ExportReport<'a> {
    title: &'a str,
    load: &'a NormalizeReport,
    views: Vec<ExportView<'a>>,
}

/// Bands per rendered row, in ratio-column order.
pub fn view_bands(data: &ViewData) -> Vec<Vec<Band>> {
    match data {
        ViewData::Summary(t) => classify_table(t),
        ViewData::Register { ratios, rows, .. } => rows
            .iter()
            .map(|r| {
                ratios
                    .iter()
                    .map(|n| classify(r.ratio(n).unwrap_or(Ratio::Undefined)))
                    .collect()
            })
            .collect(),
        ViewData::Pivot(p) => p
            .cells
            .iter()
            .map(|row| row.iter().map(|r| classify(*r)).collect())
            .collect(),
    }
}

/// Write every view of `report` as `<stem>_<slug>.csv` plus one `<stem>.json`
/// holding all views with their bands. Returns the written paths.
pub fn export_report(dir: &Path, stem: &str, report: &Report) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let mut written = Vec::new();
    for view in &report.views {
        let path = dir.join(format!("{}_{}.csv", stem, view.slug));
        write_csv(&path, &table_view(&view.data, Mode::Export))?;
        written.push(path);
    }
    let export = ExportReport {
        title: &report.title,
        load: &report.load,
        views: report
            .views
            .iter()
            .map(|view| ExportView { view, bands: view_bands(&view.data) })
            .collect(),
    };
    let path = dir.join(format!("{}.json", stem));
    write_json(&path, &export)?;
    written.push(path);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate, GroupSpec};
    use crate::types::{NormalizedRow, RatioSpec, Schema};

    fn table() -> AggregateTable {
        let schema = Schema::new().measures(&["booked", "honored"]).dimension("facility");
        let mut a = NormalizedRow::default();
        a.dimensions.insert("facility".into(), "A".into());
        a.measures.insert("booked".into(), Some(1200.0));
        a.measures.insert("honored".into(), Some(600.0));
        let mut b = NormalizedRow::default();
        b.dimensions.insert("facility".into(), "B".into());
        b.measures.insert("booked".into(), Some(0.0));
        b.measures.insert("honored".into(), None);
        let spec = GroupSpec::new(&["facility"])
            .measures(&["booked", "honored"])
            .ratio(RatioSpec::new("% Honored", "honored", "booked"));
        aggregate(&[a, b], &schema, &spec).unwrap()
    }

    #[test]
    fn display_cells_format_counts_and_bands() {
        let view = summary_view(&table(), Mode::Display);
        assert_eq!(view.headers, vec!["facility", "booked", "honored", "% Honored"]);
        assert_eq!(view.rows[0], vec!["A", "1,200", "600", "50.0% [medium]"]);
        assert_eq!(view.rows[1], vec!["B", "0", "0", "n/a"]);
        assert_eq!(view.rows[2], vec!["Total", "1,200", "600", "50.0% [medium]"]);
    }

    #[test]
    fn export_cells_are_plain_with_band_columns() {
        let view = summary_view(&table(), Mode::Export);
        assert_eq!(
            view.headers,
            vec!["facility", "booked", "honored", "% Honored", "% Honored band"]
        );
        assert_eq!(view.rows[0], vec!["A", "1200", "600", "50.0000", "medium"]);
        assert_eq!(view.rows[1], vec!["B", "0", "0", "", "undefined"]);
    }

    #[test]
    fn markdown_has_header_separator() {
        let md = render_markdown(&summary_view(&table(), Mode::Display));
        let lines: Vec<&str> = md.lines().collect();
        assert!(lines[0].contains("facility"));
        assert!(lines[1].contains("---"));
        assert_eq!(lines.len(), 5);
    }
}
