use crate::error::PipelineError;
use crate::metrics::{check_specs, derive_ratios};
use crate::types::{
    AggregateRow, AggregateTable, FieldKind, NormalizedRow, PivotTable, Ratio, RatioSpec, Schema,
    TOTAL, UNKNOWN,
};
use chrono::NaiveDate;
use log::debug;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::str::FromStr;

/// A dimension filter value; `All` disables filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Only(String),
}

impl FromStr for Selection {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            Ok(Selection::All)
        } else {
            Ok(Selection::Only(s.to_string()))
        }
    }
}

/// Inclusive date bounds. The lower bound is tested against `start_field` and
/// the upper bound against `end_field`; both are the same field for a plain
/// single-date range. A row missing a bounded date does not match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub start_field: String,
    pub end_field: String,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn on(field: &str, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self::span(field, field, from, to)
    }

    pub fn span(
        start_field: &str,
        end_field: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Self {
        Self { start_field: start_field.to_string(), end_field: end_field.to_string(), from, to }
    }

    fn matches(&self, row: &NormalizedRow) -> bool {
        let lower = self
            .from
            .map_or(true, |from| row.date(&self.start_field).is_some_and(|d| d >= from));
        let upper = self.to.map_or(true, |to| row.date(&self.end_field).is_some_and(|d| d <= to));
        lower && upper
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub date_range: Option<DateRange>,
    pub dimension: Option<(String, Selection)>,
    /// Rows missing any of these dates are dropped.
    pub require_dates: Vec<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn dimension(mut self, field: &str, selection: Selection) -> Self {
        self.dimension = Some((field.to_string(), selection));
        self
    }

    pub fn require_date(mut self, field: &str) -> Self {
        self.require_dates.push(field.to_string());
        self
    }

    fn check(&self, schema: &Schema) -> Result<(), PipelineError> {
        if let Some(range) = &self.date_range {
            expect_kind(schema, &range.start_field, FieldKind::Date)?;
            expect_kind(schema, &range.end_field, FieldKind::Date)?;
        }
        if let Some((field, _)) = &self.dimension {
            expect_kind(schema, field, FieldKind::Dimension)?;
        }
        for field in &self.require_dates {
            expect_kind(schema, field, FieldKind::Date)?;
        }
        Ok(())
    }

    fn matches(&self, row: &NormalizedRow) -> bool {
        if let Some(range) = &self.date_range {
            if !range.matches(row) {
                return false;
            }
        }
        if let Some((field, Selection::Only(value))) = &self.dimension {
            if row.dimension(field) != Some(value.as_str()) {
                return false;
            }
        }
        self.require_dates.iter().all(|f| row.date(f).is_some())
    }
}

/// Rows of `rows` that pass `filter`, in their original order.
pub fn apply_filter(
    rows: &[NormalizedRow],
    schema: &Schema,
    filter: &Filter,
) -> Result<Vec<NormalizedRow>, PipelineError> {
    filter.check(schema)?;
    let kept: Vec<NormalizedRow> = rows.iter().filter(|r| filter.matches(r)).cloned().collect();
    debug!("filter kept {} of {} rows", kept.len(), rows.len());
    Ok(kept)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Order in which each key first appears in the input.
    #[default]
    FirstSeen,
    KeyAscending,
    CountDescending,
    MeasureDescending(String),
}

/// What to group by, what to sum, and which ratios to recompute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupSpec {
    pub keys: Vec<String>,
    pub measures: Vec<String>,
    pub ratios: Vec<RatioSpec>,
    pub sort: SortOrder,
}

impl GroupSpec {
    pub fn new(keys: &[&str]) -> Self {
        Self { keys: keys.iter().map(|k| k.to_string()).collect(), ..Default::default() }
    }

    pub fn measures(mut self, names: &[&str]) -> Self {
        self.measures.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn ratio(mut self, spec: RatioSpec) -> Self {
        self.ratios.push(spec);
        self
    }

    pub fn ratios(mut self, specs: &[RatioSpec]) -> Self {
        self.ratios.extend(specs.iter().cloned());
        self
    }

    pub fn sorted(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    /// Requested measures followed by any ratio operand not already listed.
    fn summed(&self) -> Vec<String> {
        let mut out = self.measures.clone();
        for spec in &self.ratios {
            for m in [&spec.numerator, &spec.denominator] {
                if !out.contains(m) {
                    out.push(m.clone());
                }
            }
        }
        out
    }
}

/// Group `rows` by `spec.keys`, summing measures and recomputing ratios from
/// the sums. Missing measures add nothing to a sum. The total row is the same
/// fold over every row with no key, so it reconciles with the groups.
pub fn aggregate(
    rows: &[NormalizedRow],
    schema: &Schema,
    spec: &GroupSpec,
) -> Result<AggregateTable, PipelineError> {
    let keys = key_kinds(schema, &spec.keys)?;
    check_specs(schema, &spec.ratios)?;
    let summed = spec.summed();
    for m in &summed {
        expect_kind(schema, m, FieldKind::Measure)?;
    }
    if let SortOrder::MeasureDescending(m) = &spec.sort {
        if !summed.contains(m) {
            return Err(PipelineError::Undeclared {
                field: m.clone(),
                expected: FieldKind::Measure,
            });
        }
    }

    let mut groups = fold(rows, &summed, |row| {
        keys.iter().map(|(field, kind)| key_value(row, field, *kind)).collect()
    });
    for g in &mut groups {
        g.ratios = derive_ratios(&*g, &spec.ratios);
    }
    sort_groups(&mut groups, &spec.sort);

    let mut total = fold(rows, &summed, |_| Vec::new())
        .pop()
        .unwrap_or_else(|| empty_row(Vec::new(), &summed));
    total.key = total_key(spec.keys.len());
    total.ratios = derive_ratios(&total, &spec.ratios);

    debug!("aggregated {} rows into {} groups by {:?}", rows.len(), groups.len(), spec.keys);
    Ok(AggregateTable {
        keys: spec.keys.clone(),
        measures: summed,
        ratios: spec.ratios.iter().map(|r| r.name.clone()).collect(),
        groups,
        total,
    })
}

/// Row counts per value of `field`, most frequent first, plus a total.
pub fn count_by(
    rows: &[NormalizedRow],
    schema: &Schema,
    field: &str,
) -> Result<AggregateTable, PipelineError> {
    aggregate(rows, schema, &GroupSpec::new(&[field]).sorted(SortOrder::CountDescending))
}

/// `ratio` recomputed for every (`row_field`, `column_field`) combination.
/// Both axes are sorted; combinations with no rows are `Undefined`.
pub fn pivot(
    rows: &[NormalizedRow],
    schema: &Schema,
    row_field: &str,
    column_field: &str,
    ratio: &RatioSpec,
) -> Result<PivotTable, PipelineError> {
    let spec = GroupSpec::new(&[row_field, column_field])
        .ratio(ratio.clone())
        .sorted(SortOrder::KeyAscending);
    let table = aggregate(rows, schema, &spec)?;

    let mut row_labels: Vec<String> = Vec::new();
    let mut column_labels: Vec<String> = Vec::new();
    for g in &table.groups {
        if !row_labels.contains(&g.key[0]) {
            row_labels.push(g.key[0].clone());
        }
        if !column_labels.contains(&g.key[1]) {
            column_labels.push(g.key[1].clone());
        }
    }
    column_labels.sort();

    let cells = row_labels
        .iter()
        .map(|r| {
            column_labels
                .iter()
                .map(|c| {
                    table
                        .group(&[r.as_str(), c.as_str()])
                        .and_then(|g| g.ratio(&ratio.name))
                        .unwrap_or(Ratio::Undefined)
                })
                .collect()
        })
        .collect();

    Ok(PivotTable {
        row_field: row_field.to_string(),
        column_field: column_field.to_string(),
        ratio: ratio.name.clone(),
        row_labels,
        column_labels,
        cells,
    })
}

fn fold<F>(rows: &[NormalizedRow], summed: &[String], key_fn: F) -> Vec<AggregateRow>
where
    F: Fn(&NormalizedRow) -> Vec<String>,
{
    let mut out: Vec<AggregateRow> = Vec::new();
    let mut index: HashMap<Vec<String>, usize> = HashMap::new();
    for row in rows {
        let key = key_fn(row);
        let idx = *index.entry(key.clone()).or_insert_with(|| {
            out.push(empty_row(key, summed));
            out.len() - 1
        });
        let acc = &mut out[idx];
        acc.count += 1;
        for m in summed {
            *acc.measures.entry(m.clone()).or_insert(0.0) += row.measure(m).unwrap_or(0.0);
        }
    }
    out
}

fn empty_row(key: Vec<String>, summed: &[String]) -> AggregateRow {
    AggregateRow {
        key,
        count: 0,
        measures: summed.iter().map(|m| (m.clone(), 0.0)).collect::<BTreeMap<_, _>>(),
        ratios: Vec::new(),
    }
}

fn total_key(width: usize) -> Vec<String> {
    let mut key = vec![TOTAL.to_string()];
    key.extend(std::iter::repeat(String::new()).take(width.saturating_sub(1)));
    key
}

fn sort_groups(groups: &mut [AggregateRow], sort: &SortOrder) {
    match sort {
        SortOrder::FirstSeen => {}
        SortOrder::KeyAscending => groups.sort_by(|a, b| a.key.cmp(&b.key)),
        SortOrder::CountDescending => groups.sort_by(|a, b| b.count.cmp(&a.count)),
        SortOrder::MeasureDescending(m) => groups.sort_by(|a, b| {
            let (x, y) = (a.measure(m).unwrap_or(0.0), b.measure(m).unwrap_or(0.0));
            y.partial_cmp(&x).unwrap_or(Ordering::Equal)
        }),
    }
}

fn key_kinds(schema: &Schema, keys: &[String]) -> Result<Vec<(String, FieldKind)>, PipelineError> {
    keys.iter()
        .map(|k| match schema.kind_of(k) {
            Some(FieldKind::Measure) => Err(PipelineError::MeasureAsKey { field: k.clone() }),
            Some(kind) => Ok((k.clone(), kind)),
            None => Err(PipelineError::Undeclared {
                field: k.clone(),
                expected: FieldKind::Dimension,
            }),
        })
        .collect()
}

fn key_value(row: &NormalizedRow, field: &str, kind: FieldKind) -> String {
    match kind {
        FieldKind::Date => row
            .date(field)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| UNKNOWN.to_string()),
        _ => row.dimension(field).unwrap_or(UNKNOWN).to_string(),
    }
}

fn expect_kind(schema: &Schema, field: &str, expected: FieldKind) -> Result<(), PipelineError> {
    if schema.kind_of(field) == Some(expected) {
        Ok(())
    } else {
        Err(PipelineError::Undeclared { field: field.to_string(), expected })
    }
}
