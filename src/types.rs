use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Category used for a missing dimension value and for rows whose grouping date
/// could not be parsed.
pub const UNKNOWN: &str = "Unknown";

/// Label of the synthetic row appended to every aggregate table.
pub const TOTAL: &str = "Total";

/// A single value of a fetched record before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
    Missing,
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Cell::Number(n)
    }
}

/// A flat key/value record as delivered by a form-data source. Keys vary by
/// form version and deployment.
pub type RawRecord = HashMap<String, Cell>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Measure,
    Date,
    Dimension,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldKind::Measure => "measure",
            FieldKind::Date => "date",
            FieldKind::Dimension => "dimension",
        };
        f.write_str(s)
    }
}

/// Declares which fields of a raw record are measures, dates and dimensions.
///
/// `aliases` maps raw source keys onto canonical field names, e.g. the long
/// question label of a form onto a short column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub measures: Vec<String>,
    pub dates: Vec<String>,
    pub dimensions: Vec<String>,
    pub aliases: Vec<(String, String)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn measures(mut self, names: &[&str]) -> Self {
        self.measures.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn date(mut self, name: &str) -> Self {
        self.dates.push(name.to_string());
        self
    }

    pub fn dimension(mut self, name: &str) -> Self {
        self.dimensions.push(name.to_string());
        self
    }

    pub fn dimensions(mut self, names: &[&str]) -> Self {
        self.dimensions.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn alias(mut self, source_key: &str, field: &str) -> Self {
        self.aliases.push((source_key.to_string(), field.to_string()));
        self
    }

    /// Raw keys that may carry `field`: the canonical name first, then its aliases.
    pub fn source_keys<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        std::iter::once(field).chain(
            self.aliases
                .iter()
                .filter(move |(_, f)| f == field)
                .map(|(k, _)| k.as_str()),
        )
    }

    pub fn kind_of(&self, field: &str) -> Option<FieldKind> {
        if self.measures.iter().any(|m| m == field) {
            Some(FieldKind::Measure)
        } else if self.dates.iter().any(|d| d == field) {
            Some(FieldKind::Date)
        } else if self.dimensions.iter().any(|d| d == field) {
            Some(FieldKind::Dimension)
        } else {
            None
        }
    }

    /// Every declared field in declaration order: measures, then dates, then dimensions.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.measures
            .iter()
            .chain(self.dates.iter())
            .chain(self.dimensions.iter())
            .map(String::as_str)
    }
}

/// A record collapsed onto a fixed schema. A measure is `None` when it was
/// absent or unparseable; it is never a non-finite number.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizedRow {
    pub measures: BTreeMap<String, Option<f64>>,
    pub dates: BTreeMap<String, Option<NaiveDate>>,
    pub dimensions: BTreeMap<String, String>,
}

impl NormalizedRow {
    pub fn measure(&self, name: &str) -> Option<f64> {
        self.measures.get(name).copied().flatten()
    }

    pub fn date(&self, name: &str) -> Option<NaiveDate> {
        self.dates.get(name).copied().flatten()
    }

    pub fn dimension(&self, name: &str) -> Option<&str> {
        self.dimensions.get(name).map(String::as_str)
    }
}

/// A percentage, or `Undefined` when the denominator was zero or missing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ratio {
    Value(f64),
    Undefined,
}

impl Ratio {
    pub fn value(self) -> Option<f64> {
        match self {
            Ratio::Value(v) => Some(v),
            Ratio::Undefined => None,
        }
    }

    pub fn is_undefined(self) -> bool {
        matches!(self, Ratio::Undefined)
    }
}

impl Serialize for Ratio {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Ratio::Value(v) => serializer.serialize_some(v),
            Ratio::Undefined => serializer.serialize_none(),
        }
    }
}

/// `name = 100 * numerator / denominator`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatioSpec {
    pub name: String,
    pub numerator: String,
    pub denominator: String,
}

impl RatioSpec {
    pub fn new(name: &str, numerator: &str, denominator: &str) -> Self {
        Self {
            name: name.to_string(),
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedRatio {
    pub name: String,
    pub value: Ratio,
}

/// A normalized row together with its own ratios.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedRow {
    pub row: NormalizedRow,
    pub ratios: Vec<NamedRatio>,
}

impl DerivedRow {
    pub fn ratio(&self, name: &str) -> Option<Ratio> {
        find_ratio(&self.ratios, name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    /// One value per grouping field; `["Total", "", ..]` on the total row.
    pub key: Vec<String>,
    /// Number of normalized rows folded into this group.
    pub count: usize,
    pub measures: BTreeMap<String, f64>,
    pub ratios: Vec<NamedRatio>,
}

impl AggregateRow {
    pub fn measure(&self, name: &str) -> Option<f64> {
        self.measures.get(name).copied()
    }

    pub fn ratio(&self, name: &str) -> Option<Ratio> {
        find_ratio(&self.ratios, name)
    }
}

/// Grouped rows plus exactly one trailing total row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateTable {
    pub keys: Vec<String>,
    pub measures: Vec<String>,
    pub ratios: Vec<String>,
    pub groups: Vec<AggregateRow>,
    pub total: AggregateRow,
}

impl AggregateTable {
    /// Groups in table order followed by the total row.
    pub fn rows(&self) -> impl Iterator<Item = &AggregateRow> {
        self.groups.iter().chain(std::iter::once(&self.total))
    }

    pub fn group(&self, key: &[&str]) -> Option<&AggregateRow> {
        self.groups
            .iter()
            .find(|g| g.key.iter().map(String::as_str).eq(key.iter().copied()))
    }
}

/// One ratio laid out over two dimensions (rows x columns).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotTable {
    pub row_field: String,
    pub column_field: String,
    pub ratio: String,
    pub row_labels: Vec<String>,
    pub column_labels: Vec<String>,
    pub cells: Vec<Vec<Ratio>>,
}

impl PivotTable {
    pub fn cell(&self, row: &str, column: &str) -> Option<Ratio> {
        let r = self.row_labels.iter().position(|l| l == row)?;
        let c = self.column_labels.iter().position(|l| l == column)?;
        Some(self.cells[r][c])
    }
}

fn find_ratio(ratios: &[NamedRatio], name: &str) -> Option<Ratio> {
    ratios.iter().find(|r| r.name == name).map(|r| r.value)
}
