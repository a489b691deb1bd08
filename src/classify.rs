use crate::types::{AggregateTable, Ratio};
use serde::Serialize;
use std::fmt;

pub const HIGH_THRESHOLD: f64 = 90.0;
pub const MEDIUM_THRESHOLD: f64 = 50.0;

/// Display band of a ratio. Bands are computed for presentation and are never
/// written back into an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    High,
    Medium,
    Low,
    Undefined,
}

impl Band {
    /// Cell background used by the dashboards.
    pub fn colour(self) -> Option<&'static str> {
        match self {
            Band::High => Some("lightgreen"),
            Band::Medium => Some("khaki"),
            Band::Low => Some("lightcoral"),
            Band::Undefined => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Band::High => "high",
            Band::Medium => "medium",
            Band::Low => "low",
            Band::Undefined => "undefined",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify(ratio: Ratio) -> Band {
    match ratio {
        Ratio::Undefined => Band::Undefined,
        Ratio::Value(v) if v >= HIGH_THRESHOLD => Band::High,
        Ratio::Value(v) if v >= MEDIUM_THRESHOLD => Band::Medium,
        Ratio::Value(_) => Band::Low,
    }
}

/// Bands for every ratio cell of `table`, one inner vector per row of
/// `table.rows()` in the order of `table.ratios`.
pub fn classify_table(table: &AggregateTable) -> Vec<Vec<Band>> {
    table
        .rows()
        .map(|row| {
            table
                .ratios
                .iter()
                .map(|name| classify(row.ratio(name).unwrap_or(Ratio::Undefined)))
                .collect()
        })
        .collect()
}
