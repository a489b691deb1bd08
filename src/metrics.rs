// Derived percentage columns.
//
// `ratio = 100 * numerator / denominator`, with two explicit rules:
// - a zero or missing denominator yields `Ratio::Undefined` ("no opportunity"),
// - a missing numerator over a usable denominator yields 0.0 ("no events").
use crate::error::PipelineError;
use crate::types::{
    AggregateRow, DerivedRow, FieldKind, NamedRatio, NormalizedRow, Ratio, RatioSpec, Schema,
};

/// Anything that can answer "what is measure X on this row".
pub trait Measures {
    fn measure_value(&self, name: &str) -> Option<f64>;
}

impl Measures for NormalizedRow {
    fn measure_value(&self, name: &str) -> Option<f64> {
        self.measure(name)
    }
}

impl Measures for AggregateRow {
    fn measure_value(&self, name: &str) -> Option<f64> {
        self.measure(name)
    }
}

pub fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Ratio {
    match denominator {
        Some(d) if d != 0.0 => Ratio::Value(100.0 * numerator.unwrap_or(0.0) / d),
        _ => Ratio::Undefined,
    }
}

pub fn derive_ratios<M: Measures>(row: &M, specs: &[RatioSpec]) -> Vec<NamedRatio> {
    specs
        .iter()
        .map(|spec| NamedRatio {
            name: spec.name.clone(),
            value: ratio(row.measure_value(&spec.numerator), row.measure_value(&spec.denominator)),
        })
        .collect()
}

/// Both operands of every spec must be declared measures.
pub fn check_specs(schema: &Schema, specs: &[RatioSpec]) -> Result<(), PipelineError> {
    for spec in specs {
        for field in [&spec.numerator, &spec.denominator] {
            if schema.kind_of(field) != Some(FieldKind::Measure) {
                return Err(PipelineError::Undeclared {
                    field: field.clone(),
                    expected: FieldKind::Measure,
                });
            }
        }
    }
    Ok(())
}

/// Each row with its own ratios attached; no grouping and no total row.
pub fn derive_rows(
    rows: &[NormalizedRow],
    schema: &Schema,
    specs: &[RatioSpec],
) -> Result<Vec<DerivedRow>, PipelineError> {
    check_specs(schema, specs)?;
    Ok(rows
        .iter()
        .map(|row| DerivedRow { row: row.clone(), ratios: derive_ratios(row, specs) })
        .collect())
}
