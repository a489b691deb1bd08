use crate::error::PipelineError;
use crate::types::{Cell, NormalizedRow, RawRecord, Schema, UNKNOWN};
use crate::util::{cell_to_date, cell_to_f64, cell_to_label};
use chrono::NaiveDate;
use log::debug;
use serde::Serialize;

/// Tallies of what had to be degraded while normalizing a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeReport {
    pub total_rows: usize,
    pub missing_measures: usize,
    pub missing_dates: usize,
    pub unknown_dimensions: usize,
}

/// Collapse raw records onto `schema`, one normalized row per record.
///
/// - Measures that are absent or unparseable become `None`.
/// - Dates that are absent or unparseable become `None`; the row is kept.
/// - Dimensions are trimmed; absent or blank values become `"Unknown"`.
///
/// Fails only when a declared field appears in none of the records.
pub fn normalize(
    records: &[RawRecord],
    schema: &Schema,
) -> Result<(Vec<NormalizedRow>, NormalizeReport), PipelineError> {
    if !records.is_empty() {
        if let Some(field) = schema.fields().find(|f| !field_present(records, schema, f)) {
            return Err(PipelineError::FieldAbsent { field: field.to_string() });
        }
    }

    let mut report = NormalizeReport { total_rows: records.len(), ..Default::default() };
    let mut rows = Vec::with_capacity(records.len());

    for record in records {
        let mut row = NormalizedRow::default();
        for field in &schema.measures {
            let v = cell_to_f64(lookup(record, schema, field));
            if v.is_none() {
                report.missing_measures += 1;
            }
            row.measures.insert(field.clone(), v);
        }
        for field in &schema.dates {
            let d = cell_to_date(lookup(record, schema, field));
            if d.is_none() {
                report.missing_dates += 1;
            }
            row.dates.insert(field.clone(), d);
        }
        for field in &schema.dimensions {
            let label = cell_to_label(lookup(record, schema, field)).unwrap_or_else(|| {
                report.unknown_dimensions += 1;
                UNKNOWN.to_string()
            });
            row.dimensions.insert(field.clone(), label);
        }
        rows.push(row);
    }

    debug!(
        "normalized {} rows ({} missing measures, {} missing dates, {} unknown dimensions)",
        report.total_rows, report.missing_measures, report.missing_dates, report.unknown_dimensions
    );
    Ok((rows, report))
}

/// Whether any record carries `field` under its own name or one of its aliases.
pub fn field_present(records: &[RawRecord], schema: &Schema, field: &str) -> bool {
    records
        .iter()
        .any(|r| schema.source_keys(field).any(|k| r.contains_key(k)))
}

/// First non-missing value among the field's source keys.
fn lookup<'a>(record: &'a RawRecord, schema: &Schema, field: &str) -> Option<&'a Cell> {
    let mut found = None;
    for key in schema.source_keys(field) {
        match record.get(key) {
            Some(missing @ Cell::Missing) => found = found.or(Some(missing)),
            Some(cell) => return Some(cell),
            None => {}
        }
    }
    found
}

/// Copies of `rows` with an extra dimension `name` labelled
/// `"<start> to <end>"`, or `"Unknown"` when either date is missing.
pub fn derive_span_dimension(
    rows: &[NormalizedRow],
    name: &str,
    start: &str,
    end: &str,
) -> Vec<NormalizedRow> {
    rows.iter()
        .map(|row| {
            let label = match (row.date(start), row.date(end)) {
                (Some(s), Some(e)) => {
                    format!("{} to {}", s.format("%Y-%m-%d"), e.format("%Y-%m-%d"))
                }
                _ => UNKNOWN.to_string(),
            };
            let mut out = row.clone();
            out.dimensions.insert(name.to_string(), label);
            out
        })
        .collect()
}

/// Width in years of one age band.
pub const AGE_BAND_YEARS: i64 = 5;
/// Number of age bands; the last one is open-ended.
pub const AGE_BANDS: i64 = 20;

/// Whole years from `birth` to `as_of`, counting a year as 365 days.
/// `None` for a birth date after `as_of`.
pub fn age_in_years(birth: NaiveDate, as_of: NaiveDate) -> Option<i64> {
    let days = (as_of - birth).num_days();
    (days >= 0).then(|| days / 365)
}

/// `"00-04"`, `"05-09"`, ... up to an open-ended `"95+"`. Zero-padded so that
/// the labels sort in age order.
pub fn age_band_label(years: i64) -> String {
    let band = (years / AGE_BAND_YEARS).min(AGE_BANDS - 1);
    let low = band * AGE_BAND_YEARS;
    if band == AGE_BANDS - 1 {
        format!("{:02}+", low)
    } else {
        format!("{:02}-{:02}", low, low + AGE_BAND_YEARS - 1)
    }
}

/// Copies of `rows` with an extra dimension `name` holding the age band of
/// the date of birth in `birth`, or `"Unknown"` when it is missing or later
/// than `as_of`.
pub fn derive_age_band(
    rows: &[NormalizedRow],
    name: &str,
    birth: &str,
    as_of: NaiveDate,
) -> Vec<NormalizedRow> {
    rows.iter()
        .map(|row| {
            let label = row
                .date(birth)
                .and_then(|b| age_in_years(b, as_of))
                .map(age_band_label)
                .unwrap_or_else(|| UNKNOWN.to_string());
            let mut out = row.clone();
            out.dimensions.insert(name.to_string(), label);
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, Cell)]) -> RawRecord {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn schema() -> Schema {
        Schema::new()
            .measures(&["booked", "honored"])
            .date("date_start")
            .dimension("facility")
            .alias("From (Friday Previous week):", "date_start")
    }

    #[test]
    fn junk_degrades_to_missing_without_dropping_rows() {
        let records = vec![
            record(&[
                ("facility", Cell::from(" A ")),
                ("booked", Cell::Number(10.0)),
                ("honored", Cell::from("9")),
                ("date_start", Cell::from("2024-05-03")),
            ]),
            record(&[
                ("facility", Cell::Missing),
                ("booked", Cell::from("lots")),
                ("date_start", Cell::from("yesterday")),
            ]),
        ];
        let (rows, report) = normalize(&records, &schema()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].dimension("facility"), Some("A"));
        assert_eq!(rows[0].measure("honored"), Some(9.0));
        assert_eq!(rows[0].date("date_start"), NaiveDate::from_ymd_opt(2024, 5, 3));
        assert_eq!(rows[1].dimension("facility"), Some(UNKNOWN));
        assert_eq!(rows[1].measure("booked"), None);
        assert_eq!(rows[1].measure("honored"), None);
        assert_eq!(rows[1].date("date_start"), None);
        assert_eq!(
            report,
            NormalizeReport {
                total_rows: 2,
                missing_measures: 2,
                missing_dates: 1,
                unknown_dimensions: 1,
            }
        );
    }

    #[test]
    fn aliases_feed_canonical_fields() {
        let records = vec![record(&[
            ("facility", Cell::from("A")),
            ("booked", Cell::Number(1.0)),
            ("honored", Cell::Number(1.0)),
            ("From (Friday Previous week):", Cell::from("2024-05-03")),
        ])];
        let (rows, _) = normalize(&records, &schema()).unwrap();
        assert_eq!(rows[0].date("date_start"), NaiveDate::from_ymd_opt(2024, 5, 3));
    }

    #[test]
    fn field_absent_everywhere_is_a_configuration_error() {
        let records = vec![record(&[("facility", Cell::from("A")), ("booked", Cell::Number(1.0))])];
        let err = normalize(&records, &schema()).unwrap_err();
        assert_eq!(err, PipelineError::FieldAbsent { field: "honored".to_string() });
    }

    #[test]
    fn empty_batch_normalizes_to_nothing() {
        let (rows, report) = normalize(&[], &schema()).unwrap();
        assert!(rows.is_empty());
        assert_eq!(report.total_rows, 0);
    }

    #[test]
    fn span_labels_need_both_dates() {
        let mut row = NormalizedRow::default();
        row.dates.insert("s".into(), NaiveDate::from_ymd_opt(2024, 5, 3));
        row.dates.insert("e".into(), NaiveDate::from_ymd_opt(2024, 5, 9));
        let mut partial = row.clone();
        partial.dates.insert("e".into(), None);

        let out = derive_span_dimension(&[row.clone(), partial], "week", "s", "e");
        assert_eq!(out[0].dimension("week"), Some("2024-05-03 to 2024-05-09"));
        assert_eq!(out[1].dimension("week"), Some(UNKNOWN));
        assert_eq!(row.dimension("week"), None);
    }

    #[test]
    fn ages_are_whole_years_of_365_days() {
        let as_of = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let born = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert_eq!(age_in_years(born(2024, 6, 1), as_of), Some(0));
        assert_eq!(age_in_years(born(1994, 6, 1), as_of), Some(30));
        assert_eq!(age_in_years(born(1994, 6, 10), as_of), Some(29));
        assert_eq!(age_in_years(born(2024, 6, 2), as_of), None);
    }

    #[test]
    fn age_bands_are_five_years_wide_and_capped() {
        assert_eq!(age_band_label(0), "00-04");
        assert_eq!(age_band_label(9), "05-09");
        assert_eq!(age_band_label(34), "30-34");
        assert_eq!(age_band_label(94), "90-94");
        assert_eq!(age_band_label(95), "95+");
        assert_eq!(age_band_label(120), "95+");
    }

    #[test]
    fn age_band_dimension_falls_back_to_unknown() {
        let as_of = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let mut adult = NormalizedRow::default();
        adult.dates.insert("age".into(), NaiveDate::from_ymd_opt(1990, 1, 15));
        let mut unborn = NormalizedRow::default();
        unborn.dates.insert("age".into(), NaiveDate::from_ymd_opt(2030, 1, 1));
        let out = derive_age_band(&[adult, unborn, NormalizedRow::default()], "band", "age", as_of);
        let bands: Vec<Option<&str>> = out.iter().map(|r| r.dimension("band")).collect();
        assert_eq!(bands, vec![Some("30-34"), Some(UNKNOWN), Some(UNKNOWN)]);
    }
}
