// Concrete report definitions for the program-monitoring dashboards.
//
// Each dashboard is one schema plus a handful of views built with the
// shared pipeline: normalize -> filter -> aggregate / derive -> classify.
use crate::aggregate::{
    aggregate, apply_filter, count_by, pivot, DateRange, Filter, GroupSpec, Selection, SortOrder,
};
use crate::error::PipelineError;
use crate::metrics::derive_rows;
use crate::normalize::{
    derive_age_band, derive_span_dimension, field_present, normalize, NormalizeReport,
};
use crate::types::{AggregateTable, DerivedRow, PivotTable, RatioSpec, RawRecord, Schema};
use chrono::NaiveDate;
use log::{info, warn};
use once_cell::sync::Lazy;
use serde::Serialize;

pub const HTS_MEASURES: [&str; 5] = ["workload", "screened", "total_test", "total_pos", "hivst"];

pub static HTS_SCHEMA: Lazy<Schema> = Lazy::new(|| {
    Schema::new()
        .measures(&HTS_MEASURES)
        .date("date")
        .alias("date_test", "date")
        .dimensions(&["counselor", "facility"])
});

pub static HTS_RATIOS: Lazy<Vec<RatioSpec>> = Lazy::new(|| {
    vec![
        RatioSpec::new("% Screened", "screened", "workload"),
        RatioSpec::new("% Positive", "total_pos", "total_test"),
    ]
});

/// Measures the appointment views read. Other numeric columns of the form
/// (`ushauri`, `messages`, ...) vary between form versions and are not needed.
pub const APPOINTMENT_MEASURES: [&str; 5] =
    ["booked", "honored", "missed", "traced_back", "prior_call"];

pub static APPOINTMENT_SCHEMA: Lazy<Schema> = Lazy::new(|| {
    Schema::new()
        .measures(&APPOINTMENT_MEASURES)
        .date("date_start")
        .date("date_end")
        .alias("From (Friday Previous week):", "date_start")
        .alias("To (Thursday reporting week):", "date_end")
        .dimension("health_facility")
});

pub static APPOINTMENT_RATIOS: Lazy<Vec<RatioSpec>> = Lazy::new(|| {
    vec![
        RatioSpec::new("% Honored", "honored", "booked"),
        RatioSpec::new("% Traced Back", "traced_back", "missed"),
        RatioSpec::new("% Prior Called", "prior_call", "booked"),
    ]
});

pub const LTFU_OPTIONAL: [(&str, &str); 4] = [
    ("reasons", "Reasons for Missing an Appointment"),
    ("status", "Client Status on Day of Audit"),
    ("gender", "Gender Breakdown"),
    ("tracing", "Tracing Outcomes"),
];

/// Date-of-birth column of the LTFU audit form.
pub const LTFU_BIRTH_DATE: &str = "age";
pub const LTFU_AGE_BAND: &str = "age_band";

/// User-facing filters, mapped onto each dashboard's own fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub facility: Selection,
    /// Reference date for ages. The LTFU age section is skipped without one.
    pub as_of: Option<NaiveDate>,
}

impl Default for ReportFilter {
    fn default() -> Self {
        Self { from: None, to: None, facility: Selection::All, as_of: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewData {
    Summary(AggregateTable),
    Register {
        dimensions: Vec<String>,
        measures: Vec<String>,
        ratios: Vec<String>,
        rows: Vec<DerivedRow>,
    },
    Pivot(PivotTable),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct View {
    pub title: String,
    /// File-name friendly identifier, e.g. `summary_by_date`.
    pub slug: String,
    pub data: ViewData,
}

impl View {
    fn new(title: &str, slug: &str, data: ViewData) -> Self {
        Self { title: title.to_string(), slug: slug.to_string(), data }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub title: String,
    pub load: NormalizeReport,
    pub views: Vec<View>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dashboard {
    Hts,
    Appointments,
    Ltfu,
}

impl Dashboard {
    pub fn title(self) -> &'static str {
        match self {
            Dashboard::Hts => "HTS Summary Reports",
            Dashboard::Appointments => "Weekly Appointment Dashboard",
            Dashboard::Ltfu => "LTFU Audit Data Summary",
        }
    }

    pub fn build(
        self,
        records: &[RawRecord],
        filter: &ReportFilter,
    ) -> Result<Report, PipelineError> {
        let report = match self {
            Dashboard::Hts => hts_report(records, filter),
            Dashboard::Appointments => appointments_report(records, filter),
            Dashboard::Ltfu => ltfu_report(records, filter),
        }?;
        info!(
            "{}: {} views from {} records",
            report.title,
            report.views.len(),
            records.len()
        );
        Ok(report)
    }
}

/// Testing throughput summarised by date, counselor and facility.
pub fn hts_report(records: &[RawRecord], filter: &ReportFilter) -> Result<Report, PipelineError> {
    let schema = &*HTS_SCHEMA;
    let (rows, load) = normalize(records, schema)?;
    let filter = Filter::new()
        .range(DateRange::on("date", filter.from, filter.to))
        .dimension("facility", filter.facility.clone());
    let rows = apply_filter(&rows, schema, &filter)?;

    let by = |key: &str| -> Result<ViewData, PipelineError> {
        let spec = GroupSpec::new(&[key])
            .measures(&HTS_MEASURES)
            .ratios(&HTS_RATIOS)
            .sorted(SortOrder::KeyAscending);
        aggregate(&rows, schema, &spec).map(ViewData::Summary)
    };

    Ok(Report {
        title: Dashboard::Hts.title().to_string(),
        load,
        views: vec![
            View::new("Summary by Date", "summary_by_date", by("date")?),
            View::new("Summary by Counselor", "summary_by_counselor", by("counselor")?),
            View::new("Summary by Facility", "summary_by_facility", by("facility")?),
        ],
    })
}

/// Appointment adherence: per-record register, weekly trend and the
/// facility x week heatmap.
///
/// The date range and facility selection apply to the register only. The
/// weekly trend and the heatmap cover every record with both dates.
pub fn appointments_report(
    records: &[RawRecord],
    filter: &ReportFilter,
) -> Result<Report, PipelineError> {
    let (rows, load) = normalize(records, &APPOINTMENT_SCHEMA)?;
    let schema = APPOINTMENT_SCHEMA.clone().dimension("week");
    let rows = derive_span_dimension(&rows, "week", "date_start", "date_end");

    let range = DateRange::span("date_start", "date_end", filter.from, filter.to);
    let selected = Filter::new()
        .range(range)
        .dimension("health_facility", filter.facility.clone());
    let selected = apply_filter(&rows, &schema, &selected)?;

    let register = derive_rows(&selected, &schema, &APPOINTMENT_RATIOS)?;

    let dated = Filter::new().require_date("date_start").require_date("date_end");
    let dated = apply_filter(&rows, &schema, &dated)?;
    let weekly = GroupSpec::new(&["week"])
        .measures(&["booked", "honored", "missed", "traced_back"])
        .ratios(&APPOINTMENT_RATIOS[..2])
        .sorted(SortOrder::KeyAscending);
    let weekly = aggregate(&dated, &schema, &weekly)?;

    let heatmap = pivot(&dated, &schema, "health_facility", "week", &APPOINTMENT_RATIOS[0])?;

    Ok(Report {
        title: Dashboard::Appointments.title().to_string(),
        load,
        views: vec![
            View::new(
                "Weekly Appointment Data",
                "weekly_appointment_data",
                ViewData::Register {
                    dimensions: vec!["health_facility".to_string()],
                    measures: APPOINTMENT_MEASURES.iter().map(|m| m.to_string()).collect(),
                    ratios: APPOINTMENT_RATIOS.iter().map(|r| r.name.clone()).collect(),
                    rows: register,
                },
            ),
            View::new("Weekly Trends", "weekly_trends", ViewData::Summary(weekly)),
            View::new(
                "Facility-wise % Honored by Week",
                "honored_by_week",
                ViewData::Pivot(heatmap),
            ),
        ],
    })
}

/// Loss-to-follow-up audit counts. Sections whose column is missing from the
/// data are skipped.
///
/// The age distribution bins whole years since the `age` date of birth,
/// counted up to `filter.as_of`.
pub fn ltfu_report(
    records: &[RawRecord],
    filter: &ReportFilter,
) -> Result<Report, PipelineError> {
    let mut schema = Schema::new().dimension("health_facility");
    let mut sections = vec![("health_facility", "Facilities Audited")];
    for (field, title) in LTFU_OPTIONAL {
        if field_present(records, &schema, field) {
            schema = schema.dimension(field);
            sections.push((field, title));
        } else {
            warn!("column `{}` not found in data; skipping \"{}\"", field, title);
        }
    }

    let as_of = match filter.as_of {
        Some(day) if field_present(records, &schema, LTFU_BIRTH_DATE) => {
            schema = schema.date(LTFU_BIRTH_DATE);
            Some(day)
        }
        Some(_) => {
            warn!("column `{}` not found in data; skipping \"Age Distribution\"", LTFU_BIRTH_DATE);
            None
        }
        None => {
            warn!("no reference date given; skipping \"Age Distribution\"");
            None
        }
    };

    let (rows, load) = normalize(records, &schema)?;
    let facility = Filter::new().dimension("health_facility", filter.facility.clone());
    let rows = apply_filter(&rows, &schema, &facility)?;

    let mut views = Vec::with_capacity(sections.len() + 1);
    for (field, title) in sections {
        let table = count_by(&rows, &schema, field)?;
        views.push(View::new(title, &format!("{}_counts", field), ViewData::Summary(table)));
    }

    if let Some(as_of) = as_of {
        let rows = derive_age_band(&rows, LTFU_AGE_BAND, LTFU_BIRTH_DATE, as_of);
        let schema = schema.dimension(LTFU_AGE_BAND);
        let spec = GroupSpec::new(&[LTFU_AGE_BAND]).sorted(SortOrder::KeyAscending);
        let table = aggregate(&rows, &schema, &spec)?;
        views.push(View::new("Age Distribution", "age_band_counts", ViewData::Summary(table)));
    }

    Ok(Report { title: Dashboard::Ltfu.title().to_string(), load, views })
}
