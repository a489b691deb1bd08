//! Aggregation pipeline for health-program monitoring reports.
//!
//! Raw form submissions are normalized onto a fixed schema, optionally
//! filtered, grouped with ratio-of-sums percentages and a reconciling total
//! row, and finally banded for display.
pub mod aggregate;
pub mod classify;
pub mod dashboards;
pub mod error;
pub mod metrics;
pub mod normalize;
pub mod output;
pub mod source;
pub mod types;
pub mod util;

pub use aggregate::{
    aggregate, apply_filter, count_by, pivot, DateRange, Filter, GroupSpec, Selection, SortOrder,
};
pub use classify::{classify, Band};
pub use error::{PipelineError, SourceError};
pub use metrics::{derive_ratios, derive_rows, ratio};
pub use normalize::{normalize, NormalizeReport};
pub use types::{
    AggregateRow, AggregateTable, Cell, NormalizedRow, PivotTable, Ratio, RatioSpec, RawRecord,
    Schema,
};
