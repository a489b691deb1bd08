use crate::types::FieldKind;
use thiserror::Error;

/// Wiring mistakes in a report definition. Dirty data never ends up here; it
/// degrades to missing values instead.
#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("schema field `{field}` is absent from every record")]
    FieldAbsent { field: String },

    #[error("`{field}` is not a declared {expected} field")]
    Undeclared { field: String, expected: FieldKind },

    #[error("`{field}` is declared as a measure and cannot be used as a grouping key")]
    MeasureAsKey { field: String },
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to {url} failed")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("response from {url} has no `results` array")]
    MalformedPayload { url: String },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
