// Record sources: the remote form-data API, a local CSV export, and a
// time-bounded memo in front of either.
use crate::error::SourceError;
use crate::types::{Cell, RawRecord};
use csv::ReaderBuilder;
use log::{debug, info, warn};
use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub trait RecordSource {
    fn fetch(&self) -> Result<Vec<RawRecord>, SourceError>;
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn fetch(&self) -> Result<Vec<RawRecord>, SourceError> {
        (**self).fetch()
    }
}

/// Connection settings for a KoboToolbox-style asset endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KoboConfig {
    pub base_url: String,
    pub token: String,
    pub asset_uid: String,
    /// Ask the server for choice labels instead of choice names.
    pub labels: bool,
    pub timeout: Duration,
}

impl KoboConfig {
    pub fn data_url(&self) -> String {
        let mut url = format!(
            "{}/api/v2/assets/{}/data.json",
            self.base_url.trim_end_matches('/'),
            self.asset_uid
        );
        if self.labels {
            url.push_str("?format=labels");
        }
        url
    }
}

pub struct KoboSource {
    config: KoboConfig,
    client: Client,
}

impl KoboSource {
    pub fn new(config: KoboConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|source| SourceError::Http { url: config.base_url.clone(), source })?;
        Ok(Self { config, client })
    }

    fn get_page(&self, url: &str) -> Result<Value, SourceError> {
        let http = |source: reqwest::Error| SourceError::Http { url: url.to_string(), source };
        self.client
            .get(url)
            .header(AUTHORIZATION, format!("Token {}", self.config.token))
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(http)?
            .json::<Value>()
            .map_err(http)
    }
}

impl RecordSource for KoboSource {
    /// Reads every page of `results`, following `next` links.
    fn fetch(&self) -> Result<Vec<RawRecord>, SourceError> {
        let mut records = Vec::new();
        let mut next = Some(self.config.data_url());
        while let Some(url) = next.take() {
            let page = self.get_page(&url)?;
            let results = page
                .get("results")
                .and_then(Value::as_array)
                .ok_or_else(|| SourceError::MalformedPayload { url: url.clone() })?;
            records.extend(results.iter().map(flatten_record));
            debug!("fetched page {} ({} records so far)", url, records.len());
            next = page.get("next").and_then(Value::as_str).map(str::to_string);
        }
        info!("fetched {} records for asset {}", records.len(), self.config.asset_uid);
        Ok(records)
    }
}

/// Flatten a JSON submission into a flat record; nested object keys are
/// joined with `.`.
pub fn flatten_record(value: &Value) -> RawRecord {
    let mut out = RawRecord::new();
    if let Value::Object(_) = value {
        flatten_into("", value, &mut out);
    }
    out
}

fn flatten_into(prefix: &str, value: &Value, out: &mut RawRecord) {
    let Value::Object(map) = value else { return };
    for (k, child) in map {
        let key = if prefix.is_empty() { k.clone() } else { format!("{}.{}", prefix, k) };
        match child {
            Value::Object(_) => flatten_into(&key, child, out),
            _ => {
                out.insert(key, json_cell(child));
            }
        }
    }
}

fn json_cell(value: &Value) -> Cell {
    match value {
        Value::Null => Cell::Missing,
        Value::Bool(b) => Cell::Text(b.to_string()),
        Value::Number(n) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Missing),
        Value::String(s) => Cell::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => Cell::Text(value.to_string()),
    }
}

/// A CSV export on disk. The header row names the keys; blank cells are missing.
pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RecordSource for CsvSource {
    fn fetch(&self) -> Result<Vec<RawRecord>, SourceError> {
        let mut rdr = ReaderBuilder::new().flexible(true).from_path(&self.path)?;
        let headers = rdr.headers()?.clone();
        let mut records = Vec::new();
        let mut parse_errors = 0usize;
        for result in rdr.records() {
            let row = match result {
                Ok(r) => r,
                Err(_) => {
                    parse_errors += 1;
                    continue;
                }
            };
            let record: RawRecord = headers
                .iter()
                .zip(row.iter())
                .map(|(h, v)| {
                    let cell = if v.trim().is_empty() {
                        Cell::Missing
                    } else {
                        Cell::Text(v.to_string())
                    };
                    (h.to_string(), cell)
                })
                .collect();
            records.push(record);
        }
        if parse_errors > 0 {
            warn!("{}: skipped {} unreadable CSV rows", self.path.display(), parse_errors);
        }
        info!("read {} records from {}", records.len(), self.path.display());
        Ok(records)
    }
}

/// Serves the last snapshot of `inner` while it is younger than `ttl`.
/// A zero `ttl` fetches every time.
pub struct CachedSource<S> {
    inner: S,
    ttl: Duration,
    snapshot: Mutex<Option<(Instant, Vec<RawRecord>)>>,
}

impl<S: RecordSource> CachedSource<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self { inner, ttl, snapshot: Mutex::new(None) }
    }

    pub fn invalidate(&self) {
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl<S: RecordSource> RecordSource for CachedSource<S> {
    fn fetch(&self) -> Result<Vec<RawRecord>, SourceError> {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((taken, records)) = snapshot.as_ref() {
            if taken.elapsed() < self.ttl {
                debug!("serving cached snapshot taken {:?} ago", taken.elapsed());
                return Ok(records.clone());
            }
        }
        let records = self.inner.fetch()?;
        *snapshot = Some((Instant::now(), records.clone()));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell as Counter;
    use std::io::Write;

    struct Counting {
        calls: Counter<usize>,
    }

    impl RecordSource for Counting {
        fn fetch(&self) -> Result<Vec<RawRecord>, SourceError> {
            self.calls.set(self.calls.get() + 1);
            let mut r = RawRecord::new();
            r.insert("call".into(), Cell::Number(self.calls.get() as f64));
            Ok(vec![r])
        }
    }

    #[test]
    fn cache_serves_snapshot_within_ttl() {
        let counting = Counting { calls: Counter::new(0) };
        let cached = CachedSource::new(counting, Duration::from_secs(3600));
        let first = cached.fetch().unwrap();
        let second = cached.fetch().unwrap();
        assert_eq!(first, second);
        assert_eq!(cached.inner.calls.get(), 1);

        cached.invalidate();
        cached.fetch().unwrap();
        assert_eq!(cached.inner.calls.get(), 2);
    }

    #[test]
    fn zero_ttl_always_refetches() {
        let cached = CachedSource::new(Counting { calls: Counter::new(0) }, Duration::ZERO);
        cached.fetch().unwrap();
        cached.fetch().unwrap();
        assert_eq!(cached.inner.calls.get(), 2);
    }

    #[test]
    fn data_url_honours_labels_flag() {
        let mut cfg = KoboConfig {
            base_url: "https://kf.example.org/".into(),
            token: "t".into(),
            asset_uid: "abc".into(),
            labels: false,
            timeout: Duration::from_secs(5),
        };
        assert_eq!(cfg.data_url(), "https://kf.example.org/api/v2/assets/abc/data.json");
        cfg.labels = true;
        assert_eq!(
            cfg.data_url(),
            "https://kf.example.org/api/v2/assets/abc/data.json?format=labels"
        );
    }

    #[test]
    fn json_submissions_flatten_to_cells() {
        let rec = flatten_record(&json!({
            "facility": "A",
            "booked": 10,
            "honored": null,
            "consented": true,
            "group": { "missed": "2", "inner": { "x": 1.5 } },
            "tags": ["a", "b"]
        }));
        assert_eq!(rec["facility"], Cell::from("A"));
        assert_eq!(rec["booked"], Cell::Number(10.0));
        assert_eq!(rec["honored"], Cell::Missing);
        assert_eq!(rec["consented"], Cell::from("true"));
        assert_eq!(rec["group.missed"], Cell::from("2"));
        assert_eq!(rec["group.inner.x"], Cell::Number(1.5));
        assert_eq!(rec["tags"], Cell::from("[\"a\",\"b\"]"));
        assert!(flatten_record(&json!([1, 2])).is_empty());
    }

    #[test]
    fn csv_blank_cells_are_missing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "health_facility,reasons,status").unwrap();
        writeln!(file, "A,, Active").unwrap();
        writeln!(file, "B,Travel").unwrap();
        let records = CsvSource::new(file.path()).fetch().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["reasons"], Cell::Missing);
        assert_eq!(records[0]["status"], Cell::from(" Active"));
        assert!(!records[1].contains_key("status"));
    }
}
