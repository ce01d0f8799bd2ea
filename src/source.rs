//! # Request Sources
//!
//! A request source hands the dispatcher fully-materialized [`RequestSpec`]
//! values, one per dispatch, in iteration order. Whether the source cycles
//! through a shorter backing list is its own business.
//!
//! Two sources ship with the crate:
//!
//! - [`CyclingSource`] repeats a fixed list of specs.
//! - [`TemplateSource`] renders a JSON body template once per request,
//!   substituting `{{column}}` placeholders from CSV rows.

use crate::error::LoadTestError;
use crate::Result;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Immutable description of one HTTP call.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Budget covering the whole lifecycle, from dispatch to stream end
    pub timeout: Duration,
}

impl RequestSpec {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: Method::POST,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Sequence of request specs consumed by the dispatcher.
///
/// `None` means the source is exhausted.
pub trait RequestSource: Send {
    fn next_request(&mut self) -> Option<RequestSpec>;
}

impl<I> RequestSource for I
where
    I: Iterator<Item = RequestSpec> + Send,
{
    fn next_request(&mut self) -> Option<RequestSpec> {
        self.next()
    }
}

/// Cycles endlessly through a fixed list of specs.
#[derive(Debug, Clone)]
pub struct CyclingSource {
    specs: Vec<RequestSpec>,
    position: usize,
}

impl CyclingSource {
    pub fn new(specs: Vec<RequestSpec>) -> Self {
        Self { specs, position: 0 }
    }

    pub fn single(spec: RequestSpec) -> Self {
        Self::new(vec![spec])
    }
}

impl Iterator for CyclingSource {
    type Item = RequestSpec;

    fn next(&mut self) -> Option<RequestSpec> {
        if self.specs.is_empty() {
            return None;
        }
        let spec = self.specs[self.position % self.specs.len()].clone();
        self.position += 1;
        Some(spec)
    }
}

/// One CSV row keyed by column name.
pub type DataRow = HashMap<String, String>;

/// The request shape shared by every dispatch of a run.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Value,
    pub timeout: Duration,
}

impl RequestTemplate {
    /// Build a template from loosely-typed configuration values.
    pub fn parse(
        url: &str,
        method: &str,
        headers: &BTreeMap<String, String>,
        body: Value,
        timeout: Duration,
    ) -> Result<Self> {
        let url = Url::parse(url)?;
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| LoadTestError::Config(format!("Invalid HTTP method '{}'", method)))?;

        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| LoadTestError::Config(format!("Invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                LoadTestError::Config(format!("Invalid value for header '{}': {}", name, e))
            })?;
            header_map.insert(name, value);
        }

        Ok(Self {
            url,
            method,
            headers: header_map,
            body,
            timeout,
        })
    }

    /// Materialize the request for one dispatch, optionally filling
    /// placeholders from `row`.
    pub fn render(&self, row: Option<&DataRow>) -> Result<RequestSpec> {
        let body = match row {
            Some(row) => replace_placeholders(&self.body, row),
            None => self.body.clone(),
        };
        let mut headers = self.headers.clone();
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        Ok(RequestSpec {
            url: self.url.clone(),
            method: self.method.clone(),
            headers,
            body: Bytes::from(serde_json::to_vec(&body)?),
            timeout: self.timeout,
        })
    }
}

/// Renders one `RequestSpec` per request from a template and optional CSV rows.
///
/// Request *i* (1-based) uses row `(i - 1) % rows.len()`.
#[derive(Debug, Clone)]
pub struct TemplateSource {
    template: RequestTemplate,
    rows: Vec<DataRow>,
    rendered: u64,
}

impl TemplateSource {
    pub fn new(template: RequestTemplate) -> Self {
        Self {
            template,
            rows: Vec::new(),
            rendered: 0,
        }
    }

    pub fn with_rows(mut self, rows: Vec<DataRow>) -> Self {
        self.rows = rows;
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

impl Iterator for TemplateSource {
    type Item = RequestSpec;

    fn next(&mut self) -> Option<RequestSpec> {
        let row = if self.rows.is_empty() {
            None
        } else {
            Some(&self.rows[(self.rendered % self.rows.len() as u64) as usize])
        };
        self.rendered += 1;
        // RunPlan renders the template once up front.
        match self.template.render(row) {
            Ok(spec) => Some(spec),
            Err(e) => {
                tracing::error!("failed to render request {}: {}", self.rendered, e);
                None
            }
        }
    }
}

/// Recursively replace `{{key}}` placeholders in every string of `value`.
pub fn replace_placeholders(value: &Value, row: &DataRow) -> Value {
    match value {
        Value::String(text) => {
            let mut result = text.clone();
            for (key, replacement) in row {
                let placeholder = format!("{{{{{}}}}}", key);
                if result.contains(&placeholder) {
                    result = result.replace(&placeholder, replacement);
                }
            }
            Value::String(result)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| replace_placeholders(item, row))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), replace_placeholders(v, row)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Load CSV rows (header row required) for templated bodies.
///
/// Fails when the file is empty or when `column` is given but missing.
/// Only UTF-8 input is supported.
pub fn load_csv_rows(path: &Path, column: Option<&str>, encoding: &str) -> Result<Vec<DataRow>> {
    let normalized = encoding.to_ascii_lowercase().replace('_', "-");
    if normalized != "utf-8" && normalized != "utf8" {
        return Err(LoadTestError::DataSource(format!(
            "Unsupported CSV encoding '{}'; only utf-8 is supported",
            encoding
        )));
    }
    if !path.exists() {
        return Err(LoadTestError::DataSource(format!(
            "CSV file not found: {}",
            path.display()
        )));
    }

    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: DataRow = headers
            .iter()
            .zip(record.iter())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(LoadTestError::DataSource(format!(
            "CSV file is empty or malformed: {}",
            path.display()
        )));
    }

    if let Some(column) = column {
        if !headers.iter().any(|h| h == column) {
            let available: Vec<&str> = headers.iter().collect();
            return Err(LoadTestError::DataSource(format!(
                "Column '{}' not found in CSV, available columns: {}",
                column,
                available.join(", ")
            )));
        }
    }

    info!("Loaded CSV data: {} ({} rows)", path.display(), rows.len());
    Ok(rows)
}
