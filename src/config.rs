#[cfg(feature = "cli")]
use clap::Parser;
use crate::error::LoadTestError;
use crate::source::{load_csv_rows, DataRow, RequestTemplate, TemplateSource};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// # streamload Configuration
///
/// Command-line arguments, each mirrored by an environment variable, plus an
/// optional JSON run definition file. When a run definition is given it
/// decides the target, request shape, concurrency and request count; the
/// remaining flags tune the probe, client, output and logging.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "cli", derive(Parser))]
#[cfg_attr(feature = "cli", command(name = "streamload"))]
#[cfg_attr(feature = "cli", command(about = "Fixed-concurrency load tester for streaming HTTP APIs"))]
#[cfg_attr(feature = "cli", command(version))]
pub struct Config {
    // =============================================================================
    // RUN DEFINITION
    // =============================================================================

    /// JSON run definition file
    #[cfg_attr(feature = "cli", arg(short = 'c', long = "config", env = "STREAMLOAD_CONFIG"))]
    pub config_file: Option<PathBuf>,

    /// Target URL (ignored when a config file is given)
    #[cfg_attr(feature = "cli", arg(short = 'u', long, env = "STREAMLOAD_URL"))]
    pub url: Option<String>,

    /// Total number of requests
    #[cfg_attr(feature = "cli", arg(short = 'n', long = "requests", env = "STREAMLOAD_REQUESTS", default_value = "100"))]
    pub total_requests: u64,

    /// Requests held in flight
    #[cfg_attr(feature = "cli", arg(short = 'p', long, env = "STREAMLOAD_CONCURRENCY", default_value = "10"))]
    pub concurrency: usize,

    /// Per-request timeout in seconds, covering the whole stream
    #[cfg_attr(feature = "cli", arg(long = "timeout", env = "STREAMLOAD_TIMEOUT", default_value = "300"))]
    pub timeout_secs: u64,

    // =============================================================================
    // PROBE AND CLIENT
    // =============================================================================

    /// Status code counted as success
    #[cfg_attr(feature = "cli", arg(long, env = "STREAMLOAD_EXPECTED_STATUS", default_value = "200"))]
    pub expected_status: u16,

    /// Advisory end-of-stream marker (empty disables detection)
    #[cfg_attr(feature = "cli", arg(long, env = "STREAMLOAD_END_MARKER", default_value = "[DONE]"))]
    pub end_marker: String,

    /// Connection timeout in seconds
    #[cfg_attr(feature = "cli", arg(long = "connect-timeout", env = "STREAMLOAD_CONNECT_TIMEOUT", default_value = "10"))]
    pub connect_timeout_secs: u64,

    /// Accept compressed responses (changes fragment boundaries)
    #[cfg_attr(feature = "cli", arg(long, env = "STREAMLOAD_COMPRESSION"))]
    pub compression: bool,

    // =============================================================================
    // OUTPUT AND LOGGING
    // =============================================================================

    /// Where to write the JSON results
    #[cfg_attr(feature = "cli", arg(short = 'o', long, env = "STREAMLOAD_OUTPUT", default_value = "test_results.json"))]
    pub output: PathBuf,

    /// Log level (error, warn, info, debug, trace) or a full filter directive
    #[cfg_attr(feature = "cli", arg(long, env = "RUST_LOG", default_value = "info"))]
    pub log_level: String,
}

impl Config {
    /// Parse configuration from command line arguments and environment variables.
    ///
    /// Loads `.env` if present, parses arguments, sets up logging and exits
    /// with a message when validation fails.
    #[cfg(feature = "cli")]
    pub fn parse_args() -> Self {
        let _ = dotenv::dotenv();

        let config = Self::parse();
        config.setup_logging();

        if let Err(err) = config.validate() {
            eprintln!("Configuration validation failed: {}", err);
            std::process::exit(2);
        }

        config
    }

    /// Create a test configuration with minimal required fields.
    pub fn for_test() -> Self {
        Self {
            config_file: None,
            url: Some("http://127.0.0.1:8000/v1/chat/completions".to_string()),
            total_requests: 10,
            concurrency: 2,
            timeout_secs: 30,
            expected_status: 200,
            end_marker: "[DONE]".to_string(),
            connect_timeout_secs: 10,
            compression: false,
            output: PathBuf::from("test_results.json"),
            log_level: "info".to_string(),
        }
    }

    #[cfg(feature = "cli")]
    fn setup_logging(&self) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(&self.log_level)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .try_init();
    }

    /// Validate the flags that do not depend on the run definition file.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.config_file.is_none() && self.url.is_none() {
            return Err(
                "Either a config file (-c) or a target URL (-u) is required.".to_string(),
            );
        }
        if self.config_file.is_none() {
            if let Some(url) = &self.url {
                validate_url(url)?;
            }
            validate_run_shape(self.concurrency, self.timeout_secs)?;
        }
        if reqwest::StatusCode::from_u16(self.expected_status).is_err() {
            return Err(format!(
                "Invalid expected status {}. Use a status code between 100 and 999.",
                self.expected_status
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err("Connect timeout must be greater than 0 seconds.".to_string());
        }
        if self.output.as_os_str().is_empty() {
            return Err("Output path cannot be empty.".to_string());
        }
        if self.log_level.trim().is_empty() {
            return Err("Log level cannot be empty.".to_string());
        }
        Ok(())
    }

    pub fn expected_status_code(&self) -> reqwest::StatusCode {
        reqwest::StatusCode::from_u16(self.expected_status).unwrap_or(reqwest::StatusCode::OK)
    }

    /// Resolve the run plan from the config file, or from the CLI flags when
    /// no file is given.
    pub fn load_plan(&self) -> Result<RunPlan> {
        match &self.config_file {
            Some(path) => RunPlan::from_file(path),
            None => {
                let url = self.url.as_deref().ok_or_else(|| {
                    LoadTestError::Config("no target URL configured".to_string())
                })?;
                let definition = RunDefinition {
                    url: url.to_string(),
                    method: default_method(),
                    headers: BTreeMap::from([(
                        "Content-Type".to_string(),
                        "application/json".to_string(),
                    )]),
                    body: json!({"stream": true}),
                    timeout: self.timeout_secs,
                    concurrency: self.concurrency,
                    total_requests: self.total_requests,
                    data_source: None,
                };
                RunPlan::from_definition(definition, None)
            }
        }
    }
}

fn validate_url(url: &str) -> std::result::Result<(), String> {
    match Url::parse(url) {
        Ok(parsed) => {
            if !["http", "https"].contains(&parsed.scheme()) {
                return Err(format!(
                    "Invalid URL scheme '{}'. Only 'http' and 'https' are supported.",
                    parsed.scheme()
                ));
            }
            if parsed.host().is_none() {
                return Err("Target URL must include a host (e.g., 'http://localhost:8000').".to_string());
            }
            Ok(())
        }
        Err(err) => Err(format!("Invalid target URL '{}': {}", url, err)),
    }
}

fn validate_run_shape(concurrency: usize, timeout_secs: u64) -> std::result::Result<(), String> {
    if concurrency == 0 {
        return Err("Concurrency must be at least 1.".to_string());
    }
    if timeout_secs == 0 {
        return Err("Request timeout must be greater than 0 seconds.".to_string());
    }
    Ok(())
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_timeout() -> u64 {
    300
}

fn default_concurrency() -> usize {
    10
}

fn default_total_requests() -> u64 {
    100
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

/// JSON run definition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDefinition {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "empty_object")]
    pub body: Value,
    /// Seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_total_requests")]
    pub total_requests: u64,
    #[serde(default)]
    pub data_source: Option<DataSourceConfig>,
}

fn empty_object() -> Value {
    json!({})
}

/// Templating data for request bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub file: Option<PathBuf>,
    pub column: Option<String>,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

/// A validated, ready-to-run plan.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub template: RequestTemplate,
    pub rows: Vec<DataRow>,
    pub concurrency: usize,
    pub total_requests: u64,
    /// CSV file the rows came from, if any
    pub data_file: Option<PathBuf>,
}

impl RunPlan {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            LoadTestError::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        let definition: RunDefinition = serde_json::from_str(&text)?;
        let base_dir = path
            .canonicalize()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf));
        Self::from_definition(definition, base_dir.as_deref())
    }

    /// Validate a definition. Relative CSV paths resolve against `base_dir`.
    pub fn from_definition(definition: RunDefinition, base_dir: Option<&Path>) -> Result<Self> {
        validate_url(&definition.url).map_err(LoadTestError::Config)?;
        validate_run_shape(definition.concurrency, definition.timeout)
            .map_err(LoadTestError::Config)?;

        let template = RequestTemplate::parse(
            &definition.url,
            &definition.method,
            &definition.headers,
            definition.body,
            Duration::from_secs(definition.timeout),
        )?;
        // Surface body serialization problems before the run starts.
        template.render(None)?;

        let (rows, data_file) = match definition.data_source {
            None => (Vec::new(), None),
            Some(source) => {
                if !source.kind.eq_ignore_ascii_case("csv") {
                    return Err(LoadTestError::Config(format!(
                        "Unsupported data source type '{}'",
                        source.kind
                    )));
                }
                let file = source.file.ok_or_else(|| {
                    LoadTestError::Config("CSV data source is missing the 'file' field".to_string())
                })?;
                let file = match base_dir {
                    Some(dir) if file.is_relative() => dir.join(file),
                    _ => file,
                };
                let rows = load_csv_rows(&file, source.column.as_deref(), &source.encoding)?;
                (rows, Some(file))
            }
        };

        Ok(Self {
            template,
            rows,
            concurrency: definition.concurrency,
            total_requests: definition.total_requests,
            data_file,
        })
    }

    /// Fresh request source for this plan.
    pub fn request_source(&self) -> TemplateSource {
        TemplateSource::new(self.template.clone()).with_rows(self.rows.clone())
    }
}
