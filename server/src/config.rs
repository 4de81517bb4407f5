//! Server configuration

use std::collections::HashMap;

use serde::Deserialize;

use crate::infra::output_sink::OutputLimits;

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server host
    #[serde(default = "default_http_host")]
    pub http_host: String,

    /// HTTP server port (0 picks a free port, announced on stdout)
    #[serde(default)]
    pub http_port: u16,

    /// Container converter executable
    #[serde(default)]
    pub converter_path: Option<String>,

    /// Asset serializer executable
    #[serde(default)]
    pub serializer_path: Option<String>,

    /// UWP dumper executable
    #[serde(default)]
    pub dumper_path: Option<String>,

    /// Expected SHA-256 per tool ("retoc", "uasset", "uwp")
    #[serde(default)]
    pub tool_checksums: HashMap<String, String>,

    /// Compression method passed to the converter when building containers
    #[serde(default = "default_compression")]
    pub default_compression: String,

    /// Free-form converter flags callers may request
    #[serde(default = "default_allowed_extra_args")]
    pub allowed_extra_args: Vec<String>,

    /// Timeout for batch tool runs in seconds (0 = none)
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Per-stream capture budget in bytes
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Per-stream capture budget in lines
    #[serde(default = "default_max_output_lines")]
    pub max_output_lines: usize,

    /// Budget for tool output quoted inside error responses
    #[serde(default = "default_error_excerpt_bytes")]
    pub error_excerpt_bytes: usize,

    #[serde(default = "default_error_excerpt_lines")]
    pub error_excerpt_lines: usize,

    /// Initial terminal width for streaming sessions
    #[serde(default = "default_pty_cols")]
    pub pty_cols: u16,

    /// Initial terminal height for streaming sessions
    #[serde(default = "default_pty_rows")]
    pub pty_rows: u16,

    /// Completed operations kept in memory
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Log output format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_http_host() -> String {
    "127.0.0.1".to_string()
}

fn default_compression() -> String {
    "Oodle".to_string()
}

fn default_allowed_extra_args() -> Vec<String> {
    vec![
        "--verbose".to_string(),
        "--debug".to_string(),
        "--no-parallel".to_string(),
    ]
}

fn default_timeout_secs() -> u64 {
    1800 // 30 minutes
}

fn default_max_output_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_max_output_lines() -> usize {
    50_000
}

fn default_error_excerpt_bytes() -> usize {
    8 * 1024
}

fn default_error_excerpt_lines() -> usize {
    200
}

fn default_pty_cols() -> u16 {
    120
}

fn default_pty_rows() -> u16 {
    30
}

fn default_history_limit() -> usize {
    200
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration: optional file named by `TOOLHOST_CONFIG_FILE`,
    /// then `TOOLHOST_*` environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var("TOOLHOST_CONFIG_FILE") {
            Ok(path) => config::Config::builder()
                .add_source(config::File::with_name(&path))
                .build()?
                .try_deserialize()?,
            Err(_) => Config::default(),
        };

        // Override with environment variables
        if let Ok(val) = std::env::var("TOOLHOST_HTTP_HOST") {
            config.http_host = val;
        }
        if let Ok(val) = std::env::var("TOOLHOST_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http_port = port;
            }
        }
        if let Ok(val) = std::env::var("TOOLHOST_CONVERTER_PATH") {
            config.converter_path = Some(val);
        }
        if let Ok(val) = std::env::var("TOOLHOST_SERIALIZER_PATH") {
            config.serializer_path = Some(val);
        }
        if let Ok(val) = std::env::var("TOOLHOST_DUMPER_PATH") {
            config.dumper_path = Some(val);
        }
        if let Ok(val) = std::env::var("TOOLHOST_TOOL_CHECKSUMS") {
            // Parse comma-separated list of tool=sha256 pairs
            config.tool_checksums = val
                .split(',')
                .filter_map(|pair| pair.split_once('='))
                .map(|(tool, sum)| (tool.trim().to_string(), sum.trim().to_string()))
                .filter(|(tool, sum)| !tool.is_empty() && !sum.is_empty())
                .collect();
        }
        if let Ok(val) = std::env::var("TOOLHOST_DEFAULT_COMPRESSION") {
            config.default_compression = val;
        }
        if let Ok(val) = std::env::var("TOOLHOST_ALLOWED_EXTRA_ARGS") {
            config.allowed_extra_args = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(val) = std::env::var("TOOLHOST_DEFAULT_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.default_timeout_secs = secs;
            }
        }
        if let Ok(val) = std::env::var("TOOLHOST_MAX_OUTPUT_BYTES") {
            if let Ok(bytes) = val.parse() {
                config.max_output_bytes = bytes;
            }
        }
        if let Ok(val) = std::env::var("TOOLHOST_MAX_OUTPUT_LINES") {
            if let Ok(lines) = val.parse() {
                config.max_output_lines = lines;
            }
        }
        if let Ok(val) = std::env::var("TOOLHOST_ERROR_EXCERPT_BYTES") {
            if let Ok(bytes) = val.parse() {
                config.error_excerpt_bytes = bytes;
            }
        }
        if let Ok(val) = std::env::var("TOOLHOST_ERROR_EXCERPT_LINES") {
            if let Ok(lines) = val.parse() {
                config.error_excerpt_lines = lines;
            }
        }
        if let Ok(val) = std::env::var("TOOLHOST_PTY_COLS") {
            if let Ok(cols) = val.parse() {
                config.pty_cols = cols;
            }
        }
        if let Ok(val) = std::env::var("TOOLHOST_PTY_ROWS") {
            if let Ok(rows) = val.parse() {
                config.pty_rows = rows;
            }
        }
        if let Ok(val) = std::env::var("TOOLHOST_HISTORY_LIMIT") {
            if let Ok(limit) = val.parse() {
                config.history_limit = limit;
            }
        }
        if let Ok(val) = std::env::var("TOOLHOST_LOG_FORMAT") {
            config.log_format = val;
        }

        Ok(config)
    }

    /// Capture budget for live process output
    pub fn output_limits(&self) -> OutputLimits {
        OutputLimits::new(self.max_output_bytes, self.max_output_lines)
    }

    /// Budget for tool output embedded in error responses
    pub fn excerpt_limits(&self) -> OutputLimits {
        OutputLimits::new(self.error_excerpt_bytes, self.error_excerpt_lines)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: 0,
            converter_path: None,
            serializer_path: None,
            dumper_path: None,
            tool_checksums: HashMap::new(),
            default_compression: default_compression(),
            allowed_extra_args: default_allowed_extra_args(),
            default_timeout_secs: default_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            max_output_lines: default_max_output_lines(),
            error_excerpt_bytes: default_error_excerpt_bytes(),
            error_excerpt_lines: default_error_excerpt_lines(),
            pty_cols: default_pty_cols(),
            pty_rows: default_pty_rows(),
            history_limit: default_history_limit(),
            log_format: default_log_format(),
        }
    }
}
