use std::path::PathBuf;
use std::time::Duration;

use shim_core::template::loader::FALLBACK_TEMPLATE_PATH;

/// Default cap on a `/run` body and on a fetched `image_url` (64 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for running next to a local ComfyUI.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: max wait + 60).
    pub request_timeout_secs: u64,
    /// Engine base URL.
    pub comfy_api_url: String,
    /// Timeout for each outbound HTTP call.
    pub http_timeout: Duration,
    /// Largest accepted `/run` body and `image_url` download, in bytes.
    pub max_upload_bytes: usize,
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// Upper bound for a blocking wait.
    pub max_wait: Duration,
    /// How long a submitted job may be invisible upstream before it is
    /// reported as `unknown`.
    pub unknown_grace: Duration,
    /// Template selection and containment.
    pub workflow: WorkflowConfig,
    /// Shared-secret check on `/run` and `/status`.
    pub auth: ApiKeyConfig,
}

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// `SHIM_WORKFLOW_PATH`, when set.
    pub default_path: Option<PathBuf>,
    /// `SHIM_WORKFLOW_POINTER`, when set.
    pub pointer_file: Option<PathBuf>,
    /// Allowed template directories in priority order.
    pub roots: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ApiKeyConfig {
    pub api_key: Option<String>,
    pub require: bool,
}

impl ApiKeyConfig {
    /// Required but unset: every protected request is refused.
    pub fn is_misconfigured(&self) -> bool {
        self.require && self.api_key.is_none()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                          | Default                               |
    /// |----------------------------------|---------------------------------------|
    /// | `HOST`                           | `0.0.0.0`                             |
    /// | `PORT`                           | `3000`                                |
    /// | `CORS_ORIGINS`                   | `http://localhost:5173`               |
    /// | `REQUEST_TIMEOUT_SECS`           | `SHIM_MAX_WAIT_SECONDS + 60`          |
    /// | `COMFY_HOST`                     | `127.0.0.1`                           |
    /// | `COMFY_PORT`                     | `8188`                                |
    /// | `COMFY_API_URL`                  | `http://{COMFY_HOST}:{COMFY_PORT}`    |
    /// | `SHIM_HTTP_TIMEOUT`              | `120` (seconds)                       |
    /// | `SHIM_MAX_UPLOAD_BYTES`          | `67108864` (64 MiB)                   |
    /// | `SHIM_POLL_INTERVAL`             | `0.75` (seconds)                      |
    /// | `SHIM_MAX_WAIT_SECONDS`          | `600`                                 |
    /// | `SHIM_UNKNOWN_GRACE_SECS`        | `30`                                  |
    /// | `SHIM_WORKFLOW_PATH`             | unset                                 |
    /// | `SHIM_WORKFLOW_POINTER`          | unset                                 |
    /// | `SHIM_WORKFLOW_ROOT`             | parent of the default template        |
    /// | `SHIM_ADDITIONAL_WORKFLOW_ROOTS` | unset                                 |
    /// | `SHIM_API_KEY`                   | unset                                 |
    /// | `SHIM_REQUIRE_API_KEY`           | `1`                                   |
    ///
    /// Root lists are colon-separated.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse_or("PORT", var("PORT"), 3000u16, "a valid port")?;

        let cors_origins: Vec<String> = var("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let comfy_api_url = match var("COMFY_API_URL") {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let comfy_host = var("COMFY_HOST").unwrap_or_else(|| "127.0.0.1".into());
                let comfy_port =
                    parse_or("COMFY_PORT", var("COMFY_PORT"), 8188u16, "a valid port")?;
                format!("http://{comfy_host}:{comfy_port}")
            }
        };

        let http_timeout = seconds("SHIM_HTTP_TIMEOUT", var("SHIM_HTTP_TIMEOUT"), 120.0)?;
        let max_upload_bytes = parse_or(
            "SHIM_MAX_UPLOAD_BYTES",
            var("SHIM_MAX_UPLOAD_BYTES"),
            DEFAULT_MAX_UPLOAD_BYTES,
            "a positive number of bytes",
        )?;
        if max_upload_bytes == 0 {
            return Err(ConfigError::Invalid {
                name: "SHIM_MAX_UPLOAD_BYTES",
                expected: "a positive number of bytes",
                value: "0".into(),
            });
        }
        let poll_interval = seconds("SHIM_POLL_INTERVAL", var("SHIM_POLL_INTERVAL"), 0.75)?;
        let max_wait = seconds("SHIM_MAX_WAIT_SECONDS", var("SHIM_MAX_WAIT_SECONDS"), 600.0)?;
        let unknown_grace =
            seconds("SHIM_UNKNOWN_GRACE_SECS", var("SHIM_UNKNOWN_GRACE_SECS"), 30.0)?;

        let request_timeout_secs = parse_or(
            "REQUEST_TIMEOUT_SECS",
            var("REQUEST_TIMEOUT_SECS"),
            max_wait.as_secs() + 60,
            "a whole number of seconds",
        )?;

        let default_path = var("SHIM_WORKFLOW_PATH").map(PathBuf::from);
        let pointer_file = var("SHIM_WORKFLOW_POINTER").map(PathBuf::from);

        let mut roots = split_paths(var("SHIM_WORKFLOW_ROOT"));
        if roots.is_empty() {
            let default_template = default_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(FALLBACK_TEMPLATE_PATH));
            if let Some(parent) = default_template.parent() {
                roots.push(parent.to_path_buf());
            }
        }
        roots.extend(split_paths(var("SHIM_ADDITIONAL_WORKFLOW_ROOTS")));

        let require = var("SHIM_REQUIRE_API_KEY")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            comfy_api_url,
            http_timeout,
            max_upload_bytes,
            poll_interval,
            max_wait,
            unknown_grace,
            workflow: WorkflowConfig {
                default_path,
                pointer_file,
                roots,
            },
            auth: ApiKeyConfig {
                api_key: var("SHIM_API_KEY"),
                require,
            },
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            name,
            expected,
            value,
        }),
    }
}

/// Positive, finite number of seconds.
fn seconds(name: &'static str, raw: Option<String>, default: f64) -> Result<Duration, ConfigError> {
    let Some(value) = raw else {
        return Ok(Duration::from_secs_f64(default));
    };
    let invalid = || ConfigError::Invalid {
        name,
        expected: "a positive number of seconds",
        value: value.clone(),
    };
    let secs: f64 = value.parse().map_err(|_| invalid())?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(secs).map_err(|_| invalid())
}

fn split_paths(raw: Option<String>) -> Vec<PathBuf> {
    raw.map(|raw| {
        raw.split(':')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect()
    })
    .unwrap_or_default()
}
