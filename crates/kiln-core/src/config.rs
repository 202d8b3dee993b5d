//! kiln.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::contract::HandlerContract;
use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KilnConfig {
    pub handler: HandlerConfig,
    pub limits: Option<LimitsConfig>,
    pub server: Option<ServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Module name used in logs. Defaults to the script's file stem.
    pub name: Option<String>,
    /// Script path, relative to the config file.
    pub script: PathBuf,
    /// Force a contract instead of detecting one.
    pub contract: Option<HandlerContract>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub timeout: Option<String>,
    pub memory: Option<String>,
    pub stack: Option<String>,
    pub output: Option<String>,
    pub max_concurrent: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: Option<String>,
    pub max_body: Option<String>,
}

impl KilnConfig {
    /// Read a config file. A relative `handler.script` is resolved
    /// against the directory holding the file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: KilnConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if config.handler.script.is_relative() {
            if let Some(dir) = path.parent() {
                config.handler.script = dir.join(&config.handler.script);
            }
        }
        Ok(config)
    }

    /// Minimal config for a bare script path.
    pub fn for_script(script: impl Into<PathBuf>) -> Self {
        KilnConfig {
            handler: HandlerConfig {
                name: None,
                script: script.into(),
                contract: None,
            },
            limits: None,
            server: None,
        }
    }

    /// Module name: the configured one, else the script's file stem.
    pub fn module_name(&self) -> String {
        self.handler.name.clone().unwrap_or_else(|| {
            self.handler
                .script
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "handler".to_string())
        })
    }

    pub fn timeout(&self) -> Result<Option<Duration>, ConfigError> {
        self.limits
            .as_ref()
            .and_then(|l| l.timeout.as_deref())
            .map(|v| parse_duration(v).ok_or_else(|| invalid("limits.timeout", v)))
            .transpose()
    }

    pub fn memory_limit(&self) -> Result<Option<usize>, ConfigError> {
        self.size_field("limits.memory", |l| l.memory.as_deref())
    }

    pub fn stack_limit(&self) -> Result<Option<usize>, ConfigError> {
        self.size_field("limits.stack", |l| l.stack.as_deref())
    }

    pub fn output_limit(&self) -> Result<Option<usize>, ConfigError> {
        self.size_field("limits.output", |l| l.output.as_deref())
    }

    pub fn max_concurrent(&self) -> Option<u32> {
        self.limits.as_ref().and_then(|l| l.max_concurrent)
    }

    pub fn listen(&self) -> Option<&str> {
        self.server.as_ref().and_then(|s| s.listen.as_deref())
    }

    pub fn max_body(&self) -> Result<Option<usize>, ConfigError> {
        self.server
            .as_ref()
            .and_then(|s| s.max_body.as_deref())
            .map(|v| parse_size(v).ok_or_else(|| invalid("server.max_body", v)))
            .transpose()
    }

    fn size_field(
        &self,
        field: &'static str,
        get: impl Fn(&LimitsConfig) -> Option<&str>,
    ) -> Result<Option<usize>, ConfigError> {
        self.limits
            .as_ref()
            .and_then(get)
            .map(|v| parse_size(v).ok_or_else(|| invalid(field, v)))
            .transpose()
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn invalid(field: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        value: value.to_string(),
    }
}

/// Parse a duration string like "5s", "500ms", "1m". A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.trim().parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.trim().parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Parse a byte size like "64MiB", "512KB", "1GiB". A bare number is bytes.
pub fn parse_size(s: &str) -> Option<usize> {
    const UNITS: [(&str, usize); 7] = [
        ("KiB", 1024),
        ("MiB", 1024 * 1024),
        ("GiB", 1024 * 1024 * 1024),
        ("KB", 1000),
        ("MB", 1000 * 1000),
        ("GB", 1000 * 1000 * 1000),
        ("B", 1),
    ];

    let s = s.trim();
    for (suffix, scale) in UNITS {
        if let Some(n) = s.strip_suffix(suffix) {
            return n.trim().parse::<usize>().ok()?.checked_mul(scale);
        }
    }
    s.parse::<usize>().ok()
}
