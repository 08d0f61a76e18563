use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::build::CachePolicy;
use crate::error::ConfigError;

pub const DEFAULT_ORGANIZATION: &str = "organization";
pub const MANAGED_BY: &str = "stackctl";

pub const DEFAULT_MEMORY_SIZE_MB: u32 = 256;
pub const DEFAULT_EPHEMERAL_STORAGE_MB: u32 = 512;
pub const DEFAULT_TIMEOUT_SECONDS: u32 = 10;
pub const DEFAULT_HANDLER: &str = "bootstrap";
pub const DEFAULT_RUNTIME: &str = "provided.al2023";
pub const DEFAULT_COLLECTOR_LAYER_ARN: &str =
    "arn:aws:lambda:ap-northeast-1:184161586896:layer:opentelemetry-collector-arm64-0_18_0:1";
pub const DEFAULT_TARGET_TRIPLE: &str = "aarch64-unknown-linux-musl";

/// Identity of one deployment of the declared resource graph.
///
/// Every resource name and stack reference is derived from this value, so it
/// is threaded explicitly into each declaration instead of being read from
/// ambient process state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct StackContext {
    pub organization: String,
    pub project: String,
    pub stack: String,
}

impl StackContext {
    pub fn new(
        organization: impl Into<String>,
        project: impl Into<String>,
        stack: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let context = Self {
            organization: organization.into().trim().to_string(),
            project: project.into().trim().to_string(),
            stack: stack.into().trim().to_string(),
        };
        validate_segment("organization", &context.organization)?;
        validate_segment("project", &context.project)?;
        validate_segment("stack", &context.stack)?;
        Ok(context)
    }

    /// Standard tag set applied to every taggable resource.
    pub fn tags(&self, name: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("Name".to_string(), name.to_string()),
            ("Project".to_string(), self.project.clone()),
            ("Stack".to_string(), self.stack.clone()),
            ("Environment".to_string(), self.stack.clone()),
            ("ManagedBy".to_string(), MANAGED_BY.to_string()),
        ])
    }
}

pub(crate) fn validate_segment(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Empty { field });
    }
    if !value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        return Err(ConfigError::InvalidCharacters {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Arm64,
    #[serde(rename = "x86_64")]
    X86_64,
}

impl Architecture {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Arm64 => "arm64",
            Self::X86_64 => "x86_64",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UrlAuthType {
    None,
    AwsIam,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

/// Tunables for the declared functions and their build.
///
/// Every field has a default, so an empty settings file (or none at all)
/// yields the stock deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StackSettings {
    pub memory_size_mb: u32,
    pub ephemeral_storage_mb: u32,
    pub timeout_seconds: u32,
    pub architecture: Architecture,
    pub runtime: String,
    pub handler: String,
    pub layers: Vec<String>,
    pub application_log_level: LogLevel,
    pub system_log_level: LogLevel,
    pub timezone: String,
    pub rust_log: String,
    pub url_auth_type: UrlAuthType,
    pub build: BuildSettings,
}

impl Default for StackSettings {
    fn default() -> Self {
        Self {
            memory_size_mb: DEFAULT_MEMORY_SIZE_MB,
            ephemeral_storage_mb: DEFAULT_EPHEMERAL_STORAGE_MB,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            architecture: Architecture::Arm64,
            runtime: DEFAULT_RUNTIME.to_string(),
            handler: DEFAULT_HANDLER.to_string(),
            layers: vec![DEFAULT_COLLECTOR_LAYER_ARN.to_string()],
            application_log_level: LogLevel::Info,
            system_log_level: LogLevel::Warn,
            timezone: "Asia/Tokyo".to_string(),
            rust_log: "info".to_string(),
            url_auth_type: UrlAuthType::None,
            build: BuildSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSettings {
    /// Directory of the external crate, relative to the workspace root.
    pub source_dir: String,
    /// Output directory inside `source_dir` holding the packaged files.
    pub output_dir: String,
    pub target_triple: String,
    pub cargo_features: Vec<String>,
    pub binary_name: String,
    /// Sidecar collector config, relative to `source_dir`.
    pub collector_config: String,
    pub cache_policy: CachePolicy,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            source_dir: "api".to_string(),
            output_dir: "bin".to_string(),
            target_triple: DEFAULT_TARGET_TRIPLE.to_string(),
            cargo_features: vec!["lambda".to_string()],
            binary_name: "api".to_string(),
            collector_config: "aws/collector-config.yaml".to_string(),
            cache_policy: CachePolicy::ContentHash,
        }
    }
}

impl StackSettings {
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|error| ConfigError::Settings {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        Self::from_json_str(&raw).map_err(|error| ConfigError::Settings {
            path: path.display().to_string(),
            message: error.to_string(),
        })
    }

    /// Path inside the deployed package where the collector config lands.
    pub fn collector_config_uri(&self) -> String {
        let file_name = Path::new(&self.build.collector_config)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.build.collector_config.clone());
        format!("/var/task/{file_name}")
    }
}
