use crate::paths::AppDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CURRENT_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub script: ScriptTransportConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            logging: LoggingConfig::default(),
            script: ScriptTransportConfig::default(),
            automation: AutomationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
    #[serde(default = "default_stdout_enabled")]
    pub stdout: bool,
    #[serde(default = "default_file_enabled")]
    pub file: bool,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_log_files: default_max_log_files(),
            stdout: default_stdout_enabled(),
            file: default_file_enabled(),
            file_name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// How the subprocess transport starts its script interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptTransportConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: PathBuf,
    #[serde(default = "default_javascript_args")]
    pub javascript_args: Vec<String>,
    #[serde(default)]
    pub applescript_args: Vec<String>,
}

impl Default for ScriptTransportConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            javascript_args: default_javascript_args(),
            applescript_args: Vec::new(),
        }
    }
}

/// Which application object the object-model transport creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationConfig {
    #[serde(default = "default_prog_id")]
    pub prog_id: String,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            prog_id: default_prog_id(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("config validation failed: {0}")]
    Validation(ValidationError),
    #[error("failed to prepare configuration directories: {0}")]
    Directories(#[from] crate::paths::DirsError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported config_version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("script.interpreter must not be empty")]
    EmptyInterpreter,
    #[error("automation.prog_id must not be empty")]
    EmptyProgId,
}

impl Config {
    pub fn load_or_default(dirs: &AppDirs) -> Result<Self, ConfigError> {
        dirs.ensure_exists()?;
        let path = Self::config_path(dirs);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    pub fn config_path(dirs: &AppDirs) -> PathBuf {
        dirs.config_dir().join("config.toml")
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.config_version != CURRENT_CONFIG_VERSION {
            return Err(ValidationError::UnsupportedVersion {
                found: self.config_version,
                expected: CURRENT_CONFIG_VERSION,
            });
        }
        if self.script.interpreter.as_os_str().is_empty() {
            return Err(ValidationError::EmptyInterpreter);
        }
        if self.automation.prog_id.trim().is_empty() {
            return Err(ValidationError::EmptyProgId);
        }
        Ok(())
    }
}

fn default_config_version() -> u32 {
    CURRENT_CONFIG_VERSION
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_max_log_files() -> usize {
    7
}

fn default_stdout_enabled() -> bool {
    true
}

fn default_file_enabled() -> bool {
    true
}

fn default_interpreter() -> PathBuf {
    PathBuf::from("osascript")
}

fn default_javascript_args() -> Vec<String> {
    vec!["-l".to_string(), "JavaScript".to_string()]
}

fn default_prog_id() -> String {
    "iTunes.Application".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.max_log_files, 7);
        assert!(config.logging.stdout);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.script.interpreter, PathBuf::from("osascript"));
        assert_eq!(config.script.javascript_args, vec!["-l", "JavaScript"]);
        assert_eq!(config.automation.prog_id, "iTunes.Application");
    }

    #[test]
    fn invalid_version_rejected() {
        let mut config = Config::default();
        config.config_version = CURRENT_CONFIG_VERSION + 1;
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ValidationError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn blank_transport_settings_rejected() {
        let mut config = Config::default();
        config.script.interpreter = PathBuf::new();
        assert_eq!(config.validate(), Err(ValidationError::EmptyInterpreter));

        let mut config = Config::default();
        config.automation.prog_id = "  ".into();
        assert_eq!(config.validate(), Err(ValidationError::EmptyProgId));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let root = tempfile::tempdir().unwrap();
        let dirs = AppDirs::under(root.path());
        let config = Config::load_or_default(&dirs).unwrap();
        assert_eq!(config.config_version, CURRENT_CONFIG_VERSION);
        assert!(dirs.config_dir().is_dir());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let root = tempfile::tempdir().unwrap();
        let dirs = AppDirs::under(root.path());
        dirs.ensure_exists().unwrap();
        fs::write(
            Config::config_path(&dirs),
            "[script]\ninterpreter = \"/usr/local/bin/osascript\"\n\n[logging]\nlevel = \"debug\"\n",
        )
        .unwrap();

        let config = Config::load_or_default(&dirs).unwrap();
        assert_eq!(
            config.script.interpreter,
            PathBuf::from("/usr/local/bin/osascript")
        );
        assert_eq!(config.script.javascript_args, vec!["-l", "JavaScript"]);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.automation.prog_id, "iTunes.Application");
    }

    #[test]
    fn malformed_file_reports_path() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("config.toml");
        fs::write(&path, "config_version = \"one\"").unwrap();
        match Config::load_from_path(&path) {
            Err(ConfigError::Parse { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
