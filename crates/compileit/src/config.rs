use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::error::{AppError, AppResult};
use crate::executor::{ExecutorConfig, GRACE_PERIOD, OUTPUT_LIMIT};
use crate::service::ServiceSettings;

pub(crate) const DEFAULT_LOG_LEVEL: &str = "info";
pub(crate) const DEFAULT_TOOLCHAIN_DIR: &str = "lang";
pub(crate) const DEFAULT_HISTORY_PATH: &str = "data/history.jsonl";
pub(crate) const DEFAULT_BASE_IMAGE: &str = "docker.io/library/ubuntu:24.04";
pub(crate) const DEFAULT_RUNTIME: &str = "io.containerd.kata.v2";
pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub(crate) const DEFAULT_MAX_CODE_CHARS: usize = 5000;
pub(crate) const DEFAULT_PER_MINUTE: u32 = 60;
pub(crate) const DEFAULT_BURST: u32 = 80;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub listen: SocketAddr,
    pub log_level: String,
    /// Host directory mounted read-only into every sandbox.
    pub toolchain_dir: PathBuf,
    pub history_path: PathBuf,
    pub sandbox: SandboxSection,
    pub rate_limit: RateLimitSection,
    pub engine: EngineSection,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub base_image: String,
    pub runtime: String,
    pub timeout_secs: u64,
    pub max_code_chars: usize,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub per_minute: u32,
    pub burst: u32,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub socket: PathBuf,
    pub request_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            toolchain_dir: PathBuf::from(DEFAULT_TOOLCHAIN_DIR),
            history_path: PathBuf::from(DEFAULT_HISTORY_PATH),
            sandbox: SandboxSection::default(),
            rate_limit: RateLimitSection::default(),
            engine: EngineSection::default(),
        }
    }
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            runtime: DEFAULT_RUNTIME.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_code_chars: DEFAULT_MAX_CODE_CHARS,
        }
    }
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            per_minute: DEFAULT_PER_MINUTE,
            burst: DEFAULT_BURST,
        }
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(sandbox_docker::DEFAULT_SOCKET),
            request_timeout_secs: sandbox_docker::DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Load and validate a config from a YAML file.
///
/// Relative paths in the config are resolved against the config file's parent directory.
pub async fn load(path: &Path) -> AppResult<AppConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AppError::Config(format!("read {}: {e}", path.display())))?;
    let mut config: AppConfig = serde_yaml_ng::from_str(&content)
        .map_err(|e| AppError::Config(format!("parse {}: {e}", path.display())))?;
    if let Some(config_dir) = path.parent() {
        config.resolve_relative_paths(config_dir);
    }
    config.validate()?;
    Ok(config)
}

/// Load `path` if given, otherwise use defaults resolved against the
/// current directory.
pub async fn load_or_default(path: Option<&Path>) -> AppResult<AppConfig> {
    if let Some(path) = path {
        return load(path).await;
    }
    let mut config = AppConfig::default();
    let cwd = std::env::current_dir()
        .map_err(|e| AppError::Config(format!("current directory: {e}")))?;
    config.resolve_relative_paths(&cwd);
    config.validate()?;
    Ok(config)
}

impl AppConfig {
    /// Resolve relative paths against `config_dir` (the directory containing the YAML file).
    fn resolve_relative_paths(&mut self, config_dir: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = config_dir.join(&*p);
            }
        };
        resolve(&mut self.toolchain_dir);
        resolve(&mut self.history_path);
        resolve(&mut self.engine.socket);
    }

    fn validate(&self) -> AppResult<()> {
        self.max_log_level()?;
        if self.sandbox.timeout_secs == 0 {
            return Err(AppError::Config(
                "sandbox.timeout_secs must be positive".into(),
            ));
        }
        if self.sandbox.max_code_chars == 0 {
            return Err(AppError::Config(
                "sandbox.max_code_chars must be positive".into(),
            ));
        }
        if self.sandbox.base_image.trim().is_empty() {
            return Err(AppError::Config("sandbox.base_image is empty".into()));
        }
        if self.sandbox.runtime.trim().is_empty() {
            return Err(AppError::Config("sandbox.runtime is empty".into()));
        }
        Ok(())
    }

    pub fn max_log_level(&self) -> AppResult<Level> {
        self.log_level
            .parse()
            .map_err(|_| AppError::Config(format!("invalid log_level: {}", self.log_level)))
    }

    pub fn docker_config(&self) -> sandbox_docker::DockerConfig {
        sandbox_docker::DockerConfig {
            socket_path: self.engine.socket.clone(),
            request_timeout_secs: self.engine.request_timeout_secs,
            runtime: self.sandbox.runtime.clone(),
        }
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            base_image: self.sandbox.base_image.clone(),
            toolchain_dir: self.toolchain_dir.clone(),
            max_code_chars: self.sandbox.max_code_chars,
            executor: ExecutorConfig {
                runtime: self.sandbox.runtime.clone(),
                soft_timeout: Duration::from_secs(self.sandbox.timeout_secs),
                grace_period: GRACE_PERIOD,
                output_limit: OUTPUT_LIMIT,
            },
        }
    }
}
