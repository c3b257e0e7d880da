//! 采集配置
//!
//! `CollectionConfig` 只能通过整体提交来修改；持久化由 `ConfigStore` 负责，
//! 默认实现把每个 (设备, 追踪核) 的配置存为一个 JSON 文件。

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::constants::{LEVEL_CHARS, NUM_MODULES};
use crate::header::TracerType;

/// 轮询间隔上限 (1 小时)
pub const MAX_POLLING_INTERVAL_MS: u32 = 3_600_000;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("polling interval must be within 1..={} ms, got {0}", MAX_POLLING_INTERVAL_MS)]
    InvalidPollingInterval(u32),
    #[error("output file suffix must not contain path separators: {0:?}")]
    InvalidSuffix(String),
    #[error("unknown module: {0}")]
    UnknownModule(String),
    #[error("invalid verbosity level: {0:?} (expected letters from E, W, I, V)")]
    InvalidLevel(String),
    #[error("config io error ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config format error ({path}): {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 单个模块的 E/W/I/V 使能位
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VerbosityMask(u8);

impl VerbosityMask {
    pub const ERROR: u8 = 0x1;
    pub const WARN: u8 = 0x2;
    pub const INFO: u8 = 0x4;
    pub const VERBOSE: u8 = 0x8;

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x0F)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl FromStr for VerbosityMask {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bits = 0;
        for c in s.trim().chars() {
            bits |= match c.to_ascii_uppercase() {
                'E' => Self::ERROR,
                'W' => Self::WARN,
                'I' => Self::INFO,
                'V' => Self::VERBOSE,
                _ => return Err(ConfigError::InvalidLevel(s.to_string())),
            };
        }
        Ok(Self(bits))
    }
}

impl fmt::Display for VerbosityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in LEVEL_CHARS.iter().enumerate() {
            if self.0 & (1 << i) != 0 {
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for VerbosityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerbosityMask({:?})", self.to_string())
    }
}

impl TryFrom<String> for VerbosityMask {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VerbosityMask> for String {
    fn from(value: VerbosityMask) -> Self {
        value.to_string()
    }
}

/// 解析模块名：支持 "Module7" 或直接的序号 "7"
pub fn parse_module(name: &str) -> Result<usize, ConfigError> {
    let trimmed = name.trim();
    let digits = trimmed
        .strip_prefix("Module")
        .or_else(|| trimmed.strip_prefix("module"))
        .unwrap_or(trimmed);
    match digits.parse::<usize>() {
        Ok(i) if i < NUM_MODULES => Ok(i),
        _ => Err(ConfigError::UnknownModule(name.to_string())),
    }
}

/// 模块名（固件可能更改真实名字，这里只用序号）
pub fn module_name(index: usize) -> String {
    format!("Module{}", index)
}

fn default_polling_interval_ms() -> u32 {
    100
}

fn default_max_single_file_size_mb() -> u32 {
    10
}

fn default_verbosity() -> [VerbosityMask; NUM_MODULES] {
    [VerbosityMask::from_bits(VerbosityMask::ERROR | VerbosityMask::WARN); NUM_MODULES]
}

/// 单个追踪核的采集配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u32,

    /// 单文件最大尺寸，0 表示不限
    #[serde(default = "default_max_single_file_size_mb")]
    pub max_single_file_size_mb: u32,

    /// 目录内最多保留的文件数，0 表示不限
    #[serde(default)]
    pub max_num_files: u32,

    #[serde(default)]
    pub output_suffix: String,

    #[serde(default = "default_verbosity")]
    pub module_verbosity: [VerbosityMask; NUM_MODULES],
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: default_polling_interval_ms(),
            max_single_file_size_mb: default_max_single_file_size_mb(),
            max_num_files: 0,
            output_suffix: String::new(),
            module_verbosity: default_verbosity(),
        }
    }
}

impl CollectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling_interval_ms == 0 || self.polling_interval_ms > MAX_POLLING_INTERVAL_MS {
            return Err(ConfigError::InvalidPollingInterval(
                self.polling_interval_ms,
            ));
        }
        if self.output_suffix.contains(['/', '\\']) {
            return Err(ConfigError::InvalidSuffix(self.output_suffix.clone()));
        }
        Ok(())
    }

    pub fn max_single_file_size_bytes(&self) -> u64 {
        self.max_single_file_size_mb as u64 * 1024 * 1024
    }

    /// 所有模块级别，格式 "Module0=EW,Module1=EWI,..."
    pub fn verbosity_summary(&self) -> String {
        self.module_verbosity
            .iter()
            .enumerate()
            .map(|(i, v)| format!("{}={}", module_name(i), v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// 配置持久化接口
pub trait ConfigStore: Send + Sync {
    fn load(&self, device: &str, tracer: TracerType) -> Result<CollectionConfig, ConfigError>;

    fn save(
        &self,
        device: &str,
        tracer: TracerType,
        config: &CollectionConfig,
    ) -> Result<(), ConfigError>;
}

/// 每个 (设备, 追踪核) 一个 JSON 文件
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    dir: PathBuf,
}

impl JsonConfigStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, device: &str, tracer: TracerType) -> PathBuf {
        self.dir
            .join(format!("{}_{}_log_collector.json", device, tracer.as_str()))
    }
}

impl ConfigStore for JsonConfigStore {
    fn load(&self, device: &str, tracer: TracerType) -> Result<CollectionConfig, ConfigError> {
        let path = self.path_for(device, tracer);
        if !path.exists() {
            debug!("config: {} not found, using defaults", path.display());
            return Ok(CollectionConfig::default());
        }
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config: CollectionConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Format {
                path: path.clone(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn save(
        &self,
        device: &str,
        tracer: TracerType,
        config: &CollectionConfig,
    ) -> Result<(), ConfigError> {
        let path = self.path_for(device, tracer);
        fs::create_dir_all(&self.dir).map_err(|source| ConfigError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let content =
            serde_json::to_string_pretty(config).map_err(|source| ConfigError::Format {
                path: path.clone(),
                source,
            })?;
        fs::write(&path, content).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        info!("config: saved {}", path.display());
        Ok(())
    }
}

/// 内存配置存储（测试和模拟模式）
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    configs: Mutex<HashMap<(String, TracerType), CollectionConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self, device: &str, tracer: TracerType) -> Result<CollectionConfig, ConfigError> {
        let configs = self.configs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(configs
            .get(&(device.to_string(), tracer))
            .cloned()
            .unwrap_or_default())
    }

    fn save(
        &self,
        device: &str,
        tracer: TracerType,
        config: &CollectionConfig,
    ) -> Result<(), ConfigError> {
        let mut configs = self.configs.lock().unwrap_or_else(PoisonError::into_inner);
        configs.insert((device.to_string(), tracer), config.clone());
        Ok(())
    }
}
