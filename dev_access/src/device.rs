//! 设备句柄
//!
//! 持有驱动以及日志采集需要的少量设备元数据（基带类型、固件版本）。

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::driver::Driver;

/// 基带类型，决定日志缓冲区的 AHB 地址
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasebandType {
    None,
    Sparrow,
    Talyn,
}

impl fmt::Display for BasebandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BasebandType::None => write!(f, "NONE"),
            BasebandType::Sparrow => write!(f, "SPARROW"),
            BasebandType::Talyn => write!(f, "TALYN"),
        }
    }
}

impl std::str::FromStr for BasebandType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sparrow" => Ok(BasebandType::Sparrow),
            "talyn" => Ok(BasebandType::Talyn),
            "none" => Ok(BasebandType::None),
            other => Err(format!("unknown baseband type: {}", other)),
        }
    }
}

/// 固件版本
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FwVersion {
    pub major: u32,
    pub minor: u32,
    pub sub_minor: u32,
    pub build: u32,
}

impl fmt::Display for FwVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.sub_minor, self.build
        )
    }
}

/// 固件编译时间
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FwTimestamp {
    pub hour: u32,
    pub min: u32,
    pub sec: u32,
    pub day: u32,
    pub month: u32,
    pub year: u32,
}

/// 一个被管理的设备
pub struct Device {
    name: String,
    baseband: BasebandType,
    fw_version: FwVersion,
    fw_timestamp: FwTimestamp,
    silent: AtomicBool,
    driver: Box<dyn Driver>,
}

impl Device {
    pub fn new(name: impl Into<String>, baseband: BasebandType, driver: Box<dyn Driver>) -> Self {
        Self {
            name: name.into(),
            baseband,
            fw_version: FwVersion::default(),
            fw_timestamp: FwTimestamp::default(),
            silent: AtomicBool::new(false),
            driver,
        }
    }

    /// 设置固件信息（枚举阶段读取后填入）
    pub fn with_firmware(mut self, version: FwVersion, timestamp: FwTimestamp) -> Self {
        self.fw_version = version;
        self.fw_timestamp = timestamp;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn baseband(&self) -> BasebandType {
        self.baseband
    }

    pub fn fw_version(&self) -> FwVersion {
        self.fw_version
    }

    pub fn fw_timestamp(&self) -> FwTimestamp {
        self.fw_timestamp
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    /// 静默模式下不访问设备（例如正在复位）
    pub fn is_silent(&self) -> bool {
        self.silent.load(Ordering::SeqCst)
    }

    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("baseband", &self.baseband)
            .field("fw_version", &self.fw_version)
            .field("silent", &self.is_silent())
            .finish()
    }
}
