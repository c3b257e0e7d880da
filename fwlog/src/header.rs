//! 环形缓冲区头
//!
//! 布局:
//! ```text
//! ┌───────────┬────────────────────────────┬──────────────────────┐
//! │ write_ptr │ module_level[NUM_MODULES]  │ payload (u32 words)  │
//! │ 4B        │ 1B x 16                    │ capacity x 4B        │
//! └───────────┴────────────────────────────┴──────────────────────┘
//! ```

use std::fmt;

use bytes::Buf;
use thiserror::Error;

use crate::config::VerbosityMask;
use crate::constants::{
    BUFFER_HEADER_SIZE, MODULE_TABLE_SIZE, NUM_MODULES, THIRD_PARTY_BIT, VERBOSITY_BITS,
    WORD_SIZE,
};

/// 追踪核类型：主固件或 uCode 微控制器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracerType {
    Fw,
    Ucode,
}

impl TracerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TracerType::Fw => "fw",
            TracerType::Ucode => "ucode",
        }
    }

    /// 调试日志前缀里使用的名字
    pub fn display_name(&self) -> &'static str {
        match self {
            TracerType::Fw => "FW",
            TracerType::Ucode => "uCode",
        }
    }
}

impl fmt::Display for TracerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 解码错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
}

/// 单个模块的级别信息（设备侧一字节）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModuleLevel {
    pub verbosity: VerbosityMask,
    pub third_party: bool,
}

impl ModuleLevel {
    pub fn from_byte(b: u8) -> Self {
        Self {
            verbosity: VerbosityMask::from_bits(b & VERBOSITY_BITS),
            third_party: b & THIRD_PARTY_BIT != 0,
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut b = self.verbosity.bits();
        if self.third_party {
            b |= THIRD_PARTY_BIT;
        }
        b
    }
}

pub type ModuleTable = [ModuleLevel; NUM_MODULES];

/// 缓冲区头
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RingBufferHeader {
    /// 生产者游标（字），由设备维护
    pub write_ptr: u32,
    pub modules: ModuleTable,
}

impl RingBufferHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < BUFFER_HEADER_SIZE {
            return Err(CodecError::Truncated {
                needed: BUFFER_HEADER_SIZE,
                got: bytes.len(),
            });
        }
        let mut buf = bytes;
        let write_ptr = buf.get_u32_le();
        let modules = parse_module_table(&buf[..MODULE_TABLE_SIZE])?;
        Ok(Self { write_ptr, modules })
    }
}

/// 解析模块级别表（不含 write_ptr）
pub fn parse_module_table(bytes: &[u8]) -> Result<ModuleTable, CodecError> {
    if bytes.len() < MODULE_TABLE_SIZE {
        return Err(CodecError::Truncated {
            needed: MODULE_TABLE_SIZE,
            got: bytes.len(),
        });
    }
    let mut table = [ModuleLevel::default(); NUM_MODULES];
    for (slot, b) in table.iter_mut().zip(bytes) {
        *slot = ModuleLevel::from_byte(*b);
    }
    Ok(table)
}

pub fn encode_module_table(table: &ModuleTable) -> [u8; MODULE_TABLE_SIZE] {
    let mut out = [0u8; MODULE_TABLE_SIZE];
    for (b, m) in out.iter_mut().zip(table) {
        *b = m.to_byte();
    }
    out
}

/// 取出头之后的负载字，末尾不足一个字的字节丢弃
pub fn payload_words(block: &[u8]) -> Vec<u32> {
    if block.len() <= BUFFER_HEADER_SIZE {
        return Vec::new();
    }
    let mut buf = &block[BUFFER_HEADER_SIZE..];
    let mut words = Vec::with_capacity(buf.len() / WORD_SIZE);
    while buf.remaining() >= WORD_SIZE {
        words.push(buf.get_u32_le());
    }
    words
}
