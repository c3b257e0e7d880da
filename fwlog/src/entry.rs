//! 日志条目
//!
//! 条目头是一个 32 位字，按位域解析；参数紧随其后，每个参数一个字。

use serde::Serialize;

use crate::constants::{
    IS_STRING_SHIFT, LEVEL_CHARS, LEVEL_SHIFT, LOG_SIGNATURE, MAX_PARAMS, MODULE_SHIFT,
    PARAM_LSB_SHIFT, PARAM_MSB_SHIFT, SIGNATURE_SHIFT, STRING_OFFSET_BITS,
};

/// 解码后的条目头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogEntryHeader {
    pub signature: u8,
    pub module: u8,
    pub level: u8,
    pub is_string: bool,
    /// 字符串段内的字节偏移（已左移 2 位）
    pub string_offset: u32,
    /// 0..=15，超过 MAX_PARAMS 视为损坏
    pub param_count: u8,
}

impl LogEntryHeader {
    pub fn decode(word: u32) -> Self {
        let field = |shift: u32, bits: u32| (word >> shift) & ((1 << bits) - 1);
        let msb = field(PARAM_MSB_SHIFT, 2);
        let lsb = field(PARAM_LSB_SHIFT, 2);
        Self {
            signature: field(SIGNATURE_SHIFT, 3) as u8,
            module: field(MODULE_SHIFT, 4) as u8,
            level: field(LEVEL_SHIFT, 2) as u8,
            is_string: field(IS_STRING_SHIFT, 1) != 0,
            string_offset: field(0, STRING_OFFSET_BITS) << 2,
            param_count: (4 * msb + lsb) as u8,
        }
    }

    /// 编码为条目头字（模拟固件用），超出位宽的部分被截断
    pub fn encode(&self) -> u32 {
        let count = self.param_count as u32 & 0xF;
        ((self.string_offset >> 2) & ((1 << STRING_OFFSET_BITS) - 1))
            | ((count >> 2) << PARAM_MSB_SHIFT)
            | ((self.module as u32 & 0xF) << MODULE_SHIFT)
            | ((self.level as u32 & 0x3) << LEVEL_SHIFT)
            | ((count & 0x3) << PARAM_LSB_SHIFT)
            | ((self.is_string as u32) << IS_STRING_SHIFT)
            | ((self.signature as u32 & 0x7) << SIGNATURE_SHIFT)
    }

    pub fn has_valid_signature(&self) -> bool {
        self.signature == LOG_SIGNATURE
    }

    pub fn has_valid_param_count(&self) -> bool {
        self.param_count <= MAX_PARAMS
    }
}

/// 一次轮询产出的日志行或异常标记
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawLogLine {
    Normal {
        module: u8,
        level: u8,
        signature: u8,
        string_offset: u32,
        is_string: bool,
        params: Vec<u32>,
    },
    DeviceRestarted {
        new_write_ptr: u32,
    },
    BufferOverrun {
        missed_words: u32,
    },
    InvalidSignature,
    ReadPointerAheadOfWrite,
}

impl RawLogLine {
    /// 只接受签名合法的条目头
    pub fn normal(hdr: &LogEntryHeader, params: Vec<u32>) -> Option<Self> {
        if !hdr.has_valid_signature() {
            return None;
        }
        Some(RawLogLine::Normal {
            module: hdr.module,
            level: hdr.level,
            signature: hdr.signature,
            string_offset: hdr.string_offset,
            is_string: hdr.is_string,
            params,
        })
    }

    pub fn is_anomaly(&self) -> bool {
        !matches!(self, RawLogLine::Normal { .. })
    }

    /// 写入记录文件的文本，返回 (文本, 是否为错误标记)
    ///
    /// 正常行格式 `module,L,offset:p0,p1,p2`，参数不足 3 个时补 0，兼容旧的解析工具
    pub fn record_text(&self) -> (String, bool) {
        match self {
            RawLogLine::Normal {
                module,
                level,
                string_offset,
                params,
                ..
            } => {
                let level_char = LEVEL_CHARS[(*level & 0x3) as usize];
                let mut fields: Vec<String> = params.iter().map(|p| p.to_string()).collect();
                while fields.len() < 3 {
                    fields.push("0".to_string());
                }
                (
                    format!(
                        "{},{},{}:{}\n",
                        module,
                        level_char,
                        string_offset,
                        fields.join(",")
                    ),
                    false,
                )
            }
            RawLogLine::DeviceRestarted { .. } => ("device was restarted".to_string(), true),
            RawLogLine::BufferOverrun { missed_words } => (
                format!("found buffer overrun - missed DWORDS: {}", missed_words),
                true,
            ),
            RawLogLine::InvalidSignature => ("got corrupted entry".to_string(), true),
            RawLogLine::ReadPointerAheadOfWrite => {
                ("read more lines than were created".to_string(), true)
            }
        }
    }
}
