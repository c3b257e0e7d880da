//! 常量定义
//!
//! 固件日志环形缓冲区的布局、地址表和各种标记

use dev_access::BasebandType;

use crate::TracerType;

/// 日志模块数量
pub const NUM_MODULES: usize = 16;

/// 合法条目头的签名值 (3'b101)
pub const LOG_SIGNATURE: u8 = 5;

/// 单条日志最多携带的参数字数
pub const MAX_PARAMS: u8 = 14;

/// 缓冲区头: write_ptr(4B) + 每个模块 1 字节的级别信息
pub const WRITE_PTR_SIZE: usize = 4;
pub const MODULE_TABLE_OFFSET: u64 = WRITE_PTR_SIZE as u64;
pub const MODULE_TABLE_SIZE: usize = NUM_MODULES;
pub const BUFFER_HEADER_SIZE: usize = WRITE_PTR_SIZE + MODULE_TABLE_SIZE;

/// 字长（字节）
pub const WORD_SIZE: usize = 4;

/// 日志信息寄存器格式:
/// ```text
/// +--------------------------+----------------+
/// | 3bits of buffer size idx | 29bits offset  |
/// +--------------------------+----------------+
/// ```
pub const LOG_OFFSET_MASK: u32 = 0x1FFF_FFFF;
pub const LOG_SIZE_INDEX_SHIFT: u32 = 29;

const KB: u32 = 1024;

/// 条目头位域 (LSB 起):
/// ```text
///   [0..18)  string_offset (>> 2)
///   [18..20) param_count 高 2 位
///   [20..24) module
///   [24..26) level
///   [26..28) param_count 低 2 位
///   [28]     is_string
///   [29..32) signature
/// ```
pub const STRING_OFFSET_BITS: u32 = 18;
pub const PARAM_MSB_SHIFT: u32 = 18;
pub const MODULE_SHIFT: u32 = 20;
pub const LEVEL_SHIFT: u32 = 24;
pub const PARAM_LSB_SHIFT: u32 = 26;
pub const IS_STRING_SHIFT: u32 = 28;
pub const SIGNATURE_SHIFT: u32 = 29;

/// 级别字符，按 level 字段索引
pub const LEVEL_CHARS: [char; 4] = ['E', 'W', 'I', 'V'];

/// 模块级别字节中的第三方标记位
pub const THIRD_PARTY_BIT: u8 = 0x80;
/// 模块级别字节中的 E/W/I/V 使能位
pub const VERBOSITY_BITS: u8 = 0x0F;

/// AHB 视角的缓冲区基址（驱动访问用）
pub fn ahb_start_address(tracer: TracerType, bb: BasebandType) -> Option<u64> {
    match (tracer, bb) {
        (TracerType::Fw, BasebandType::Sparrow) => Some(0x90_8000),
        (TracerType::Fw, BasebandType::Talyn) => Some(0xA2_0000),
        (TracerType::Ucode, BasebandType::Sparrow) => Some(0x94_0000),
        (TracerType::Ucode, BasebandType::Talyn) => Some(0xA7_8000),
        (_, BasebandType::None) => None,
    }
}

/// 链接器视角的基址（固件看到的地址）
pub fn linker_start_address(tracer: TracerType, bb: BasebandType) -> Option<u64> {
    match (tracer, bb) {
        (_, BasebandType::None) => None,
        (TracerType::Fw, _) => Some(0x84_0000),
        (TracerType::Ucode, _) => Some(0x80_0000),
    }
}

/// 存放日志偏移的寄存器 (REG_FW_USAGE_1 / REG_FW_USAGE_2)
pub fn log_offset_register(tracer: TracerType) -> u64 {
    match tracer {
        TracerType::Fw => 0x88_0004,
        TracerType::Ucode => 0x88_0008,
    }
}

/// 根据 3 位尺寸索引得到缓冲区字节数
///
/// 0 为兼容旧固件的默认值（FW 4KB, uCode 1KB），1..7 依次为 1K..64K
pub fn buffer_size_by_index(tracer: TracerType, index: u32) -> u32 {
    match index & 0x7 {
        0 => match tracer {
            TracerType::Fw => 4 * KB,
            TracerType::Ucode => KB,
        },
        i => KB << (i - 1),
    }
}
