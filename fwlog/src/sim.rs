//! 模拟固件日志生产者
//!
//! 按设备固件的方式向 `SimDriver` 的环形缓冲区写条目并推进 write_ptr，
//! 供测试和 hostmgr 的模拟模式使用。

use std::sync::Arc;

use dev_access::{BasebandType, SimDriver};

use crate::constants::{
    ahb_start_address, buffer_size_by_index, linker_start_address, log_offset_register,
    BUFFER_HEADER_SIZE, LOG_OFFSET_MASK, LOG_SIGNATURE, LOG_SIZE_INDEX_SHIFT,
    MODULE_TABLE_OFFSET, MODULE_TABLE_SIZE, WORD_SIZE,
};
use crate::entry::LogEntryHeader;
use crate::header::{encode_module_table, parse_module_table, ModuleLevel, ModuleTable, TracerType};

pub struct SimTracer {
    driver: Arc<SimDriver>,
    tracer: TracerType,
    base: u64,
    capacity_words: u32,
    write_ptr: u32,
}

impl SimTracer {
    /// 在模拟设备上布置缓冲区：写偏移寄存器并清零 write_ptr
    ///
    /// `log_offset` 为链接器视角的偏移（低 29 位），`size_index` 为 3 位尺寸索引。
    /// 基带类型不支持时返回 None。
    pub fn install(
        driver: Arc<SimDriver>,
        tracer: TracerType,
        baseband: BasebandType,
        log_offset: u32,
        size_index: u32,
    ) -> Option<Self> {
        let ahb = ahb_start_address(tracer, baseband)?;
        let linker = linker_start_address(tracer, baseband)?;

        let offset = log_offset & LOG_OFFSET_MASK;
        driver.poke(
            log_offset_register(tracer),
            ((size_index & 0x7) << LOG_SIZE_INDEX_SHIFT) | offset,
        );

        let base = ahb - linker + offset as u64;
        let capacity_words = buffer_size_by_index(tracer, size_index) / WORD_SIZE as u32;
        driver.poke(base, 0);

        Some(Self {
            driver,
            tracer,
            base,
            capacity_words,
            write_ptr: 0,
        })
    }

    pub fn tracer(&self) -> TracerType {
        self.tracer
    }

    pub fn base_address(&self) -> u64 {
        self.base
    }

    pub fn capacity_words(&self) -> u32 {
        self.capacity_words
    }

    pub fn write_ptr(&self) -> u32 {
        self.write_ptr
    }

    fn put_word(&self, ptr: u32, value: u32) {
        let slot = (ptr % self.capacity_words) as u64;
        self.driver.poke(
            self.base + BUFFER_HEADER_SIZE as u64 + slot * WORD_SIZE as u64,
            value,
        );
    }

    /// 写一条正常日志，返回新的 write_ptr
    pub fn push_entry(&mut self, module: u8, level: u8, string_offset: u32, params: &[u32]) -> u32 {
        let hdr = LogEntryHeader {
            signature: LOG_SIGNATURE,
            module,
            level,
            is_string: false,
            string_offset,
            param_count: params.len() as u8,
        };
        self.push_raw(hdr.encode());
        for p in params {
            self.push_raw(*p);
        }
        self.write_ptr
    }

    /// 写一个原始字（可用来制造损坏条目）
    pub fn push_raw(&mut self, word: u32) -> u32 {
        self.put_word(self.write_ptr, word);
        self.set_write_ptr(self.write_ptr + 1);
        self.write_ptr
    }

    /// 直接设置 write_ptr（模拟重启或生产者跳跃）
    pub fn set_write_ptr(&mut self, write_ptr: u32) {
        self.write_ptr = write_ptr;
        self.driver.poke(self.base, write_ptr);
    }

    /// 设备上当前的模块级别表
    pub fn module_table(&self) -> ModuleTable {
        let bytes = self
            .driver
            .peek_bytes(self.base + MODULE_TABLE_OFFSET, MODULE_TABLE_SIZE);
        parse_module_table(&bytes).unwrap_or_default()
    }

    pub fn set_module(&self, index: usize, level: ModuleLevel) {
        let mut table = self.module_table();
        if let Some(slot) = table.get_mut(index) {
            *slot = level;
        }
        self.driver
            .poke_bytes(self.base + MODULE_TABLE_OFFSET, &encode_module_table(&table));
    }
}
