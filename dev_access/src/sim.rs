//! 内存模拟驱动
//!
//! 用稀疏字节表模拟设备地址空间，未写过的地址读出 0。
//! 支持故障注入，便于测试采集器的错误路径。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::driver::{Driver, DriverError};

/// 模拟设备地址空间
#[derive(Debug, Default)]
pub struct SimDriver {
    mem: Mutex<HashMap<u64, u8>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    block_writes: AtomicUsize,
}

impl SimDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接写一个字（模拟固件侧写入，不计入驱动写统计）
    pub fn poke(&self, address: u64, value: u32) {
        self.poke_bytes(address, &value.to_le_bytes());
    }

    pub fn poke_bytes(&self, address: u64, bytes: &[u8]) {
        let mut mem = self.mem.lock().unwrap_or_else(PoisonError::into_inner);
        for (i, b) in bytes.iter().enumerate() {
            mem.insert(address + i as u64, *b);
        }
    }

    /// 直接读一个字（不受故障注入影响）
    pub fn peek(&self, address: u64) -> u32 {
        let bytes = self.peek_bytes(address, 4);
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    pub fn peek_bytes(&self, address: u64, len: usize) -> Vec<u8> {
        let mem = self.mem.lock().unwrap_or_else(PoisonError::into_inner);
        (0..len as u64)
            .map(|i| mem.get(&(address + i)).copied().unwrap_or(0))
            .collect()
    }

    /// 之后的读操作全部失败
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// 之后的写操作全部失败
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 通过驱动接口成功完成的块写次数
    pub fn block_write_count(&self) -> usize {
        self.block_writes.load(Ordering::SeqCst)
    }
}

impl Driver for SimDriver {
    fn read(&self, address: u64) -> Result<u32, DriverError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DriverError::ReadFailed { address });
        }
        if address % 4 != 0 {
            return Err(DriverError::Unaligned(address));
        }
        Ok(self.peek(address))
    }

    fn read_block(&self, address: u64, len: u32) -> Result<Vec<u8>, DriverError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DriverError::BlockReadFailed { address, len });
        }
        Ok(self.peek_bytes(address, len as usize))
    }

    fn write_block(&self, address: u64, bytes: &[u8]) -> Result<(), DriverError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DriverError::WriteFailed {
                address,
                len: bytes.len(),
            });
        }
        debug!("sim: write {} bytes at 0x{:08x}", bytes.len(), address);
        self.poke_bytes(address, bytes);
        self.block_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
