//! 寄存器/内存访问抽象
//!
//! 驱动层只负责同步读写，失败返回 `DriverError`，从不 panic。
//! 地址均为设备地址空间（MMIO/共享内存），字为小端 32 位。

use thiserror::Error;

/// 驱动错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("read failed at 0x{address:08x}")]
    ReadFailed { address: u64 },
    #[error("block read failed at 0x{address:08x} ({len} bytes)")]
    BlockReadFailed { address: u64, len: u32 },
    #[error("write failed at 0x{address:08x} ({len} bytes)")]
    WriteFailed { address: u64, len: usize },
    #[error("unaligned access at 0x{0:08x}")]
    Unaligned(u64),
}

/// 设备访问接口
///
/// 实现方自行负责内部同步；调用方不额外加锁。
pub trait Driver: Send + Sync {
    /// 读取单个 32 位字
    fn read(&self, address: u64) -> Result<u32, DriverError>;

    /// 读取连续 `len` 字节
    fn read_block(&self, address: u64, len: u32) -> Result<Vec<u8>, DriverError>;

    /// 写入连续字节
    fn write_block(&self, address: u64, bytes: &[u8]) -> Result<(), DriverError>;
}

impl<T: Driver + ?Sized> Driver for std::sync::Arc<T> {
    fn read(&self, address: u64) -> Result<u32, DriverError> {
        (**self).read(address)
    }

    fn read_block(&self, address: u64, len: u32) -> Result<Vec<u8>, DriverError> {
        (**self).read_block(address, len)
    }

    fn write_block(&self, address: u64, bytes: &[u8]) -> Result<(), DriverError> {
        (**self).write_block(address, bytes)
    }
}
