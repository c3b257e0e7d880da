//! 设备访问层
//!
//! 日志采集器通过这里的 `Driver` 接口读写设备寄存器和共享内存。
//!
//! # 示例
//!
//! ```rust
//! use std::sync::Arc;
//! use dev_access::{BasebandType, Device, Driver, SimDriver};
//!
//! let sim = Arc::new(SimDriver::new());
//! sim.poke(0x880004, 0x2000_1000);
//!
//! let device = Device::new("wlan0", BasebandType::Talyn, Box::new(sim.clone()));
//! assert_eq!(device.driver().read(0x880004).unwrap(), 0x2000_1000);
//! ```

pub mod device;
pub mod driver;
pub mod sim;

pub use device::{BasebandType, Device, FwTimestamp, FwVersion};
pub use driver::{Driver, DriverError};
pub use sim::SimDriver;
