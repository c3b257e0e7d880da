//! fwlog - 设备固件日志采集
//!
//! 特性：
//! - 环形缓冲区消费：写指针回绕、溢出、设备重启检测
//! - 条目解码：位域条目头 + 变长参数，损坏条目至少前进一个字
//! - 周期调度：单线程执行所有轮询任务，注销时等待进行中的任务结束
//! - 滚动记录：按大小切换文件，按数量淘汰最旧文件
//! - 事件发布：新日志按批次推送到事件总线

pub mod collector;
pub mod config;
pub mod constants;
pub mod cursor;
pub mod entry;
pub mod event;
pub mod header;
pub mod recorder;
pub mod scheduler;
pub mod sim;

pub use collector::{CollectorContext, CollectorError, CollectorMode, LogCollector};
pub use config::{
    CollectionConfig, ConfigError, ConfigStore, JsonConfigStore, MemoryConfigStore, VerbosityMask,
};
pub use cursor::CollectorCursor;
pub use entry::{LogEntryHeader, RawLogLine};
pub use event::{BroadcastSink, EventSink, HostEvent, LogBatch};
pub use header::{ModuleLevel, ModuleTable, RingBufferHeader, TracerType};
pub use recorder::{LogCollectorRecorder, RecorderError, RecorderState};
pub use scheduler::{TaskId, TaskScheduler};
pub use sim::SimTracer;

#[cfg(test)]
mod tests;
