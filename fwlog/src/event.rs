//! 事件发布
//!
//! 采集器把每次轮询新解码的日志打包成 `LogBatch` 发给 `EventSink`，
//! 由事件总线分发给订阅者（订阅侧的协议不在这里定义）。

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::entry::RawLogLine;
use crate::header::TracerType;

/// 一批新日志
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogBatch {
    pub device_name: String,
    pub tracer_type: TracerType,
    pub lines: Vec<RawLogLine>,
}

/// 主机事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    NewLogs(LogBatch),
    KeepAlive { timestamp_ms: u64 },
}

impl HostEvent {
    /// 单行 JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// 事件出口
pub trait EventSink: Send + Sync {
    fn publish(&self, event: HostEvent);
}

/// 基于 tokio broadcast 的事件总线
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<HostEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: HostEvent) {
        // 没有订阅者时发送失败是正常情况
        if self.tx.send(event).is_err() {
            debug!("events: no subscribers, event dropped");
        }
    }
}
