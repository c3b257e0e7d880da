//! 主机编排
//!
//! 持有调度器、事件总线和所有设备的采集器。关闭顺序：
//! 心跳任务 → 各采集器（注销轮询任务后关闭记录器）→ 设备 → 调度器。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use dev_access::Device;
use fwlog::{
    BroadcastSink, CollectorContext, ConfigStore, EventSink, HostEvent, LogCollector, TaskId,
    TaskScheduler, TracerType,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(1);
const EVENT_BUS_CAPACITY: usize = 1024;

struct ManagedDevice {
    device: Arc<Device>,
    collectors: Vec<LogCollector>,
}

pub struct Host {
    scheduler: Arc<TaskScheduler>,
    sink: Arc<BroadcastSink>,
    ctx: CollectorContext,
    log_dir: PathBuf,
    devices: Vec<ManagedDevice>,
    keep_alive: Option<TaskId>,
}

impl Host {
    /// 启动调度器并注册心跳任务；调度器线程起不来时返回错误
    pub fn new<P: AsRef<Path>>(config_store: Arc<dyn ConfigStore>, log_dir: P) -> Result<Self> {
        let scheduler = Arc::new(TaskScheduler::new());
        let sink = Arc::new(BroadcastSink::new(EVENT_BUS_CAPACITY));

        let heartbeat = sink.clone();
        let keep_alive = scheduler.register(
            move || {
                heartbeat.publish(HostEvent::KeepAlive {
                    timestamp_ms: Local::now().timestamp_millis().max(0) as u64,
                });
                Ok(())
            },
            KEEP_ALIVE_INTERVAL,
            true,
        );
        scheduler
            .start()
            .context("failed to start the task scheduler")?;

        let ctx = CollectorContext {
            scheduler: scheduler.clone(),
            config_store,
            event_sink: sink.clone(),
        };
        info!("host: started, logs in {}", log_dir.as_ref().display());

        Ok(Self {
            scheduler,
            sink,
            ctx,
            log_dir: log_dir.as_ref().to_path_buf(),
            devices: Vec::new(),
            keep_alive: Some(keep_alive),
        })
    }

    /// 订阅事件总线
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.sink.subscribe()
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    /// 为设备的每个追踪核创建采集器并设置初始模式
    ///
    /// 模式设置失败只记录警告，可以之后通过采集器接口重试。
    pub fn add_device(
        &mut self,
        device: Arc<Device>,
        tracers: &[TracerType],
        record: bool,
        publish: bool,
    ) -> Result<()> {
        let mut collectors = Vec::with_capacity(tracers.len());
        for &tracer in tracers {
            let collector = LogCollector::new(&device, tracer, &self.ctx, &self.log_dir)
                .with_context(|| {
                    format!("failed to create {} collector for {}", tracer, device.name())
                })?;
            if let Err(e) = collector.set_publishing_mode(publish) {
                warn!("host: {} {} publishing not enabled: {}", device.name(), tracer, e);
            }
            if let Err(e) = collector.set_recording_mode(record) {
                warn!("host: {} {} recording not enabled: {}", device.name(), tracer, e);
            }
            info!(
                "host: {} {} collector is {:?}",
                device.name(),
                tracer,
                collector.state()
            );
            collectors.push(collector);
        }
        self.devices.push(ManagedDevice { device, collectors });
        Ok(())
    }

    pub fn collectors(&self) -> impl Iterator<Item = &LogCollector> {
        self.devices.iter().flat_map(|d| d.collectors.iter())
    }

    pub fn device_names(&self) -> Vec<String> {
        self.devices
            .iter()
            .map(|d| d.device.name().to_string())
            .collect()
    }

    /// 按顺序关闭，可重复调用
    pub fn shutdown(&mut self) {
        if let Some(id) = self.keep_alive.take() {
            self.scheduler.unregister(id);
        }
        for mut managed in self.devices.drain(..) {
            // 采集器析构会等待进行中的轮询结束
            managed.collectors.clear();
            debug!("host: released device {}", managed.device.name());
        }
        if self.scheduler.is_running() {
            self.scheduler.stop();
            info!("host: stopped");
        }
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.shutdown();
    }
}
