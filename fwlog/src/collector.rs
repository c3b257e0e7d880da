//! 日志采集器
//!
//! 每个 (设备, 追踪核) 一个 `LogCollector`。构造时向调度器注册轮询任务，
//! 每次轮询读取环形缓冲区、推进游标，并把结果交给记录器和事件总线。
//!
//! 采集器只持有设备的弱引用；析构时先注销轮询任务（等待进行中的轮询结束），
//! 再关闭记录器，因此析构返回后不会再有轮询访问设备。

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use dev_access::{BasebandType, Device, DriverError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{parse_module, CollectionConfig, ConfigError, ConfigStore, VerbosityMask};
use crate::constants::{
    ahb_start_address, buffer_size_by_index, linker_start_address, log_offset_register,
    BUFFER_HEADER_SIZE, LOG_OFFSET_MASK, LOG_SIZE_INDEX_SHIFT, MODULE_TABLE_OFFSET,
    MODULE_TABLE_SIZE, WORD_SIZE,
};
use crate::cursor::CollectorCursor;
use crate::event::{EventSink, HostEvent, LogBatch};
use crate::header::{
    encode_module_table, parse_module_table, payload_words, CodecError, ModuleLevel, ModuleTable,
    RingBufferHeader, TracerType,
};
use crate::recorder::{LogCollectorRecorder, RecorderError, RecorderState};
use crate::scheduler::{TaskId, TaskScheduler};

/// 采集器错误
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("device {0} is no longer available")]
    DeviceGone(String),
    #[error("log collector doesn't support baseband type {0}")]
    UnsupportedBaseband(BasebandType),
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
    #[error("log buffer error: {0}")]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Recorder(#[from] RecorderError),
}

/// 采集模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorMode {
    Idle,
    Publishing,
    Recording,
    Both,
}

impl CollectorMode {
    fn from_flags(recording: bool, publishing: bool) -> Self {
        match (recording, publishing) {
            (false, false) => CollectorMode::Idle,
            (false, true) => CollectorMode::Publishing,
            (true, false) => CollectorMode::Recording,
            (true, true) => CollectorMode::Both,
        }
    }
}

/// 采集器共享的外部服务
#[derive(Clone)]
pub struct CollectorContext {
    pub scheduler: Arc<TaskScheduler>,
    pub config_store: Arc<dyn ConfigStore>,
    pub event_sink: Arc<dyn EventSink>,
}

struct CollectorInner {
    config: CollectionConfig,
    cursor: CollectorCursor,
    /// 最近一次从设备读到（或写入设备）的模块级别表
    modules: ModuleTable,
    recorder: LogCollectorRecorder,
    recording: bool,
    publishing: bool,
}

impl CollectorInner {
    fn is_active(&self) -> bool {
        self.recording || self.publishing
    }
}

struct CollectorShared {
    device: Weak<Device>,
    device_name: String,
    tracer: TracerType,
    prefix: String,
    store: Arc<dyn ConfigStore>,
    sink: Arc<dyn EventSink>,
    inner: Mutex<CollectorInner>,
}

impl CollectorShared {
    fn lock(&self) -> MutexGuard<'_, CollectorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn device(&self) -> Result<Arc<Device>, CollectorError> {
        self.device
            .upgrade()
            .ok_or_else(|| CollectorError::DeviceGone(self.device_name.clone()))
    }

    /// 根据偏移寄存器计算缓冲区基址和容量
    fn refresh_buffer_location(
        &self,
        device: &Device,
        cursor: &mut CollectorCursor,
    ) -> Result<(), CollectorError> {
        let bb = device.baseband();
        let (ahb, linker) = match (
            ahb_start_address(self.tracer, bb),
            linker_start_address(self.tracer, bb),
        ) {
            (Some(ahb), Some(linker)) => (ahb, linker),
            _ => {
                error!(
                    "{}Log collector doesn't support baseband type {}",
                    self.prefix, bb
                );
                return Err(CollectorError::UnsupportedBaseband(bb));
            }
        };

        let info = device
            .driver()
            .read(log_offset_register(self.tracer))
            .map_err(|e| {
                error!("{}failed to read log offset address: {}", self.prefix, e);
                e
            })?;

        let base = ahb
            .wrapping_sub(linker)
            .wrapping_add((info & LOG_OFFSET_MASK) as u64);
        let capacity_words =
            buffer_size_by_index(self.tracer, info >> LOG_SIZE_INDEX_SHIFT) / WORD_SIZE as u32;

        if cursor.relocate(base, capacity_words) {
            debug!(
                "{}log buffer at 0x{:x}, {} words",
                self.prefix, base, capacity_words
            );
        }
        Ok(())
    }

    fn read_module_table(
        &self,
        device: &Device,
        base: u64,
    ) -> Result<ModuleTable, CollectorError> {
        let bytes = device
            .driver()
            .read_block(base + MODULE_TABLE_OFFSET, MODULE_TABLE_SIZE as u32)
            .map_err(|e| {
                error!(
                    "{}Failed to read module verbosity structure for {}: {}",
                    self.prefix, self.tracer, e
                );
                e
            })?;
        Ok(parse_module_table(&bytes)?)
    }

    /// 读设备上的模块级别表，与 `config` 不同时整表写回
    ///
    /// 第三方标志保留设备上的值。写失败时 `inner.modules` 不变。返回是否写了设备。
    fn apply_module_verbosity(
        &self,
        device: &Device,
        inner: &mut CollectorInner,
        config: &CollectionConfig,
    ) -> Result<bool, CollectorError> {
        debug!("{}Apply module verbosity", self.prefix);
        self.refresh_buffer_location(device, &mut inner.cursor)?;
        let base = inner.cursor.buffer_base_address;

        let live = self.read_module_table(device, base)?;
        let mut desired = live;
        for (slot, verbosity) in desired.iter_mut().zip(config.module_verbosity.iter()) {
            *slot = ModuleLevel {
                verbosity: *verbosity,
                third_party: slot.third_party,
            };
        }

        if desired == live {
            inner.modules = live;
            return Ok(false);
        }

        device
            .driver()
            .write_block(base + MODULE_TABLE_OFFSET, &encode_module_table(&desired))
            .map_err(|e| {
                error!(
                    "{}Failed to write module verbosity structure for {}: {}",
                    self.prefix, self.tracer, e
                );
                e
            })?;
        inner.modules = desired;
        debug!(
            "{}Module verbosity for {} was set to {}",
            self.prefix,
            self.tracer,
            config.verbosity_summary()
        );
        Ok(true)
    }

    /// 从 Idle 进入采集：重新加载配置并下发模块级别，成功后返回新配置（尚未提交）
    fn start_collecting(
        &self,
        inner: &mut CollectorInner,
    ) -> Result<CollectionConfig, CollectorError> {
        let config = self.store.load(&self.device_name, self.tracer)?;
        let device = self.device()?;
        self.apply_module_verbosity(&device, inner, &config)?;
        Ok(config)
    }

    fn poll(&self) -> Result<(), CollectorError> {
        let Some(device) = self.device.upgrade() else {
            debug!("{}device dropped, skipping poll", self.prefix);
            return Ok(());
        };

        let mut guard = self.lock();
        let inner = &mut *guard;
        if device.is_silent() || !inner.is_active() {
            return Ok(());
        }

        if inner.recording {
            if let Err(e) = inner.recorder.handle_recording(&inner.config, &inner.modules) {
                warn!("{}{}", self.prefix, e);
            }
        }

        self.refresh_buffer_location(&device, &mut inner.cursor)?;
        let base = inner.cursor.buffer_base_address;

        let write_ptr = device.driver().read(base)?;
        if write_ptr == inner.cursor.read_ptr {
            return Ok(());
        }

        let total = BUFFER_HEADER_SIZE + inner.cursor.buffer_capacity_words as usize * WORD_SIZE;
        let block = device.driver().read_block(base, total as u32)?;
        let header = RingBufferHeader::parse(&block)?;
        inner.modules = header.modules;

        let lines = inner
            .cursor
            .consume(header.write_ptr, &payload_words(&block));
        if lines.is_empty() {
            return Ok(());
        }

        if inner.recording {
            inner.recorder.record_lines(&lines);
            inner.recorder.flush();
        }
        if inner.publishing {
            self.sink.publish(HostEvent::NewLogs(LogBatch {
                device_name: self.device_name.clone(),
                tracer_type: self.tracer,
                lines,
            }));
        }
        Ok(())
    }
}

/// 单个追踪核的日志采集器
pub struct LogCollector {
    shared: Arc<CollectorShared>,
    scheduler: Arc<TaskScheduler>,
    task_id: TaskId,
}

impl LogCollector {
    /// 加载配置、定位缓冲区并注册轮询任务，初始为 Idle
    ///
    /// 设备暂时不可访问时只记录警告，缓冲区位置会在之后的轮询中重新计算。
    pub fn new<P: AsRef<Path>>(
        device: &Arc<Device>,
        tracer: TracerType,
        ctx: &CollectorContext,
        log_folder: P,
    ) -> Result<Self, CollectorError> {
        let device_name = device.name().to_string();
        let prefix = format!("{} {} tracer: ", device_name, tracer.display_name());
        let config = ctx.config_store.load(&device_name, tracer)?;
        config.validate()?;

        let recorder = LogCollectorRecorder::new(
            log_folder,
            &device_name,
            tracer,
            device.fw_version(),
            device.fw_timestamp(),
        );

        let polling_interval = Duration::from_millis(config.polling_interval_ms as u64);
        let shared = Arc::new(CollectorShared {
            device: Arc::downgrade(device),
            device_name,
            tracer,
            prefix,
            store: Arc::clone(&ctx.config_store),
            sink: Arc::clone(&ctx.event_sink),
            inner: Mutex::new(CollectorInner {
                config,
                cursor: CollectorCursor::new(),
                modules: ModuleTable::default(),
                recorder,
                recording: false,
                publishing: false,
            }),
        });

        {
            let mut inner = shared.lock();
            if let Err(e) = shared.refresh_buffer_location(device, &mut inner.cursor) {
                warn!("{}initial buffer location unknown: {}", shared.prefix, e);
            }
        }

        let weak = Arc::downgrade(&shared);
        let task_id = ctx.scheduler.register(
            move || match weak.upgrade() {
                Some(shared) => Ok(shared.poll()?),
                None => Ok(()),
            },
            polling_interval,
            true,
        );
        info!(
            "{}collector created, polling every {:?} ({})",
            shared.prefix, polling_interval, task_id
        );

        Ok(Self {
            shared,
            scheduler: Arc::clone(&ctx.scheduler),
            task_id,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.shared.device_name
    }

    pub fn tracer(&self) -> TracerType {
        self.shared.tracer
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// 立即执行一次轮询（调度器线程也是调用这里）
    pub fn poll(&self) -> Result<(), CollectorError> {
        self.shared.poll()
    }

    /// 重新计算缓冲区位置
    pub fn refresh_buffer_location(&self) -> Result<(), CollectorError> {
        let device = self.shared.device()?;
        let mut inner = self.shared.lock();
        self.shared.refresh_buffer_location(&device, &mut inner.cursor)
    }

    pub fn set_recording_mode(&self, on: bool) -> Result<(), CollectorError> {
        let mut guard = self.shared.lock();
        let inner = &mut *guard;
        if inner.recording == on {
            return Ok(());
        }

        if on {
            let config = if inner.is_active() {
                inner.config.clone()
            } else {
                self.shared.start_collecting(inner)?
            };
            inner.recorder.prepare_recording(&config, &inner.modules)?;
            inner.config = config;
        } else {
            inner.recorder.stop_recording();
        }

        inner.recording = on;
        info!(
            "{}recording {}",
            self.shared.prefix,
            if on { "started" } else { "stopped" }
        );
        Ok(())
    }

    pub fn set_publishing_mode(&self, on: bool) -> Result<(), CollectorError> {
        let mut guard = self.shared.lock();
        let inner = &mut *guard;
        if inner.publishing == on {
            return Ok(());
        }

        if on && !inner.is_active() {
            inner.config = self.shared.start_collecting(inner)?;
        }

        inner.publishing = on;
        info!(
            "{}publishing {}",
            self.shared.prefix,
            if on { "started" } else { "stopped" }
        );
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.shared.lock().recording
    }

    pub fn is_publishing(&self) -> bool {
        self.shared.lock().publishing
    }

    pub fn state(&self) -> CollectorMode {
        let inner = self.shared.lock();
        CollectorMode::from_flags(inner.recording, inner.publishing)
    }

    /// 按当前配置下发模块级别，设备已一致时不写。返回是否写了设备。
    pub fn apply_module_verbosity(&self) -> Result<bool, CollectorError> {
        let device = self.shared.device()?;
        let mut guard = self.shared.lock();
        let inner = &mut *guard;
        let config = inner.config.clone();
        self.shared.apply_module_verbosity(&device, inner, &config)
    }

    pub fn module_verbosity(&self, module: &str) -> Result<VerbosityMask, CollectorError> {
        let index = parse_module(module)?;
        Ok(self.shared.lock().config.module_verbosity[index])
    }

    /// 修改单个模块的级别：校验后先下发到设备，再保存并提交
    ///
    /// 任何一步失败都不改变采集器配置和已保存的配置。
    pub fn set_module_verbosity(&self, module: &str, level: &str) -> Result<(), CollectorError> {
        let index = parse_module(module)?;
        let verbosity: VerbosityMask = level.parse()?;
        let device = self.shared.device()?;

        let mut guard = self.shared.lock();
        let inner = &mut *guard;
        let mut candidate = inner.config.clone();
        candidate.module_verbosity[index] = verbosity;

        self.shared
            .apply_module_verbosity(&device, inner, &candidate)?;

        if let Err(e) = self
            .shared
            .store
            .save(&self.shared.device_name, self.shared.tracer, &candidate)
        {
            // 设备已按新级别写入，恢复为当前配置
            let current = inner.config.clone();
            if let Err(restore) = self.shared.apply_module_verbosity(&device, inner, &current) {
                warn!(
                    "{}failed to restore module verbosity: {}",
                    self.shared.prefix, restore
                );
            }
            return Err(e.into());
        }

        inner.config = candidate;
        Ok(())
    }

    /// 整体替换配置；非法配置或保存失败时不改变任何状态
    pub fn submit_configuration(&self, config: CollectionConfig) -> Result<(), CollectorError> {
        config.validate()?;
        self.shared
            .store
            .save(&self.shared.device_name, self.shared.tracer, &config)?;

        let polling_changed = {
            let mut guard = self.shared.lock();
            let inner = &mut *guard;
            let changed = inner.config.polling_interval_ms != config.polling_interval_ms;
            inner.config = config.clone();

            if inner.is_active() {
                let applied = self
                    .shared
                    .device()
                    .and_then(|device| self.shared.apply_module_verbosity(&device, inner, &config));
                if let Err(e) = applied {
                    warn!("{}module verbosity not applied: {}", self.shared.prefix, e);
                }
            }
            changed
        };

        if polling_changed {
            self.scheduler.change_interval(
                self.task_id,
                Duration::from_millis(config.polling_interval_ms as u64),
            );
        }
        Ok(())
    }

    pub fn get_configuration(&self) -> CollectionConfig {
        self.shared.lock().config.clone()
    }

    pub fn cursor(&self) -> CollectorCursor {
        self.shared.lock().cursor.clone()
    }

    pub fn recorder_state(&self) -> RecorderState {
        self.shared.lock().recorder.state()
    }

    /// 最近一次从设备读到的模块级别表
    pub fn device_modules(&self) -> ModuleTable {
        self.shared.lock().modules
    }
}

impl Drop for LogCollector {
    fn drop(&mut self) {
        self.scheduler.unregister(self.task_id);
        let mut inner = self.shared.lock();
        if inner.recording {
            inner.recorder.stop_recording();
            inner.recording = false;
        }
        debug!("{}collector dropped", self.shared.prefix);
    }
}

