//! 模拟设备
//!
//! 没有硬件时用 SimDriver 搭一个设备，两个追踪核各布置一个日志缓冲区，
//! 再由一个后台任务按固定节奏写入日志条目。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use dev_access::{BasebandType, Device, FwTimestamp, FwVersion, SimDriver};
use fwlog::{SimTracer, TracerType};
use tracing::{debug, info};

/// FW 缓冲区偏移（链接器视角），尺寸索引 4 => 8KiB
const FW_LOG_OFFSET: u32 = 0x1_0000;
const FW_SIZE_INDEX: u32 = 4;
/// uCode 缓冲区偏移，尺寸索引 0 => 默认 1KiB
const UCODE_LOG_OFFSET: u32 = 0x2000;
const UCODE_SIZE_INDEX: u32 = 0;

/// 每隔这么多条写入一个损坏条目
const CORRUPT_EVERY: u64 = 500;

pub struct SimulatedDevice {
    pub device: Arc<Device>,
    pub tracers: Vec<SimTracer>,
}

/// 创建模拟设备并布置请求的追踪核缓冲区
pub fn bring_up(name: &str, baseband: BasebandType, tracers: &[TracerType]) -> Result<SimulatedDevice> {
    let sim = Arc::new(SimDriver::new());

    let mut installed = Vec::with_capacity(tracers.len());
    for &tracer in tracers {
        let (offset, size_index) = match tracer {
            TracerType::Fw => (FW_LOG_OFFSET, FW_SIZE_INDEX),
            TracerType::Ucode => (UCODE_LOG_OFFSET, UCODE_SIZE_INDEX),
        };
        let t = SimTracer::install(sim.clone(), tracer, baseband, offset, size_index)
            .ok_or_else(|| anyhow!("baseband {} has no {} log buffer", baseband, tracer))?;
        info!(
            "sim: {} {} buffer at 0x{:x} ({} words)",
            name,
            tracer,
            t.base_address(),
            t.capacity_words()
        );
        installed.push(t);
    }

    let device = Device::new(name, baseband, Box::new(sim)).with_firmware(
        FwVersion {
            major: 6,
            minor: 2,
            sub_minor: 0,
            build: 41,
        },
        FwTimestamp {
            hour: 10,
            min: 4,
            sec: 33,
            day: 14,
            month: 2,
            year: 2020,
        },
    );

    Ok(SimulatedDevice {
        device: Arc::new(device),
        tracers: installed,
    })
}

/// 周期性地向所有追踪核写日志，直到任务被取消
pub async fn run_producer(mut tracers: Vec<SimTracer>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    let mut seq: u64 = 0;
    loop {
        ticker.tick().await;
        for tracer in tracers.iter_mut() {
            seq += 1;
            if seq % CORRUPT_EVERY == 0 {
                tracer.push_raw(0xFFFF_FFFF);
                continue;
            }
            let n = seq as u32;
            let params: Vec<u32> = (0..n % 4).map(|i| n.wrapping_mul(i + 1)).collect();
            tracer.push_entry((n % 16) as u8, (n % 4) as u8, n.wrapping_mul(4) % 0x1_0000, &params);
        }
        debug!("sim: produced up to #{}", seq);
    }
}
