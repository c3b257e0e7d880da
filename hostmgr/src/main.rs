//! hostmgr - 主机侧设备管理
//!
//! 在周期调度器上运行设备的固件日志采集器:
//! - 记录模式: 解码后的日志写入滚动文件
//! - 发布模式: 新日志按批次推送到事件总线，可选打印为 JSON 行
//!
//! 没有真实驱动时使用模拟设备，由后台任务持续写入日志。

mod host;
mod sim;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use dev_access::BasebandType;
use fwlog::{ConfigStore, HostEvent, JsonConfigStore, TracerType};
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::host::Host;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TracerArg {
    Fw,
    Ucode,
    All,
}

impl TracerArg {
    fn tracers(self) -> Vec<TracerType> {
        match self {
            TracerArg::Fw => vec![TracerType::Fw],
            TracerArg::Ucode => vec![TracerType::Ucode],
            TracerArg::All => vec![TracerType::Fw, TracerType::Ucode],
        }
    }
}

#[derive(Parser)]
#[command(name = "hostmgr")]
#[command(about = "Host manager - collect firmware debug logs from managed devices")]
struct Cli {
    /// 日志文件目录
    #[arg(short, long, default_value = "logs")]
    log_dir: PathBuf,

    /// 采集配置目录（每个设备/追踪核一个 JSON 文件）
    #[arg(short, long, default_value = "config")]
    config_dir: PathBuf,

    /// 设备名
    #[arg(short, long, default_value = "wlan0")]
    device: String,

    /// 基带类型: sparrow / talyn
    #[arg(short, long, default_value = "talyn")]
    baseband: BasebandType,

    /// 采集哪些追踪核
    #[arg(short, long, value_enum, default_value_t = TracerArg::All)]
    tracer: TracerArg,

    /// 启动时打开记录模式
    #[arg(short, long)]
    record: bool,

    /// 启动时打开发布模式
    #[arg(short, long)]
    publish: bool,

    /// 把事件总线上的事件打印为 JSON 行
    #[arg(short = 'e', long)]
    print_events: bool,

    /// 模拟设备写日志的周期（毫秒）
    #[arg(long, default_value_t = 20)]
    sim_period_ms: u64,

    /// 运行指定秒数后退出，不指定则等待 Ctrl+C
    #[arg(long)]
    duration_secs: Option<u64>,

    /// 详细输出
    #[arg(short, long)]
    verbose: bool,
}

async fn print_events(mut rx: broadcast::Receiver<HostEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match event.to_json() {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("hostmgr: failed to serialize event: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("hostmgr: event printer lagged, {} events dropped", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 设置日志
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("hostmgr: Starting...");
    info!("hostmgr: Log dir: {}", cli.log_dir.display());
    info!("hostmgr: Config dir: {}", cli.config_dir.display());

    let store: Arc<dyn ConfigStore> = Arc::new(JsonConfigStore::new(&cli.config_dir));
    let mut host = Host::new(store, &cli.log_dir)?;

    let tracers = cli.tracer.tracers();
    let simulated = sim::bring_up(&cli.device, cli.baseband, &tracers)?;
    info!(
        "hostmgr: Simulated device {} ({}, fw {})",
        simulated.device.name(),
        cli.baseband,
        simulated.device.fw_version()
    );
    host.add_device(simulated.device.clone(), &tracers, cli.record, cli.publish)?;

    let printer = cli
        .print_events
        .then(|| tokio::spawn(print_events(host.subscribe())));
    let producer = tokio::spawn(sim::run_producer(
        simulated.tracers,
        Duration::from_millis(cli.sim_period_ms.max(1)),
    ));
    drop(simulated.device);

    match cli.duration_secs {
        Some(secs) => {
            info!("hostmgr: Running for {} s", secs);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => info!("hostmgr: Received Ctrl+C, stopping..."),
            }
        }
        None => {
            info!("hostmgr: Press Ctrl+C to stop");
            tokio::signal::ctrl_c().await?;
            info!("hostmgr: Received Ctrl+C, stopping...");
        }
    }

    producer.abort();
    host.shutdown();
    if let Some(printer) = printer {
        printer.abort();
    }

    info!("hostmgr: Done");
    Ok(())
}
