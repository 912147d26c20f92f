//! rt_gallery - 光线追踪示例集
//!
//! 按配置选择设备后端，构造示例并逐帧同步渲染。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件（config.toml 不存在时使用默认配置）
//! cargo run
//!
//! # 命令行覆盖
//! cargo run -- --headless --frames 10 --width 320 --height 180
//! cargo run -- --dx12
//! ```
//!
//! # 架构概览
//!
//! ```text
//! ┌─────────────┐
//! │   main.rs   │  配置、日志、后端选择
//! └──────┬──────┘
//!        │
//! ┌──────▼──────┐
//! │   gallery   │  示例宿主
//! └──────┬──────┘
//!        │
//! ┌──────▼──────┐
//! │  renderer   │  BLAS/TLAS、根签名、管线、着色器表
//! └──────┬──────┘
//!        │
//!   ┌────┴─────┐
//!   │          │
//! ┌─▼──────┐ ┌─▼──┐
//! │Headless│ │DX12│  RaytracingDevice 实现
//! └────────┘ └────┘
//! ```

use anyhow::Context;

use rt_gallery::core::config::{Config, GraphicsBackend};
use rt_gallery::core::log;
use rt_gallery::gallery::SampleHost;
use rt_gallery::gfx::HeadlessDevice;
use rt_gallery::renderer::device::RaytracingDevice;
use rt_gallery::{app_info, engine_info};

/// 应用程序入口点
///
/// # 初始化流程
///
/// 1. 加载配置文件（config.toml）
/// 2. 应用命令行参数覆盖
/// 3. 初始化日志系统
/// 4. 创建设备并运行示例
fn main() -> anyhow::Result<()> {
    let mut config = Config::from_file_or_default("config.toml");
    config.apply_args(std::env::args().skip(1));
    config.validate().context("Invalid configuration")?;

    let log_file = config.logging.file_output.then(|| config.logging.log_file.as_str());
    log::init_logger(config.logging.level, config.logging.file_output, log_file)
        .context("Failed to initialize logging")?;

    app_info!("rt_gallery starting...");
    app_info!(version = env!("CARGO_PKG_VERSION"), "Application initialized");
    engine_info!(
        backend = config.graphics.backend.name(),
        frames = config.gallery.frames,
        width = config.gallery.width,
        height = config.gallery.height,
        samples = ?config.gallery.samples,
        "Gallery configuration"
    );

    match config.graphics.backend {
        GraphicsBackend::Headless => run_gallery(&HeadlessDevice::with_config(&config), &config),
        GraphicsBackend::Dx12 => run_dx12(&config),
    }
}

#[cfg(target_os = "windows")]
fn run_dx12(config: &Config) -> anyhow::Result<()> {
    let device = rt_gallery::gfx::Dx12Device::new(config).context("Failed to create DirectX 12 device")?;
    run_gallery(&device, config)
}

#[cfg(not(target_os = "windows"))]
fn run_dx12(_config: &Config) -> anyhow::Result<()> {
    anyhow::bail!("The DirectX 12 backend is only available on Windows; run with --headless")
}

/// 在给定设备上运行所有配置的示例
///
/// 单个示例失败只会被停用；全部示例都被停用时返回错误。
fn run_gallery<D: RaytracingDevice + 'static>(device: &D, config: &Config) -> anyhow::Result<()> {
    let capabilities = device.capabilities();
    engine_info!(
        backend = device.backend_name(),
        adapter = %capabilities.adapter_name,
        tier = ?capabilities.raytracing_tier,
        "Device ready"
    );

    let host = SampleHost::new(device, &config.gallery);
    let summary = host.run(config.gallery.frames);
    summary.log();

    if summary.completed.is_empty() && !config.gallery.samples.is_empty() {
        anyhow::bail!("Every configured sample was disabled");
    }
    Ok(())
}
