//! rt_gallery - DirectX Raytracing 资源绑定核心
//!
//! 把光线追踪需要的 GPU 对象（加速结构、根签名、光线追踪管线、着色器绑定表）
//! 的构建过程封装为后端无关的接口，并附带一个逐帧运行示例的宿主。
//!
//! # 模块结构
//!
//! - `core`: 日志、配置、错误处理
//! - `math`: 基于 nalgebra 的矩阵辅助函数和实例变换
//! - `renderer`: 与后端无关的 DXR 资源绑定核心
//! - `gfx`: `RaytracingDevice` 的实现（CPU 模拟设备和 DirectX 12）
//! - `gallery`: 示例与示例宿主
//!
//! # 使用示例
//!
//! ```no_run
//! use rt_gallery::core::config::GalleryConfig;
//! use rt_gallery::gallery::SampleHost;
//! use rt_gallery::gfx::HeadlessDevice;
//!
//! let device = HeadlessDevice::new();
//! let summary = SampleHost::new(&device, &GalleryConfig::default()).run(3);
//! summary.log();
//! ```

pub mod core;
pub mod math;
pub mod renderer;
pub mod gfx;
pub mod gallery;
