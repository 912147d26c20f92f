//! 图形后端模块
//!
//! 本模块实现 `renderer::RaytracingDevice`：
//! - `headless`：CPU 模拟设备，任何平台可用，测试和 CI 使用它
//! - `dx12`：DirectX 12 + DXR，仅 Windows
//!
//! 绑定层和示例只依赖 trait，后端在启动时按配置选择。

pub mod headless;
#[cfg(target_os = "windows")]
pub mod dx12;

pub use headless::HeadlessDevice;
#[cfg(target_os = "windows")]
pub use dx12::Dx12Device;
