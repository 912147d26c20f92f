//! Headless 后端
//!
//! 在 CPU 上模拟 `RaytracingDevice`：
//!
//! - `HeadlessDevice`：缓冲区、描述符堆、Fence 和命令执行
//! - 资源对象：`HeadlessBuffer`、`HeadlessRootSignature`、`HeadlessStateObject`
//!
//! 提交立即完成，Fence 随之前进。

mod device;
mod execute;
mod resources;

pub use device::{HeadlessDevice, HeadlessStats};
pub use resources::{HeadlessBuffer, HeadlessRootSignature, HeadlessStateObject};
