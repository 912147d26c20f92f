//! 渲染器模块
//!
//! DXR 资源绑定核心，与具体后端无关：
//!
//! - `align` / `format`：D3D12 布局常量与格式大小
//! - `device`：`RaytracingDevice` trait，后端在 `gfx` 中实现
//! - `resource` / `command` / `sync` / `descriptor`：缓冲区、命令录制、Fence、描述符槽位
//! - `acceleration`：BLAS/TLAS 构建与句柄 arena
//! - `root_signature`：全局和局部根签名
//! - `pipeline`：由子对象组装光线追踪状态对象
//! - `sbt`：着色器绑定表布局与构建
//!
//! 数据流：几何缓冲区 → BLAS → 实例数组 → TLAS → 根签名与管线（一次）
//! → 着色器表（每帧重写）→ DispatchRays。

pub mod align;
pub mod format;
pub mod device;
pub mod sync;
pub mod command;
pub mod descriptor;
pub mod resource;
pub mod acceleration;
pub mod root_signature;
pub mod pipeline;
pub mod sbt;

pub use acceleration::{
    AccelerationStructure, AccelerationStructureArena, BlasHandle, InstanceDesc, RaytracingInstanceDesc, TlasHandle,
};
pub use command::{run_synchronously, submit, CommandList, GpuWork};
pub use descriptor::{DescriptorAllocator, DescriptorHeaps, DescriptorSlot};
pub use device::{DeviceCapabilities, RaytracingDevice, ResourceView};
pub use pipeline::{configure_pipeline, RaytracingPipeline, RaytracingPipelineSetup, ShaderExport};
pub use root_signature::{Binding, RootSignature};
pub use sbt::{SbtHelper, ShaderTable, ShaderTableBuilder, ShaderTableLayout};
