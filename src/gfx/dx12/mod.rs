//! DirectX 12 光线追踪后端（仅 Windows）
//!
//! - `device`：`Dx12Device`，实现 `RaytracingDevice`
//! - `descriptor`：描述符堆
//! - `state_object`：状态对象子对象与着色器标识符
//! - `convert`：与后端无关的描述到 D3D12 结构的转换

mod convert;
mod descriptor;
mod device;
mod state_object;

pub use descriptor::Dx12DescriptorHeap;
pub use device::{Dx12Buffer, Dx12Device};
