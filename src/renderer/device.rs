//! 光线追踪设备抽象
//!
//! 绑定层只通过 `RaytracingDevice` 与图形 API 交互：创建缓冲区、查询加速结构
//! prebuild 信息、创建根签名和状态对象、写描述符、执行命令列表、等待 Fence。
//!
//! 当前有两个实现：
//! - `gfx::headless::HeadlessDevice`：CPU 模拟，不需要 GPU
//! - `gfx::dx12::Dx12Device`：Direct3D 12（仅 Windows）
//!
//! 所有方法都接受 `&self`，后端内部自行处理可变状态。

use crate::core::error::{GraphicsError, Result};
use super::acceleration::{AccelerationStructureInputs, PrebuildInfo};
use super::command::CommandList;
use super::descriptor::{CpuDescriptorHandle, DescriptorHeapInfo, DescriptorHeapType};
use super::pipeline::{ShaderIdentifier, Subobject};
use super::resource::{BufferDesc, GpuBuffer, GpuVirtualAddress};
use super::root_signature::RootSignatureLayout;
use super::sync::FenceValue;

/// 光线追踪支持等级（D3D12_RAYTRACING_TIER）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RaytracingTier {
    NotSupported,
    Tier1_0,
    Tier1_1,
}

/// 设备能力
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    /// 适配器名称
    pub adapter_name: String,
    /// 光线追踪支持等级
    pub raytracing_tier: RaytracingTier,
    /// 设备是否真正执行 DXIL 着色器
    ///
    /// 模拟设备只校验导出表，不需要真实的着色器字节码。
    pub executes_shaders: bool,
}

impl DeviceCapabilities {
    /// 要求设备支持 DXR，否则返回能力错误
    pub fn require_raytracing(&self) -> Result<()> {
        if self.raytracing_tier == RaytracingTier::NotSupported {
            return Err(GraphicsError::Capability(format!(
                "Adapter '{}' does not support DirectX Raytracing", self.adapter_name
            )).into());
        }
        Ok(())
    }
}

/// 写入描述符堆的视图
#[derive(Debug, Clone)]
pub enum ResourceView<'a, B: GpuBuffer> {
    /// 光线追踪加速结构 SRV（以 GPU 地址描述）
    AccelerationStructure(GpuVirtualAddress),
    /// 结构化缓冲区 SRV
    BufferSrv {
        buffer: &'a B,
        first_element: u64,
        num_elements: u32,
        stride: u32,
    },
    /// 结构化缓冲区 UAV
    BufferUav {
        buffer: &'a B,
        first_element: u64,
        num_elements: u32,
        stride: u32,
    },
    /// 常量缓冲视图，大小必须按 256 对齐
    ConstantBuffer {
        address: GpuVirtualAddress,
        size: u32,
    },
}

impl<'a, B: GpuBuffer> ResourceView<'a, B> {
    /// 视图类型名称
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceView::AccelerationStructure(_) => "RaytracingAccelerationStructure",
            ResourceView::BufferSrv { .. } => "BufferSrv",
            ResourceView::BufferUav { .. } => "BufferUav",
            ResourceView::ConstantBuffer { .. } => "ConstantBuffer",
        }
    }

    /// 整块缓冲区的结构化 UAV
    pub fn whole_buffer_uav(buffer: &'a B, stride: u32) -> Self {
        ResourceView::BufferUav {
            buffer,
            first_element: 0,
            num_elements: (buffer.size() / stride as u64) as u32,
            stride,
        }
    }
}

/// 光线追踪设备
pub trait RaytracingDevice: Sized {
    /// 缓冲区句柄
    type Buffer: GpuBuffer;
    /// 已创建的根签名
    type RootSignature: Clone;
    /// 已创建的光线追踪状态对象
    type StateObject: Clone;

    /// 后端名称
    fn backend_name(&self) -> &'static str;

    /// 设备能力
    fn capabilities(&self) -> &DeviceCapabilities;

    /// 创建缓冲区；分配失败返回 `GraphicsError::OutOfMemory`
    fn create_buffer(&self, desc: &BufferDesc) -> Result<Self::Buffer>;

    /// 写入上传堆缓冲区
    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> Result<()>;

    /// 读取上传堆或回读堆缓冲区
    fn read_buffer(&self, buffer: &Self::Buffer, offset: u64, len: u64) -> Result<Vec<u8>>;

    /// 查询加速结构所需的结果和 scratch 大小
    fn acceleration_structure_prebuild_info(&self, inputs: &AccelerationStructureInputs) -> Result<PrebuildInfo>;

    /// 序列化并创建根签名
    fn create_root_signature(&self, layout: &RootSignatureLayout) -> Result<Self::RootSignature>;

    /// 按给定顺序的子对象创建光线追踪状态对象
    fn create_state_object(&self, subobjects: &[Subobject<'_, Self>]) -> Result<Self::StateObject>;

    /// 查询导出名对应的着色器标识符
    fn shader_identifier(&self, state_object: &Self::StateObject, export: &str) -> Result<ShaderIdentifier>;

    /// 设备某个描述符堆的布局
    fn descriptor_heap_info(&self, heap: DescriptorHeapType) -> DescriptorHeapInfo;

    /// 在描述符堆中写入视图
    fn write_descriptor(&self, destination: CpuDescriptorHandle, view: &ResourceView<'_, Self::Buffer>) -> Result<()>;

    /// 提交已关闭的命令列表，并返回提交后 signal 的 Fence 值
    fn execute_command_list(&self, list: &CommandList<Self>) -> Result<FenceValue>;

    /// GPU 已完成的最大 Fence 值
    fn completed_fence_value(&self) -> FenceValue;

    /// 阻塞等待 Fence 到达 `value`，没有超时
    fn wait_for_fence(&self, value: FenceValue) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_raytracing() {
        let mut caps = DeviceCapabilities {
            adapter_name: "Test Adapter".to_string(),
            raytracing_tier: RaytracingTier::Tier1_0,
            executes_shaders: false,
        };
        assert!(caps.require_raytracing().is_ok());

        caps.raytracing_tier = RaytracingTier::NotSupported;
        let err = caps.require_raytracing().unwrap_err();
        assert!(err.to_string().contains("Test Adapter"));
    }

    #[test]
    fn test_tier_ordering() {
        assert!(RaytracingTier::Tier1_1 > RaytracingTier::Tier1_0);
        assert!(RaytracingTier::Tier1_0 > RaytracingTier::NotSupported);
    }
}
