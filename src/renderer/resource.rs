//! 资源管理模块
//!
//! 缓冲区描述与上传工具。几何体数据、实例数组和 AABB 都通过这里进入 GPU：
//! 先写入上传堆中的暂存缓冲区，再用一次同步执行的复制命令搬到默认堆。

use bytemuck::Pod;

use crate::core::error::{GraphicsError, RaytracingError, Result};
use super::align::{align_up, ACCELERATION_STRUCTURE_ALIGNMENT};
use super::command::run_synchronously;
use super::device::RaytracingDevice;

/// GPU 虚拟地址
pub type GpuVirtualAddress = u64;

/// 缓冲区所在的堆
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapType {
    /// GPU本地内存（最快，仅GPU可访问）
    Default,
    /// CPU 写、GPU 读
    Upload,
    /// GPU 写、CPU 读
    Readback,
}

/// 资源状态（对应 D3D12_RESOURCE_STATES 中用到的部分）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    GenericRead,
    CopySource,
    CopyDest,
    UnorderedAccess,
    NonPixelShaderResource,
    RaytracingAccelerationStructure,
}

/// 缓冲区描述信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    /// 缓冲区大小（字节）
    pub size: u64,
    /// 所在堆
    pub heap: HeapType,
    /// 创建时的资源状态
    pub initial_state: ResourceState,
    /// 是否允许 UAV 访问（加速结构与 scratch 必须允许）
    pub allow_unordered_access: bool,
    /// 调试名称
    pub name: String,
}

impl BufferDesc {
    /// 创建新的缓冲区描述符
    pub fn new(size: u64, heap: HeapType, initial_state: ResourceState) -> Self {
        Self {
            size,
            heap,
            initial_state,
            allow_unordered_access: false,
            name: String::new(),
        }
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 允许 UAV 访问
    pub fn with_unordered_access(mut self) -> Self {
        self.allow_unordered_access = true;
        self
    }

    /// 上传堆缓冲区，必须处于 GENERIC_READ 状态
    pub fn upload(size: u64) -> Self {
        Self::new(size, HeapType::Upload, ResourceState::GenericRead)
    }

    /// 回读堆缓冲区，必须处于 COPY_DEST 状态
    pub fn readback(size: u64) -> Self {
        Self::new(size, HeapType::Readback, ResourceState::CopyDest)
    }

    /// 加速结构结果缓冲区，大小对齐到 256
    pub fn acceleration_structure(size: u64) -> Self {
        Self::new(
            align_up(size, ACCELERATION_STRUCTURE_ALIGNMENT),
            HeapType::Default,
            ResourceState::RaytracingAccelerationStructure,
        )
        .with_unordered_access()
    }

    /// 加速结构构建用的 scratch 缓冲区，大小对齐到 256
    pub fn scratch(size: u64) -> Self {
        Self::new(
            align_up(size, ACCELERATION_STRUCTURE_ALIGNMENT),
            HeapType::Default,
            ResourceState::UnorderedAccess,
        )
        .with_unordered_access()
    }

    /// 检查堆类型与初始状态的组合是否合法
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(GraphicsError::ResourceCreation(format!(
                "Buffer '{}' has zero size", self.name
            )).into());
        }

        let state_ok = match self.heap {
            HeapType::Upload => self.initial_state == ResourceState::GenericRead,
            HeapType::Readback => self.initial_state == ResourceState::CopyDest,
            HeapType::Default => true,
        };
        if !state_ok {
            return Err(GraphicsError::ResourceCreation(format!(
                "Buffer '{}' on {:?} heap cannot start in {:?}",
                self.name, self.heap, self.initial_state
            )).into());
        }

        if self.initial_state == ResourceState::RaytracingAccelerationStructure
            && !self.allow_unordered_access
        {
            return Err(GraphicsError::ResourceCreation(format!(
                "Acceleration structure buffer '{}' must allow unordered access",
                self.name
            )).into());
        }

        Ok(())
    }
}

/// GPU 缓冲区句柄
///
/// 克隆只增加引用计数，底层资源在最后一个句柄释放时销毁。
pub trait GpuBuffer: Clone {
    /// 缓冲区大小（字节）
    fn size(&self) -> u64;
    /// 缓冲区起始 GPU 虚拟地址
    fn gpu_address(&self) -> GpuVirtualAddress;
    /// 所在堆
    fn heap(&self) -> HeapType;
    /// 调试名称
    fn name(&self) -> &str;
}

/// 在上传堆上创建缓冲区并写入数据
///
/// 适合每帧都要重写的小数据，例如实例数组和着色器表。
pub fn create_upload_buffer<D, T>(device: &D, data: &[T], name: &str) -> Result<D::Buffer>
where
    D: RaytracingDevice,
    T: Pod,
{
    let bytes: &[u8] = bytemuck::cast_slice(data);
    if bytes.is_empty() {
        return Err(RaytracingError::ContractViolation(format!(
            "Upload buffer '{}' created from empty data", name
        )).into());
    }

    let buffer = device.create_buffer(&BufferDesc::upload(bytes.len() as u64).with_name(name))?;
    device.write_buffer(&buffer, 0, bytes)?;
    Ok(buffer)
}

/// 通过暂存缓冲区把数据上传到默认堆
///
/// 复制完成后缓冲区转换到 `final_state`。函数返回时复制已经在 GPU 上完成，
/// 暂存缓冲区随之释放。
pub fn upload_buffer<D, T>(
    device: &D,
    data: &[T],
    final_state: ResourceState,
    name: &str,
) -> Result<D::Buffer>
where
    D: RaytracingDevice,
    T: Pod,
{
    let staging = create_upload_buffer(device, data, &format!("{} (staging)", name))?;
    let size = staging.size();

    let buffer = device.create_buffer(
        &BufferDesc::new(size, HeapType::Default, ResourceState::CopyDest).with_name(name),
    )?;

    run_synchronously(device, |list| {
        list.copy_buffer(&buffer, 0, &staging, 0, size)?;
        if final_state != ResourceState::CopyDest {
            list.transition(&buffer, ResourceState::CopyDest, final_state)?;
        }
        Ok(())
    })?;

    tracing::debug!(name, size, address = buffer.gpu_address(), "Buffer uploaded");
    Ok(buffer)
}

/// 把默认堆缓冲区的内容复制回 CPU
///
/// `state` 是缓冲区当前状态，复制后会转换回去。
pub fn read_back_buffer<D>(device: &D, buffer: &D::Buffer, state: ResourceState) -> Result<Vec<u8>>
where
    D: RaytracingDevice,
{
    if buffer.heap() != HeapType::Default {
        return device.read_buffer(buffer, 0, buffer.size());
    }

    let size = buffer.size();
    let readback = device.create_buffer(
        &BufferDesc::readback(size).with_name(format!("{} (readback)", buffer.name())),
    )?;

    run_synchronously(device, |list| {
        if state != ResourceState::CopySource {
            list.transition(buffer, state, ResourceState::CopySource)?;
        }
        list.copy_buffer(&readback, 0, buffer, 0, size)?;
        if state != ResourceState::CopySource {
            list.transition(buffer, ResourceState::CopySource, state)?;
        }
        Ok(())
    })?;

    device.read_buffer(&readback, 0, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::HeadlessDevice;

    #[test]
    fn test_buffer_desc_presets() {
        let desc = BufferDesc::acceleration_structure(1000);
        assert_eq!(desc.size, 1024);
        assert_eq!(desc.heap, HeapType::Default);
        assert!(desc.allow_unordered_access);
        assert!(desc.validate().is_ok());

        let scratch = BufferDesc::scratch(1);
        assert_eq!(scratch.size, 256);
        assert_eq!(scratch.initial_state, ResourceState::UnorderedAccess);
    }

    #[test]
    fn test_buffer_desc_validation() {
        assert!(BufferDesc::upload(0).validate().is_err());

        let wrong_state = BufferDesc::new(64, HeapType::Upload, ResourceState::CopyDest);
        assert!(wrong_state.validate().is_err());

        let no_uav = BufferDesc::new(256, HeapType::Default, ResourceState::RaytracingAccelerationStructure);
        assert!(no_uav.validate().is_err());
    }

    #[test]
    fn test_upload_and_read_back() {
        let device = HeadlessDevice::new();
        let data: Vec<u32> = (0..64).collect();

        let buffer = upload_buffer(&device, &data, ResourceState::NonPixelShaderResource, "numbers").unwrap();
        assert_eq!(buffer.size(), 256);
        assert_eq!(buffer.heap(), HeapType::Default);

        let bytes = read_back_buffer(&device, &buffer, ResourceState::NonPixelShaderResource).unwrap();
        let values: &[u32] = bytemuck::cast_slice(&bytes);
        assert_eq!(values, data.as_slice());
    }

    #[test]
    fn test_empty_upload_is_rejected() {
        let device = HeadlessDevice::new();
        let empty: [f32; 0] = [];
        assert!(create_upload_buffer(&device, &empty, "empty").is_err());
    }
}
