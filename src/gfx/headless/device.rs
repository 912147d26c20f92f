//! CPU 模拟的光线追踪设备
//!
//! 没有 D3D12 光线追踪 GPU 的机器（以及测试）使用它。它不执行着色器，
//! 但会检查 D3D12 调试层会报告的问题：构建的对齐和大小、资源状态、
//! 描述符与根参数的类型、DispatchRays 时的着色器表布局。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::core::config::{Config, DescriptorConfig};
use crate::core::error::{GraphicsError, RaytracingError, Result};
use crate::renderer::acceleration::{AccelerationStructureInputs, AccelerationStructureKind, BuildFlags, PrebuildInfo};
use crate::renderer::align::{align_up, is_aligned, ACCELERATION_STRUCTURE_ALIGNMENT, CONSTANT_BUFFER_ALIGNMENT};
use crate::renderer::command::CommandList;
use crate::renderer::command::CommandListState;
use crate::renderer::descriptor::{CpuDescriptorHandle, DescriptorHeapInfo, DescriptorHeapType};
use crate::renderer::device::{DeviceCapabilities, RaytracingDevice, RaytracingTier, ResourceView};
use crate::renderer::pipeline::{ShaderIdentifier, Subobject};
use crate::renderer::resource::{BufferDesc, GpuBuffer, GpuVirtualAddress, HeapType};
use crate::renderer::root_signature::{RootSignatureKind, RootSignatureLayout};
use crate::renderer::sync::{FenceManager, FenceValue};

use super::resources::{
    lock, make_identifier, BufferStorage, HeadlessBuffer, HeadlessRootSignature, HeadlessStateObject, StateObjectInfo,
};

/// 第一个缓冲区的虚拟地址，0 保留给“没有缓冲区”
const ADDRESS_BASE: GpuVirtualAddress = 0x1_0000;

/// 模拟显存预算
const DEFAULT_MEMORY_BUDGET: u64 = 2 << 30;

/// 描述符大小，与常见 D3D12 驱动的 CBV/SRV/UAV 增量一致
const DESCRIPTOR_INCREMENT: u32 = 32;

/// 结果缓冲区开头写入的头部标记
pub(super) const STRUCTURE_MAGIC: u32 = 0x5352_5844; // "DXRS"

/// 已构建的加速结构
#[derive(Debug, Clone)]
pub(super) struct BuiltStructure {
    pub(super) kind: AccelerationStructureKind,
    /// TLAS 每个实例引用的 BLAS 地址
    pub(super) blas: Vec<GpuVirtualAddress>,
}

/// 设备运行统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub buffers_created: u64,
    pub bytes_allocated: u64,
    pub submissions: u64,
    pub acceleration_structure_builds: u64,
    pub dispatches: u64,
    pub rays_dispatched: u64,
}

/// 写入描述符槽位的视图
#[derive(Debug, Clone, Copy)]
pub(super) struct WrittenDescriptor {
    pub(super) kind: &'static str,
    /// 视图指向的 GPU 地址
    pub(super) address: GpuVirtualAddress,
}

pub(super) struct DeviceState {
    pub(super) buffers: Vec<Weak<BufferStorage>>,
    pub(super) next_address: GpuVirtualAddress,
    pub(super) structures: HashMap<GpuVirtualAddress, BuiltStructure>,
    pub(super) descriptors: HashMap<usize, WrittenDescriptor>,
    pub(super) last_prebuild_query: Option<(AccelerationStructureKind, u32)>,
    pub(super) stats: HeadlessStats,
}

impl DeviceState {
    /// 找到包含 `[address, address + size)` 的存活缓冲区
    pub(super) fn find_buffer(&self, address: GpuVirtualAddress, size: u64) -> Option<HeadlessBuffer> {
        self.buffers
            .iter()
            .filter_map(Weak::upgrade)
            .find(|s| address >= s.address && address + size <= s.address + s.size)
            .map(|storage| HeadlessBuffer { storage })
    }

    /// 地址处已构建且结果缓冲区仍然存活的加速结构类型
    pub(super) fn structure_kind(&self, address: GpuVirtualAddress) -> Option<AccelerationStructureKind> {
        let kind = self.structures.get(&address)?.kind;
        self.find_buffer(address, 1).map(|_| kind)
    }
}

/// CPU 模拟设备
pub struct HeadlessDevice {
    capabilities: DeviceCapabilities,
    heaps: [DescriptorHeapInfo; 3],
    memory_budget: u64,
    pub(super) state: Mutex<DeviceState>,
    pub(super) fence: FenceManager,
    next_object_id: AtomicU64,
}

impl HeadlessDevice {
    /// 使用默认描述符堆容量创建设备
    pub fn new() -> Self {
        Self::with_descriptors(&DescriptorConfig::default())
    }

    /// 按宿主配置创建设备
    pub fn with_config(config: &Config) -> Self {
        Self::with_descriptors(&config.descriptors)
    }

    fn with_descriptors(descriptors: &DescriptorConfig) -> Self {
        let heap = |heap_type: DescriptorHeapType, capacity: u32, base: usize| DescriptorHeapInfo {
            heap_type,
            cpu_start: base,
            gpu_start: heap_type.is_shader_visible().then_some(0x7000_0000_0000 + base as u64),
            increment_size: DESCRIPTOR_INCREMENT,
            capacity,
        };

        crate::engine_info!(
            "Headless raytracing device created (descriptors: {} RTV, {} CBV/SRV/UAV, {} sampler)",
            descriptors.rtv_capacity,
            descriptors.cbv_srv_uav_capacity,
            descriptors.sampler_capacity
        );

        Self {
            capabilities: DeviceCapabilities {
                adapter_name: "Headless Raytracing Emulator".to_string(),
                raytracing_tier: RaytracingTier::Tier1_1,
                executes_shaders: false,
            },
            heaps: [
                heap(DescriptorHeapType::Rtv, descriptors.rtv_capacity, 0x1000_0000),
                heap(DescriptorHeapType::CbvSrvUav, descriptors.cbv_srv_uav_capacity, 0x2000_0000),
                heap(DescriptorHeapType::Sampler, descriptors.sampler_capacity, 0x3000_0000),
            ],
            memory_budget: DEFAULT_MEMORY_BUDGET,
            state: Mutex::new(DeviceState {
                buffers: Vec::new(),
                next_address: ADDRESS_BASE,
                structures: HashMap::new(),
                descriptors: HashMap::new(),
                last_prebuild_query: None,
                stats: HeadlessStats::default(),
            }),
            fence: FenceManager::new(),
            next_object_id: AtomicU64::new(1),
        }
    }

    /// 限制模拟显存，超出时 `create_buffer` 返回 `OutOfMemory`
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// 报告一个不支持光线追踪的适配器
    pub fn without_raytracing(mut self) -> Self {
        self.capabilities.raytracing_tier = RaytracingTier::NotSupported;
        self
    }

    /// 运行统计
    pub fn stats(&self) -> HeadlessStats {
        lock(&self.state).stats
    }

    /// 地址处已构建的加速结构类型
    pub fn built_structure_kind(&self, address: GpuVirtualAddress) -> Option<AccelerationStructureKind> {
        lock(&self.state).structure_kind(address)
    }

    /// TLAS 各实例引用的 BLAS 地址（按实例顺序）
    pub fn referenced_blas(&self, tlas_address: GpuVirtualAddress) -> Vec<GpuVirtualAddress> {
        lock(&self.state)
            .structures
            .get(&tlas_address)
            .map(|s| s.blas.clone())
            .unwrap_or_default()
    }

    /// 最近一次 prebuild 查询的层级和 `NumDescs`
    pub fn last_prebuild_query(&self) -> Option<(AccelerationStructureKind, u32)> {
        lock(&self.state).last_prebuild_query
    }

    /// 描述符槽位中写入的视图类型
    pub fn descriptor_kind(&self, handle: CpuDescriptorHandle) -> Option<&'static str> {
        lock(&self.state).descriptors.get(&handle.ptr).map(|d| d.kind)
    }

    /// 描述符槽位中的视图指向的 GPU 地址
    pub fn descriptor_address(&self, handle: CpuDescriptorHandle) -> Option<GpuVirtualAddress> {
        lock(&self.state).descriptors.get(&handle.ptr).map(|d| d.address)
    }

    fn next_id(&self) -> u64 {
        self.next_object_id.fetch_add(1, Ordering::Relaxed)
    }

    fn heap_containing(&self, handle: CpuDescriptorHandle) -> Option<&DescriptorHeapInfo> {
        self.heaps.iter().find(|info| {
            let end = info.cpu_start + info.capacity as usize * info.increment_size as usize;
            handle.ptr >= info.cpu_start
                && handle.ptr < end
                && (handle.ptr - info.cpu_start) % info.increment_size as usize == 0
        })
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// 与驱动无关的 prebuild 大小：固定头部加上每个图元或实例 64 字节
pub(super) fn prebuild_sizes(inputs: &AccelerationStructureInputs) -> PrebuildInfo {
    let count = inputs.primitive_count();
    let descriptors = inputs.descriptor_count() as u64;
    if inputs.kind() == AccelerationStructureKind::BottomLevel && (count == 0 || descriptors == 0) {
        return PrebuildInfo::default();
    }

    let scratch = 128 + 32 * count;
    PrebuildInfo {
        result_data_max_size: 64 + 64 * count,
        scratch_data_size: scratch,
        update_scratch_data_size: if inputs.flags().contains(BuildFlags::ALLOW_UPDATE) { scratch / 2 } else { 0 },
    }
}

impl RaytracingDevice for HeadlessDevice {
    type Buffer = HeadlessBuffer;
    type RootSignature = HeadlessRootSignature;
    type StateObject = HeadlessStateObject;

    fn backend_name(&self) -> &'static str {
        "Headless"
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<HeadlessBuffer> {
        desc.validate()?;

        let mut state = lock(&self.state);
        state.buffers.retain(|b| b.strong_count() > 0);
        let live: u64 = state.buffers.iter().filter_map(Weak::upgrade).map(|b| b.size).sum();
        if live + desc.size > self.memory_budget {
            return Err(GraphicsError::OutOfMemory {
                requested: desc.size,
                name: desc.name.clone(),
            }.into());
        }

        let address = state.next_address;
        state.next_address = align_up(address + desc.size, ACCELERATION_STRUCTURE_ALIGNMENT);

        let storage = Arc::new(BufferStorage {
            id: self.next_id(),
            address,
            size: desc.size,
            heap: desc.heap,
            allow_unordered_access: desc.allow_unordered_access,
            name: desc.name.clone(),
            data: Mutex::new(vec![0u8; desc.size as usize]),
            state: Mutex::new(desc.initial_state),
        });
        state.buffers.push(Arc::downgrade(&storage));
        state.stats.buffers_created += 1;
        state.stats.bytes_allocated += desc.size;

        tracing::trace!(name = %desc.name, size = desc.size, address, heap = ?desc.heap, "Buffer created");
        Ok(HeadlessBuffer { storage })
    }

    fn write_buffer(&self, buffer: &HeadlessBuffer, offset: u64, data: &[u8]) -> Result<()> {
        if buffer.heap() != HeapType::Upload {
            return Err(RaytracingError::ContractViolation(format!(
                "Buffer '{}' on {:?} heap is not CPU-writable", buffer.name(), buffer.heap()
            )).into());
        }
        let range = buffer.range(offset, data.len() as u64).ok_or_else(|| {
            RaytracingError::ContractViolation(format!(
                "Write of {} bytes at {} overruns '{}' ({} bytes)",
                data.len(), offset, buffer.name(), buffer.size()
            ))
        })?;
        lock(&buffer.storage.data)[range].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: &HeadlessBuffer, offset: u64, len: u64) -> Result<Vec<u8>> {
        if buffer.heap() == HeapType::Default {
            return Err(RaytracingError::ContractViolation(format!(
                "Buffer '{}' on the default heap is not CPU-readable", buffer.name()
            )).into());
        }
        let range = buffer.range(offset, len).ok_or_else(|| {
            RaytracingError::ContractViolation(format!(
                "Read of {} bytes at {} overruns '{}' ({} bytes)", len, offset, buffer.name(), buffer.size()
            ))
        })?;
        Ok(lock(&buffer.storage.data)[range].to_vec())
    }

    fn acceleration_structure_prebuild_info(&self, inputs: &AccelerationStructureInputs) -> Result<PrebuildInfo> {
        let prebuild = prebuild_sizes(inputs);
        lock(&self.state).last_prebuild_query = Some((inputs.kind(), inputs.descriptor_count()));
        Ok(prebuild)
    }

    fn create_root_signature(&self, layout: &RootSignatureLayout) -> Result<HeadlessRootSignature> {
        if let Some(diagnostic) = layout.find_register_overlap() {
            return Err(RaytracingError::RootSignatureSerialization(diagnostic).into());
        }
        Ok(HeadlessRootSignature {
            id: self.next_id(),
            layout: Arc::new(layout.clone()),
        })
    }

    fn create_state_object(&self, subobjects: &[Subobject<'_, Self>]) -> Result<HeadlessStateObject> {
        let failure = |msg: String| -> crate::core::error::GalleryError {
            RaytracingError::PipelineCreation(msg).into()
        };

        let global = match subobjects.first() {
            Some(Subobject::GlobalRootSignature(signature)) if signature.layout.kind == RootSignatureKind::Global => {
                signature.id
            }
            _ => return Err(failure("first subobject must be a global root signature".to_string())),
        };

        let mut exports: Vec<String> = Vec::new();
        let mut hit_groups: Vec<String> = Vec::new();
        let mut library_seen = false;
        let mut shader_config = false;
        let mut pipeline_config = false;

        for subobject in &subobjects[1..] {
            match subobject {
                Subobject::GlobalRootSignature(_) => {
                    return Err(failure("more than one global root signature".to_string()));
                }
                Subobject::LocalRootSignature(signature) => {
                    if signature.layout.kind != RootSignatureKind::Local {
                        return Err(failure("local root signature subobject holds a global signature".to_string()));
                    }
                }
                Subobject::DxilLibrary { exports: names, .. } => {
                    library_seen = true;
                    exports.extend(names.iter().cloned());
                }
                Subobject::ShaderConfig { .. } => shader_config = true,
                Subobject::PipelineConfig { .. } => pipeline_config = true,
                Subobject::HitGroup(group) => {
                    if !library_seen {
                        return Err(failure(format!("hit group '{}' precedes the DXIL library", group.name)));
                    }
                    if let Some(missing) = group.imports().find(|import| !exports.iter().any(|e| e == import)) {
                        return Err(failure(format!(
                            "hit group '{}' imports unresolved symbol '{}'", group.name, missing
                        )));
                    }
                    hit_groups.push(group.name.clone());
                }
            }
        }

        if !library_seen || !shader_config || !pipeline_config {
            return Err(failure(
                "state object needs a DXIL library, a shader config and a pipeline config".to_string(),
            ));
        }

        let id = self.next_id();
        let mut identifiers = HashMap::new();
        for name in exports.iter().chain(hit_groups.iter()) {
            if identifiers.insert(name.clone(), make_identifier(id, name)).is_some() {
                return Err(failure(format!("export name '{}' is defined twice", name)));
            }
        }

        tracing::debug!(id, exports = exports.len(), hit_groups = hit_groups.len(), "State object created");
        Ok(HeadlessStateObject {
            info: Arc::new(StateObjectInfo {
                global_root_signature: global,
                identifiers,
            }),
        })
    }

    fn shader_identifier(&self, state_object: &HeadlessStateObject, export: &str) -> Result<ShaderIdentifier> {
        state_object
            .info
            .identifiers
            .get(export)
            .copied()
            .ok_or_else(|| RaytracingError::MissingExport(export.to_string()).into())
    }

    fn descriptor_heap_info(&self, heap: DescriptorHeapType) -> DescriptorHeapInfo {
        match heap {
            DescriptorHeapType::Rtv => self.heaps[0],
            DescriptorHeapType::CbvSrvUav => self.heaps[1],
            DescriptorHeapType::Sampler => self.heaps[2],
        }
    }

    fn write_descriptor(&self, destination: CpuDescriptorHandle, view: &ResourceView<'_, HeadlessBuffer>) -> Result<()> {
        let heap = self.heap_containing(destination).ok_or_else(|| {
            RaytracingError::ContractViolation(format!(
                "CPU descriptor handle {:#x} is not inside any descriptor heap", destination.ptr
            ))
        })?;
        if heap.heap_type != DescriptorHeapType::CbvSrvUav {
            return Err(RaytracingError::ContractViolation(format!(
                "{} written into the {} heap", view.kind(), heap.heap_type.name()
            )).into());
        }

        let mut state = lock(&self.state);
        match view {
            ResourceView::AccelerationStructure(address) => {
                if state.structure_kind(*address) != Some(AccelerationStructureKind::TopLevel) {
                    return Err(RaytracingError::ContractViolation(format!(
                        "{:#x} is not a built top-level acceleration structure", address
                    )).into());
                }
            }
            ResourceView::BufferSrv { buffer, first_element, num_elements, stride }
            | ResourceView::BufferUav { buffer, first_element, num_elements, stride } => {
                let end = (*first_element + *num_elements as u64) * *stride as u64;
                if *stride == 0 || end > buffer.size() {
                    return Err(RaytracingError::ContractViolation(format!(
                        "{} of {} x {} bytes overruns '{}' ({} bytes)",
                        view.kind(), num_elements, stride, buffer.name(), buffer.size()
                    )).into());
                }
                if matches!(view, ResourceView::BufferUav { .. }) && !buffer.allows_unordered_access() {
                    return Err(RaytracingError::ContractViolation(format!(
                        "Buffer '{}' was not created with unordered access", buffer.name()
                    )).into());
                }
            }
            ResourceView::ConstantBuffer { address, size } => {
                if !is_aligned(*address, CONSTANT_BUFFER_ALIGNMENT) || !is_aligned(*size as u64, CONSTANT_BUFFER_ALIGNMENT) {
                    return Err(RaytracingError::ContractViolation(format!(
                        "Constant buffer view {:#x} ({} bytes) must be 256-byte aligned", address, size
                    )).into());
                }
                if state.find_buffer(*address, *size as u64).is_none() {
                    return Err(RaytracingError::ContractViolation(format!(
                        "Constant buffer view {:#x} does not point into a live buffer", address
                    )).into());
                }
            }
        }

        let address = match view {
            ResourceView::AccelerationStructure(address) | ResourceView::ConstantBuffer { address, .. } => *address,
            ResourceView::BufferSrv { buffer, first_element, stride, .. }
            | ResourceView::BufferUav { buffer, first_element, stride, .. } => {
                buffer.gpu_address() + first_element * *stride as u64
            }
        };
        state.descriptors.insert(destination.ptr, WrittenDescriptor { kind: view.kind(), address });
        Ok(())
    }

    fn execute_command_list(&self, list: &CommandList<Self>) -> Result<FenceValue> {
        if list.state() != CommandListState::Executable {
            return Err(GraphicsError::CommandExecution(format!(
                "Command list submitted in {:?} state", list.state()
            )).into());
        }

        {
            let mut state = lock(&self.state);
            super::execute::execute(&mut state, &self.heaps[1], list.commands())?;
            state.stats.submissions += 1;
        }

        // 模拟队列立即完成
        let value = self.fence.next_value();
        self.fence.update_completed_value(value);
        Ok(value)
    }

    fn completed_fence_value(&self) -> FenceValue {
        self.fence.completed_value()
    }

    fn wait_for_fence(&self, value: FenceValue) -> Result<()> {
        if value > self.fence.current_value() {
            return Err(RaytracingError::ContractViolation(format!(
                "Waiting for fence {} which was never signaled (last signal {})",
                value.value(),
                self.fence.current_value().value()
            )).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::acceleration::{
        build_blas_from_aabb, build_tlas, Aabb, InstanceFlags, RaytracingInstanceDesc,
    };
    use crate::renderer::descriptor::DescriptorAllocator;
    use crate::renderer::root_signature::Binding;
    use crate::math::Transform3x4;

    #[test]
    fn test_addresses_are_aligned_and_distinct() {
        let device = HeadlessDevice::new();
        let a = device.create_buffer(&BufferDesc::upload(10).with_name("a")).unwrap();
        let b = device.create_buffer(&BufferDesc::upload(300).with_name("b")).unwrap();
        assert_ne!(a.gpu_address(), 0);
        assert!(is_aligned(a.gpu_address(), 256));
        assert!(is_aligned(b.gpu_address(), 256));
        assert!(b.gpu_address() >= a.gpu_address() + a.size());
        assert_eq!(device.stats().buffers_created, 2);
    }

    #[test]
    fn test_memory_budget() {
        let device = HeadlessDevice::new().with_memory_budget(1024);
        let _kept = device.create_buffer(&BufferDesc::upload(768)).unwrap();
        let err = device.create_buffer(&BufferDesc::upload(512).with_name("big")).unwrap_err();
        assert!(err.to_string().contains("Out of GPU memory"));

        // 释放后预算恢复
        drop(_kept);
        assert!(device.create_buffer(&BufferDesc::upload(512)).is_ok());
    }

    #[test]
    fn test_cpu_access_rules() {
        let device = HeadlessDevice::new();
        let default = device.create_buffer(&BufferDesc::scratch(256)).unwrap();
        assert!(device.write_buffer(&default, 0, &[1, 2, 3]).is_err());
        assert!(device.read_buffer(&default, 0, 4).is_err());

        let upload = device.create_buffer(&BufferDesc::upload(4)).unwrap();
        assert!(device.write_buffer(&upload, 2, &[1, 2, 3]).is_err());
        device.write_buffer(&upload, 1, &[7, 8, 9]).unwrap();
        assert_eq!(device.read_buffer(&upload, 0, 4).unwrap(), vec![0, 7, 8, 9]);
    }

    #[test]
    fn test_prebuild_sizes_grow_with_count() {
        let small = AccelerationStructureInputs::TopLevel {
            flags: BuildFlags::NONE,
            instance_descs: 0x1000,
            instance_count: 1,
        };
        let large = AccelerationStructureInputs::TopLevel {
            flags: BuildFlags::ALLOW_UPDATE,
            instance_descs: 0x1000,
            instance_count: 100,
        };
        assert!(prebuild_sizes(&large).result_data_max_size > prebuild_sizes(&small).result_data_max_size);
        assert_eq!(prebuild_sizes(&small).update_scratch_data_size, 0);
        assert!(prebuild_sizes(&large).update_scratch_data_size > 0);
    }

    #[test]
    fn test_descriptor_writes_are_checked() {
        let device = HeadlessDevice::new();
        let mut allocator = DescriptorAllocator::new(device.descriptor_heap_info(DescriptorHeapType::CbvSrvUav));
        let slot = allocator.allocate().unwrap();
        let handle = allocator.cpu_handle(slot).unwrap();

        // 普通缓冲区不是加速结构
        let plain = device.create_buffer(&BufferDesc::scratch(256)).unwrap();
        assert!(device.write_descriptor(handle, &ResourceView::AccelerationStructure(plain.gpu_address())).is_err());

        let blas = build_blas_from_aabb(&device, &[Aabb::unit()]).unwrap();
        let instance = RaytracingInstanceDesc::new(
            Transform3x4::IDENTITY, 0, 0xFF, 0, InstanceFlags::NONE, blas.gpu_address(),
        )
        .unwrap();
        let tlas = build_tlas(&device, &[instance]).unwrap();

        // BLAS 不能作为 SRV 绑定
        assert!(device.write_descriptor(handle, &blas.view()).is_err());
        device.write_descriptor(handle, &tlas.view()).unwrap();
        assert_eq!(device.descriptor_kind(handle), Some("RaytracingAccelerationStructure"));

        device.write_descriptor(handle, &ResourceView::whole_buffer_uav(&plain, 16)).unwrap();

        // 视图不能写进 RTV 堆
        let rtv_start = CpuDescriptorHandle::new(device.descriptor_heap_info(DescriptorHeapType::Rtv).cpu_start, 0);
        assert!(device.write_descriptor(rtv_start, &tlas.view()).is_err());
        assert!(device.write_descriptor(CpuDescriptorHandle::new(handle.ptr + 1, 0), &tlas.view()).is_err());
    }

    #[test]
    fn test_freed_structures_are_rejected() {
        let device = HeadlessDevice::new();
        let blas = build_blas_from_aabb(&device, &[Aabb::unit()]).unwrap();
        let blas_address = blas.gpu_address();
        let instance = RaytracingInstanceDesc::new(
            Transform3x4::IDENTITY, 0, 0xFF, 0, InstanceFlags::NONE, blas_address,
        )
        .unwrap();
        let tlas = build_tlas(&device, &[instance]).unwrap();
        let tlas_address = tlas.gpu_address();

        let mut allocator = DescriptorAllocator::new(device.descriptor_heap_info(DescriptorHeapType::CbvSrvUav));
        let index = allocator.allocate().unwrap();
        let handle = allocator.cpu_handle(index).unwrap();

        // TLAS 释放后其地址不能再作为 SRV
        drop(tlas);
        assert_eq!(device.built_structure_kind(tlas_address), None);
        let err = device.write_descriptor(handle, &ResourceView::AccelerationStructure(tlas_address)).unwrap_err();
        assert!(err.to_string().contains("not a built top-level"));

        // BLAS 释放后不能再被实例引用
        drop(blas);
        assert_eq!(device.built_structure_kind(blas_address), None);
        let err = build_tlas(&device, &[instance]).err().unwrap();
        assert!(err.to_string().contains("not a bottom-level"));
    }

    #[test]
    fn test_state_object_rejects_bad_order() {
        let device = HeadlessDevice::new();
        let local = crate::renderer::root_signature::create_local_signature(&device, &[Binding::srv(0, 1)]).unwrap();
        let subobjects = [Subobject::<HeadlessDevice>::LocalRootSignature(local.handle())];
        let err = device.create_state_object(&subobjects).unwrap_err();
        assert!(err.to_string().contains("global root signature"));
    }

    #[test]
    fn test_wait_for_unsignaled_fence() {
        let device = HeadlessDevice::new();
        assert!(device.wait_for_fence(FenceValue::new(0)).is_ok());
        assert!(device.wait_for_fence(FenceValue::new(5)).is_err());
    }

    #[test]
    fn test_unsupported_adapter() {
        let device = HeadlessDevice::new().without_raytracing();
        assert!(device.capabilities().require_raytracing().is_err());
    }
}
