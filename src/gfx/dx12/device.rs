//! DirectX 12 光线追踪设备
//!
//! # 初始化流程
//!
//! 1. 启用调试层（按配置）
//! 2. 创建 DXGI 工厂并枚举硬件适配器，优先选择支持 DXR 的适配器
//! 3. 创建 `ID3D12Device5` 并查询 `D3D12_OPTIONS5` 的光线追踪等级
//! 4. 创建唯一的直接命令队列、命令分配器和命令列表
//! 5. 创建三个描述符堆（RTV、CBV/SRV/UAV、采样器）
//! 6. 创建 Fence 与等待事件
//!
//! 所有命令都在唯一的命令列表上录制，提交前等待上一次提交完成后再复位分配器。

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use windows::core::{Interface, HSTRING};
use windows::Win32::Foundation::{CloseHandle, E_OUTOFMEMORY, HANDLE};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

use crate::core::config::Config;
use crate::core::error::{GraphicsError, RaytracingError, Result};
use crate::renderer::acceleration::{AccelerationStructureInputs, PrebuildInfo};
use crate::renderer::command::{CommandList, GpuCommand};
use crate::renderer::descriptor::{CpuDescriptorHandle, DescriptorHeapInfo, DescriptorHeapType};
use crate::renderer::device::{DeviceCapabilities, RaytracingDevice, RaytracingTier, ResourceView};
use crate::renderer::pipeline::{ShaderIdentifier, Subobject};
use crate::renderer::resource::{BufferDesc, GpuBuffer, GpuVirtualAddress, HeapType};
use crate::renderer::root_signature::RootSignatureLayout;
use crate::renderer::sync::{FenceManager, FenceValue};

use super::convert::{map_resource_state, BuildInputs, RootSignatureDesc};
use super::descriptor::Dx12DescriptorHeap;
use super::state_object::{self, borrow_interface};

struct BufferInner {
    resource: ID3D12Resource,
    address: GpuVirtualAddress,
    size: u64,
    heap: HeapType,
    name: String,
}

/// DirectX 12 提交资源（committed resource）上的缓冲区
#[derive(Clone)]
pub struct Dx12Buffer {
    inner: Arc<BufferInner>,
}

impl Dx12Buffer {
    /// 底层 D3D12 资源
    pub fn resource(&self) -> &ID3D12Resource {
        &self.inner.resource
    }
}

impl std::fmt::Debug for Dx12Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dx12Buffer")
            .field("name", &self.inner.name)
            .field("address", &format_args!("{:#x}", self.inner.address))
            .field("size", &self.inner.size)
            .field("heap", &self.inner.heap)
            .finish()
    }
}

impl GpuBuffer for Dx12Buffer {
    fn size(&self) -> u64 {
        self.inner.size
    }

    fn gpu_address(&self) -> GpuVirtualAddress {
        self.inner.address
    }

    fn heap(&self) -> HeapType {
        self.inner.heap
    }

    fn name(&self) -> &str {
        &self.inner.name
    }
}

struct CommandContext {
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList4,
}

/// DirectX 12 光线追踪设备
pub struct Dx12Device {
    device: ID3D12Device5,
    command_queue: ID3D12CommandQueue,
    context: Mutex<CommandContext>,
    fence: ID3D12Fence,
    fence_event: HANDLE,
    fence_values: FenceManager,
    heaps: [Dx12DescriptorHeap; 3],
    capabilities: DeviceCapabilities,
}

// D3D12 设备、队列和 Fence 都是自由线程对象，命令列表由 Mutex 保护
unsafe impl Send for Dx12Device {}
unsafe impl Sync for Dx12Device {}

fn device_error(call: &str, e: windows::core::Error) -> GraphicsError {
    GraphicsError::DeviceCreation(format!("{} failed: {}", call, e))
}

fn command_error(call: &str, e: windows::core::Error) -> GraphicsError {
    GraphicsError::CommandExecution(format!("{} failed: {}", call, e))
}

fn raytracing_tier(device: &ID3D12Device5) -> RaytracingTier {
    let mut options5 = D3D12_FEATURE_DATA_D3D12_OPTIONS5::default();
    let supported = unsafe {
        device.CheckFeatureSupport(
            D3D12_FEATURE_D3D12_OPTIONS5,
            &mut options5 as *mut _ as *mut _,
            std::mem::size_of::<D3D12_FEATURE_DATA_D3D12_OPTIONS5>() as u32,
        )
    };
    match (supported, options5.RaytracingTier) {
        (Ok(()), D3D12_RAYTRACING_TIER_1_1) => RaytracingTier::Tier1_1,
        (Ok(()), D3D12_RAYTRACING_TIER_1_0) => RaytracingTier::Tier1_0,
        _ => RaytracingTier::NotSupported,
    }
}

/// 枚举硬件适配器，返回第一个支持 DXR 的设备；都不支持时返回第一个可用设备
fn select_device(factory: &IDXGIFactory4) -> Result<(ID3D12Device5, String, RaytracingTier)> {
    let mut fallback = None;

    for index in 0.. {
        let adapter: IDXGIAdapter1 = match unsafe { factory.EnumAdapters1(index) } {
            Ok(adapter) => adapter,
            Err(_) => break,
        };
        let desc = unsafe { adapter.GetDesc1() }.map_err(|e| device_error("GetDesc1", e))?;
        if desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0 {
            continue;
        }

        let name_len = desc.Description.iter().position(|&c| c == 0).unwrap_or(desc.Description.len());
        let name = String::from_utf16_lossy(&desc.Description[..name_len]);

        let mut device: Option<ID3D12Device> = None;
        if unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_12_0, &mut device) }.is_err() {
            tracing::debug!(adapter = %name, "Adapter does not support feature level 12_0");
            continue;
        }
        let Some(device) = device else { continue };
        let Ok(device) = device.cast::<ID3D12Device5>() else {
            tracing::debug!(adapter = %name, "ID3D12Device5 unavailable");
            continue;
        };

        let tier = raytracing_tier(&device);
        if tier != RaytracingTier::NotSupported {
            return Ok((device, name, tier));
        }
        if fallback.is_none() {
            fallback = Some((device, name, tier));
        }
    }

    fallback.ok_or_else(|| GraphicsError::DeviceCreation("No hardware adapter supports Direct3D 12".to_string()).into())
}

impl Dx12Device {
    /// 创建设备、命令队列、描述符堆和 Fence
    pub fn new(config: &Config) -> Result<Self> {
        unsafe {
            if config.graphics.debug_layer {
                let mut debug: Option<ID3D12Debug> = None;
                match D3D12GetDebugInterface(&mut debug) {
                    Ok(()) => {
                        if let Some(debug) = debug {
                            debug.EnableDebugLayer();
                            tracing::debug!("DX12 Debug Layer enabled");
                        }
                    }
                    Err(e) => tracing::warn!("Failed to enable DX12 Debug Layer: {}", e),
                }
            }

            let factory_flags = if config.graphics.debug_layer {
                DXGI_CREATE_FACTORY_DEBUG
            } else {
                DXGI_CREATE_FACTORY_FLAGS(0)
            };
            let factory: IDXGIFactory4 =
                CreateDXGIFactory2(factory_flags).map_err(|e| device_error("CreateDXGIFactory2", e))?;

            let (device, adapter_name, raytracing_tier) = select_device(&factory)?;
            crate::engine_info!("Using adapter '{}' ({:?})", adapter_name, raytracing_tier);

            let queue_desc = D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                ..Default::default()
            };
            let command_queue: ID3D12CommandQueue =
                device.CreateCommandQueue(&queue_desc).map_err(|e| device_error("CreateCommandQueue", e))?;

            let allocator: ID3D12CommandAllocator = device
                .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)
                .map_err(|e| device_error("CreateCommandAllocator", e))?;
            let list: ID3D12GraphicsCommandList4 = device
                .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None)
                .map_err(|e| device_error("CreateCommandList", e))?;
            // 命令列表创建时处于记录状态
            list.Close().map_err(|e| device_error("ID3D12GraphicsCommandList::Close", e))?;

            let descriptors = &config.descriptors;
            let heaps = [
                Dx12DescriptorHeap::new(&device, DescriptorHeapType::Rtv, descriptors.rtv_capacity)?,
                Dx12DescriptorHeap::new(&device, DescriptorHeapType::CbvSrvUav, descriptors.cbv_srv_uav_capacity)?,
                Dx12DescriptorHeap::new(&device, DescriptorHeapType::Sampler, descriptors.sampler_capacity)?,
            ];

            let fence: ID3D12Fence =
                device.CreateFence(0, D3D12_FENCE_FLAG_NONE).map_err(|e| device_error("CreateFence", e))?;
            let fence_event = CreateEventA(None, false, false, None).map_err(|e| device_error("CreateEventA", e))?;

            crate::engine_info!("DX12 raytracing device initialized");

            Ok(Self {
                device,
                command_queue,
                context: Mutex::new(CommandContext { allocator, list }),
                fence,
                fence_event,
                fence_values: FenceManager::new(),
                heaps,
                capabilities: DeviceCapabilities {
                    adapter_name,
                    raytracing_tier,
                    executes_shaders: true,
                },
            })
        }
    }

    fn heap(&self, heap: DescriptorHeapType) -> &Dx12DescriptorHeap {
        match heap {
            DescriptorHeapType::Rtv => &self.heaps[0],
            DescriptorHeapType::CbvSrvUav => &self.heaps[1],
            DescriptorHeapType::Sampler => &self.heaps[2],
        }
    }

    fn lock_context(&self) -> MutexGuard<'_, CommandContext> {
        self.context.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn map(&self, buffer: &Dx12Buffer, offset: u64, len: u64, read: bool) -> Result<*mut u8> {
        if offset + len > buffer.size() {
            return Err(RaytracingError::ContractViolation(format!(
                "Access [{}, {}) is outside buffer '{}' ({} bytes)",
                offset,
                offset + len,
                buffer.name(),
                buffer.size()
            ))
            .into());
        }
        let read_range = D3D12_RANGE {
            Begin: if read { offset as usize } else { 0 },
            End: if read { (offset + len) as usize } else { 0 },
        };
        let mut data = std::ptr::null_mut();
        unsafe { buffer.resource().Map(0, Some(&read_range), Some(&mut data)) }
            .map_err(|e| command_error("ID3D12Resource::Map", e))?;
        Ok(unsafe { (data as *mut u8).add(offset as usize) })
    }

    fn record(&self, list: &ID3D12GraphicsCommandList4, command: &GpuCommand<Self>) {
        unsafe {
            match command {
                GpuCommand::CopyBuffer { destination, destination_offset, source, source_offset, size } => {
                    list.CopyBufferRegion(
                        destination.resource(),
                        *destination_offset,
                        source.resource(),
                        *source_offset,
                        *size,
                    );
                }
                GpuCommand::Transition { buffer, before, after } => {
                    let barrier = D3D12_RESOURCE_BARRIER {
                        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
                        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                        Anonymous: D3D12_RESOURCE_BARRIER_0 {
                            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                                pResource: borrow_interface(buffer.resource()),
                                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                                StateBefore: map_resource_state(*before),
                                StateAfter: map_resource_state(*after),
                            }),
                        },
                    };
                    list.ResourceBarrier(&[barrier]);
                }
                GpuCommand::UavBarrier { buffer } => {
                    let barrier = D3D12_RESOURCE_BARRIER {
                        Type: D3D12_RESOURCE_BARRIER_TYPE_UAV,
                        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                        Anonymous: D3D12_RESOURCE_BARRIER_0 {
                            UAV: ManuallyDrop::new(D3D12_RESOURCE_UAV_BARRIER {
                                pResource: borrow_interface(buffer.resource()),
                            }),
                        },
                    };
                    list.ResourceBarrier(&[barrier]);
                }
                GpuCommand::BuildAccelerationStructure { inputs, destination, scratch } => {
                    let converted = BuildInputs::new(inputs);
                    let desc = D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_DESC {
                        DestAccelerationStructureData: destination.gpu_address(),
                        Inputs: converted.desc,
                        SourceAccelerationStructureData: 0,
                        ScratchAccelerationStructureData: scratch.gpu_address(),
                    };
                    list.BuildRaytracingAccelerationStructure(&desc, None);
                }
                GpuCommand::SetDescriptorHeaps => {
                    list.SetDescriptorHeaps(&[
                        Some(self.heaps[1].heap().clone()),
                        Some(self.heaps[2].heap().clone()),
                    ]);
                }
                GpuCommand::SetComputeRootSignature(signature) => {
                    list.SetComputeRootSignature(signature);
                }
                GpuCommand::SetComputeRootDescriptorTable { parameter, base } => {
                    list.SetComputeRootDescriptorTable(*parameter, D3D12_GPU_DESCRIPTOR_HANDLE { ptr: base.ptr });
                }
                GpuCommand::SetComputeRootShaderResourceView { parameter, address } => {
                    list.SetComputeRootShaderResourceView(*parameter, *address);
                }
                GpuCommand::SetComputeRoot32BitConstants { parameter, values, offset } => {
                    list.SetComputeRoot32BitConstants(*parameter, values.len() as u32, values.as_ptr() as _, *offset);
                }
                GpuCommand::SetPipelineState(state_object) => {
                    list.SetPipelineState1(state_object);
                }
                GpuCommand::DispatchRays(desc) => {
                    let dx_desc = D3D12_DISPATCH_RAYS_DESC {
                        RayGenerationShaderRecord: D3D12_GPU_VIRTUAL_ADDRESS_RANGE {
                            StartAddress: desc.ray_generation.start,
                            SizeInBytes: desc.ray_generation.size,
                        },
                        MissShaderTable: D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE {
                            StartAddress: desc.miss.start,
                            SizeInBytes: desc.miss.size,
                            StrideInBytes: desc.miss.stride,
                        },
                        HitGroupTable: D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE {
                            StartAddress: desc.hit_group.start,
                            SizeInBytes: desc.hit_group.size,
                            StrideInBytes: desc.hit_group.stride,
                        },
                        CallableShaderTable: D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE {
                            StartAddress: desc.callable.start,
                            SizeInBytes: desc.callable.size,
                            StrideInBytes: desc.callable.stride,
                        },
                        Width: desc.width,
                        Height: desc.height,
                        Depth: desc.depth,
                    };
                    list.DispatchRays(&dx_desc);
                }
            }
        }
    }
}

impl Drop for Dx12Device {
    fn drop(&mut self) {
        let pending = self.fence_values.current_value();
        if let Err(e) = self.wait_for_fence(pending) {
            crate::engine_error!("Failed to drain GPU queue on shutdown: {}", e);
        }
        unsafe {
            let _ = CloseHandle(self.fence_event);
        }
    }
}

impl RaytracingDevice for Dx12Device {
    type Buffer = Dx12Buffer;
    type RootSignature = ID3D12RootSignature;
    type StateObject = ID3D12StateObject;

    fn backend_name(&self) -> &'static str {
        "DirectX 12"
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Dx12Buffer> {
        desc.validate()?;

        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: match desc.heap {
                HeapType::Default => D3D12_HEAP_TYPE_DEFAULT,
                HeapType::Upload => D3D12_HEAP_TYPE_UPLOAD,
                HeapType::Readback => D3D12_HEAP_TYPE_READBACK,
            },
            ..Default::default()
        };
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Alignment: 0,
            Width: desc.size,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: if desc.allow_unordered_access {
                D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS
            } else {
                D3D12_RESOURCE_FLAG_NONE
            },
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device.CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &resource_desc,
                map_resource_state(desc.initial_state),
                None,
                &mut resource,
            )
        }
        .map_err(|e| {
            if e.code() == E_OUTOFMEMORY {
                GraphicsError::OutOfMemory { requested: desc.size, name: desc.name.clone() }
            } else {
                GraphicsError::ResourceCreation(format!("Buffer '{}': {}", desc.name, e))
            }
        })?;
        let resource = resource.ok_or_else(|| {
            GraphicsError::ResourceCreation(format!("CreateCommittedResource returned no resource for '{}'", desc.name))
        })?;

        unsafe {
            if !desc.name.is_empty() {
                let _ = resource.SetName(&HSTRING::from(desc.name.as_str()));
            }
            let address = resource.GetGPUVirtualAddress();
            Ok(Dx12Buffer {
                inner: Arc::new(BufferInner {
                    resource,
                    address,
                    size: desc.size,
                    heap: desc.heap,
                    name: desc.name.clone(),
                }),
            })
        }
    }

    fn write_buffer(&self, buffer: &Dx12Buffer, offset: u64, data: &[u8]) -> Result<()> {
        if buffer.heap() != HeapType::Upload {
            return Err(RaytracingError::ContractViolation(format!(
                "Buffer '{}' on {:?} heap is not CPU writable", buffer.name(), buffer.heap()
            ))
            .into());
        }
        let ptr = self.map(buffer, offset, data.len() as u64, false)?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
            buffer.resource().Unmap(0, None);
        }
        Ok(())
    }

    fn read_buffer(&self, buffer: &Dx12Buffer, offset: u64, len: u64) -> Result<Vec<u8>> {
        if buffer.heap() == HeapType::Default {
            return Err(RaytracingError::ContractViolation(format!(
                "Buffer '{}' on the default heap is not CPU readable", buffer.name()
            ))
            .into());
        }
        let ptr = self.map(buffer, offset, len, true)?;
        let mut bytes = vec![0u8; len as usize];
        unsafe {
            std::ptr::copy_nonoverlapping(ptr, bytes.as_mut_ptr(), bytes.len());
            let written = D3D12_RANGE { Begin: 0, End: 0 };
            buffer.resource().Unmap(0, Some(&written));
        }
        Ok(bytes)
    }

    fn acceleration_structure_prebuild_info(&self, inputs: &AccelerationStructureInputs) -> Result<PrebuildInfo> {
        let converted = BuildInputs::new(inputs);
        let mut info = D3D12_RAYTRACING_ACCELERATION_STRUCTURE_PREBUILD_INFO::default();
        unsafe {
            self.device.GetRaytracingAccelerationStructurePrebuildInfo(&converted.desc, &mut info);
        }
        Ok(PrebuildInfo {
            result_data_max_size: info.ResultDataMaxSizeInBytes,
            scratch_data_size: info.ScratchDataSizeInBytes,
            update_scratch_data_size: info.UpdateScratchDataSizeInBytes,
        })
    }

    fn create_root_signature(&self, layout: &RootSignatureLayout) -> Result<ID3D12RootSignature> {
        let desc = RootSignatureDesc::new(layout);

        unsafe {
            let mut signature: Option<ID3DBlob> = None;
            let mut error: Option<ID3DBlob> = None;

            if let Err(e) = D3D12SerializeVersionedRootSignature(&desc.desc, &mut signature, Some(&mut error)) {
                let diagnostic = match error {
                    Some(blob) => {
                        let text = std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize());
                        String::from_utf8_lossy(text).trim_end_matches('\0').trim().to_string()
                    }
                    None => e.to_string(),
                };
                return Err(RaytracingError::RootSignatureSerialization(diagnostic).into());
            }

            let signature = signature.ok_or_else(|| {
                RaytracingError::RootSignatureSerialization("Serializer returned no blob".to_string())
            })?;
            let bytes = std::slice::from_raw_parts(signature.GetBufferPointer() as *const u8, signature.GetBufferSize());
            self.device
                .CreateRootSignature(0, bytes)
                .map_err(|e| RaytracingError::RootSignatureSerialization(format!("CreateRootSignature failed: {}", e)).into())
        }
    }

    fn create_state_object(&self, subobjects: &[Subobject<'_, Self>]) -> Result<ID3D12StateObject> {
        state_object::create_state_object(&self.device, subobjects)
    }

    fn shader_identifier(&self, state_object: &ID3D12StateObject, export: &str) -> Result<ShaderIdentifier> {
        state_object::shader_identifier(state_object, export).map(ShaderIdentifier)
    }

    fn descriptor_heap_info(&self, heap: DescriptorHeapType) -> DescriptorHeapInfo {
        self.heap(heap).info()
    }

    fn write_descriptor(&self, destination: CpuDescriptorHandle, view: &ResourceView<'_, Dx12Buffer>) -> Result<()> {
        let heap = self.heap(DescriptorHeapType::CbvSrvUav);
        if !heap.contains(destination.ptr) {
            return Err(RaytracingError::ContractViolation(format!(
                "Descriptor handle {:#x} is not a CBV/SRV/UAV heap slot", destination.ptr
            ))
            .into());
        }
        let handle = D3D12_CPU_DESCRIPTOR_HANDLE { ptr: destination.ptr };

        unsafe {
            match view {
                ResourceView::AccelerationStructure(location) => {
                    let desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
                        Format: DXGI_FORMAT_UNKNOWN,
                        ViewDimension: D3D12_SRV_DIMENSION_RAYTRACING_ACCELERATION_STRUCTURE,
                        Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                        Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                            RaytracingAccelerationStructure: D3D12_RAYTRACING_ACCELERATION_STRUCTURE_SRV {
                                Location: *location,
                            },
                        },
                    };
                    // 加速结构 SRV 的资源参数必须为空，位置由描述给出
                    self.device.CreateShaderResourceView(None, Some(&desc), handle);
                }
                ResourceView::BufferSrv { buffer, first_element, num_elements, stride } => {
                    let desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
                        Format: DXGI_FORMAT_UNKNOWN,
                        ViewDimension: D3D12_SRV_DIMENSION_BUFFER,
                        Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                        Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                            Buffer: D3D12_BUFFER_SRV {
                                FirstElement: *first_element,
                                NumElements: *num_elements,
                                StructureByteStride: *stride,
                                Flags: D3D12_BUFFER_SRV_FLAG_NONE,
                            },
                        },
                    };
                    self.device.CreateShaderResourceView(buffer.resource(), Some(&desc), handle);
                }
                ResourceView::BufferUav { buffer, first_element, num_elements, stride } => {
                    let desc = D3D12_UNORDERED_ACCESS_VIEW_DESC {
                        Format: DXGI_FORMAT_UNKNOWN,
                        ViewDimension: D3D12_UAV_DIMENSION_BUFFER,
                        Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                            Buffer: D3D12_BUFFER_UAV {
                                FirstElement: *first_element,
                                NumElements: *num_elements,
                                StructureByteStride: *stride,
                                CounterOffsetInBytes: 0,
                                Flags: D3D12_BUFFER_UAV_FLAG_NONE,
                            },
                        },
                    };
                    self.device.CreateUnorderedAccessView(buffer.resource(), None, Some(&desc), handle);
                }
                ResourceView::ConstantBuffer { address, size } => {
                    let desc = D3D12_CONSTANT_BUFFER_VIEW_DESC {
                        BufferLocation: *address,
                        SizeInBytes: *size,
                    };
                    self.device.CreateConstantBufferView(Some(&desc), handle);
                }
            }
        }
        Ok(())
    }

    fn execute_command_list(&self, list: &CommandList<Self>) -> Result<FenceValue> {
        let context = self.lock_context();

        // 分配器只有在上一次提交完成后才能复位
        self.wait_for_fence(self.fence_values.current_value())?;

        unsafe {
            context.allocator.Reset().map_err(|e| command_error("ID3D12CommandAllocator::Reset", e))?;
            context
                .list
                .Reset(&context.allocator, None)
                .map_err(|e| command_error("ID3D12GraphicsCommandList::Reset", e))?;
        }

        for command in list.commands() {
            self.record(&context.list, command);
        }

        unsafe {
            context.list.Close().map_err(|e| command_error("ID3D12GraphicsCommandList::Close", e))?;
            let command_list: ID3D12CommandList =
                context.list.cast().map_err(|e| command_error("ID3D12CommandList cast", e))?;
            self.command_queue.ExecuteCommandLists(&[Some(command_list)]);

            let value = self.fence_values.signal_next(|value| {
                self.command_queue
                    .Signal(&self.fence, value.value())
                    .map_err(|e| command_error("ID3D12CommandQueue::Signal", e))
            })?;
            Ok(value)
        }
    }

    fn completed_fence_value(&self) -> FenceValue {
        let completed = unsafe { self.fence.GetCompletedValue() };
        self.fence_values.update_completed_value(FenceValue::new(completed));
        self.fence_values.completed_value()
    }

    fn wait_for_fence(&self, value: FenceValue) -> Result<()> {
        if value > self.fence_values.current_value() {
            return Err(GraphicsError::CommandExecution(format!(
                "Fence value {} was never signaled", value.value()
            ))
            .into());
        }
        if self.completed_fence_value() >= value {
            return Ok(());
        }
        unsafe {
            self.fence
                .SetEventOnCompletion(value.value(), self.fence_event)
                .map_err(|e| command_error("ID3D12Fence::SetEventOnCompletion", e))?;
            WaitForSingleObject(self.fence_event, INFINITE);
        }
        self.fence_values.update_completed_value(value);
        Ok(())
    }
}
