//! 命令列表的 CPU 模拟执行
//!
//! 按记录顺序逐条执行；任何一条违反调试层规则都会中止整个列表，
//! 之前的命令效果保留（与设备移除后的状态类似）。

use crate::core::error::{GraphicsError, Result};
use crate::renderer::acceleration::{
    AccelerationStructureInputs, AccelerationStructureKind, GeometryData, RaytracingInstanceDesc,
};
use crate::renderer::align::{is_aligned, ACCELERATION_STRUCTURE_ALIGNMENT, INSTANCE_DESC_SIZE, SHADER_IDENTIFIER_SIZE};
use crate::renderer::command::GpuCommand;
use crate::renderer::descriptor::{DescriptorHeapInfo, GpuDescriptorHandle};
use crate::renderer::resource::{GpuBuffer, GpuVirtualAddress, HeapType, ResourceState};
use crate::renderer::root_signature::{RootParameter, RootSignatureKind};
use crate::renderer::sbt::DispatchRaysDesc;

use super::device::{prebuild_sizes, BuiltStructure, DeviceState, HeadlessDevice, STRUCTURE_MAGIC};
use super::resources::{lock, HeadlessBuffer, HeadlessRootSignature, HeadlessStateObject};

/// 当前绑定的计算状态
#[derive(Default)]
struct Bindings {
    heaps_set: bool,
    root_signature: Option<HeadlessRootSignature>,
    state_object: Option<HeadlessStateObject>,
}

fn fail(command: &GpuCommand<HeadlessDevice>, message: String) -> crate::core::error::GalleryError {
    GraphicsError::CommandExecution(format!("{}: {}", command.name(), message)).into()
}

fn require_state(buffer: &HeadlessBuffer, allowed: &[ResourceState]) -> std::result::Result<(), String> {
    let current = buffer.state();
    if allowed.contains(&current) {
        Ok(())
    } else {
        Err(format!("'{}' is in {:?}, expected one of {:?}", buffer.name(), current, allowed))
    }
}

pub(super) fn execute(
    state: &mut DeviceState,
    cbv_srv_uav: &DescriptorHeapInfo,
    commands: &[GpuCommand<HeadlessDevice>],
) -> Result<()> {
    let mut bindings = Bindings::default();

    for command in commands {
        match command {
            GpuCommand::CopyBuffer { destination, destination_offset, source, source_offset, size } => {
                require_state(source, &[ResourceState::CopySource, ResourceState::GenericRead])
                    .map_err(|m| fail(command, m))?;
                require_state(destination, &[ResourceState::CopyDest]).map_err(|m| fail(command, m))?;
                let (src, dst) = match (source.range(*source_offset, *size), destination.range(*destination_offset, *size)) {
                    (Some(src), Some(dst)) => (src, dst),
                    _ => return Err(fail(command, format!("copy of {} bytes is out of bounds", size))),
                };

                if source.id() == destination.id() {
                    lock(&source.storage.data).copy_within(src, dst.start);
                } else {
                    let bytes = lock(&source.storage.data)[src].to_vec();
                    lock(&destination.storage.data)[dst].copy_from_slice(&bytes);
                }
            }

            GpuCommand::Transition { buffer, before, after } => {
                if buffer.heap() != HeapType::Default {
                    return Err(fail(command, format!(
                        "'{}' lives on the {:?} heap and cannot change state", buffer.name(), buffer.heap()
                    )));
                }
                require_state(buffer, &[*before]).map_err(|m| fail(command, m))?;
                *lock(&buffer.storage.state) = *after;
            }

            GpuCommand::UavBarrier { buffer } => {
                if !buffer.allows_unordered_access() {
                    return Err(fail(command, format!("'{}' does not allow unordered access", buffer.name())));
                }
            }

            GpuCommand::BuildAccelerationStructure { inputs, destination, scratch } => {
                build(state, inputs, destination, scratch).map_err(|m| fail(command, m))?;
            }

            GpuCommand::SetDescriptorHeaps => bindings.heaps_set = true,

            GpuCommand::SetComputeRootSignature(signature) => {
                if signature.layout().kind != RootSignatureKind::Global {
                    return Err(fail(command, "a local root signature cannot be bound".to_string()));
                }
                bindings.root_signature = Some(signature.clone());
            }

            GpuCommand::SetComputeRootDescriptorTable { parameter, base } => {
                if !bindings.heaps_set {
                    return Err(fail(command, "descriptor heaps are not set".to_string()));
                }
                match root_parameter(&bindings, *parameter) {
                    Some(RootParameter::DescriptorTable(_)) => {}
                    other => return Err(fail(command, mismatch(*parameter, "descriptor table", other))),
                }
                if !inside_heap(cbv_srv_uav, base) {
                    return Err(fail(command, format!(
                        "GPU handle {:#x} is outside the CBV/SRV/UAV heap", base.ptr
                    )));
                }
            }

            GpuCommand::SetComputeRootShaderResourceView { parameter, address } => {
                match root_parameter(&bindings, *parameter) {
                    Some(RootParameter::ShaderResourceView { .. }) => {}
                    other => return Err(fail(command, mismatch(*parameter, "root SRV", other))),
                }
                if state.find_buffer(*address, 1).is_none() {
                    return Err(fail(command, format!("{:#x} does not point into a live buffer", address)));
                }
            }

            GpuCommand::SetComputeRoot32BitConstants { parameter, values, offset } => {
                match root_parameter(&bindings, *parameter) {
                    Some(RootParameter::Constants { num_values, .. }) if offset + values.len() as u32 <= *num_values => {}
                    Some(RootParameter::Constants { num_values, .. }) => {
                        return Err(fail(command, format!(
                            "{} values at offset {} exceed {} constants", values.len(), offset, num_values
                        )));
                    }
                    other => return Err(fail(command, mismatch(*parameter, "32-bit constants", other))),
                }
            }

            GpuCommand::SetPipelineState(state_object) => bindings.state_object = Some(state_object.clone()),

            GpuCommand::DispatchRays(desc) => {
                dispatch(state, &bindings, desc).map_err(|m| fail(command, m))?;
                state.stats.dispatches += 1;
                state.stats.rays_dispatched += desc.width as u64 * desc.height as u64 * desc.depth as u64;
            }
        }
    }

    Ok(())
}

fn root_parameter(bindings: &Bindings, parameter: u32) -> Option<&RootParameter> {
    bindings
        .root_signature
        .as_ref()
        .and_then(|signature| signature.layout().parameters.get(parameter as usize))
}

fn mismatch(parameter: u32, expected: &str, found: Option<&RootParameter>) -> String {
    match found {
        Some(found) => format!("root parameter {} is {:?}, not a {}", parameter, found, expected),
        None => format!("root parameter {} does not exist in the bound root signature", parameter),
    }
}

fn inside_heap(info: &DescriptorHeapInfo, handle: &GpuDescriptorHandle) -> bool {
    let Some(start) = info.gpu_start else {
        return false;
    };
    let end = start + info.capacity as u64 * info.increment_size as u64;
    handle.ptr >= start && handle.ptr < end && (handle.ptr - start) % info.increment_size as u64 == 0
}

fn build(
    state: &mut DeviceState,
    inputs: &AccelerationStructureInputs,
    destination: &HeadlessBuffer,
    scratch: &HeadlessBuffer,
) -> std::result::Result<(), String> {
    inputs.validate().map_err(|e| e.to_string())?;
    require_state(destination, &[ResourceState::RaytracingAccelerationStructure])?;
    require_state(scratch, &[ResourceState::UnorderedAccess])?;

    for buffer in [destination, scratch] {
        if !is_aligned(buffer.gpu_address(), ACCELERATION_STRUCTURE_ALIGNMENT) {
            return Err(format!("'{}' at {:#x} is not 256-byte aligned", buffer.name(), buffer.gpu_address()));
        }
    }

    let prebuild = prebuild_sizes(inputs);
    if destination.size() < prebuild.result_data_max_size || scratch.size() < prebuild.scratch_data_size {
        return Err(format!(
            "result {} / scratch {} bytes are smaller than the prebuild sizes {} / {}",
            destination.size(),
            scratch.size(),
            prebuild.result_data_max_size,
            prebuild.scratch_data_size
        ));
    }

    let blas = match inputs {
        AccelerationStructureInputs::BottomLevel { geometries, .. } => {
            for (index, geometry) in geometries.iter().enumerate() {
                let ranges: Vec<(GpuVirtualAddress, u64)> = match &geometry.data {
                    GeometryData::Triangles(t) => {
                        let mut ranges = vec![(t.vertex_buffer, t.vertex_stride * t.vertex_count as u64)];
                        if t.index_buffer != 0 {
                            let index_size = t.index_format.byte_size().map_err(|e| e.to_string())?;
                            ranges.push((t.index_buffer, index_size as u64 * t.index_count as u64));
                        }
                        if t.transform != 0 {
                            ranges.push((t.transform, 48));
                        }
                        ranges
                    }
                    GeometryData::Aabbs(a) => vec![(a.aabb_buffer, a.stride * a.count as u64)],
                };
                for (address, size) in ranges {
                    if state.find_buffer(address, size).is_none() {
                        return Err(format!(
                            "geometry {} reads {} bytes at {:#x} outside any live buffer", index, size, address
                        ));
                    }
                }
            }
            Vec::new()
        }
        AccelerationStructureInputs::TopLevel { instance_descs, instance_count, .. } => {
            let size = *instance_count as u64 * INSTANCE_DESC_SIZE;
            if size == 0 {
                Vec::new()
            } else {
                let buffer = state.find_buffer(*instance_descs, size).ok_or_else(|| {
                    format!("{} instance descriptors at {:#x} are outside any live buffer", instance_count, instance_descs)
                })?;
                let offset = (*instance_descs - buffer.gpu_address()) as usize;
                let bytes = lock(&buffer.storage.data)[offset..offset + size as usize].to_vec();

                let mut referenced = Vec::with_capacity(*instance_count as usize);
                for (index, chunk) in bytes.chunks_exact(INSTANCE_DESC_SIZE as usize).enumerate() {
                    let desc: RaytracingInstanceDesc = bytemuck::pod_read_unaligned(chunk);
                    let address = desc.blas_address();
                    if state.structure_kind(address) != Some(AccelerationStructureKind::BottomLevel) {
                        return Err(format!(
                            "instance {} references {:#x}, which is not a bottom-level acceleration structure",
                            index, address
                        ));
                    }
                    referenced.push(address);
                }
                referenced
            }
        }
    };

    // 结果头部：标记、层级、图元数
    let mut header = Vec::with_capacity(16);
    header.extend_from_slice(&STRUCTURE_MAGIC.to_le_bytes());
    header.extend_from_slice(&(inputs.kind() as u32).to_le_bytes());
    header.extend_from_slice(&inputs.primitive_count().to_le_bytes());
    lock(&destination.storage.data)[..header.len()].copy_from_slice(&header);

    state.structures.insert(destination.gpu_address(), BuiltStructure { kind: inputs.kind(), blas });
    state.stats.acceleration_structure_builds += 1;
    tracing::trace!(
        kind = ?inputs.kind(),
        address = destination.gpu_address(),
        primitives = inputs.primitive_count(),
        "Acceleration structure build emulated"
    );
    Ok(())
}

fn dispatch(state: &DeviceState, bindings: &Bindings, desc: &DispatchRaysDesc) -> std::result::Result<(), String> {
    desc.validate().map_err(|e| e.to_string())?;

    let state_object = bindings.state_object.as_ref().ok_or("no raytracing pipeline state is set")?;
    let signature = bindings.root_signature.as_ref().ok_or("no compute root signature is set")?;
    if signature.id != state_object.info.global_root_signature {
        return Err("bound root signature differs from the pipeline's global root signature".to_string());
    }

    let sections = [
        ("ray generation", desc.ray_generation.start, desc.ray_generation.size, desc.ray_generation.size),
        ("miss", desc.miss.start, desc.miss.size, desc.miss.stride),
        ("hit group", desc.hit_group.start, desc.hit_group.size, desc.hit_group.stride),
        ("callable", desc.callable.start, desc.callable.size, desc.callable.stride),
    ];

    for (name, start, size, stride) in sections {
        if size == 0 {
            continue;
        }
        if stride < SHADER_IDENTIFIER_SIZE {
            return Err(format!("{} records of {} bytes cannot hold a shader identifier", name, stride));
        }
        let buffer = state
            .find_buffer(start, size)
            .ok_or_else(|| format!("{} table at {:#x} ({} bytes) is outside any live buffer", name, start, size))?;

        let data = lock(&buffer.storage.data);
        let base = (start - buffer.gpu_address()) as usize;
        let mut record = 0u64;
        while record + SHADER_IDENTIFIER_SIZE <= size {
            let offset = base + record as usize;
            if !state_object.knows_identifier(&data[offset..offset + SHADER_IDENTIFIER_SIZE as usize]) {
                return Err(format!(
                    "{} record at {:#x} does not start with an identifier of the bound pipeline",
                    name,
                    start + record
                ));
            }
            record += stride;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::command::run_synchronously;
    use crate::renderer::device::RaytracingDevice;
    use crate::renderer::resource::BufferDesc;

    #[test]
    fn test_transition_checks_before_state() {
        let device = HeadlessDevice::new();
        let buffer = device.create_buffer(&BufferDesc::scratch(256)).unwrap();

        let err = run_synchronously(&device, |list| {
            list.transition(&buffer, ResourceState::CopyDest, ResourceState::CopySource)
        })
        .unwrap_err();
        assert!(err.to_string().contains("UnorderedAccess"));

        run_synchronously(&device, |list| {
            list.transition(&buffer, ResourceState::UnorderedAccess, ResourceState::CopySource)
        })
        .unwrap();
        assert_eq!(buffer.state(), ResourceState::CopySource);
    }

    #[test]
    fn test_upload_heap_cannot_transition() {
        let device = HeadlessDevice::new();
        let upload = device.create_buffer(&BufferDesc::upload(64)).unwrap();
        let result = run_synchronously(&device, |list| {
            list.transition(&upload, ResourceState::GenericRead, ResourceState::CopySource)
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_copy_bounds_and_states() {
        let device = HeadlessDevice::new();
        let source = device.create_buffer(&BufferDesc::upload(16)).unwrap();
        device.write_buffer(&source, 0, &[5; 16]).unwrap();
        let readback = device.create_buffer(&BufferDesc::readback(16)).unwrap();

        assert!(run_synchronously(&device, |list| list.copy_buffer(&readback, 8, &source, 0, 16)).is_err());
        run_synchronously(&device, |list| list.copy_buffer(&readback, 8, &source, 0, 8)).unwrap();
        assert_eq!(device.read_buffer(&readback, 0, 16).unwrap(), [vec![0; 8], vec![5; 8]].concat());
    }

    #[test]
    fn test_dispatch_requires_pipeline() {
        let device = HeadlessDevice::new();
        let table = device.create_buffer(&BufferDesc::upload(64)).unwrap();
        let desc = DispatchRaysDesc {
            ray_generation: crate::renderer::sbt::GpuAddressRange { start: table.gpu_address(), size: 32 },
            width: 1,
            height: 1,
            depth: 1,
            ..Default::default()
        };
        let err = run_synchronously(&device, |list| list.dispatch_rays(&desc)).unwrap_err();
        assert!(err.to_string().contains("pipeline"));
        assert_eq!(device.stats().dispatches, 0);
    }
}
