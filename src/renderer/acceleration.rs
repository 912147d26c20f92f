//! 加速结构构建
//!
//! BLAS 由三角形或程序化 AABB 几何体构建，TLAS 由实例数组构建。
//! 每次构建的流程相同：
//!
//! 1. 向设备查询 prebuild 信息（结果大小、scratch 大小）
//! 2. 在默认堆上分配结果缓冲区（加速结构状态）和 scratch 缓冲区（UAV 状态），
//!    大小都按 256 对齐
//! 3. 记录一条构建命令并同步执行
//!
//! BLAS 保留其几何体缓冲区，TLAS 保留实例缓冲区，以便之后原地重建。
//! `AccelerationStructureArena` 负责 TLAS 对 BLAS 的引用计数。

use std::ops::BitOr;

use bytemuck::{Pod, Zeroable};

use crate::core::error::{RaytracingError, Result};
use crate::math::Transform3x4;
use super::align::{checked_align_up, is_aligned, AABB_SIZE, ACCELERATION_STRUCTURE_ALIGNMENT};
use super::command::run_synchronously;
use super::device::{RaytracingDevice, ResourceView};
use super::format::Format;
use super::resource::{
    create_upload_buffer, upload_buffer, BufferDesc, GpuBuffer, GpuVirtualAddress, ResourceState,
};

/// 加速结构构建标志（D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAGS）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BuildFlags(u32);

impl BuildFlags {
    pub const NONE: Self = Self(0);
    pub const ALLOW_UPDATE: Self = Self(0x1);
    pub const ALLOW_COMPACTION: Self = Self(0x2);
    pub const PREFER_FAST_TRACE: Self = Self(0x4);
    pub const PREFER_FAST_BUILD: Self = Self(0x8);
    pub const MINIMIZE_MEMORY: Self = Self(0x10);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for BuildFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// 实例标志（D3D12_RAYTRACING_INSTANCE_FLAGS），占实例描述符的高 8 位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InstanceFlags(u8);

impl InstanceFlags {
    pub const NONE: Self = Self(0);
    pub const TRIANGLE_CULL_DISABLE: Self = Self(0x1);
    pub const TRIANGLE_FRONT_COUNTERCLOCKWISE: Self = Self(0x2);
    pub const FORCE_OPAQUE: Self = Self(0x4);
    pub const FORCE_NON_OPAQUE: Self = Self(0x8);

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for InstanceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// 几何体的图元类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    Triangles,
    ProceduralAabbs,
}

/// 三角形几何体
#[derive(Debug, Clone, PartialEq)]
pub struct TriangleGeometry {
    pub vertex_buffer: GpuVirtualAddress,
    pub vertex_stride: u64,
    pub vertex_count: u32,
    pub vertex_format: Format,
    /// 没有索引时为 0
    pub index_buffer: GpuVirtualAddress,
    pub index_count: u32,
    /// 没有索引时为 `Format::Unknown`
    pub index_format: Format,
    /// 可选的 3x4 变换矩阵地址，没有时为 0
    pub transform: GpuVirtualAddress,
}

/// 程序化几何体（AABB 数组）
#[derive(Debug, Clone, PartialEq)]
pub struct AabbGeometry {
    pub aabb_buffer: GpuVirtualAddress,
    pub stride: u64,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeometryData {
    Triangles(TriangleGeometry),
    Aabbs(AabbGeometry),
}

/// BLAS 中的一个几何体
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryDesc {
    /// 不透明几何体不会调用 any-hit 着色器
    pub opaque: bool,
    pub data: GeometryData,
}

impl GeometryDesc {
    pub fn kind(&self) -> GeometryKind {
        match self.data {
            GeometryData::Triangles(_) => GeometryKind::Triangles,
            GeometryData::Aabbs(_) => GeometryKind::ProceduralAabbs,
        }
    }

    /// 图元数量：三角形数或 AABB 数
    pub fn primitive_count(&self) -> u32 {
        match &self.data {
            GeometryData::Triangles(t) if t.index_buffer != 0 => t.index_count / 3,
            GeometryData::Triangles(t) => t.vertex_count / 3,
            GeometryData::Aabbs(a) => a.count,
        }
    }

    /// 检查格式、步长和数量
    pub fn validate(&self) -> Result<()> {
        match &self.data {
            GeometryData::Triangles(t) => {
                if !t.vertex_format.is_vertex_position_format() {
                    return Err(RaytracingError::ContractViolation(format!(
                        "{:?} is not a vertex position format", t.vertex_format
                    )).into());
                }
                let element = t.vertex_format.byte_size()? as u64;
                if t.vertex_stride < element {
                    return Err(RaytracingError::ContractViolation(format!(
                        "Vertex stride {} is smaller than {:?} ({} bytes)",
                        t.vertex_stride, t.vertex_format, element
                    )).into());
                }
                if t.vertex_count == 0 || t.vertex_buffer == 0 {
                    return Err(RaytracingError::ContractViolation(
                        "Triangle geometry has no vertices".to_string(),
                    ).into());
                }
                if t.index_buffer != 0 {
                    if !t.index_format.is_index_format() {
                        return Err(RaytracingError::ContractViolation(format!(
                            "{:?} is not an index format", t.index_format
                        )).into());
                    }
                    if t.index_count == 0 || t.index_count % 3 != 0 {
                        return Err(RaytracingError::ContractViolation(format!(
                            "Index count {} is not a positive multiple of 3", t.index_count
                        )).into());
                    }
                } else if t.vertex_count % 3 != 0 {
                    return Err(RaytracingError::ContractViolation(format!(
                        "Non-indexed vertex count {} is not a multiple of 3", t.vertex_count
                    )).into());
                }
            }
            GeometryData::Aabbs(a) => {
                // D3D12_RAYTRACING_AABB_BYTE_ALIGNMENT
                if a.stride < AABB_SIZE || !is_aligned(a.stride, 8) || !is_aligned(a.aabb_buffer, 8) {
                    return Err(RaytracingError::ContractViolation(format!(
                        "AABB stride {} / address {:#x} must be 8-byte aligned and hold 24 bytes",
                        a.stride, a.aabb_buffer
                    )).into());
                }
                if a.count == 0 {
                    return Err(RaytracingError::ContractViolation(
                        "Procedural geometry has no AABBs".to_string(),
                    ).into());
                }
            }
        }
        Ok(())
    }
}

/// 加速结构层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelerationStructureKind {
    BottomLevel,
    TopLevel,
}

/// 一次构建的输入（D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS）
#[derive(Debug, Clone, PartialEq)]
pub enum AccelerationStructureInputs {
    BottomLevel {
        flags: BuildFlags,
        geometries: Vec<GeometryDesc>,
    },
    TopLevel {
        flags: BuildFlags,
        /// 实例描述符数组的 GPU 地址，必须 16 字节对齐
        instance_descs: GpuVirtualAddress,
        instance_count: u32,
    },
}

impl AccelerationStructureInputs {
    pub fn kind(&self) -> AccelerationStructureKind {
        match self {
            AccelerationStructureInputs::BottomLevel { .. } => AccelerationStructureKind::BottomLevel,
            AccelerationStructureInputs::TopLevel { .. } => AccelerationStructureKind::TopLevel,
        }
    }

    pub fn flags(&self) -> BuildFlags {
        match self {
            AccelerationStructureInputs::BottomLevel { flags, .. }
            | AccelerationStructureInputs::TopLevel { flags, .. } => *flags,
        }
    }

    /// `NumDescs`：BLAS 为几何体数，TLAS 为实例数
    pub fn descriptor_count(&self) -> u32 {
        match self {
            AccelerationStructureInputs::BottomLevel { geometries, .. } => geometries.len() as u32,
            AccelerationStructureInputs::TopLevel { instance_count, .. } => *instance_count,
        }
    }

    /// BLAS 的图元总数，TLAS 的实例数
    pub fn primitive_count(&self) -> u64 {
        match self {
            AccelerationStructureInputs::BottomLevel { geometries, .. } => {
                geometries.iter().map(|g| g.primitive_count() as u64).sum()
            }
            AccelerationStructureInputs::TopLevel { instance_count, .. } => *instance_count as u64,
        }
    }

    /// BLAS 几何体的统一图元类型
    pub fn geometry_kind(&self) -> Option<GeometryKind> {
        match self {
            AccelerationStructureInputs::BottomLevel { geometries, .. } => geometries.first().map(|g| g.kind()),
            AccelerationStructureInputs::TopLevel { .. } => None,
        }
    }

    /// 构建前的输入检查
    ///
    /// BLAS 至少要有一个几何体，且所有几何体图元类型相同。
    pub fn validate(&self) -> Result<()> {
        match self {
            AccelerationStructureInputs::BottomLevel { geometries, .. } => {
                let first = geometries.first().ok_or_else(|| {
                    RaytracingError::ContractViolation(
                        "Bottom-level structure needs at least one geometry".to_string(),
                    )
                })?;
                if geometries.iter().any(|g| g.kind() != first.kind()) {
                    return Err(RaytracingError::MixedGeometry.into());
                }
                for geometry in geometries {
                    geometry.validate()?;
                }
            }
            AccelerationStructureInputs::TopLevel { instance_descs, instance_count, .. } => {
                if *instance_count > 0 && !is_aligned(*instance_descs, 16) {
                    return Err(RaytracingError::ContractViolation(format!(
                        "Instance descriptors at {:#x} are not 16-byte aligned", instance_descs
                    )).into());
                }
            }
        }
        Ok(())
    }
}

/// prebuild 信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrebuildInfo {
    pub result_data_max_size: u64,
    pub scratch_data_size: u64,
    pub update_scratch_data_size: u64,
}

/// 轴对齐包围盒（D3D12_RAYTRACING_AABB）
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Aabb {
    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self { min, max }
    }

    /// 以原点为中心、边长为 1 的包围盒
    pub fn unit() -> Self {
        Self::new([-0.5; 3], [0.5; 3])
    }
}

/// TLAS 实例描述符
///
/// 与 `D3D12_RAYTRACING_INSTANCE_DESC` 逐位一致：
/// 48 字节行主序变换，然后 `InstanceID:24 | InstanceMask:8`、
/// `InstanceContributionToHitGroupIndex:24 | Flags:8`，最后是 BLAS 地址。
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RaytracingInstanceDesc {
    pub transform: Transform3x4,
    instance_id_and_mask: u32,
    contribution_and_flags: u32,
    acceleration_structure: u64,
}

const INSTANCE_FIELD_MAX: u32 = 0x00FF_FFFF;

impl RaytracingInstanceDesc {
    /// 打包实例描述符
    ///
    /// `instance_id` 和 `hit_group_contribution` 超过 24 位时返回契约错误。
    pub fn new(
        transform: Transform3x4,
        instance_id: u32,
        mask: u8,
        hit_group_contribution: u32,
        flags: InstanceFlags,
        blas_address: GpuVirtualAddress,
    ) -> Result<Self> {
        if instance_id > INSTANCE_FIELD_MAX || hit_group_contribution > INSTANCE_FIELD_MAX {
            return Err(RaytracingError::ContractViolation(format!(
                "Instance id {} / hit group contribution {} exceed 24 bits",
                instance_id, hit_group_contribution
            )).into());
        }
        if !is_aligned(blas_address, ACCELERATION_STRUCTURE_ALIGNMENT) {
            return Err(RaytracingError::ContractViolation(format!(
                "BLAS address {:#x} is not 256-byte aligned", blas_address
            )).into());
        }

        Ok(Self {
            transform,
            instance_id_and_mask: instance_id | (mask as u32) << 24,
            contribution_and_flags: hit_group_contribution | (flags.bits() as u32) << 24,
            acceleration_structure: blas_address,
        })
    }

    pub fn instance_id(&self) -> u32 {
        self.instance_id_and_mask & INSTANCE_FIELD_MAX
    }

    pub fn instance_mask(&self) -> u8 {
        (self.instance_id_and_mask >> 24) as u8
    }

    pub fn hit_group_contribution(&self) -> u32 {
        self.contribution_and_flags & INSTANCE_FIELD_MAX
    }

    pub fn flags(&self) -> InstanceFlags {
        InstanceFlags((self.contribution_and_flags >> 24) as u8)
    }

    pub fn blas_address(&self) -> GpuVirtualAddress {
        self.acceleration_structure
    }
}

/// 已构建的加速结构
pub struct AccelerationStructure<D: RaytracingDevice> {
    kind: AccelerationStructureKind,
    result: D::Buffer,
    scratch: D::Buffer,
    prebuild: PrebuildInfo,
    inputs: AccelerationStructureInputs,
    /// BLAS 的几何体缓冲区，重建时仍要读取
    geometry_buffers: Vec<D::Buffer>,
    /// TLAS 的实例描述符缓冲区（上传堆）
    instance_buffer: Option<D::Buffer>,
}

impl<D: RaytracingDevice> AccelerationStructure<D> {
    pub fn kind(&self) -> AccelerationStructureKind {
        self.kind
    }

    /// 结果缓冲区的 GPU 地址，TLAS 实例和 SRV 都通过它引用
    pub fn gpu_address(&self) -> GpuVirtualAddress {
        self.result.gpu_address()
    }

    pub fn result_buffer(&self) -> &D::Buffer {
        &self.result
    }

    pub fn scratch_buffer(&self) -> &D::Buffer {
        &self.scratch
    }

    pub fn instance_buffer(&self) -> Option<&D::Buffer> {
        self.instance_buffer.as_ref()
    }

    pub fn prebuild_info(&self) -> PrebuildInfo {
        self.prebuild
    }

    pub fn inputs(&self) -> &AccelerationStructureInputs {
        &self.inputs
    }

    /// 用于写入描述符堆的 SRV
    pub fn view(&self) -> ResourceView<'_, D::Buffer> {
        ResourceView::AccelerationStructure(self.gpu_address())
    }

    /// 新输入能否原地重建（结果缓冲区地址不变）
    pub fn fits(&self, device: &D, inputs: &AccelerationStructureInputs) -> Result<bool> {
        let prebuild = query_prebuild_info(device, inputs)?;
        Ok(inputs.kind() == self.kind && prebuild.result_data_max_size <= self.result.size())
    }

    /// 用新的输入重建
    ///
    /// 新输入放得下时复用结果缓冲区，GPU 地址不变；否则重新分配。
    /// 返回地址是否发生变化。
    pub fn rebuild(&mut self, device: &D, inputs: AccelerationStructureInputs) -> Result<bool> {
        if inputs.kind() != self.kind {
            return Err(RaytracingError::ContractViolation(format!(
                "Cannot rebuild a {:?} structure from {:?} inputs", self.kind, inputs.kind()
            )).into());
        }
        inputs.validate()?;
        let prebuild = query_prebuild_info(device, &inputs)?;

        let reallocated = prebuild.result_data_max_size > self.result.size();
        if reallocated {
            self.result = device.create_buffer(
                &BufferDesc::acceleration_structure(prebuild.result_data_max_size)
                    .with_name(self.result.name().to_string()),
            )?;
        }
        if prebuild.scratch_data_size > self.scratch.size() {
            self.scratch = device.create_buffer(
                &BufferDesc::scratch(prebuild.scratch_data_size).with_name(self.scratch.name().to_string()),
            )?;
        }

        record_and_run_build(device, &inputs, &self.result, &self.scratch)?;
        tracing::debug!(
            kind = ?self.kind,
            address = self.gpu_address(),
            reallocated,
            "Acceleration structure rebuilt"
        );

        self.prebuild = prebuild;
        self.inputs = inputs;
        Ok(reallocated)
    }

    /// 替换 BLAS 的几何体后重建
    pub fn rebuild_geometry(
        &mut self,
        device: &D,
        geometries: Vec<GeometryDesc>,
        geometry_buffers: Vec<D::Buffer>,
    ) -> Result<bool> {
        let flags = self.inputs.flags();
        let reallocated = self.rebuild(device, AccelerationStructureInputs::BottomLevel { flags, geometries })?;
        self.geometry_buffers = geometry_buffers;
        Ok(reallocated)
    }

    /// 写入新的实例数组后重建 TLAS
    ///
    /// 实例数不超过现有实例缓冲区容量时原地覆盖；结果缓冲区只在
    /// prebuild 大小增长时重新分配。
    pub fn update_instances(&mut self, device: &D, instances: &[RaytracingInstanceDesc]) -> Result<bool> {
        if self.kind != AccelerationStructureKind::TopLevel {
            return Err(RaytracingError::ContractViolation(
                "Instances can only be written to a top-level structure".to_string(),
            ).into());
        }

        let instance_buffer = write_instances(device, self.instance_buffer.take(), instances)?;
        let inputs = AccelerationStructureInputs::TopLevel {
            flags: self.inputs.flags(),
            instance_descs: instance_buffer.gpu_address(),
            instance_count: instances.len() as u32,
        };
        self.instance_buffer = Some(instance_buffer);
        self.rebuild(device, inputs)
    }
}

fn query_prebuild_info<D: RaytracingDevice>(device: &D, inputs: &AccelerationStructureInputs) -> Result<PrebuildInfo> {
    let prebuild = device.acceleration_structure_prebuild_info(inputs)?;
    if prebuild.result_data_max_size == 0 {
        return Err(RaytracingError::PrebuildInfo(format!(
            "{} reported a zero-sized {:?} structure",
            device.backend_name(),
            inputs.kind()
        )).into());
    }
    for size in [prebuild.result_data_max_size, prebuild.scratch_data_size, prebuild.update_scratch_data_size] {
        if checked_align_up(size, ACCELERATION_STRUCTURE_ALIGNMENT).is_none() {
            return Err(RaytracingError::PrebuildInfo(format!(
                "{} reported {} bytes for a {:?} structure, which cannot be allocated",
                device.backend_name(),
                size,
                inputs.kind()
            )).into());
        }
    }
    Ok(prebuild)
}

fn record_and_run_build<D: RaytracingDevice>(
    device: &D,
    inputs: &AccelerationStructureInputs,
    result: &D::Buffer,
    scratch: &D::Buffer,
) -> Result<()> {
    run_synchronously(device, |list| {
        list.build_acceleration_structure(inputs, result, scratch)?;
        list.uav_barrier(result)
    })
}

/// 把实例数组写入上传堆缓冲区，容量足够时复用 `existing`
fn write_instances<D: RaytracingDevice>(
    device: &D,
    existing: Option<D::Buffer>,
    instances: &[RaytracingInstanceDesc],
) -> Result<D::Buffer> {
    let bytes: &[u8] = bytemuck::cast_slice(instances);
    match existing {
        Some(buffer) if !bytes.is_empty() && buffer.size() >= bytes.len() as u64 => {
            device.write_buffer(&buffer, 0, bytes)?;
            Ok(buffer)
        }
        Some(buffer) if bytes.is_empty() => Ok(buffer),
        _ if bytes.is_empty() => {
            // 空 TLAS 也需要一个合法的实例地址
            create_upload_buffer(device, &[RaytracingInstanceDesc::zeroed()], "TLAS instances")
        }
        _ => create_upload_buffer(device, instances, "TLAS instances"),
    }
}

/// 按输入分配缓冲区并同步构建
pub fn build_acceleration_structure<D: RaytracingDevice>(
    device: &D,
    inputs: AccelerationStructureInputs,
    name: &str,
) -> Result<AccelerationStructure<D>> {
    inputs.validate()?;
    let prebuild = query_prebuild_info(device, &inputs)?;

    let result = device.create_buffer(
        &BufferDesc::acceleration_structure(prebuild.result_data_max_size).with_name(name),
    )?;
    let scratch = device.create_buffer(
        &BufferDesc::scratch(prebuild.scratch_data_size).with_name(format!("{} (scratch)", name)),
    )?;

    record_and_run_build(device, &inputs, &result, &scratch)?;

    tracing::debug!(
        name,
        kind = ?inputs.kind(),
        descriptors = inputs.descriptor_count(),
        primitives = inputs.primitive_count(),
        result_size = result.size(),
        scratch_size = scratch.size(),
        address = result.gpu_address(),
        "Acceleration structure built"
    );

    Ok(AccelerationStructure {
        kind: inputs.kind(),
        result,
        scratch,
        prebuild,
        inputs,
        geometry_buffers: Vec::new(),
        instance_buffer: None,
    })
}

/// 由几何体描述构建 BLAS
///
/// 几何体引用的缓冲区由调用者保证在构建期间有效。
pub fn build_blas<D: RaytracingDevice>(device: &D, geometries: Vec<GeometryDesc>) -> Result<AccelerationStructure<D>> {
    build_acceleration_structure(
        device,
        AccelerationStructureInputs::BottomLevel {
            flags: BuildFlags::PREFER_FAST_TRACE,
            geometries,
        },
        "BLAS",
    )
}

/// 由实例数组构建 TLAS
pub fn build_tlas<D: RaytracingDevice>(
    device: &D,
    instances: &[RaytracingInstanceDesc],
) -> Result<AccelerationStructure<D>> {
    let instance_buffer = write_instances(device, None, instances)?;
    let mut tlas = build_acceleration_structure(
        device,
        AccelerationStructureInputs::TopLevel {
            flags: BuildFlags::PREFER_FAST_TRACE | BuildFlags::ALLOW_UPDATE,
            instance_descs: instance_buffer.gpu_address(),
            instance_count: instances.len() as u32,
        },
        "TLAS",
    )?;
    tlas.instance_buffer = Some(instance_buffer);
    Ok(tlas)
}

/// 索引数据
#[derive(Debug, Clone, Copy)]
pub enum Indices<'a> {
    None,
    U16(&'a [u16]),
    U32(&'a [u32]),
}

impl<'a> Indices<'a> {
    pub fn format(&self) -> Format {
        match self {
            Indices::None => Format::Unknown,
            Indices::U16(_) => Format::R16Uint,
            Indices::U32(_) => Format::R32Uint,
        }
    }

    pub fn count(&self) -> u32 {
        match self {
            Indices::None => 0,
            Indices::U16(i) => i.len() as u32,
            Indices::U32(i) => i.len() as u32,
        }
    }
}

/// 上传顶点和索引，构建单几何体三角形 BLAS
///
/// `V` 是完整的顶点结构，位置必须位于开头，格式由 `vertex_format` 描述。
pub fn build_blas_from_triangles<D, V>(
    device: &D,
    vertices: &[V],
    vertex_format: Format,
    indices: Indices<'_>,
) -> Result<AccelerationStructure<D>>
where
    D: RaytracingDevice,
    V: Pod,
{
    let vertex_buffer = upload_buffer(device, vertices, ResourceState::NonPixelShaderResource, "BLAS vertices")?;
    let index_buffer = match indices {
        Indices::None => None,
        Indices::U16(data) => Some(upload_buffer(device, data, ResourceState::NonPixelShaderResource, "BLAS indices")?),
        Indices::U32(data) => Some(upload_buffer(device, data, ResourceState::NonPixelShaderResource, "BLAS indices")?),
    };

    let geometry = GeometryDesc {
        opaque: true,
        data: GeometryData::Triangles(TriangleGeometry {
            vertex_buffer: vertex_buffer.gpu_address(),
            vertex_stride: std::mem::size_of::<V>() as u64,
            vertex_count: vertices.len() as u32,
            vertex_format,
            index_buffer: index_buffer.as_ref().map_or(0, |b| b.gpu_address()),
            index_count: indices.count(),
            index_format: indices.format(),
            transform: 0,
        }),
    };

    let mut blas = build_blas(device, vec![geometry])?;
    blas.geometry_buffers.push(vertex_buffer);
    blas.geometry_buffers.extend(index_buffer);
    Ok(blas)
}

/// 上传 AABB 数组，构建单几何体程序化 BLAS
pub fn build_blas_from_aabb<D: RaytracingDevice>(device: &D, aabbs: &[Aabb]) -> Result<AccelerationStructure<D>> {
    let aabb_buffer = upload_buffer(device, aabbs, ResourceState::NonPixelShaderResource, "BLAS AABBs")?;

    let geometry = GeometryDesc {
        opaque: true,
        data: GeometryData::Aabbs(AabbGeometry {
            aabb_buffer: aabb_buffer.gpu_address(),
            stride: AABB_SIZE,
            count: aabbs.len() as u32,
        }),
    };

    let mut blas = build_blas(device, vec![geometry])?;
    blas.geometry_buffers.push(aabb_buffer);
    Ok(blas)
}

/// BLAS 句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlasHandle {
    index: u32,
    generation: u32,
}

/// TLAS 句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TlasHandle {
    index: u32,
    generation: u32,
}

/// 引用 BLAS 句柄的实例描述
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceDesc {
    pub blas: BlasHandle,
    pub transform: Transform3x4,
    pub instance_id: u32,
    pub mask: u8,
    pub hit_group_index: u32,
    pub flags: InstanceFlags,
}

impl InstanceDesc {
    pub fn new(blas: BlasHandle, transform: Transform3x4) -> Self {
        Self {
            blas,
            transform,
            instance_id: 0,
            mask: 0xFF,
            hit_group_index: 0,
            flags: InstanceFlags::NONE,
        }
    }

    pub fn with_instance_id(mut self, instance_id: u32) -> Self {
        self.instance_id = instance_id;
        self
    }

    pub fn with_hit_group_index(mut self, hit_group_index: u32) -> Self {
        self.hit_group_index = hit_group_index;
        self
    }

    pub fn with_mask(mut self, mask: u8) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_flags(mut self, flags: InstanceFlags) -> Self {
        self.flags = flags;
        self
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// 带代数检查的槽位数组
struct SlotArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> SlotArena<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, value: T) -> (u32, u32) {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return (index, slot.generation);
        }
        self.slots.push(Slot { generation: 0, value: Some(value) });
        ((self.slots.len() - 1) as u32, 0)
    }

    fn get(&self, index: u32, generation: u32) -> Option<&T> {
        self.slots
            .get(index as usize)
            .filter(|s| s.generation == generation)
            .and_then(|s| s.value.as_ref())
    }

    fn get_mut(&mut self, index: u32, generation: u32) -> Option<&mut T> {
        self.slots
            .get_mut(index as usize)
            .filter(|s| s.generation == generation)
            .and_then(|s| s.value.as_mut())
    }

    fn remove(&mut self, index: u32, generation: u32) -> Option<T> {
        let slot = self.slots.get_mut(index as usize).filter(|s| s.generation == generation)?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        Some(value)
    }

    fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.value.is_some()).count()
    }
}

struct BlasEntry<D: RaytracingDevice> {
    structure: AccelerationStructure<D>,
    /// 引用它的 TLAS 数量
    references: u32,
}

struct TlasEntry<D: RaytracingDevice> {
    structure: AccelerationStructure<D>,
    /// 去重后的 BLAS 引用
    blas: Vec<BlasHandle>,
}

/// 加速结构集合
///
/// TLAS 通过句柄引用 BLAS，每个 TLAS 对它引用的每个 BLAS 计一次引用。
/// 仍被引用的 BLAS 不能移除，也不能重建到新地址。
pub struct AccelerationStructureArena<D: RaytracingDevice> {
    blas: SlotArena<BlasEntry<D>>,
    tlas: SlotArena<TlasEntry<D>>,
}

impl<D: RaytracingDevice> AccelerationStructureArena<D> {
    pub fn new() -> Self {
        Self {
            blas: SlotArena::new(),
            tlas: SlotArena::new(),
        }
    }

    /// 接管一个已构建的 BLAS
    pub fn insert_blas(&mut self, structure: AccelerationStructure<D>) -> Result<BlasHandle> {
        if structure.kind() != AccelerationStructureKind::BottomLevel {
            return Err(RaytracingError::ContractViolation(
                "Only bottom-level structures can be inserted as BLAS".to_string(),
            ).into());
        }
        let (index, generation) = self.blas.insert(BlasEntry { structure, references: 0 });
        Ok(BlasHandle { index, generation })
    }

    fn blas_entry(&self, handle: BlasHandle) -> Result<&BlasEntry<D>> {
        self.blas
            .get(handle.index, handle.generation)
            .ok_or_else(|| RaytracingError::StaleHandle(format!("{:?}", handle)).into())
    }

    fn tlas_entry(&self, handle: TlasHandle) -> Result<&TlasEntry<D>> {
        self.tlas
            .get(handle.index, handle.generation)
            .ok_or_else(|| RaytracingError::StaleHandle(format!("{:?}", handle)).into())
    }

    pub fn blas(&self, handle: BlasHandle) -> Result<&AccelerationStructure<D>> {
        Ok(&self.blas_entry(handle)?.structure)
    }

    pub fn tlas(&self, handle: TlasHandle) -> Result<&AccelerationStructure<D>> {
        Ok(&self.tlas_entry(handle)?.structure)
    }

    /// 引用该 BLAS 的 TLAS 数量
    pub fn blas_references(&self, handle: BlasHandle) -> Result<u32> {
        Ok(self.blas_entry(handle)?.references)
    }

    pub fn blas_count(&self) -> usize {
        self.blas.len()
    }

    pub fn tlas_count(&self) -> usize {
        self.tlas.len()
    }

    fn resolve_instances(&self, instances: &[InstanceDesc]) -> Result<(Vec<RaytracingInstanceDesc>, Vec<BlasHandle>)> {
        let mut resolved = Vec::with_capacity(instances.len());
        let mut referenced: Vec<BlasHandle> = Vec::new();

        for instance in instances {
            let blas = self.blas(instance.blas)?;
            resolved.push(RaytracingInstanceDesc::new(
                instance.transform,
                instance.instance_id,
                instance.mask,
                instance.hit_group_index,
                instance.flags,
                blas.gpu_address(),
            )?);
            if !referenced.contains(&instance.blas) {
                referenced.push(instance.blas);
            }
        }

        Ok((resolved, referenced))
    }

    fn adjust_references(&mut self, handles: &[BlasHandle], increment: bool) {
        for handle in handles {
            if let Some(entry) = self.blas.get_mut(handle.index, handle.generation) {
                if increment {
                    entry.references += 1;
                } else {
                    entry.references = entry.references.saturating_sub(1);
                }
            }
        }
    }

    /// 由引用 BLAS 句柄的实例构建 TLAS
    pub fn build_tlas(&mut self, device: &D, instances: &[InstanceDesc]) -> Result<TlasHandle> {
        let (resolved, referenced) = self.resolve_instances(instances)?;
        let structure = build_tlas(device, &resolved)?;

        self.adjust_references(&referenced, true);
        let (index, generation) = self.tlas.insert(TlasEntry { structure, blas: referenced });
        Ok(TlasHandle { index, generation })
    }

    /// 用新的实例数组重建 TLAS，引用计数随之转移
    ///
    /// 返回 `true` 表示结果缓冲区被重新分配：TLAS 的 GPU 地址已经改变，
    /// 调用方必须重写引用它的 SRV。
    pub fn rebuild_tlas(&mut self, device: &D, handle: TlasHandle, instances: &[InstanceDesc]) -> Result<bool> {
        let (resolved, referenced) = self.resolve_instances(instances)?;

        let entry = self
            .tlas
            .get_mut(handle.index, handle.generation)
            .ok_or_else(|| RaytracingError::StaleHandle(format!("{:?}", handle)))?;
        let reallocated = entry.structure.update_instances(device, &resolved)?;
        let previous = std::mem::replace(&mut entry.blas, referenced.clone());

        self.adjust_references(&referenced, true);
        self.adjust_references(&previous, false);
        Ok(reallocated)
    }

    /// 移除 TLAS，释放它对 BLAS 的引用
    pub fn remove_tlas(&mut self, handle: TlasHandle) -> Result<AccelerationStructure<D>> {
        let entry = self
            .tlas
            .remove(handle.index, handle.generation)
            .ok_or_else(|| RaytracingError::StaleHandle(format!("{:?}", handle)))?;
        self.adjust_references(&entry.blas, false);
        Ok(entry.structure)
    }

    /// 移除 BLAS；仍被 TLAS 引用时返回 `StructureInUse`
    pub fn remove_blas(&mut self, handle: BlasHandle) -> Result<AccelerationStructure<D>> {
        let references = self.blas_references(handle)?;
        if references > 0 {
            return Err(RaytracingError::StructureInUse {
                handle: format!("{:?}", handle),
                references,
            }.into());
        }
        self.blas
            .remove(handle.index, handle.generation)
            .map(|entry| entry.structure)
            .ok_or_else(|| RaytracingError::StaleHandle(format!("{:?}", handle)).into())
    }

    /// 重建 BLAS
    ///
    /// 被引用的 BLAS 只能原地重建，否则已有 TLAS 会指向失效的地址。
    /// 返回结果缓冲区是否被重新分配。
    pub fn rebuild_blas(
        &mut self,
        device: &D,
        handle: BlasHandle,
        geometries: Vec<GeometryDesc>,
        geometry_buffers: Vec<D::Buffer>,
    ) -> Result<bool> {
        let references = self.blas_references(handle)?;
        let inputs = AccelerationStructureInputs::BottomLevel {
            flags: self.blas(handle)?.inputs().flags(),
            geometries,
        };
        inputs.validate()?;
        if references > 0 && !self.blas(handle)?.fits(device, &inputs)? {
            return Err(RaytracingError::StructureInUse {
                handle: format!("{:?}", handle),
                references,
            }.into());
        }

        let geometries = match inputs {
            AccelerationStructureInputs::BottomLevel { geometries, .. } => geometries,
            AccelerationStructureInputs::TopLevel { .. } => Vec::new(),
        };
        let entry = self
            .blas
            .get_mut(handle.index, handle.generation)
            .ok_or_else(|| RaytracingError::StaleHandle(format!("{:?}", handle)))?;
        entry.structure.rebuild_geometry(device, geometries, geometry_buffers)
    }
}

impl<D: RaytracingDevice> Default for AccelerationStructureArena<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::HeadlessDevice;
    use crate::math::matrix;
    use crate::renderer::align::{is_aligned, INSTANCE_DESC_SIZE};

    const TRIANGLE: [[f32; 3]; 3] = [[0.0, 1.0, 0.0], [0.866, -0.5, 0.0], [-0.866, -0.5, 0.0]];

    fn triangle_blas(device: &HeadlessDevice) -> AccelerationStructure<HeadlessDevice> {
        build_blas_from_triangles(device, &TRIANGLE, Format::R32G32B32Float, Indices::None).unwrap()
    }

    #[test]
    fn test_instance_desc_layout() {
        assert_eq!(std::mem::size_of::<RaytracingInstanceDesc>() as u64, INSTANCE_DESC_SIZE);
        assert_eq!(std::mem::size_of::<Aabb>() as u64, AABB_SIZE);

        let desc = RaytracingInstanceDesc::new(
            Transform3x4::IDENTITY,
            0x00AB_CDEF,
            0x7F,
            0x0012_3456,
            InstanceFlags::FORCE_OPAQUE,
            0x1_0000,
        )
        .unwrap();

        let bytes = bytemuck::bytes_of(&desc);
        let words: &[u32] = bytemuck::cast_slice(&bytes[48..56]);
        assert_eq!(words[0], 0x7FAB_CDEF);
        assert_eq!(words[1], 0x0412_3456);
        assert_eq!(u64::from_le_bytes(bytes[56..64].try_into().unwrap()), 0x1_0000);

        assert_eq!(desc.instance_id(), 0x00AB_CDEF);
        assert_eq!(desc.instance_mask(), 0x7F);
        assert_eq!(desc.hit_group_contribution(), 0x0012_3456);
        assert_eq!(desc.flags(), InstanceFlags::FORCE_OPAQUE);
    }

    #[test]
    fn test_instance_fields_overflow() {
        let too_big = RaytracingInstanceDesc::new(Transform3x4::IDENTITY, 1 << 24, 0xFF, 0, InstanceFlags::NONE, 0);
        assert!(too_big.is_err());

        let unaligned = RaytracingInstanceDesc::new(Transform3x4::IDENTITY, 0, 0xFF, 0, InstanceFlags::NONE, 0x80);
        assert!(unaligned.is_err());
    }

    #[test]
    fn test_single_triangle_blas() {
        let device = HeadlessDevice::new();
        let blas = triangle_blas(&device);

        let prebuild = blas.prebuild_info();
        assert_eq!(blas.kind(), AccelerationStructureKind::BottomLevel);
        assert!(blas.result_buffer().size() >= prebuild.result_data_max_size);
        assert!(blas.scratch_buffer().size() >= prebuild.scratch_data_size);
        assert!(is_aligned(blas.result_buffer().size(), 256));
        assert!(is_aligned(blas.scratch_buffer().size(), 256));
        assert!(is_aligned(blas.gpu_address(), 256));
        assert_eq!(blas.inputs().primitive_count(), 1);
        assert_eq!(device.built_structure_kind(blas.gpu_address()), Some(AccelerationStructureKind::BottomLevel));
    }

    #[test]
    fn test_indexed_triangles() {
        let device = HeadlessDevice::new();
        let quad: [[f32; 3]; 4] = [[-1.0, -1.0, 0.0], [1.0, -1.0, 0.0], [1.0, 1.0, 0.0], [-1.0, 1.0, 0.0]];
        let indices: [u16; 6] = [0, 1, 2, 0, 2, 3];

        let blas = build_blas_from_triangles(&device, &quad, Format::R32G32B32Float, Indices::U16(&indices)).unwrap();
        assert_eq!(blas.inputs().primitive_count(), 2);

        let bad_indices: [u32; 4] = [0, 1, 2, 3];
        assert!(build_blas_from_triangles(&device, &quad, Format::R32G32B32Float, Indices::U32(&bad_indices)).is_err());
    }

    #[test]
    fn test_mixed_geometry_rejected() {
        let device = HeadlessDevice::new();
        let triangles = GeometryDesc {
            opaque: true,
            data: GeometryData::Triangles(TriangleGeometry {
                vertex_buffer: 0x1000,
                vertex_stride: 12,
                vertex_count: 3,
                vertex_format: Format::R32G32B32Float,
                index_buffer: 0,
                index_count: 0,
                index_format: Format::Unknown,
                transform: 0,
            }),
        };
        let aabbs = GeometryDesc {
            opaque: true,
            data: GeometryData::Aabbs(AabbGeometry { aabb_buffer: 0x2000, stride: 24, count: 1 }),
        };

        let err = build_blas(&device, vec![triangles, aabbs]).err().unwrap();
        assert!(matches!(err, crate::core::GalleryError::Raytracing(RaytracingError::MixedGeometry)));
        assert!(build_blas(&device, Vec::new()).is_err());
    }

    #[test]
    fn test_blas_address_stable_across_unrelated_builds() {
        let device = HeadlessDevice::new();
        let first = triangle_blas(&device);
        let address = first.gpu_address();

        let _second = triangle_blas(&device);
        let _third = build_blas_from_aabb(&device, &[Aabb::unit()]).unwrap();

        assert_eq!(first.gpu_address(), address);
        assert_ne!(_second.gpu_address(), address);
    }

    #[test]
    fn test_four_instance_tlas() {
        let device = HeadlessDevice::new();
        let blas = triangle_blas(&device);

        let instances: Vec<RaytracingInstanceDesc> = (0..4u32)
            .map(|i| {
                RaytracingInstanceDesc::new(
                    Transform3x4::from_matrix(&matrix::translation(i as f32 * 2.0, 0.0, 0.0)),
                    i,
                    0xFF,
                    i,
                    InstanceFlags::NONE,
                    blas.gpu_address(),
                )
                .unwrap()
            })
            .collect();

        let tlas = build_tlas(&device, &instances).unwrap();
        assert_eq!(tlas.inputs().descriptor_count(), 4);
        assert_eq!(device.last_prebuild_query(), Some((AccelerationStructureKind::TopLevel, 4)));

        let stored = device.read_buffer(tlas.instance_buffer().unwrap(), 0, 4 * INSTANCE_DESC_SIZE).unwrap();
        let stored: &[RaytracingInstanceDesc] = bytemuck::cast_slice(&stored);
        let groups: Vec<u32> = stored.iter().map(|d| d.hit_group_contribution()).collect();
        assert_eq!(groups, vec![0, 1, 2, 3]);
        assert_eq!(device.referenced_blas(tlas.gpu_address()), vec![blas.gpu_address(); 4]);
    }

    #[test]
    fn test_tlas_update_keeps_address() {
        let device = HeadlessDevice::new();
        let blas = triangle_blas(&device);
        let make = |count: u32| -> Vec<RaytracingInstanceDesc> {
            (0..count)
                .map(|i| {
                    RaytracingInstanceDesc::new(Transform3x4::IDENTITY, i, 0xFF, 0, InstanceFlags::NONE, blas.gpu_address())
                        .unwrap()
                })
                .collect()
        };

        let mut tlas = build_tlas(&device, &make(4)).unwrap();
        let address = tlas.gpu_address();

        assert!(!tlas.update_instances(&device, &make(2)).unwrap());
        assert_eq!(tlas.gpu_address(), address);

        // 实例数增长到放不下时重新分配
        assert!(tlas.update_instances(&device, &make(64)).unwrap());
        assert_eq!(tlas.inputs().descriptor_count(), 64);
    }

    #[test]
    fn test_arena_reference_counting() {
        let device = HeadlessDevice::new();
        let mut arena = AccelerationStructureArena::new();
        let blas = arena.insert_blas(triangle_blas(&device)).unwrap();

        let instances = [
            InstanceDesc::new(blas, Transform3x4::IDENTITY),
            InstanceDesc::new(blas, Transform3x4::IDENTITY).with_hit_group_index(1),
        ];
        let tlas = arena.build_tlas(&device, &instances).unwrap();
        assert_eq!(arena.blas_references(blas).unwrap(), 1);

        let err = arena.remove_blas(blas).err().unwrap();
        assert!(err.to_string().contains("still referenced"));

        arena.remove_tlas(tlas).unwrap();
        assert_eq!(arena.blas_references(blas).unwrap(), 0);
        assert!(arena.tlas(tlas).is_err());

        arena.remove_blas(blas).unwrap();
        assert!(arena.blas(blas).is_err());
        assert_eq!(arena.blas_count(), 0);
    }

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let device = HeadlessDevice::new();
        let mut arena = AccelerationStructureArena::new();

        let old = arena.insert_blas(triangle_blas(&device)).unwrap();
        arena.remove_blas(old).unwrap();
        let new = arena.insert_blas(triangle_blas(&device)).unwrap();

        assert!(arena.blas(new).is_ok());
        let err = arena.blas(old).err().unwrap();
        assert!(err.to_string().contains("Stale handle"));

        let instances = [InstanceDesc::new(old, Transform3x4::IDENTITY)];
        assert!(arena.build_tlas(&device, &instances).is_err());
    }

    #[test]
    fn test_arena_rebuild_moves_references() {
        let device = HeadlessDevice::new();
        let mut arena = AccelerationStructureArena::new();
        let a = arena.insert_blas(triangle_blas(&device)).unwrap();
        let b = arena.insert_blas(build_blas_from_aabb(&device, &[Aabb::unit()]).unwrap()).unwrap();

        let tlas = arena.build_tlas(&device, &[InstanceDesc::new(a, Transform3x4::IDENTITY)]).unwrap();
        assert!(!arena.rebuild_tlas(&device, tlas, &[InstanceDesc::new(b, Transform3x4::IDENTITY)]).unwrap());

        assert_eq!(arena.blas_references(a).unwrap(), 0);
        assert_eq!(arena.blas_references(b).unwrap(), 1);
        assert!(arena.insert_blas(build_tlas(&device, &[]).unwrap()).is_err());
    }

    #[test]
    fn test_arena_rebuild_reports_moved_tlas() {
        let device = HeadlessDevice::new();
        let mut arena = AccelerationStructureArena::new();
        let blas = arena.insert_blas(triangle_blas(&device)).unwrap();

        let tlas = arena.build_tlas(&device, &[InstanceDesc::new(blas, Transform3x4::IDENTITY)]).unwrap();
        let old_address = arena.tlas(tlas).unwrap().gpu_address();

        let grown: Vec<InstanceDesc> = (0..64)
            .map(|i| InstanceDesc::new(blas, Transform3x4::IDENTITY).with_instance_id(i))
            .collect();
        assert!(arena.rebuild_tlas(&device, tlas, &grown).unwrap());

        let new_address = arena.tlas(tlas).unwrap().gpu_address();
        assert_ne!(new_address, old_address);
        assert_eq!(device.built_structure_kind(new_address), Some(AccelerationStructureKind::TopLevel));
        // 旧结果缓冲区已释放
        assert_eq!(device.built_structure_kind(old_address), None);
    }
}
