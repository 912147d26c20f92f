//! 着色器绑定表（SBT）
//!
//! 每条记录的前 32 字节是着色器标识符，其后是原始的局部根参数。
//! 记录步长为 `align_up(32 + 参数数 * 8, 32)`；光线生成、未命中、命中组
//! 三个分区各自是一张同构的表，起点对齐到 64 字节。
//!
//! `SbtHelper` 描述单个分区，`ShaderTableLayout` 把三个分区排在一起，
//! 是所有偏移计算的唯一来源。`ShaderTableBuilder` 按布局写出字节并上传，
//! 每帧可以重写。

use crate::core::error::{RaytracingError, Result};
use super::align::{
    align_up, is_aligned, DESCRIPTOR_HANDLE_SIZE, SHADER_IDENTIFIER_SIZE, SHADER_RECORD_ALIGNMENT,
    SHADER_TABLE_ALIGNMENT,
};
use super::descriptor::GpuDescriptorHandle;
use super::device::RaytracingDevice;
use super::pipeline::{ExportKind, RaytracingPipeline, ShaderExport};
use super::resource::{BufferDesc, GpuBuffer, GpuVirtualAddress};
use super::root_signature::RootParameter;

/// 单个同构着色器表的布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbtHelper {
    count_shaders: u32,
    count_inline_arguments: u32,
    entry_size: u64,
}

impl SbtHelper {
    /// `count_inline_arguments` 以 8 字节（一个描述符句柄）为单位
    pub fn new(count_shaders: u32, count_inline_arguments: u32) -> Self {
        let entry_size = align_up(
            SHADER_IDENTIFIER_SIZE + count_inline_arguments as u64 * DESCRIPTOR_HANDLE_SIZE,
            SHADER_RECORD_ALIGNMENT,
        );
        Self {
            count_shaders,
            count_inline_arguments,
            entry_size,
        }
    }

    pub fn count_shaders(&self) -> u32 {
        self.count_shaders
    }

    pub fn count_inline_arguments(&self) -> u32 {
        self.count_inline_arguments
    }

    /// 记录步长
    pub fn entry_size(&self) -> u64 {
        self.entry_size
    }

    pub fn table_size(&self) -> u64 {
        self.entry_size * self.count_shaders as u64
    }

    /// 第 `i` 条记录的标识符偏移
    pub fn identifier_offset(&self, i: u32) -> u64 {
        debug_assert!(i < self.count_shaders, "shader index {} out of range", i);
        self.entry_size * i as u64
    }

    /// 第 `i` 条记录局部参数的起始偏移
    pub fn root_argument_base_offset(&self, i: u32) -> u64 {
        self.identifier_offset(i) + SHADER_IDENTIFIER_SIZE
    }

    /// 第 `i` 条记录第 `j` 个参数的偏移
    pub fn root_argument_offset(&self, i: u32, j: u32) -> u64 {
        debug_assert!(j < self.count_inline_arguments, "argument index {} out of range", j);
        self.root_argument_base_offset(i) + j as u64 * DESCRIPTOR_HANDLE_SIZE
    }
}

/// 着色器表分区
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderTableSection {
    RayGeneration,
    Miss,
    HitGroup,
}

impl ShaderTableSection {
    pub const ALL: [ShaderTableSection; 3] = [
        ShaderTableSection::RayGeneration,
        ShaderTableSection::Miss,
        ShaderTableSection::HitGroup,
    ];

    fn index(self) -> usize {
        match self {
            ShaderTableSection::RayGeneration => 0,
            ShaderTableSection::Miss => 1,
            ShaderTableSection::HitGroup => 2,
        }
    }

    /// 该分区接受的导出种类
    pub fn accepts(self, kind: ExportKind) -> bool {
        match self {
            ShaderTableSection::RayGeneration | ShaderTableSection::Miss => kind == ExportKind::Shader,
            ShaderTableSection::HitGroup => kind == ExportKind::HitGroup,
        }
    }
}

/// 分区着色器表布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderTableLayout {
    sections: [SbtHelper; 3],
    offsets: [u64; 3],
    total_size: u64,
}

impl ShaderTableLayout {
    /// 三个分区共享同一个局部参数数量（以 8 字节为单位）
    pub fn new(ray_generation: u32, miss: u32, hit_group: u32, count_inline_arguments: u32) -> Self {
        let sections = [
            SbtHelper::new(ray_generation, count_inline_arguments),
            SbtHelper::new(miss, count_inline_arguments),
            SbtHelper::new(hit_group, count_inline_arguments),
        ];

        let mut offsets = [0u64; 3];
        let mut cursor = 0u64;
        for (offset, section) in offsets.iter_mut().zip(sections.iter()) {
            *offset = align_up(cursor, SHADER_TABLE_ALIGNMENT);
            cursor = *offset + section.table_size();
        }

        Self {
            sections,
            offsets,
            total_size: cursor,
        }
    }

    pub fn section(&self, section: ShaderTableSection) -> &SbtHelper {
        &self.sections[section.index()]
    }

    /// 分区起点相对表起点的偏移，总是 64 字节对齐
    pub fn section_offset(&self, section: ShaderTableSection) -> u64 {
        self.offsets[section.index()]
    }

    pub fn record_offset(&self, section: ShaderTableSection, i: u32) -> u64 {
        self.section_offset(section) + self.section(section).identifier_offset(i)
    }

    pub fn argument_offset(&self, section: ShaderTableSection, i: u32, j: u32) -> u64 {
        self.section_offset(section) + self.section(section).root_argument_offset(i, j)
    }

    /// 每条记录可用于局部参数的字节数
    pub fn argument_capacity(&self) -> u64 {
        self.sections[0].entry_size() - SHADER_IDENTIFIER_SIZE
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }
}

/// 写入着色器记录的局部根参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootArgument {
    /// 描述符表基址
    DescriptorTable(GpuDescriptorHandle),
    /// 内联 32 位常量
    Constants(Vec<u32>),
    /// 根描述符 GPU 地址
    GpuAddress(GpuVirtualAddress),
}

impl RootArgument {
    fn alignment(&self) -> u64 {
        match self {
            RootArgument::Constants(_) => 4,
            _ => 8,
        }
    }

    /// 参数类型与局部根签名中对应位置的根参数是否一致
    fn matches(&self, parameter: &RootParameter) -> bool {
        match (self, parameter) {
            (RootArgument::DescriptorTable(_), RootParameter::DescriptorTable(_)) => true,
            (RootArgument::Constants(values), RootParameter::Constants { num_values, .. }) => {
                values.len() == *num_values as usize
            }
            (RootArgument::GpuAddress(_), RootParameter::ShaderResourceView { .. }) => true,
            _ => false,
        }
    }

    fn describe(&self) -> String {
        match self {
            RootArgument::DescriptorTable(_) => "descriptor table".to_string(),
            RootArgument::Constants(values) => format!("{} constants", values.len()),
            RootArgument::GpuAddress(_) => "root descriptor".to_string(),
        }
    }

    fn write(&self, out: &mut [u8]) {
        match self {
            RootArgument::DescriptorTable(handle) => out[..8].copy_from_slice(&handle.ptr.to_le_bytes()),
            RootArgument::GpuAddress(address) => out[..8].copy_from_slice(&address.to_le_bytes()),
            RootArgument::Constants(values) => {
                out[..values.len() * 4].copy_from_slice(bytemuck::cast_slice(values));
            }
        }
    }

    fn size(&self) -> u64 {
        match self {
            RootArgument::Constants(values) => 4 * values.len() as u64,
            _ => 8,
        }
    }
}

/// 参数紧密排列后的 (偏移, 参数) 列表和总大小
fn pack_arguments(arguments: &[RootArgument]) -> (Vec<u64>, u64) {
    let mut offsets = Vec::with_capacity(arguments.len());
    let mut cursor = 0u64;
    for argument in arguments {
        cursor = align_up(cursor, argument.alignment());
        offsets.push(cursor);
        cursor += argument.size();
    }
    (offsets, cursor)
}

#[derive(Debug, Clone)]
struct ShaderRecord {
    export: ShaderExport,
    arguments: Vec<RootArgument>,
}

/// 着色器表构建器
///
/// 记录容量由管线的局部根签名决定，所有分区共用同一个记录步长。
pub struct ShaderTableBuilder<'p, D: RaytracingDevice> {
    pipeline: &'p RaytracingPipeline<D>,
    records: [Vec<ShaderRecord>; 3],
}

impl<'p, D: RaytracingDevice> ShaderTableBuilder<'p, D> {
    pub fn new(pipeline: &'p RaytracingPipeline<D>) -> Self {
        Self {
            pipeline,
            records: [Vec::new(), Vec::new(), Vec::new()],
        }
    }

    /// 向分区追加一条记录
    ///
    /// 导出种类必须与分区匹配，参数不能超过局部根签名定义的容量。
    pub fn add(&mut self, section: ShaderTableSection, export: ShaderExport, arguments: Vec<RootArgument>) -> Result<&mut Self> {
        let name = self.pipeline.export_name(export)?.to_string();
        if !section.accepts(export.kind()) {
            return Err(RaytracingError::ContractViolation(format!(
                "Export '{}' ({:?}) cannot be placed in the {:?} section", name, export.kind(), section
            )).into());
        }

        let (_, required) = pack_arguments(&arguments);
        let capacity = self.pipeline.local_argument_size();
        if required > capacity {
            return Err(RaytracingError::ShaderRecordOverflow {
                export: name,
                capacity,
                required,
            }.into());
        }

        // 参数按顺序对应局部根签名的前若干个根参数，缺省的尾部参数写零
        let parameters = self
            .pipeline
            .local_root_signature()
            .map_or(&[][..], |signature| signature.layout().parameters.as_slice());
        for (index, argument) in arguments.iter().enumerate() {
            match parameters.get(index) {
                Some(parameter) if argument.matches(parameter) => {}
                Some(parameter) => {
                    return Err(RaytracingError::ContractViolation(format!(
                        "Argument {} of '{}' is {} but the local root signature declares {:?}",
                        index, name, argument.describe(), parameter
                    )).into());
                }
                None => {
                    return Err(RaytracingError::ContractViolation(format!(
                        "'{}' passes {} root arguments but the local root signature declares {}",
                        name, arguments.len(), parameters.len()
                    )).into());
                }
            }
        }

        self.records[section.index()].push(ShaderRecord { export, arguments });
        Ok(self)
    }

    pub fn add_ray_generation(&mut self, export: ShaderExport, arguments: Vec<RootArgument>) -> Result<&mut Self> {
        self.add(ShaderTableSection::RayGeneration, export, arguments)
    }

    pub fn add_miss(&mut self, export: ShaderExport, arguments: Vec<RootArgument>) -> Result<&mut Self> {
        self.add(ShaderTableSection::Miss, export, arguments)
    }

    pub fn add_hit_group(&mut self, export: ShaderExport, arguments: Vec<RootArgument>) -> Result<&mut Self> {
        self.add(ShaderTableSection::HitGroup, export, arguments)
    }

    /// 按记录数和管线的局部参数大小计算布局
    pub fn layout(&self) -> ShaderTableLayout {
        let arguments = self.pipeline.local_argument_size().div_ceil(DESCRIPTOR_HANDLE_SIZE) as u32;
        ShaderTableLayout::new(
            self.records[0].len() as u32,
            self.records[1].len() as u32,
            self.records[2].len() as u32,
            arguments,
        )
    }

    /// 生成着色器表的字节映像
    pub fn to_bytes(&self) -> Result<(ShaderTableLayout, Vec<u8>)> {
        let layout = self.layout();
        if self.records[ShaderTableSection::RayGeneration.index()].is_empty() {
            return Err(RaytracingError::ContractViolation(
                "Shader table needs at least one ray generation record".to_string(),
            ).into());
        }

        let mut bytes = vec![0u8; layout.total_size() as usize];
        for section in ShaderTableSection::ALL {
            for (i, record) in self.records[section.index()].iter().enumerate() {
                let identifier = self.pipeline.shader_identifier(record.export)?;
                let start = layout.record_offset(section, i as u32) as usize;
                bytes[start..start + SHADER_IDENTIFIER_SIZE as usize].copy_from_slice(identifier.as_bytes());

                let base = start + SHADER_IDENTIFIER_SIZE as usize;
                let (offsets, _) = pack_arguments(&record.arguments);
                for (argument, offset) in record.arguments.iter().zip(offsets) {
                    argument.write(&mut bytes[base + offset as usize..]);
                }
            }
        }

        Ok((layout, bytes))
    }

    /// 上传到新的上传堆缓冲区
    pub fn build(&self, device: &D) -> Result<ShaderTable<D>> {
        let (layout, bytes) = self.to_bytes()?;
        let buffer = device.create_buffer(&BufferDesc::upload(layout.total_size()).with_name("Shader table"))?;
        device.write_buffer(&buffer, 0, &bytes)?;

        tracing::debug!(
            size = layout.total_size(),
            entry_size = layout.section(ShaderTableSection::RayGeneration).entry_size(),
            ray_generation = layout.section(ShaderTableSection::RayGeneration).count_shaders(),
            miss = layout.section(ShaderTableSection::Miss).count_shaders(),
            hit_groups = layout.section(ShaderTableSection::HitGroup).count_shaders(),
            "Shader table built"
        );

        Ok(ShaderTable { buffer, layout })
    }
}

/// GPU 地址范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpuAddressRange {
    pub start: GpuVirtualAddress,
    pub size: u64,
}

/// 带步长的 GPU 地址范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpuAddressRangeAndStride {
    pub start: GpuVirtualAddress,
    pub size: u64,
    pub stride: u64,
}

/// DispatchRays 参数（D3D12_DISPATCH_RAYS_DESC）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchRaysDesc {
    pub ray_generation: GpuAddressRange,
    pub miss: GpuAddressRangeAndStride,
    pub hit_group: GpuAddressRangeAndStride,
    pub callable: GpuAddressRangeAndStride,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl DispatchRaysDesc {
    /// 检查表起点和步长的对齐
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.depth == 0 {
            return Err(RaytracingError::ContractViolation(format!(
                "Dispatch dimensions {}x{}x{} must be non-zero", self.width, self.height, self.depth
            )).into());
        }
        if self.ray_generation.size == 0 || !is_aligned(self.ray_generation.start, SHADER_TABLE_ALIGNMENT) {
            return Err(RaytracingError::ContractViolation(format!(
                "Ray generation record at {:#x} must be non-empty and 64-byte aligned",
                self.ray_generation.start
            )).into());
        }

        for (name, range) in [("miss", &self.miss), ("hit group", &self.hit_group), ("callable", &self.callable)] {
            if range.size == 0 {
                continue;
            }
            if !is_aligned(range.start, SHADER_TABLE_ALIGNMENT) || !is_aligned(range.stride, SHADER_RECORD_ALIGNMENT) {
                return Err(RaytracingError::ContractViolation(format!(
                    "{} table at {:#x} (stride {}) violates shader table alignment",
                    name, range.start, range.stride
                )).into());
            }
        }
        Ok(())
    }
}

/// 已上传的着色器表
pub struct ShaderTable<D: RaytracingDevice> {
    buffer: D::Buffer,
    layout: ShaderTableLayout,
}

impl<D: RaytracingDevice> ShaderTable<D> {
    pub fn buffer(&self) -> &D::Buffer {
        &self.buffer
    }

    pub fn layout(&self) -> &ShaderTableLayout {
        &self.layout
    }

    /// 用构建器的新内容重写
    ///
    /// 新表放得下时原地覆盖，否则重新分配缓冲区。
    pub fn rewrite(&mut self, device: &D, builder: &ShaderTableBuilder<'_, D>) -> Result<()> {
        let (layout, bytes) = builder.to_bytes()?;
        if layout.total_size() > self.buffer.size() {
            self.buffer = device.create_buffer(&BufferDesc::upload(layout.total_size()).with_name("Shader table"))?;
        }
        device.write_buffer(&self.buffer, 0, &bytes)?;
        self.layout = layout;
        Ok(())
    }

    /// 按布局填写 DispatchRays 的地址范围
    pub fn dispatch_rays_desc(&self, width: u32, height: u32, depth: u32) -> DispatchRaysDesc {
        let base = self.buffer.gpu_address();
        let range = |section: ShaderTableSection| {
            let helper = self.layout.section(section);
            GpuAddressRangeAndStride {
                start: if helper.count_shaders() == 0 { 0 } else { base + self.layout.section_offset(section) },
                size: helper.table_size(),
                stride: helper.entry_size(),
            }
        };

        let ray_generation = self.layout.section(ShaderTableSection::RayGeneration);
        DispatchRaysDesc {
            ray_generation: GpuAddressRange {
                start: base + self.layout.section_offset(ShaderTableSection::RayGeneration),
                size: ray_generation.entry_size(),
            },
            miss: range(ShaderTableSection::Miss),
            hit_group: range(ShaderTableSection::HitGroup),
            callable: GpuAddressRangeAndStride::default(),
            width,
            height,
            depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::HeadlessDevice;
    use crate::renderer::pipeline::{configure_pipeline, HitGroup, RaytracingPipelineSetup, ShaderLibrary};
    use crate::renderer::root_signature::{create_global_signature, create_local_signature, Binding};

    #[test]
    fn test_helper_properties() {
        for count in 0..8u32 {
            for args in 0..10u32 {
                let helper = SbtHelper::new(count, args);
                assert_eq!(helper.entry_size() % 32, 0);
                assert!(helper.entry_size() >= 32 + args as u64 * 8);
                assert!(helper.entry_size() < 32 + args as u64 * 8 + 32);
                assert_eq!(helper.table_size(), helper.entry_size() * count as u64);
            }
        }
    }

    #[test]
    fn test_helper_offsets() {
        let helper = SbtHelper::new(4, 3);
        assert_eq!(helper.entry_size(), 64);
        for i in 0..4 {
            assert_eq!(helper.identifier_offset(i), 64 * i as u64);
            assert_eq!(helper.root_argument_base_offset(i), helper.identifier_offset(i) + 32);
            for j in 0..3 {
                assert_eq!(helper.root_argument_offset(i, j), helper.root_argument_base_offset(i) + 8 * j as u64);
            }
        }
    }

    #[test]
    fn test_four_shaders_two_arguments() {
        let helper = SbtHelper::new(4, 2);
        assert_eq!(helper.entry_size(), 64);
        assert_eq!(helper.table_size(), 256);
        assert_eq!(helper.root_argument_offset(3, 1), 3 * 64 + 32 + 8);
    }

    #[test]
    fn test_layout_sections_are_aligned() {
        for ray_gen in 1..3u32 {
            for miss in 0..4u32 {
                for hit in 0..5u32 {
                    for args in 0..4u32 {
                        let layout = ShaderTableLayout::new(ray_gen, miss, hit, args);
                        for section in ShaderTableSection::ALL {
                            assert_eq!(layout.section_offset(section) % 64, 0);
                        }
                        let helper = SbtHelper::new(hit, args);
                        assert_eq!(layout.section(ShaderTableSection::HitGroup), &helper);
                        if hit > 0 && args > 0 {
                            assert_eq!(
                                layout.argument_offset(ShaderTableSection::HitGroup, hit - 1, args - 1),
                                layout.section_offset(ShaderTableSection::HitGroup)
                                    + helper.root_argument_offset(hit - 1, args - 1)
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_layout_packing() {
        // 光线生成 1 条、未命中 1 条、命中组 2 条，每条 64 字节
        let layout = ShaderTableLayout::new(1, 1, 2, 1);
        assert_eq!(layout.section_offset(ShaderTableSection::RayGeneration), 0);
        assert_eq!(layout.section_offset(ShaderTableSection::Miss), 64);
        assert_eq!(layout.section_offset(ShaderTableSection::HitGroup), 128);
        assert_eq!(layout.total_size(), 256);
        assert_eq!(layout.argument_capacity(), 32);

        // 32 字节的记录让下一个分区向上对齐
        let layout = ShaderTableLayout::new(1, 1, 1, 0);
        assert_eq!(layout.section_offset(ShaderTableSection::Miss), 64);
        assert_eq!(layout.section_offset(ShaderTableSection::HitGroup), 128);
        assert_eq!(layout.total_size(), 160);
    }

    fn pipeline(device: &HeadlessDevice) -> RaytracingPipeline<HeadlessDevice> {
        configure_pipeline(
            device,
            RaytracingPipelineSetup {
                library: ShaderLibrary::new(Vec::new(), ["RayGen", "Miss", "ClosestHit"]),
                global_root_signature: create_global_signature(device, &[Binding::srv(0, 0)]).unwrap(),
                local_root_signature: Some(create_local_signature(device, &[Binding::uav(0, 1), Binding::cbv(0, 1)]).unwrap()),
                hit_groups: vec![HitGroup::triangles("HitGroup", "ClosestHit")],
                max_payload_size: 16,
                max_attribute_size: 8,
                max_recursion_depth: 1,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_builder_matches_helper_offsets() {
        let device = HeadlessDevice::new();
        let pipeline = pipeline(&device);
        let ray_gen = pipeline.export("RayGen").unwrap();
        let hit_group = pipeline.export("HitGroup").unwrap();

        let table_args = |n: u64| {
            vec![
                RootArgument::DescriptorTable(GpuDescriptorHandle::new(0x1000 + n, 0)),
                RootArgument::DescriptorTable(GpuDescriptorHandle::new(0x2000 + n, 1)),
            ]
        };

        let mut builder = ShaderTableBuilder::new(&pipeline);
        builder.add_ray_generation(ray_gen, table_args(0)).unwrap();
        builder.add_miss(pipeline.export("Miss").unwrap(), Vec::new()).unwrap();
        for n in 1..=3 {
            builder.add_hit_group(hit_group, table_args(n)).unwrap();
        }

        let (layout, bytes) = builder.to_bytes().unwrap();
        let helper = layout.section(ShaderTableSection::HitGroup);
        assert_eq!(helper.count_inline_arguments(), 2);
        assert_eq!(helper.entry_size(), 64);

        let identifier = pipeline.shader_identifier(hit_group).unwrap();
        for i in 0..3u32 {
            let start = layout.record_offset(ShaderTableSection::HitGroup, i) as usize;
            assert_eq!(&bytes[start..start + 32], identifier.as_bytes());

            let second = layout.argument_offset(ShaderTableSection::HitGroup, i, 1) as usize;
            let value = u64::from_le_bytes(bytes[second..second + 8].try_into().unwrap());
            assert_eq!(value, 0x2000 + i as u64 + 1);
        }

        let table = builder.build(&device).unwrap();
        let desc = table.dispatch_rays_desc(8, 8, 1);
        assert!(desc.validate().is_ok());
        assert_eq!(desc.hit_group.stride, 64);
        assert_eq!(desc.hit_group.size, 192);
        assert_eq!(desc.ray_generation.size, 64);
    }

    #[test]
    fn test_section_kind_and_overflow_checks() {
        let device = HeadlessDevice::new();
        let pipeline = pipeline(&device);
        let mut builder = ShaderTableBuilder::new(&pipeline);

        // 命中组不能放进光线生成分区
        let hit_group = pipeline.export("HitGroup").unwrap();
        assert!(builder.add_ray_generation(hit_group, Vec::new()).is_err());

        let too_many = vec![RootArgument::GpuAddress(0); 3];
        let err = builder.add_miss(pipeline.export("Miss").unwrap(), too_many).err().unwrap();
        assert!(err.to_string().contains("need 24 bytes but the record holds 16"));

        // 没有光线生成记录
        assert!(builder.to_bytes().is_err());
    }

    #[test]
    fn test_arguments_follow_local_signature() {
        let device = HeadlessDevice::new();
        let pipeline = pipeline(&device);
        let hit_group = pipeline.export("HitGroup").unwrap();
        let mut builder = ShaderTableBuilder::new(&pipeline);

        // 参数 0 是描述符表，不能传内联常量
        let err = builder
            .add_hit_group(hit_group, vec![RootArgument::Constants(vec![1, 2])])
            .err()
            .unwrap();
        assert!(err.to_string().contains("Argument 0 of 'HitGroup' is 2 constants"));

        let err = builder
            .add_hit_group(
                hit_group,
                vec![
                    RootArgument::DescriptorTable(GpuDescriptorHandle::new(0x1000, 0)),
                    RootArgument::GpuAddress(0x2000),
                ],
            )
            .err()
            .unwrap();
        assert!(err.to_string().contains("Argument 1"));

        // 只给出前面的参数是允许的
        builder
            .add_hit_group(hit_group, vec![RootArgument::DescriptorTable(GpuDescriptorHandle::new(0x1000, 0))])
            .unwrap();
    }

    #[test]
    fn test_rewrite_keeps_buffer_when_it_fits() {
        let device = HeadlessDevice::new();
        let pipeline = pipeline(&device);
        let ray_gen = pipeline.export("RayGen").unwrap();
        let hit_group = pipeline.export("HitGroup").unwrap();

        let mut builder = ShaderTableBuilder::new(&pipeline);
        builder.add_ray_generation(ray_gen, Vec::new()).unwrap();
        builder.add_hit_group(hit_group, Vec::new()).unwrap();
        builder.add_hit_group(hit_group, Vec::new()).unwrap();
        let mut table = builder.build(&device).unwrap();
        let address = table.buffer().gpu_address();

        let mut smaller = ShaderTableBuilder::new(&pipeline);
        smaller.add_ray_generation(ray_gen, Vec::new()).unwrap();
        table.rewrite(&device, &smaller).unwrap();
        assert_eq!(table.buffer().gpu_address(), address);
        assert_eq!(table.dispatch_rays_desc(1, 1, 1).hit_group.size, 0);
    }

    #[test]
    fn test_dispatch_desc_validation() {
        let mut desc = DispatchRaysDesc {
            ray_generation: GpuAddressRange { start: 0x1000, size: 64 },
            width: 4,
            height: 4,
            depth: 1,
            ..Default::default()
        };
        assert!(desc.validate().is_ok());

        desc.miss = GpuAddressRangeAndStride { start: 0x1040, size: 48, stride: 48 };
        assert!(desc.validate().is_err());

        desc.miss = GpuAddressRangeAndStride::default();
        desc.ray_generation.start = 0x1020;
        assert!(desc.validate().is_err());
    }
}
