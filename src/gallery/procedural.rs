//! 程序化几何示例
//!
//! 一个单位 AABB 的 BLAS 被四个实例引用，每个实例选择自己的命中组记录，
//! 记录中的局部根参数是 4 个内联常量（RGBA 颜色）。每帧用新的实例变换
//! 重建 TLAS，并重写着色器表让颜色随帧轮换。

use crate::core::error::Result;
use crate::math::{constants::TAU, matrix, Transform3x4};
use crate::renderer::acceleration::{build_blas_from_aabb, Aabb, AccelerationStructureArena, BlasHandle, InstanceDesc, TlasHandle};
use crate::renderer::command::run_synchronously;
use crate::renderer::descriptor::{CpuDescriptorHandle, DescriptorHeapType};
use crate::renderer::device::RaytracingDevice;
use crate::renderer::pipeline::{configure_pipeline, HitGroup, RaytracingPipeline, RaytracingPipelineSetup};
use crate::renderer::root_signature::{create_global_signature, create_local_signature_inline_constants, Binding};
use crate::renderer::sbt::{RootArgument, ShaderTable, ShaderTableBuilder};

use super::sample::{record_dispatch, GlobalBindings, OutputTarget, Sample, SampleContext};

/// 配置中使用的示例名称
pub const NAME: &str = "procedural";

const LIBRARY: &str = "procedural.dxil";
const RAY_GEN: &str = "RayGen";
const MISS: &str = "Miss";
const CLOSEST_HIT: &str = "SphereClosestHit";
const INTERSECTION: &str = "SphereIntersection";
const HIT_GROUP: &str = "SphereHitGroup";

const PALETTE: [[f32; 4]; 4] = [
    [1.0, 0.3, 0.3, 1.0],
    [0.3, 1.0, 0.3, 1.0],
    [0.3, 0.3, 1.0, 1.0],
    [1.0, 1.0, 0.3, 1.0],
];

/// 实例数量，等于命中组记录数量
pub const INSTANCE_COUNT: u32 = PALETTE.len() as u32;

/// 每帧绕 Y 轴转过的角度
const ROTATION_PER_FRAME: f32 = TAU / 240.0;

/// 第 `frame` 帧的实例数组
///
/// 实例 i 使用第 i 条命中组记录，在 X 轴上均匀排开并各自旋转。
fn instances(blas: BlasHandle, frame: u32) -> Vec<InstanceDesc> {
    (0..INSTANCE_COUNT)
        .map(|i| {
            let angle = (frame as f32 * ROTATION_PER_FRAME + i as f32 * TAU / INSTANCE_COUNT as f32) % TAU;
            let x = (i as f32 - (INSTANCE_COUNT - 1) as f32 * 0.5) * 1.5;
            let transform = matrix::translation(x, 0.0, 4.0) * matrix::rotation_y(angle) * matrix::scaling(0.5, 0.5, 0.5);
            InstanceDesc::new(blas, Transform3x4::from_matrix(&transform))
                .with_instance_id(i)
                .with_hit_group_index(i)
        })
        .collect()
}

/// 第 `frame` 帧命中组记录 i 的颜色
fn color(frame: u32, record: u32) -> [f32; 4] {
    PALETTE[((record + frame) % INSTANCE_COUNT) as usize]
}

fn shader_records<'p, D: RaytracingDevice>(pipeline: &'p RaytracingPipeline<D>, frame: u32) -> Result<ShaderTableBuilder<'p, D>> {
    let mut builder = ShaderTableBuilder::new(pipeline);
    builder
        .add_ray_generation(pipeline.export(RAY_GEN)?, Vec::new())?
        .add_miss(pipeline.export(MISS)?, Vec::new())?;

    let hit_group = pipeline.export(HIT_GROUP)?;
    for record in 0..INSTANCE_COUNT {
        let constants = color(frame, record).iter().map(|c| c.to_bits()).collect();
        builder.add_hit_group(hit_group, vec![RootArgument::Constants(constants)])?;
    }
    Ok(builder)
}

pub struct ProceduralSample<D: RaytracingDevice> {
    table: ShaderTable<D>,
    pipeline: RaytracingPipeline<D>,
    bindings: GlobalBindings,
    /// TLAS SRV 所在的槽位，TLAS 移动后在此重写
    scene_view: CpuDescriptorHandle,
    output: OutputTarget<D>,
    structures: AccelerationStructureArena<D>,
    blas: BlasHandle,
    tlas: TlasHandle,
}

impl<D: RaytracingDevice> ProceduralSample<D> {
    pub fn new(ctx: &mut SampleContext<'_, D>) -> Result<Self> {
        let device = ctx.device;
        device.capabilities().require_raytracing()?;

        let mut structures = AccelerationStructureArena::new();
        let blas = structures.insert_blas(build_blas_from_aabb(device, &[Aabb::unit()])?)?;
        let tlas = structures.build_tlas(device, &instances(blas, 0))?;

        let output = OutputTarget::new(device, ctx.width, ctx.height, "Procedural output")?;
        let (_, output_table) = ctx.write_view(&output.view())?;
        let (scene_slot, scene_table) = ctx.write_view(&structures.tlas(tlas)?.view())?;
        let scene_view = ctx.descriptors.get(DescriptorHeapType::CbvSrvUav).cpu_handle(scene_slot)?;

        let pipeline = configure_pipeline(
            device,
            RaytracingPipelineSetup {
                library: ctx.load_library(LIBRARY, &[RAY_GEN, MISS, CLOSEST_HIT, INTERSECTION])?,
                global_root_signature: create_global_signature(device, &[Binding::uav(0, 0), Binding::srv(0, 0)])?,
                local_root_signature: Some(create_local_signature_inline_constants(device, 4)?),
                hit_groups: vec![HitGroup::procedural(HIT_GROUP, CLOSEST_HIT, INTERSECTION)],
                max_payload_size: 16,
                // 交点着色器报告的属性：法线 float3
                max_attribute_size: 12,
                max_recursion_depth: 1,
            },
        )?;

        let table = shader_records(&pipeline, 0)?.build(device)?;

        Ok(Self {
            table,
            pipeline,
            bindings: GlobalBindings {
                output: output_table,
                scene: scene_table,
            },
            scene_view,
            output,
            structures,
            blas,
            tlas,
        })
    }

    pub fn output(&self) -> &OutputTarget<D> {
        &self.output
    }

    pub fn structures(&self) -> &AccelerationStructureArena<D> {
        &self.structures
    }

    pub fn tlas(&self) -> TlasHandle {
        self.tlas
    }

    pub fn shader_table(&self) -> &ShaderTable<D> {
        &self.table
    }

    /// 用新的实例重建 TLAS；结果缓冲区被重新分配时重写场景 SRV
    fn update_scene(&mut self, device: &D, instances: &[InstanceDesc]) -> Result<()> {
        if self.structures.rebuild_tlas(device, self.tlas, instances)? {
            let tlas = self.structures.tlas(self.tlas)?;
            device.write_descriptor(self.scene_view, &tlas.view())?;
            tracing::debug!(address = tlas.gpu_address(), "Scene view rewritten after TLAS reallocation");
        }
        Ok(())
    }
}

impl<D: RaytracingDevice> Sample<D> for ProceduralSample<D> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn render_frame(&mut self, device: &D, frame: u32) -> Result<()> {
        let _span = crate::span_trace!("procedural_frame").entered();

        // 上一帧已同步完成，TLAS 和着色器表可以直接改写
        self.update_scene(device, &instances(self.blas, frame))?;
        let builder = shader_records(&self.pipeline, frame)?;
        self.table.rewrite(device, &builder)?;

        run_synchronously(device, |list| {
            record_dispatch(list, &self.pipeline, &self.bindings, &self.table, &self.output)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::HeadlessDevice;
    use crate::renderer::descriptor::DescriptorHeaps;
    use crate::renderer::resource::GpuBuffer;
    use crate::renderer::sbt::ShaderTableSection;
    use std::path::PathBuf;

    fn build(device: &HeadlessDevice) -> (ProceduralSample<HeadlessDevice>, DescriptorHeaps) {
        let mut heaps = SampleContext::descriptor_heaps(device);
        let sample = {
            let mut ctx = SampleContext {
                device,
                descriptors: &mut heaps,
                width: 16,
                height: 16,
                shader_dir: PathBuf::from("shaders"),
            };
            ProceduralSample::new(&mut ctx).unwrap()
        };
        (sample, heaps)
    }

    #[test]
    fn test_instances_select_hit_groups() {
        let blas = {
            let device = HeadlessDevice::new();
            let mut arena = AccelerationStructureArena::new();
            arena.insert_blas(build_blas_from_aabb(&device, &[Aabb::unit()]).unwrap()).unwrap()
        };

        let first = instances(blas, 0);
        assert_eq!(first.len(), INSTANCE_COUNT as usize);
        assert!(first
            .iter()
            .enumerate()
            .all(|(i, desc)| desc.hit_group_index == i as u32 && desc.instance_id == i as u32));
        let second = instances(blas, 1);
        assert_ne!(first, second);
    }

    #[test]
    fn test_colors_rotate() {
        assert_eq!(color(0, 0), PALETTE[0]);
        assert_eq!(color(1, 0), PALETTE[1]);
        assert_eq!(color(1, 3), PALETTE[0]);
    }

    #[test]
    fn test_hit_group_records() {
        let device = HeadlessDevice::new();
        let (sample, _heaps) = build(&device);

        let layout = sample.shader_table().layout();
        let hit_groups = layout.section(ShaderTableSection::HitGroup);
        assert_eq!(hit_groups.count_shaders(), INSTANCE_COUNT);
        // 32 字节标识符 + 16 字节常量，对齐到 32
        assert_eq!(hit_groups.entry_size(), 64);
        assert_eq!(layout.section(ShaderTableSection::RayGeneration).entry_size(), 64);
    }

    #[test]
    fn test_frames_rewrite_table_in_place() {
        let device = HeadlessDevice::new();
        let (mut sample, _heaps) = build(&device);
        let table_address = sample.shader_table().buffer().gpu_address();
        let tlas_address = sample.structures().tlas(sample.tlas()).unwrap().gpu_address();

        for frame in 1..=4 {
            sample.render_frame(&device, frame).unwrap();
        }

        let stats = device.stats();
        assert_eq!(stats.dispatches, 4);
        assert_eq!(stats.rays_dispatched, 4 * 16 * 16);
        assert_eq!(sample.shader_table().buffer().gpu_address(), table_address);
        assert_eq!(sample.structures().tlas(sample.tlas()).unwrap().gpu_address(), tlas_address);
        assert_eq!(sample.structures().blas_references(sample.blas).unwrap(), 1);
        assert_eq!(device.descriptor_address(sample.scene_view), Some(tlas_address));
    }

    #[test]
    fn test_scene_view_follows_reallocated_tlas() {
        let device = HeadlessDevice::new();
        let (mut sample, _heaps) = build(&device);
        let old_address = sample.structures().tlas(sample.tlas()).unwrap().gpu_address();

        let grown: Vec<InstanceDesc> = (0..16).flat_map(|frame| instances(sample.blas, frame)).collect();
        sample.update_scene(&device, &grown).unwrap();

        let new_address = sample.structures().tlas(sample.tlas()).unwrap().gpu_address();
        assert_ne!(new_address, old_address);
        assert_eq!(device.descriptor_address(sample.scene_view), Some(new_address));
        assert_eq!(device.descriptor_kind(sample.scene_view), Some("RaytracingAccelerationStructure"));

        sample.render_frame(&device, 1).unwrap();
        assert_eq!(device.stats().dispatches, 1);
    }
}
