//! 三角形示例
//!
//! 单个三角形 BLAS，一个单位变换实例。光线生成着色器写入 `u0`，
//! 通过 `t0` 访问 TLAS；着色器表只有 RayGen/Miss/HitGroup 各一条记录。

use crate::core::error::Result;
use crate::math::Transform3x4;
use crate::renderer::acceleration::{build_blas_from_triangles, AccelerationStructureArena, Indices, InstanceDesc, TlasHandle};
use crate::renderer::device::RaytracingDevice;
use crate::renderer::format::Format;
use crate::renderer::pipeline::{configure_pipeline, HitGroup, RaytracingPipeline, RaytracingPipelineSetup};
use crate::renderer::root_signature::{create_global_signature, Binding};
use crate::renderer::sbt::{ShaderTable, ShaderTableBuilder};
use crate::renderer::command::run_synchronously;

use super::sample::{record_dispatch, GlobalBindings, OutputTarget, Sample, SampleContext};

/// 配置中使用的示例名称
pub const NAME: &str = "triangle";

const LIBRARY: &str = "triangle.dxil";
const RAY_GEN: &str = "RayGen";
const MISS: &str = "Miss";
const CLOSEST_HIT: &str = "ClosestHit";
const HIT_GROUP: &str = "HitGroup";

/// 屏幕中央的三角形，只有位置
const VERTICES: [[f32; 3]; 3] = [
    [0.0, 0.7, 1.0],
    [0.7, -0.7, 1.0],
    [-0.7, -0.7, 1.0],
];

pub struct TriangleSample<D: RaytracingDevice> {
    // 字段顺序即销毁顺序：着色器表、管线先于加速结构释放
    table: ShaderTable<D>,
    pipeline: RaytracingPipeline<D>,
    bindings: GlobalBindings,
    output: OutputTarget<D>,
    structures: AccelerationStructureArena<D>,
    tlas: TlasHandle,
}

impl<D: RaytracingDevice> TriangleSample<D> {
    pub fn new(ctx: &mut SampleContext<'_, D>) -> Result<Self> {
        let device = ctx.device;
        device.capabilities().require_raytracing()?;

        let mut structures = AccelerationStructureArena::new();
        let blas = structures.insert_blas(build_blas_from_triangles(
            device,
            &VERTICES,
            Format::R32G32B32Float,
            Indices::None,
        )?)?;
        let tlas = structures.build_tlas(device, &[InstanceDesc::new(blas, Transform3x4::IDENTITY)])?;

        let output = OutputTarget::new(device, ctx.width, ctx.height, "Triangle output")?;
        let (_, output_table) = ctx.write_view(&output.view())?;
        let (_, scene_table) = ctx.write_view(&structures.tlas(tlas)?.view())?;

        let pipeline = configure_pipeline(
            device,
            RaytracingPipelineSetup {
                library: ctx.load_library(LIBRARY, &[RAY_GEN, MISS, CLOSEST_HIT])?,
                global_root_signature: create_global_signature(device, &[Binding::uav(0, 0), Binding::srv(0, 0)])?,
                local_root_signature: None,
                hit_groups: vec![HitGroup::triangles(HIT_GROUP, CLOSEST_HIT)],
                max_payload_size: 16,
                max_attribute_size: 8,
                max_recursion_depth: 1,
            },
        )?;

        let table = {
            let mut builder = ShaderTableBuilder::new(&pipeline);
            builder
                .add_ray_generation(pipeline.export(RAY_GEN)?, Vec::new())?
                .add_miss(pipeline.export(MISS)?, Vec::new())?
                .add_hit_group(pipeline.export(HIT_GROUP)?, Vec::new())?;
            builder.build(device)?
        };

        Ok(Self {
            table,
            pipeline,
            bindings: GlobalBindings {
                output: output_table,
                scene: scene_table,
            },
            output,
            structures,
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
}

impl<D: RaytracingDevice> Sample<D> for TriangleSample<D> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn render_frame(&mut self, device: &D, _frame: u32) -> Result<()> {
        let _span = crate::span_trace!("triangle_frame").entered();
        run_synchronously(device, |list| {
            record_dispatch(list, &self.pipeline, &self.bindings, &self.table, &self.output)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::HeadlessDevice;
    use crate::renderer::acceleration::AccelerationStructureKind;
    use crate::renderer::descriptor::DescriptorHeapType;
    use crate::renderer::resource::GpuBuffer;
    use crate::renderer::sbt::ShaderTableSection;
    use std::path::PathBuf;

    fn build(device: &HeadlessDevice) -> (TriangleSample<HeadlessDevice>, crate::renderer::DescriptorHeaps) {
        let mut heaps = SampleContext::descriptor_heaps(device);
        let sample = {
            let mut ctx = SampleContext {
                device,
                descriptors: &mut heaps,
                width: 64,
                height: 32,
                shader_dir: PathBuf::from("shaders"),
            };
            TriangleSample::new(&mut ctx).unwrap()
        };
        (sample, heaps)
    }

    #[test]
    fn test_triangle_scene() {
        let device = HeadlessDevice::new();
        let (sample, heaps) = build(&device);

        let tlas = sample.structures().tlas(sample.tlas()).unwrap();
        assert_eq!(tlas.kind(), AccelerationStructureKind::TopLevel);
        assert_eq!(tlas.inputs().descriptor_count(), 1);
        assert_eq!(sample.structures().blas_count(), 1);
        assert_eq!(heaps.get(DescriptorHeapType::CbvSrvUav).allocated_count(), 2);

        let layout = sample.table.layout();
        for section in [ShaderTableSection::RayGeneration, ShaderTableSection::Miss, ShaderTableSection::HitGroup] {
            assert_eq!(layout.section(section).count_shaders(), 1);
            assert_eq!(layout.section_offset(section) % 64, 0);
        }
        assert_eq!(layout.section(ShaderTableSection::HitGroup).entry_size(), 32);
    }

    #[test]
    fn test_triangle_frames() {
        let device = HeadlessDevice::new();
        let (mut sample, _heaps) = build(&device);

        for frame in 0..3 {
            sample.render_frame(&device, frame).unwrap();
        }
        let stats = device.stats();
        assert_eq!(stats.dispatches, 3);
        assert_eq!(stats.rays_dispatched, 3 * 64 * 32);
        assert_eq!(sample.output().buffer().size(), 64 * 32 * 4);
    }

    #[test]
    fn test_triangle_requires_raytracing() {
        let device = HeadlessDevice::new().without_raytracing();
        let mut heaps = SampleContext::descriptor_heaps(&device);
        let mut ctx = SampleContext {
            device: &device,
            descriptors: &mut heaps,
            width: 64,
            height: 32,
            shader_dir: PathBuf::from("shaders"),
        };
        let err = TriangleSample::new(&mut ctx).err().unwrap();
        assert!(err.to_string().contains("Raytracing"));
        assert_eq!(device.stats().buffers_created, 0);
    }
}
