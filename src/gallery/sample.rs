//! 示例的公共部分
//!
//! 每个示例在构造时创建全部 GPU 对象（加速结构、根签名、管线、着色器表），
//! 之后每帧只记录并同步执行一次 DispatchRays。

use std::path::PathBuf;

use crate::core::error::{RaytracingError, Result};
use crate::renderer::command::CommandList;
use crate::renderer::descriptor::{DescriptorHeapType, DescriptorHeaps, DescriptorSlot, GpuDescriptorHandle};
use crate::renderer::device::{RaytracingDevice, ResourceView};
use crate::renderer::pipeline::{RaytracingPipeline, ShaderLibrary};
use crate::renderer::resource::{BufferDesc, HeapType, ResourceState};
use crate::renderer::sbt::ShaderTable;

/// 示例
pub trait Sample<D: RaytracingDevice> {
    /// 示例名称，与配置中的 `gallery.samples` 对应
    fn name(&self) -> &'static str;

    /// 渲染一帧，返回时 GPU 已经执行完毕
    fn render_frame(&mut self, device: &D, frame: u32) -> Result<()>;
}

/// 构造示例所需的共享对象
pub struct SampleContext<'a, D: RaytracingDevice> {
    pub device: &'a D,
    pub descriptors: &'a mut DescriptorHeaps,
    pub width: u32,
    pub height: u32,
    pub shader_dir: PathBuf,
}

impl<'a, D: RaytracingDevice> SampleContext<'a, D> {
    /// 由设备的三个描述符堆创建分配器
    pub fn descriptor_heaps(device: &D) -> DescriptorHeaps {
        DescriptorHeaps::new(
            device.descriptor_heap_info(DescriptorHeapType::Rtv),
            device.descriptor_heap_info(DescriptorHeapType::CbvSrvUav),
            device.descriptor_heap_info(DescriptorHeapType::Sampler),
        )
    }

    /// 加载预编译的 DXIL 着色器库
    ///
    /// 不执行着色器的设备只校验导出表，文件缺失时使用空字节码。
    pub fn load_library(&self, file_name: &str, exports: &[&str]) -> Result<ShaderLibrary> {
        let path = self.shader_dir.join(file_name);
        match ShaderLibrary::from_file(&path, exports.iter().copied()) {
            Ok(library) => Ok(library),
            Err(e) if !self.device.capabilities().executes_shaders => {
                tracing::debug!(path = %path.display(), "Shader library unavailable, using exports only: {}", e);
                Ok(ShaderLibrary::new(Vec::new(), exports.iter().copied()))
            }
            Err(e) => Err(e),
        }
    }

    /// 在共享的 CBV/SRV/UAV 堆中分配一个槽位并写入视图
    pub fn write_view(&mut self, view: &ResourceView<'_, D::Buffer>) -> Result<(DescriptorSlot, GpuDescriptorHandle)> {
        let heap = self.descriptors.get_mut(DescriptorHeapType::CbvSrvUav);
        let slot = heap.allocate()?;
        let written = heap
            .cpu_handle(slot)
            .and_then(|cpu| self.device.write_descriptor(cpu, view))
            .and_then(|()| heap.gpu_handle(slot));
        match written {
            Ok(gpu) => Ok((slot, gpu)),
            Err(e) => {
                heap.free(slot)?;
                Err(e)
            }
        }
    }
}

/// 光线生成着色器写入的输出缓冲区（每像素一个打包的 RGBA8）
pub struct OutputTarget<D: RaytracingDevice> {
    buffer: D::Buffer,
    width: u32,
    height: u32,
}

/// 输出缓冲区每个元素的字节数
pub const OUTPUT_STRIDE: u32 = 4;

impl<D: RaytracingDevice> OutputTarget<D> {
    pub fn new(device: &D, width: u32, height: u32, name: &str) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RaytracingError::ContractViolation(format!(
                "Output target {}x{} has no pixels", width, height
            )).into());
        }
        let size = width as u64 * height as u64 * OUTPUT_STRIDE as u64;
        let buffer = device.create_buffer(
            &BufferDesc::new(size, HeapType::Default, ResourceState::UnorderedAccess)
                .with_unordered_access()
                .with_name(name),
        )?;
        Ok(Self { buffer, width, height })
    }

    pub fn buffer(&self) -> &D::Buffer {
        &self.buffer
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn view(&self) -> ResourceView<'_, D::Buffer> {
        ResourceView::whole_buffer_uav(&self.buffer, OUTPUT_STRIDE)
    }
}

/// 全局根签名的两个描述符表：`u0` 输出和 `t0` 场景
pub struct GlobalBindings {
    pub output: GpuDescriptorHandle,
    pub scene: GpuDescriptorHandle,
}

/// 记录一帧的光线分发
///
/// 全局根签名按寄存器类型分组，参数 0 是 UAV 表，参数 1 是 SRV 表。
pub fn record_dispatch<D: RaytracingDevice>(
    list: &mut CommandList<D>,
    pipeline: &RaytracingPipeline<D>,
    bindings: &GlobalBindings,
    table: &ShaderTable<D>,
    output: &OutputTarget<D>,
) -> Result<()> {
    list.set_descriptor_heaps()?;
    list.set_compute_root_signature(pipeline.global_root_signature().handle())?;
    list.set_compute_root_descriptor_table(0, bindings.output)?;
    list.set_compute_root_descriptor_table(1, bindings.scene)?;
    list.set_pipeline_state(pipeline.state_object())?;
    list.dispatch_rays(&table.dispatch_rays_desc(output.width(), output.height(), 1))?;
    list.uav_barrier(output.buffer())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::HeadlessDevice;
    use crate::renderer::resource::GpuBuffer;

    fn context<'a>(device: &'a HeadlessDevice, heaps: &'a mut DescriptorHeaps) -> SampleContext<'a, HeadlessDevice> {
        SampleContext {
            device,
            descriptors: heaps,
            width: 8,
            height: 4,
            shader_dir: PathBuf::from("does-not-exist"),
        }
    }

    #[test]
    fn test_missing_library_on_headless_device() {
        let device = HeadlessDevice::new();
        let mut heaps = SampleContext::descriptor_heaps(&device);
        let ctx = context(&device, &mut heaps);

        let library = ctx.load_library("missing.dxil", &["RayGen", "Miss"]).unwrap();
        assert!(library.bytecode().is_empty());
        assert!(library.has_export("Miss"));
    }

    #[test]
    fn test_output_view_slot() {
        let device = HeadlessDevice::new();
        let mut heaps = SampleContext::descriptor_heaps(&device);
        let mut ctx = context(&device, &mut heaps);

        let output = OutputTarget::new(&device, ctx.width, ctx.height, "output").unwrap();
        assert_eq!(output.buffer().size(), 8 * 4 * 4);

        let (slot, gpu) = ctx.write_view(&output.view()).unwrap();
        let heap = ctx.descriptors.get(DescriptorHeapType::CbvSrvUav);
        let cpu = heap.cpu_handle(slot).unwrap();
        assert_eq!(device.descriptor_kind(cpu), Some("BufferUav"));
        assert_eq!(heap.gpu_handle(slot).unwrap(), gpu);
        assert_eq!(heap.allocated_count(), 1);
    }

    #[test]
    fn test_failed_view_returns_slot() {
        let device = HeadlessDevice::new();
        let mut heaps = SampleContext::descriptor_heaps(&device);
        let mut ctx = context(&device, &mut heaps);

        // 不是已构建的 TLAS，写入失败后槽位归还
        let err = ctx.write_view(&ResourceView::AccelerationStructure(0x1234_0000)).unwrap_err();
        assert!(!err.to_string().is_empty());
        assert_eq!(ctx.descriptors.get(DescriptorHeapType::CbvSrvUav).allocated_count(), 0);
    }

    #[test]
    fn test_empty_output_target_rejected() {
        let device = HeadlessDevice::new();
        assert!(OutputTarget::new(&device, 0, 4, "output").is_err());
    }
}
