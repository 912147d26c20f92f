//! 示例宿主
//!
//! 按配置中的名称构造示例，然后逐帧渲染。某个示例构造或渲染失败时
//! 只停用该示例，其余示例继续运行，最后输出汇总。

use std::path::PathBuf;

use crate::core::config::GalleryConfig;
use crate::core::error::{ConfigError, GalleryError, Result};
use crate::renderer::descriptor::DescriptorHeaps;
use crate::renderer::device::RaytracingDevice;

use super::procedural::{self, ProceduralSample};
use super::sample::{Sample, SampleContext};
use super::triangle::{self, TriangleSample};

type Constructor<D> = fn(&mut SampleContext<'_, D>) -> Result<Box<dyn Sample<D>>>;

fn construct_triangle<D: RaytracingDevice + 'static>(ctx: &mut SampleContext<'_, D>) -> Result<Box<dyn Sample<D>>> {
    Ok(Box::new(TriangleSample::new(ctx)?))
}

fn construct_procedural<D: RaytracingDevice + 'static>(ctx: &mut SampleContext<'_, D>) -> Result<Box<dyn Sample<D>>> {
    Ok(Box::new(ProceduralSample::new(ctx)?))
}

/// 已知示例的名称与构造函数
fn registry<D: RaytracingDevice + 'static>() -> [(&'static str, Constructor<D>); 2] {
    [
        (triangle::NAME, construct_triangle::<D> as Constructor<D>),
        (procedural::NAME, construct_procedural::<D> as Constructor<D>),
    ]
}

/// 所有已知示例的名称
pub fn available_samples() -> Vec<&'static str> {
    vec![triangle::NAME, procedural::NAME]
}

/// 被停用的示例及原因
#[derive(Debug, Clone)]
pub struct DisabledSample {
    pub name: String,
    pub reason: String,
}

/// 运行结果汇总
#[derive(Debug, Clone, Default)]
pub struct GallerySummary {
    /// 跑完全部帧的示例及帧数
    pub completed: Vec<(String, u32)>,
    pub disabled: Vec<DisabledSample>,
}

impl GallerySummary {
    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.iter().any(|d| d.name == name)
    }

    pub fn log(&self) {
        for (name, frames) in &self.completed {
            crate::app_info!("Sample '{}' rendered {} frames", name, frames);
        }
        for disabled in &self.disabled {
            crate::engine_warn!("Sample '{}' disabled: {}", disabled.name, disabled.reason);
        }
        crate::app_info!(
            "Gallery finished: {} completed, {} disabled",
            self.completed.len(),
            self.disabled.len()
        );
    }
}

struct Running<D: RaytracingDevice> {
    sample: Box<dyn Sample<D>>,
    frames: u32,
}

/// 示例宿主，持有设备引用和共享的描述符堆
pub struct SampleHost<'d, D: RaytracingDevice + 'static> {
    device: &'d D,
    // 示例先于描述符堆销毁
    samples: Vec<Running<D>>,
    descriptors: DescriptorHeaps,
    summary: GallerySummary,
}

impl<'d, D: RaytracingDevice + 'static> SampleHost<'d, D> {
    /// 构造配置中列出的全部示例
    pub fn new(device: &'d D, config: &GalleryConfig) -> Self {
        let mut host = Self {
            device,
            samples: Vec::new(),
            descriptors: SampleContext::descriptor_heaps(device),
            summary: GallerySummary::default(),
        };

        for name in &config.samples {
            let _span = tracing::info_span!("construct_sample", sample = name.as_str()).entered();
            match host.construct(name, config) {
                Ok(sample) => {
                    crate::app_info!("Sample '{}' ready", name);
                    host.samples.push(Running { sample, frames: 0 });
                }
                Err(e) => host.disable(name, &e),
            }
        }

        host
    }

    fn construct(&mut self, name: &str, config: &GalleryConfig) -> Result<Box<dyn Sample<D>>> {
        let constructor = registry::<D>()
            .into_iter()
            .find(|(known, _)| *known == name)
            .map(|(_, constructor)| constructor)
            .ok_or_else(|| {
                GalleryError::Config(ConfigError::InvalidValue {
                    field: "gallery.samples".to_string(),
                    reason: format!("unknown sample '{}', expected one of {:?}", name, available_samples()),
                })
            })?;

        let mut ctx = SampleContext {
            device: self.device,
            descriptors: &mut self.descriptors,
            width: config.width,
            height: config.height,
            shader_dir: PathBuf::from(&config.shader_dir),
        };
        constructor(&mut ctx)
    }

    fn disable(&mut self, name: &str, error: &GalleryError) {
        crate::engine_error!("Sample '{}' failed: {}", name, error);
        self.summary.disabled.push(DisabledSample {
            name: name.to_string(),
            reason: error.to_string(),
        });
    }

    /// 仍在运行的示例名称
    pub fn active_samples(&self) -> Vec<&'static str> {
        self.samples.iter().map(|r| r.sample.name()).collect()
    }

    pub fn descriptors(&self) -> &DescriptorHeaps {
        &self.descriptors
    }

    /// 渲染 `frames` 帧，返回汇总
    ///
    /// 每帧依次渲染所有仍在运行的示例；渲染出错的示例立即停用。
    pub fn run(mut self, frames: u32) -> GallerySummary {
        for frame in 0..frames {
            let mut failed = Vec::new();
            for (index, running) in self.samples.iter_mut().enumerate() {
                match running.sample.render_frame(self.device, frame) {
                    Ok(()) => running.frames += 1,
                    Err(e) => failed.push((index, e)),
                }
            }

            // 倒序移除，保持前面的下标有效
            for (index, error) in failed.into_iter().rev() {
                let running = self.samples.remove(index);
                self.disable(running.sample.name(), &error);
            }

            if self.samples.is_empty() {
                break;
            }
        }

        let completed = self
            .samples
            .drain(..)
            .map(|running| (running.sample.name().to_string(), running.frames))
            .collect();
        self.summary.completed = completed;
        std::mem::take(&mut self.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::HeadlessDevice;
    use crate::renderer::descriptor::DescriptorHeapType;

    fn gallery(samples: &[&str]) -> GalleryConfig {
        GalleryConfig {
            frames: 3,
            width: 32,
            height: 16,
            samples: samples.iter().map(|s| s.to_string()).collect(),
            shader_dir: "shaders".to_string(),
        }
    }

    #[test]
    fn test_all_samples_run() {
        let device = HeadlessDevice::new();
        let config = gallery(&["triangle", "procedural"]);
        let host = SampleHost::new(&device, &config);
        assert_eq!(host.active_samples(), vec!["triangle", "procedural"]);
        assert_eq!(host.descriptors().get(DescriptorHeapType::CbvSrvUav).allocated_count(), 4);

        let summary = host.run(config.frames);
        assert!(summary.disabled.is_empty());
        assert_eq!(
            summary.completed,
            vec![("triangle".to_string(), 3), ("procedural".to_string(), 3)]
        );

        let stats = device.stats();
        assert_eq!(stats.dispatches, 6);
        assert_eq!(stats.rays_dispatched, 6 * 32 * 16);
    }

    #[test]
    fn test_unknown_sample_is_disabled() {
        let device = HeadlessDevice::new();
        let host = SampleHost::new(&device, &gallery(&["triangle", "mandelbrot"]));
        assert_eq!(host.active_samples(), vec!["triangle"]);

        let summary = host.run(1);
        assert!(summary.is_disabled("mandelbrot"));
        assert!(summary.disabled[0].reason.contains("gallery.samples"));
        assert_eq!(summary.completed, vec![("triangle".to_string(), 1)]);
    }

    #[test]
    fn test_no_raytracing_disables_every_sample() {
        let device = HeadlessDevice::new().without_raytracing();
        let host = SampleHost::new(&device, &gallery(&["triangle", "procedural"]));
        assert!(host.active_samples().is_empty());

        let summary = host.run(5);
        assert!(summary.completed.is_empty());
        assert!(summary.is_disabled("triangle"));
        assert!(summary.is_disabled("procedural"));
        assert_eq!(device.stats().dispatches, 0);
    }

    #[test]
    fn test_out_of_memory_disables_only_that_sample() {
        // 预算只够三角形示例，程序化示例的输出缓冲区就有 2048 字节
        let used = {
            let device = HeadlessDevice::new();
            let _host = SampleHost::new(&device, &gallery(&["triangle"]));
            device.stats().bytes_allocated
        };

        let device = HeadlessDevice::new().with_memory_budget(used + 1024);
        let host = SampleHost::new(&device, &gallery(&["triangle", "procedural"]));
        assert_eq!(host.active_samples(), vec!["triangle"]);

        let summary = host.run(2);
        assert!(summary.is_disabled("procedural"));
        assert_eq!(summary.completed, vec![("triangle".to_string(), 2)]);
    }

    #[test]
    fn test_available_samples() {
        assert_eq!(available_samples(), vec!["triangle", "procedural"]);
    }
}
