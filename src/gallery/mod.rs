//! 光线追踪示例集
//!
//! - `sample`：`Sample` trait、构造上下文、输出缓冲区和分发记录
//! - `triangle`：单三角形场景
//! - `procedural`：AABB 程序化几何，每帧重建 TLAS
//! - `host`：按配置构造示例并逐帧运行，失败的示例被单独停用

pub mod sample;
pub mod triangle;
pub mod procedural;
pub mod host;

pub use host::{available_samples, GallerySummary, SampleHost};
pub use procedural::ProceduralSample;
pub use sample::{Sample, SampleContext};
pub use triangle::TriangleSample;
