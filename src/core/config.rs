//! 配置管理模块
//!
//! 提供示例宿主配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [graphics]
//! backend = "headless"  # 或 "dx12"
//! debug_layer = true
//!
//! [logging]
//! level = "info"        # trace, debug, info, warn, error
//! file_output = false
//!
//! [gallery]
//! frames = 3
//! width = 640
//! height = 360
//! samples = ["triangle", "procedural"]
//! shader_dir = "shaders"
//!
//! [descriptors]
//! rtv_capacity = 8
//! cbv_srv_uav_capacity = 256
//! sampler_capacity = 16
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, Result};

/// 宿主配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,

    /// 示例画廊配置
    #[serde(default)]
    pub gallery: GalleryConfig,

    /// 描述符堆容量
    #[serde(default)]
    pub descriptors: DescriptorConfig,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackend,

    /// 是否启用 D3D12 调试层
    #[serde(default = "default_debug_layer")]
    pub debug_layer: bool,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    /// CPU 模拟设备，不需要 GPU
    Headless,
    /// DirectX 12（DXR）
    Dx12,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default = "default_file_output")]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// 示例画廊配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryConfig {
    /// 每个示例渲染的帧数
    #[serde(default = "default_frames")]
    pub frames: u32,

    /// 光线分发宽度（输出 UAV 宽度）
    #[serde(default = "default_width")]
    pub width: u32,

    /// 光线分发高度
    #[serde(default = "default_height")]
    pub height: u32,

    /// 启用的示例名称
    #[serde(default = "default_samples")]
    pub samples: Vec<String>,

    /// 预编译 DXIL 着色器库所在目录
    #[serde(default = "default_shader_dir")]
    pub shader_dir: String,
}

/// 描述符堆容量配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorConfig {
    #[serde(default = "default_rtv_capacity")]
    pub rtv_capacity: u32,

    #[serde(default = "default_cbv_srv_uav_capacity")]
    pub cbv_srv_uav_capacity: u32,

    #[serde(default = "default_sampler_capacity")]
    pub sampler_capacity: u32,
}

// 默认值函数
fn default_backend() -> GraphicsBackend {
    if cfg!(target_os = "windows") { GraphicsBackend::Dx12 } else { GraphicsBackend::Headless }
}
fn default_debug_layer() -> bool { cfg!(debug_assertions) }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "rt_gallery.log".to_string() }
fn default_frames() -> u32 { 3 }
fn default_width() -> u32 { 640 }
fn default_height() -> u32 { 360 }
fn default_samples() -> Vec<String> { vec!["triangle".to_string(), "procedural".to_string()] }
fn default_shader_dir() -> String { "shaders".to_string() }
fn default_rtv_capacity() -> u32 { 8 }
fn default_cbv_srv_uav_capacity() -> u32 { 256 }
fn default_sampler_capacity() -> u32 { 16 }

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            debug_layer: default_debug_layer(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            frames: default_frames(),
            width: default_width(),
            height: default_height(),
            samples: default_samples(),
            shader_dir: default_shader_dir(),
        }
    }
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            rtv_capacity: default_rtv_capacity(),
            cbv_srv_uav_capacity: default_cbv_srv_uav_capacity(),
            sampler_capacity: default_sampler_capacity(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    ///
    /// # 参数
    ///
    /// * `path` - 配置文件路径
    ///
    /// # 返回值
    ///
    /// 成功返回 `Config` 实例，失败返回错误
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 文本解析
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--dx12`: 使用 DirectX 12 后端
    /// - `--headless`: 使用 CPU 模拟后端
    /// - `--frames <value>`: 每个示例的帧数
    /// - `--width <value>` / `--height <value>`: 光线分发尺寸
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--dx12") {
            self.graphics.backend = GraphicsBackend::Dx12;
        }

        if args.iter().any(|a| a == "--headless") {
            self.graphics.backend = GraphicsBackend::Headless;
        }

        let value_of = |flag: &str| -> Option<u32> {
            let idx = args.iter().position(|a| a == flag)?;
            args.get(idx + 1)?.parse().ok()
        };

        if let Some(frames) = value_of("--frames") {
            self.gallery.frames = frames;
        }
        if let Some(width) = value_of("--width") {
            self.gallery.width = width;
        }
        if let Some(height) = value_of("--height") {
            self.gallery.height = height;
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.gallery.width == 0 || self.gallery.height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "gallery.width/height".to_string(),
                reason: "Dispatch dimensions must be greater than 0".to_string(),
            }.into());
        }

        if self.descriptors.cbv_srv_uav_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "descriptors.cbv_srv_uav_capacity".to_string(),
                reason: "Raytracing samples need at least one shader-visible descriptor".to_string(),
            }.into());
        }

        // D3D12 着色器可见采样器堆上限为 2048
        if self.descriptors.sampler_capacity > 2048 {
            return Err(ConfigError::InvalidValue {
                field: "descriptors.sampler_capacity".to_string(),
                reason: "Shader-visible sampler heaps are limited to 2048 descriptors".to_string(),
            }.into());
        }

        Ok(())
    }
}

impl GraphicsBackend {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackend::Headless => "Headless",
            GraphicsBackend::Dx12 => "DirectX 12",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gallery.width, 640);
        assert_eq!(config.gallery.height, 360);
        assert_eq!(config.gallery.samples.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.gallery.width = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.descriptors.sampler_capacity = 4096;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml_str(
            r#"
            [graphics]
            backend = "headless"

            [gallery]
            frames = 7
            samples = ["triangle"]
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics.backend, GraphicsBackend::Headless);
        assert_eq!(config.gallery.frames, 7);
        assert_eq!(config.gallery.samples, vec!["triangle".to_string()]);
        assert_eq!(config.gallery.width, 640);
        assert_eq!(config.descriptors.cbv_srv_uav_capacity, 256);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args(["rt_gallery", "--headless", "--frames", "12", "--width", "32"]);
        assert_eq!(config.graphics.backend, GraphicsBackend::Headless);
        assert_eq!(config.gallery.frames, 12);
        assert_eq!(config.gallery.width, 32);
        assert_eq!(config.gallery.height, 360);
    }

    #[test]
    fn test_save_and_reload() {
        let path = std::env::temp_dir().join(format!("rt_gallery_config_{}.toml", std::process::id()));
        let mut config = Config::default();
        config.gallery.frames = 42;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.gallery.frames, 42);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = Config::from_file("definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
