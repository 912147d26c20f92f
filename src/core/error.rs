//! 错误处理模块
//!
//! 定义了光线追踪核心和示例宿主使用的统一错误类型。
//!
//! # 设计原则
//!
//! - 驱动/API 调用失败、能力不足、逻辑契约违反都映射为错误值，不做重试
//! - 为每种错误类型提供清晰的上下文信息（失败的调用或驱动诊断文本）
//! - 支持错误链（error source）
//! - 易于模式匹配和错误处理

use std::fmt;

/// 统一的 Result 类型
///
/// 所有可能返回错误的函数都应该使用这个类型。
pub type Result<T> = std::result::Result<T, GalleryError>;

/// 顶层错误类型
#[derive(Debug)]
pub enum GalleryError {
    /// 配置错误
    Config(ConfigError),

    /// 图形 API 错误
    Graphics(GraphicsError),

    /// 光线追踪绑定层错误
    Raytracing(RaytracingError),

    /// IO 错误
    Io(std::io::Error),

    /// 日志系统错误
    Log(String),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug)]
pub enum GraphicsError {
    /// 设备创建失败
    DeviceCreation(String),

    /// 设备不支持所需能力（例如没有 DXR 支持）
    Capability(String),

    /// 资源创建失败
    ResourceCreation(String),

    /// 显存不足
    OutOfMemory { requested: u64, name: String },

    /// 命令执行失败
    CommandExecution(String),

    /// 着色器库加载失败
    ShaderLoading(String),
}

/// 光线追踪绑定层相关的错误
#[derive(Debug)]
pub enum RaytracingError {
    /// 设备无法给出加速结构的 prebuild 信息
    PrebuildInfo(String),

    /// 根签名序列化失败，携带驱动的诊断文本
    RootSignatureSerialization(String),

    /// 状态对象（管线）创建失败
    PipelineCreation(String),

    /// 管线中不存在请求的导出名
    MissingExport(String),

    /// 同一 BLAS 中混合了三角形与程序化几何体
    MixedGeometry,

    /// 句柄指向已释放或已复用的槽位
    StaleHandle(String),

    /// 资源仍被其他对象引用，不能释放
    StructureInUse { handle: String, references: u32 },

    /// 着色器记录的根参数超出记录容量
    ShaderRecordOverflow { export: String, capacity: u64, required: u64 },

    /// 描述符堆已满
    DescriptorHeapExhausted { heap: &'static str, capacity: u32 },

    /// 逻辑契约违反
    ContractViolation(String),
}

impl fmt::Display for GalleryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GalleryError::Config(e) => write!(f, "Configuration error: {}", e),
            GalleryError::Graphics(e) => write!(f, "Graphics error: {}", e),
            GalleryError::Raytracing(e) => write!(f, "Raytracing error: {}", e),
            GalleryError::Io(e) => write!(f, "IO error: {}", e),
            GalleryError::Log(msg) => write!(f, "Log error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::DeviceCreation(msg) => write!(f, "Device creation failed: {}", msg),
            GraphicsError::Capability(msg) => write!(f, "Unsupported GPU capability: {}", msg),
            GraphicsError::ResourceCreation(msg) => write!(f, "Resource creation failed: {}", msg),
            GraphicsError::OutOfMemory { requested, name } => {
                write!(f, "Out of GPU memory allocating {} bytes for '{}'", requested, name)
            }
            GraphicsError::CommandExecution(msg) => write!(f, "Command execution failed: {}", msg),
            GraphicsError::ShaderLoading(msg) => write!(f, "Shader library loading failed: {}", msg),
        }
    }
}

impl fmt::Display for RaytracingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaytracingError::PrebuildInfo(msg) => {
                write!(f, "Acceleration structure prebuild info unavailable: {}", msg)
            }
            RaytracingError::RootSignatureSerialization(msg) => {
                write!(f, "Root signature serialization failed: {}", msg)
            }
            RaytracingError::PipelineCreation(msg) => {
                write!(f, "Raytracing pipeline creation failed: {}", msg)
            }
            RaytracingError::MissingExport(name) => {
                write!(f, "Shader export '{}' not found in pipeline", name)
            }
            RaytracingError::MixedGeometry => {
                write!(f, "All geometries of a bottom-level structure must share one primitive type")
            }
            RaytracingError::StaleHandle(handle) => write!(f, "Stale handle: {}", handle),
            RaytracingError::StructureInUse { handle, references } => {
                write!(f, "{} is still referenced by {} top-level structure(s)", handle, references)
            }
            RaytracingError::ShaderRecordOverflow { export, capacity, required } => write!(
                f,
                "Root arguments of '{}' need {} bytes but the record holds {}",
                export, required, capacity
            ),
            RaytracingError::DescriptorHeapExhausted { heap, capacity } => {
                write!(f, "{} descriptor heap exhausted ({} slots)", heap, capacity)
            }
            RaytracingError::ContractViolation(msg) => write!(f, "Contract violation: {}", msg),
        }
    }
}

impl std::error::Error for GalleryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GalleryError::Io(e) => Some(e),
            GalleryError::Config(e) => Some(e),
            GalleryError::Graphics(e) => Some(e),
            GalleryError::Raytracing(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}
impl std::error::Error for RaytracingError {}

// 实现 From trait 以便于错误转换
impl From<std::io::Error> for GalleryError {
    fn from(err: std::io::Error) -> Self {
        GalleryError::Io(err)
    }
}

impl From<ConfigError> for GalleryError {
    fn from(err: ConfigError) -> Self {
        GalleryError::Config(err)
    }
}

impl From<GraphicsError> for GalleryError {
    fn from(err: GraphicsError) -> Self {
        GalleryError::Graphics(err)
    }
}

impl From<RaytracingError> for GalleryError {
    fn from(err: RaytracingError) -> Self {
        GalleryError::Raytracing(err)
    }
}
