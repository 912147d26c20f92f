//! 顶点、索引与纹素格式
//!
//! 只覆盖光线追踪几何体与输出缓冲需要的格式。
//! 对不支持的格式查询字节大小属于逻辑契约违反，返回错误而不是猜测。

use crate::core::error::{RaytracingError, Result};
use super::align::{align_up, TEXTURE_DATA_PITCH_ALIGNMENT};

/// 资源格式（与 DXGI_FORMAT 一一对应的子集）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Unknown,
    R32G32B32A32Float,
    R32G32B32Float,
    R32G32Float,
    R16G16B16A16Float,
    R16G16Float,
    R8G8B8A8Unorm,
    R32Uint,
    R16Uint,
    /// 块压缩格式，没有按纹素计的字节大小
    Bc1Unorm,
}

impl Format {
    /// 单个元素（顶点位置、索引或纹素）的字节大小
    pub fn byte_size(self) -> Result<u32> {
        match self {
            Format::R32G32B32A32Float => Ok(16),
            Format::R32G32B32Float => Ok(12),
            Format::R32G32Float | Format::R16G16B16A16Float => Ok(8),
            Format::R16G16Float | Format::R8G8B8A8Unorm | Format::R32Uint => Ok(4),
            Format::R16Uint => Ok(2),
            Format::Unknown | Format::Bc1Unorm => Err(RaytracingError::ContractViolation(
                format!("byte size requested for unsupported format {:?}", self),
            )
            .into()),
        }
    }

    /// 是否可以作为 BLAS 三角形几何体的顶点位置格式
    pub fn is_vertex_position_format(self) -> bool {
        matches!(
            self,
            Format::R32G32B32Float
                | Format::R32G32Float
                | Format::R16G16B16A16Float
                | Format::R16G16Float
        )
    }

    /// 是否可以作为索引格式
    pub fn is_index_format(self) -> bool {
        matches!(self, Format::R32Uint | Format::R16Uint)
    }
}

/// 纹理一行的字节跨度，按 `D3D12_TEXTURE_DATA_PITCH_ALIGNMENT` 对齐
pub fn texture_row_pitch(width: u32, format: Format) -> Result<u64> {
    let bytes = width as u64 * format.byte_size()? as u64;
    Ok(align_up(bytes, TEXTURE_DATA_PITCH_ALIGNMENT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_sizes() {
        assert_eq!(Format::R32G32B32Float.byte_size().unwrap(), 12);
        assert_eq!(Format::R16Uint.byte_size().unwrap(), 2);
        assert_eq!(Format::R8G8B8A8Unorm.byte_size().unwrap(), 4);
    }

    #[test]
    fn test_unsupported_format_is_contract_violation() {
        let err = Format::Bc1Unorm.byte_size().unwrap_err();
        assert!(err.to_string().contains("Contract violation"));
        assert!(Format::Unknown.byte_size().is_err());
    }

    #[test]
    fn test_row_pitch_alignment() {
        assert_eq!(texture_row_pitch(640, Format::R8G8B8A8Unorm).unwrap(), 2560);
        assert_eq!(texture_row_pitch(3, Format::R8G8B8A8Unorm).unwrap(), 256);
        assert_eq!(texture_row_pitch(65, Format::R8G8B8A8Unorm).unwrap(), 512);
    }

    #[test]
    fn test_format_roles() {
        assert!(Format::R32G32B32Float.is_vertex_position_format());
        assert!(!Format::R32Uint.is_vertex_position_format());
        assert!(Format::R16Uint.is_index_format());
    }
}
