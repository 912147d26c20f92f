//! GPU 内存布局常量与对齐工具
//!
//! 这些常量必须与 D3D12 头文件中的值逐位一致，
//! 否则 GPU 会错误解析着色器表或加速结构。

/// `D3D12_SHADER_IDENTIFIER_SIZE_IN_BYTES`
pub const SHADER_IDENTIFIER_SIZE: u64 = 32;

/// `D3D12_RAYTRACING_SHADER_RECORD_BYTE_ALIGNMENT`
pub const SHADER_RECORD_ALIGNMENT: u64 = 32;

/// `D3D12_RAYTRACING_SHADER_TABLE_BYTE_ALIGNMENT`
pub const SHADER_TABLE_ALIGNMENT: u64 = 64;

/// `D3D12_TEXTURE_DATA_PITCH_ALIGNMENT`
pub const TEXTURE_DATA_PITCH_ALIGNMENT: u64 = 256;

/// `D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BYTE_ALIGNMENT`
pub const ACCELERATION_STRUCTURE_ALIGNMENT: u64 = 256;

/// `D3D12_CONSTANT_BUFFER_DATA_PLACEMENT_ALIGNMENT`
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// `sizeof(D3D12_GPU_DESCRIPTOR_HANDLE)`，本地根参数中描述符表占用的字节数
pub const DESCRIPTOR_HANDLE_SIZE: u64 = 8;

/// `D3D12_RAYTRACING_MAX_DECLARABLE_TRACE_RECURSION_DEPTH`
pub const MAX_TRACE_RECURSION_DEPTH: u32 = 31;

/// `D3D12_RAYTRACING_MAX_ATTRIBUTE_SIZE_IN_BYTES`
pub const MAX_ATTRIBUTE_SIZE: u32 = 32;

/// `sizeof(D3D12_RAYTRACING_INSTANCE_DESC)`
pub const INSTANCE_DESC_SIZE: u64 = 64;

/// `sizeof(D3D12_RAYTRACING_AABB)`
pub const AABB_SIZE: u64 = 24;

/// 向上对齐到 `align_size` 的整数倍
///
/// `align_size` 不要求是 2 的幂，但必须大于 0。
/// `align_up(0, a) == 0`。
///
/// 结果必须能用 `u64` 表示，即 `size <= u64::MAX - (align_size - 1)`
/// 或 `size` 本身已对齐。驱动报告的大小先经过 [`checked_align_up`]。
#[inline]
pub fn align_up(size: u64, align_size: u64) -> u64 {
    debug_assert!(align_size > 0, "alignment must be non-zero");
    size.div_ceil(align_size) * align_size
}

/// 向上对齐；`align_size` 为 0 或结果超出 `u64` 时返回 `None`
#[inline]
pub fn checked_align_up(size: u64, align_size: u64) -> Option<u64> {
    size.checked_next_multiple_of(align_size)
}

/// `size` 是否已经是 `align_size` 的整数倍
#[inline]
pub fn is_aligned(size: u64, align_size: u64) -> bool {
    size % align_size == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up_properties() {
        for align_size in [1u64, 2, 3, 8, 24, 32, 64, 100, 256] {
            for size in 0u64..600 {
                let aligned = align_up(size, align_size);
                assert_eq!(aligned % align_size, 0, "size={} align={}", size, align_size);
                assert!(aligned >= size);
                assert!(aligned - size < align_size);
            }
            assert_eq!(align_up(0, align_size), 0);
        }
    }

    #[test]
    fn test_align_up_known_values() {
        assert_eq!(align_up(32, SHADER_RECORD_ALIGNMENT), 32);
        assert_eq!(align_up(40, SHADER_RECORD_ALIGNMENT), 64);
        assert_eq!(align_up(65, SHADER_TABLE_ALIGNMENT), 128);
        assert_eq!(align_up(257, ACCELERATION_STRUCTURE_ALIGNMENT), 512);
    }

    #[test]
    fn test_checked_align_up_at_the_top_of_the_range() {
        let last = u64::MAX - u64::MAX % ACCELERATION_STRUCTURE_ALIGNMENT;
        assert_eq!(checked_align_up(last, ACCELERATION_STRUCTURE_ALIGNMENT), Some(last));
        assert_eq!(checked_align_up(last + 1, ACCELERATION_STRUCTURE_ALIGNMENT), None);
        assert_eq!(checked_align_up(u64::MAX, 1), Some(u64::MAX));
        assert_eq!(checked_align_up(10, 0), None);
        assert_eq!(checked_align_up(257, ACCELERATION_STRUCTURE_ALIGNMENT), Some(align_up(257, 256)));
    }

    #[test]
    fn test_platform_constants() {
        assert_eq!(SHADER_IDENTIFIER_SIZE, 32);
        assert!(is_aligned(SHADER_TABLE_ALIGNMENT, SHADER_RECORD_ALIGNMENT));
        assert_eq!(INSTANCE_DESC_SIZE, 64);
    }
}
