//! 与后端无关的类型到 D3D12 结构的转换
//!
//! 含指针的 D3D12 结构（几何体数组、描述符范围）需要调用期间保持有效，
//! 这里的包装类型同时持有结构本身和它引用的存储。

use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::renderer::acceleration::{AccelerationStructureInputs, BuildFlags, GeometryData};
use crate::renderer::format::Format;
use crate::renderer::resource::ResourceState;
use crate::renderer::root_signature::{RegisterType, RootParameter, RootSignatureKind, RootSignatureLayout};

pub(super) fn map_resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Common => D3D12_RESOURCE_STATE_COMMON,
        ResourceState::GenericRead => D3D12_RESOURCE_STATE_GENERIC_READ,
        ResourceState::CopySource => D3D12_RESOURCE_STATE_COPY_SOURCE,
        ResourceState::CopyDest => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceState::UnorderedAccess => D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
        ResourceState::NonPixelShaderResource => D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE,
        ResourceState::RaytracingAccelerationStructure => D3D12_RESOURCE_STATE_RAYTRACING_ACCELERATION_STRUCTURE,
    }
}

pub(super) fn map_format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::Unknown => DXGI_FORMAT_UNKNOWN,
        Format::R32G32B32A32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        Format::R32G32B32Float => DXGI_FORMAT_R32G32B32_FLOAT,
        Format::R32G32Float => DXGI_FORMAT_R32G32_FLOAT,
        Format::R16G16B16A16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        Format::R16G16Float => DXGI_FORMAT_R16G16_FLOAT,
        Format::R8G8B8A8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::R32Uint => DXGI_FORMAT_R32_UINT,
        Format::R16Uint => DXGI_FORMAT_R16_UINT,
        Format::Bc1Unorm => DXGI_FORMAT_BC1_UNORM,
    }
}

fn map_build_flags(flags: BuildFlags) -> D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAGS {
    // 位值与 D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAGS 相同
    D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAGS(flags.bits() as _)
}

/// 构建输入及其引用的几何体数组
pub(super) struct BuildInputs {
    pub(super) desc: D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS,
    _geometry_descs: Vec<D3D12_RAYTRACING_GEOMETRY_DESC>,
}

impl BuildInputs {
    pub(super) fn new(inputs: &AccelerationStructureInputs) -> Self {
        let mut desc = D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS {
            Flags: map_build_flags(inputs.flags()),
            DescsLayout: D3D12_ELEMENTS_LAYOUT_ARRAY,
            ..Default::default()
        };

        match inputs {
            AccelerationStructureInputs::BottomLevel { geometries, .. } => {
                let geometry_descs: Vec<D3D12_RAYTRACING_GEOMETRY_DESC> = geometries
                    .iter()
                    .map(|geometry| {
                        let flags = if geometry.opaque {
                            D3D12_RAYTRACING_GEOMETRY_FLAG_OPAQUE
                        } else {
                            D3D12_RAYTRACING_GEOMETRY_FLAG_NONE
                        };
                        match &geometry.data {
                            GeometryData::Triangles(t) => D3D12_RAYTRACING_GEOMETRY_DESC {
                                Type: D3D12_RAYTRACING_GEOMETRY_TYPE_TRIANGLES,
                                Flags: flags,
                                Anonymous: D3D12_RAYTRACING_GEOMETRY_DESC_0 {
                                    Triangles: D3D12_RAYTRACING_GEOMETRY_TRIANGLES_DESC {
                                        Transform3x4: t.transform,
                                        IndexFormat: map_format(t.index_format),
                                        VertexFormat: map_format(t.vertex_format),
                                        IndexCount: t.index_count,
                                        VertexCount: t.vertex_count,
                                        IndexBuffer: t.index_buffer,
                                        VertexBuffer: D3D12_GPU_VIRTUAL_ADDRESS_AND_STRIDE {
                                            StartAddress: t.vertex_buffer,
                                            StrideInBytes: t.vertex_stride,
                                        },
                                    },
                                },
                            },
                            GeometryData::Aabbs(a) => D3D12_RAYTRACING_GEOMETRY_DESC {
                                Type: D3D12_RAYTRACING_GEOMETRY_TYPE_PROCEDURAL_PRIMITIVE_AABBS,
                                Flags: flags,
                                Anonymous: D3D12_RAYTRACING_GEOMETRY_DESC_0 {
                                    AABBs: D3D12_RAYTRACING_GEOMETRY_AABBS_DESC {
                                        AABBCount: a.count as u64,
                                        AABBs: D3D12_GPU_VIRTUAL_ADDRESS_AND_STRIDE {
                                            StartAddress: a.aabb_buffer,
                                            StrideInBytes: a.stride,
                                        },
                                    },
                                },
                            },
                        }
                    })
                    .collect();

                desc.Type = D3D12_RAYTRACING_ACCELERATION_STRUCTURE_TYPE_BOTTOM_LEVEL;
                desc.NumDescs = geometry_descs.len() as u32;
                desc.Anonymous = D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS_0 {
                    pGeometryDescs: geometry_descs.as_ptr(),
                };
                Self { desc, _geometry_descs: geometry_descs }
            }
            AccelerationStructureInputs::TopLevel { instance_descs, instance_count, .. } => {
                desc.Type = D3D12_RAYTRACING_ACCELERATION_STRUCTURE_TYPE_TOP_LEVEL;
                desc.NumDescs = *instance_count;
                desc.Anonymous = D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS_0 {
                    InstanceDescs: *instance_descs,
                };
                Self { desc, _geometry_descs: Vec::new() }
            }
        }
    }
}

fn map_range_type(register_type: RegisterType) -> D3D12_DESCRIPTOR_RANGE_TYPE {
    match register_type {
        RegisterType::Srv => D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
        RegisterType::Uav => D3D12_DESCRIPTOR_RANGE_TYPE_UAV,
        RegisterType::Cbv => D3D12_DESCRIPTOR_RANGE_TYPE_CBV,
        RegisterType::Sampler => D3D12_DESCRIPTOR_RANGE_TYPE_SAMPLER,
    }
}

/// 1.1 版本根签名描述及其引用的参数和范围数组
pub(super) struct RootSignatureDesc {
    pub(super) desc: D3D12_VERSIONED_ROOT_SIGNATURE_DESC,
    _parameters: Vec<D3D12_ROOT_PARAMETER1>,
    _ranges: Vec<Vec<D3D12_DESCRIPTOR_RANGE1>>,
}

impl RootSignatureDesc {
    pub(super) fn new(layout: &RootSignatureLayout) -> Self {
        // 描述符与数据都按易变处理，与 1.0 版本根签名的语义一致
        let mut ranges: Vec<Vec<D3D12_DESCRIPTOR_RANGE1>> = layout
            .parameters
            .iter()
            .map(|parameter| match parameter {
                RootParameter::DescriptorTable(table) => table
                    .iter()
                    .map(|range| D3D12_DESCRIPTOR_RANGE1 {
                        RangeType: map_range_type(range.register_type),
                        NumDescriptors: range.count,
                        BaseShaderRegister: range.base_register,
                        RegisterSpace: range.register_space,
                        Flags: if range.register_type == RegisterType::Sampler {
                            D3D12_DESCRIPTOR_RANGE_FLAG_DESCRIPTORS_VOLATILE
                        } else {
                            D3D12_DESCRIPTOR_RANGE_FLAG_DESCRIPTORS_VOLATILE
                                | D3D12_DESCRIPTOR_RANGE_FLAG_DATA_VOLATILE
                        },
                        OffsetInDescriptorsFromTableStart: range.offset_in_table,
                    })
                    .collect(),
                _ => Vec::new(),
            })
            .collect();

        let mut parameters: Vec<D3D12_ROOT_PARAMETER1> = layout
            .parameters
            .iter()
            .zip(ranges.iter_mut())
            .map(|(parameter, table)| match parameter {
                RootParameter::DescriptorTable(_) => D3D12_ROOT_PARAMETER1 {
                    ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                    Anonymous: D3D12_ROOT_PARAMETER1_0 {
                        DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE1 {
                            NumDescriptorRanges: table.len() as u32,
                            pDescriptorRanges: table.as_mut_ptr(),
                        },
                    },
                    ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
                },
                RootParameter::Constants { register, space, num_values } => D3D12_ROOT_PARAMETER1 {
                    ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
                    Anonymous: D3D12_ROOT_PARAMETER1_0 {
                        Constants: D3D12_ROOT_CONSTANTS {
                            ShaderRegister: *register,
                            RegisterSpace: *space,
                            Num32BitValues: *num_values,
                        },
                    },
                    ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
                },
                RootParameter::ShaderResourceView { register, space } => D3D12_ROOT_PARAMETER1 {
                    ParameterType: D3D12_ROOT_PARAMETER_TYPE_SRV,
                    Anonymous: D3D12_ROOT_PARAMETER1_0 {
                        Descriptor: D3D12_ROOT_DESCRIPTOR1 {
                            ShaderRegister: *register,
                            RegisterSpace: *space,
                            Flags: D3D12_ROOT_DESCRIPTOR_FLAG_DATA_VOLATILE,
                        },
                    },
                    ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
                },
            })
            .collect();

        let desc = D3D12_VERSIONED_ROOT_SIGNATURE_DESC {
            Version: D3D_ROOT_SIGNATURE_VERSION_1_1,
            Anonymous: D3D12_VERSIONED_ROOT_SIGNATURE_DESC_0 {
                Desc_1_1: D3D12_ROOT_SIGNATURE_DESC1 {
                    NumParameters: parameters.len() as u32,
                    pParameters: parameters.as_mut_ptr(),
                    NumStaticSamplers: 0,
                    pStaticSamplers: std::ptr::null_mut(),
                    Flags: match layout.kind {
                        RootSignatureKind::Global => D3D12_ROOT_SIGNATURE_FLAG_NONE,
                        RootSignatureKind::Local => D3D12_ROOT_SIGNATURE_FLAG_LOCAL_ROOT_SIGNATURE,
                    },
                },
            },
        };

        Self {
            desc,
            _parameters: parameters,
            _ranges: ranges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::acceleration::{AabbGeometry, GeometryDesc};
    use crate::renderer::root_signature::Binding;

    #[test]
    fn test_build_flag_bits_match_d3d12() {
        assert_eq!(
            map_build_flags(BuildFlags::ALLOW_UPDATE),
            D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_ALLOW_UPDATE
        );
        assert_eq!(
            map_build_flags(BuildFlags::PREFER_FAST_TRACE),
            D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_PREFER_FAST_TRACE
        );
    }

    #[test]
    fn test_aabb_inputs() {
        let inputs = AccelerationStructureInputs::BottomLevel {
            flags: BuildFlags::NONE,
            geometries: vec![GeometryDesc {
                opaque: true,
                data: GeometryData::Aabbs(AabbGeometry { aabb_buffer: 0x1000, stride: 24, count: 3 }),
            }],
        };
        let converted = BuildInputs::new(&inputs);
        assert_eq!(converted.desc.Type, D3D12_RAYTRACING_ACCELERATION_STRUCTURE_TYPE_BOTTOM_LEVEL);
        assert_eq!(converted.desc.NumDescs, 1);
    }

    #[test]
    fn test_root_signature_desc_parameters() {
        let layout = RootSignatureLayout::from_bindings(
            RootSignatureKind::Local,
            &[Binding::uav(0, 0), Binding::srv(0, 0)],
        )
        .unwrap();
        let converted = RootSignatureDesc::new(&layout);
        unsafe {
            let desc = converted.desc.Anonymous.Desc_1_1;
            assert_eq!(desc.NumParameters as usize, layout.parameters.len());
            assert_eq!(desc.Flags, D3D12_ROOT_SIGNATURE_FLAG_LOCAL_ROOT_SIGNATURE);
        }
    }
}
