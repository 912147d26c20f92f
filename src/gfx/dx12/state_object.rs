//! 光线追踪状态对象的子对象翻译
//!
//! 子对象按调用者给出的顺序原样提交。先为每种子对象准备好描述结构，
//! 再统一生成 `D3D12_STATE_SUBOBJECT` 数组，保证指针在 `CreateStateObject`
//! 返回前一直有效。

use std::mem::ManuallyDrop;

use windows::core::{Interface, HSTRING, PCWSTR};
use windows::Win32::Graphics::Direct3D12::*;

use crate::core::error::{RaytracingError, Result};
use crate::renderer::pipeline::{HitGroupType, Subobject};

use super::device::Dx12Device;

/// 借用 COM 指针而不增加引用计数
///
/// 返回值不会被释放，调用者保证原对象在使用期间存活。
pub(super) fn borrow_interface<T: Interface>(value: &T) -> ManuallyDrop<Option<T>> {
    unsafe { std::mem::transmute_copy(value) }
}

enum Prepared {
    GlobalRootSignature(usize),
    LocalRootSignature(usize),
    Library(usize),
    ShaderConfig(usize),
    PipelineConfig(usize),
    HitGroup(usize),
}

fn wide(names: &[HSTRING], index: Option<usize>) -> PCWSTR {
    index.map_or(PCWSTR::null(), |i| PCWSTR(names[i].as_ptr()))
}

pub(super) fn create_state_object(
    device: &ID3D12Device5,
    subobjects: &[Subobject<'_, Dx12Device>],
) -> Result<ID3D12StateObject> {
    // 所有宽字符串先收集起来，HSTRING 的缓冲区在移动后保持不变
    let mut names: Vec<HSTRING> = Vec::new();
    let mut intern = |name: &str| -> usize {
        names.push(HSTRING::from(name));
        names.len() - 1
    };

    let mut global_signatures = Vec::new();
    let mut local_signatures = Vec::new();
    let mut library_exports: Vec<Vec<usize>> = Vec::new();
    let mut libraries: Vec<&[u8]> = Vec::new();
    let mut shader_configs = Vec::new();
    let mut pipeline_configs = Vec::new();
    let mut hit_groups: Vec<(D3D12_HIT_GROUP_TYPE, usize, Option<usize>, Option<usize>, Option<usize>)> = Vec::new();
    let mut order = Vec::with_capacity(subobjects.len());

    for subobject in subobjects {
        match subobject {
            Subobject::GlobalRootSignature(signature) => {
                order.push(Prepared::GlobalRootSignature(global_signatures.len()));
                global_signatures.push(D3D12_GLOBAL_ROOT_SIGNATURE {
                    pGlobalRootSignature: borrow_interface(*signature),
                });
            }
            Subobject::LocalRootSignature(signature) => {
                order.push(Prepared::LocalRootSignature(local_signatures.len()));
                local_signatures.push(D3D12_LOCAL_ROOT_SIGNATURE {
                    pLocalRootSignature: borrow_interface(*signature),
                });
            }
            Subobject::DxilLibrary { bytecode, exports } => {
                order.push(Prepared::Library(libraries.len()));
                libraries.push(*bytecode);
                library_exports.push(exports.iter().map(|e| intern(e)).collect());
            }
            Subobject::ShaderConfig { max_payload_size, max_attribute_size } => {
                order.push(Prepared::ShaderConfig(shader_configs.len()));
                shader_configs.push(D3D12_RAYTRACING_SHADER_CONFIG {
                    MaxPayloadSizeInBytes: *max_payload_size,
                    MaxAttributeSizeInBytes: *max_attribute_size,
                });
            }
            Subobject::PipelineConfig { max_trace_recursion_depth } => {
                order.push(Prepared::PipelineConfig(pipeline_configs.len()));
                pipeline_configs.push(D3D12_RAYTRACING_PIPELINE_CONFIG {
                    MaxTraceRecursionDepth: *max_trace_recursion_depth,
                });
            }
            Subobject::HitGroup(group) => {
                order.push(Prepared::HitGroup(hit_groups.len()));
                let kind = match group.kind {
                    HitGroupType::Triangles => D3D12_HIT_GROUP_TYPE_TRIANGLES,
                    HitGroupType::ProceduralPrimitive => D3D12_HIT_GROUP_TYPE_PROCEDURAL_PRIMITIVE,
                };
                let export = intern(&group.name);
                let any_hit = group.any_hit.as_deref().map(&mut intern);
                let closest_hit = group.closest_hit.as_deref().map(&mut intern);
                let intersection = group.intersection.as_deref().map(&mut intern);
                hit_groups.push((kind, export, any_hit, closest_hit, intersection));
            }
        }
    }

    let mut export_descs: Vec<Vec<D3D12_EXPORT_DESC>> = library_exports
        .iter()
        .map(|exports| {
            exports
                .iter()
                .map(|&i| D3D12_EXPORT_DESC {
                    Name: PCWSTR(names[i].as_ptr()),
                    ExportToRename: PCWSTR::null(),
                    Flags: D3D12_EXPORT_FLAG_NONE,
                })
                .collect()
        })
        .collect();

    let library_descs: Vec<D3D12_DXIL_LIBRARY_DESC> = libraries
        .iter()
        .zip(export_descs.iter_mut())
        .map(|(bytecode, exports)| D3D12_DXIL_LIBRARY_DESC {
            DXILLibrary: D3D12_SHADER_BYTECODE {
                pShaderBytecode: bytecode.as_ptr() as _,
                BytecodeLength: bytecode.len(),
            },
            NumExports: exports.len() as u32,
            pExports: exports.as_mut_ptr(),
        })
        .collect();

    let hit_group_descs: Vec<D3D12_HIT_GROUP_DESC> = hit_groups
        .iter()
        .map(|&(kind, export, any_hit, closest_hit, intersection)| D3D12_HIT_GROUP_DESC {
            HitGroupExport: PCWSTR(names[export].as_ptr()),
            Type: kind,
            AnyHitShaderImport: wide(&names, any_hit),
            ClosestHitShaderImport: wide(&names, closest_hit),
            IntersectionShaderImport: wide(&names, intersection),
        })
        .collect();

    let d3d_subobjects: Vec<D3D12_STATE_SUBOBJECT> = order
        .iter()
        .map(|prepared| match *prepared {
            Prepared::GlobalRootSignature(i) => D3D12_STATE_SUBOBJECT {
                Type: D3D12_STATE_SUBOBJECT_TYPE_GLOBAL_ROOT_SIGNATURE,
                pDesc: &global_signatures[i] as *const _ as _,
            },
            Prepared::LocalRootSignature(i) => D3D12_STATE_SUBOBJECT {
                Type: D3D12_STATE_SUBOBJECT_TYPE_LOCAL_ROOT_SIGNATURE,
                pDesc: &local_signatures[i] as *const _ as _,
            },
            Prepared::Library(i) => D3D12_STATE_SUBOBJECT {
                Type: D3D12_STATE_SUBOBJECT_TYPE_DXIL_LIBRARY,
                pDesc: &library_descs[i] as *const _ as _,
            },
            Prepared::ShaderConfig(i) => D3D12_STATE_SUBOBJECT {
                Type: D3D12_STATE_SUBOBJECT_TYPE_RAYTRACING_SHADER_CONFIG,
                pDesc: &shader_configs[i] as *const _ as _,
            },
            Prepared::PipelineConfig(i) => D3D12_STATE_SUBOBJECT {
                Type: D3D12_STATE_SUBOBJECT_TYPE_RAYTRACING_PIPELINE_CONFIG,
                pDesc: &pipeline_configs[i] as *const _ as _,
            },
            Prepared::HitGroup(i) => D3D12_STATE_SUBOBJECT {
                Type: D3D12_STATE_SUBOBJECT_TYPE_HIT_GROUP,
                pDesc: &hit_group_descs[i] as *const _ as _,
            },
        })
        .collect();

    let desc = D3D12_STATE_OBJECT_DESC {
        Type: D3D12_STATE_OBJECT_TYPE_RAYTRACING_PIPELINE,
        NumSubobjects: d3d_subobjects.len() as u32,
        pSubobjects: d3d_subobjects.as_ptr(),
    };

    unsafe { device.CreateStateObject(&desc) }
        .map_err(|e| RaytracingError::PipelineCreation(format!("CreateStateObject failed: {}", e)).into())
}

/// 查询导出名对应的 32 字节着色器标识符
pub(super) fn shader_identifier(state_object: &ID3D12StateObject, export: &str) -> Result<[u8; 32]> {
    let properties: ID3D12StateObjectProperties = state_object
        .cast()
        .map_err(|e| RaytracingError::PipelineCreation(format!("ID3D12StateObjectProperties: {}", e)))?;

    unsafe {
        let identifier = properties.GetShaderIdentifier(&HSTRING::from(export));
        if identifier.is_null() {
            return Err(RaytracingError::MissingExport(export.to_string()).into());
        }
        let mut bytes = [0u8; D3D12_SHADER_IDENTIFIER_SIZE_IN_BYTES as usize];
        std::ptr::copy_nonoverlapping(identifier as *const u8, bytes.as_mut_ptr(), bytes.len());
        Ok(bytes)
    }
}
