//! 光线追踪管线组装
//!
//! 状态对象由子对象列表描述，顺序固定：
//!
//! 1. 全局根签名
//! 2. 局部根签名（可选，作为所有导出的默认关联）
//! 3. DXIL 库及其导出
//! 4. 着色器配置（payload / attribute 大小）
//! 5. 管线配置（最大递归深度）
//! 6. 每个命中组一个子对象
//!
//! 提交给设备之前先校验导出符号表，之后着色器表只通过 `ShaderExport`
//! 引用导出，拼错的名字在创建管线时就会失败。

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::core::error::{GraphicsError, RaytracingError, Result};
use super::align::{MAX_ATTRIBUTE_SIZE, MAX_TRACE_RECURSION_DEPTH, SHADER_IDENTIFIER_SIZE};
use super::device::RaytracingDevice;
use super::root_signature::{RootSignature, RootSignatureKind};

/// 着色器标识符（32 字节，不透明）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderIdentifier(pub [u8; SHADER_IDENTIFIER_SIZE as usize]);

impl ShaderIdentifier {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// 预编译的 DXIL 着色器库
///
/// 导出名和字节码一起声明，管线创建时据此校验命中组。
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    bytecode: Vec<u8>,
    exports: Vec<String>,
}

impl ShaderLibrary {
    pub fn new<S: Into<String>>(bytecode: Vec<u8>, exports: impl IntoIterator<Item = S>) -> Self {
        Self {
            bytecode,
            exports: exports.into_iter().map(Into::into).collect(),
        }
    }

    /// 从 `.dxil` 文件加载
    pub fn from_file<P, S>(path: P, exports: impl IntoIterator<Item = S>) -> Result<Self>
    where
        P: AsRef<Path>,
        S: Into<String>,
    {
        let path = path.as_ref();
        let bytecode = std::fs::read(path).map_err(|e| {
            GraphicsError::ShaderLoading(format!("{}: {}", path.display(), e))
        })?;
        if bytecode.is_empty() {
            return Err(GraphicsError::ShaderLoading(format!("{} is empty", path.display())).into());
        }
        Ok(Self::new(bytecode, exports))
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn exports(&self) -> &[String] {
        &self.exports
    }

    pub fn has_export(&self, name: &str) -> bool {
        self.exports.iter().any(|e| e == name)
    }
}

/// 命中组图元类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HitGroupType {
    Triangles,
    ProceduralPrimitive,
}

/// 命中组
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitGroup {
    pub name: String,
    pub kind: HitGroupType,
    pub closest_hit: String,
    pub any_hit: Option<String>,
    pub intersection: Option<String>,
}

impl HitGroup {
    pub fn triangles(name: impl Into<String>, closest_hit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: HitGroupType::Triangles,
            closest_hit: closest_hit.into(),
            any_hit: None,
            intersection: None,
        }
    }

    pub fn procedural(
        name: impl Into<String>,
        closest_hit: impl Into<String>,
        intersection: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: HitGroupType::ProceduralPrimitive,
            closest_hit: closest_hit.into(),
            any_hit: None,
            intersection: Some(intersection.into()),
        }
    }

    pub fn with_any_hit(mut self, any_hit: impl Into<String>) -> Self {
        self.any_hit = Some(any_hit.into());
        self
    }

    /// 命中组引用的库导出
    pub fn imports(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.closest_hit.as_str())
            .chain(self.any_hit.as_deref())
            .chain(self.intersection.as_deref())
    }
}

/// 管线创建参数，只使用一次
pub struct RaytracingPipelineSetup<D: RaytracingDevice> {
    pub library: ShaderLibrary,
    pub global_root_signature: RootSignature<D>,
    pub local_root_signature: Option<RootSignature<D>>,
    pub hit_groups: Vec<HitGroup>,
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
    pub max_recursion_depth: u32,
}

/// 状态对象子对象
pub enum Subobject<'a, D: RaytracingDevice> {
    GlobalRootSignature(&'a D::RootSignature),
    LocalRootSignature(&'a D::RootSignature),
    DxilLibrary {
        bytecode: &'a [u8],
        exports: &'a [String],
    },
    ShaderConfig {
        max_payload_size: u32,
        max_attribute_size: u32,
    },
    PipelineConfig {
        max_trace_recursion_depth: u32,
    },
    HitGroup(&'a HitGroup),
}

impl<'a, D: RaytracingDevice> Subobject<'a, D> {
    /// D3D12_STATE_SUBOBJECT_TYPE 名称
    pub fn type_name(&self) -> &'static str {
        match self {
            Subobject::GlobalRootSignature(_) => "GLOBAL_ROOT_SIGNATURE",
            Subobject::LocalRootSignature(_) => "LOCAL_ROOT_SIGNATURE",
            Subobject::DxilLibrary { .. } => "DXIL_LIBRARY",
            Subobject::ShaderConfig { .. } => "RAYTRACING_SHADER_CONFIG",
            Subobject::PipelineConfig { .. } => "RAYTRACING_PIPELINE_CONFIG",
            Subobject::HitGroup(_) => "HIT_GROUP",
        }
    }
}

impl<D: RaytracingDevice> RaytracingPipelineSetup<D> {
    /// 按固定顺序生成子对象列表
    pub fn subobjects(&self) -> Vec<Subobject<'_, D>> {
        let mut subobjects = vec![Subobject::GlobalRootSignature(self.global_root_signature.handle())];
        if let Some(local) = &self.local_root_signature {
            subobjects.push(Subobject::LocalRootSignature(local.handle()));
        }
        subobjects.push(Subobject::DxilLibrary {
            bytecode: self.library.bytecode(),
            exports: self.library.exports(),
        });
        subobjects.push(Subobject::ShaderConfig {
            max_payload_size: self.max_payload_size,
            max_attribute_size: self.max_attribute_size,
        });
        subobjects.push(Subobject::PipelineConfig {
            max_trace_recursion_depth: self.max_recursion_depth,
        });
        subobjects.extend(self.hit_groups.iter().map(Subobject::HitGroup));
        subobjects
    }

    /// 校验导出符号表和配置上限
    pub fn validate(&self) -> Result<()> {
        let violation = |msg: String| -> Result<()> { Err(RaytracingError::ContractViolation(msg).into()) };

        if self.global_root_signature.kind() != RootSignatureKind::Global {
            return violation("Global root signature slot holds a local root signature".to_string());
        }
        if let Some(local) = &self.local_root_signature {
            if local.kind() != RootSignatureKind::Local {
                return violation("Local root signature slot holds a global root signature".to_string());
            }
        }
        if self.max_attribute_size > MAX_ATTRIBUTE_SIZE {
            return violation(format!(
                "Max attribute size {} exceeds {} bytes", self.max_attribute_size, MAX_ATTRIBUTE_SIZE
            ));
        }
        if self.max_recursion_depth > MAX_TRACE_RECURSION_DEPTH {
            return violation(format!(
                "Max recursion depth {} exceeds {}", self.max_recursion_depth, MAX_TRACE_RECURSION_DEPTH
            ));
        }

        let mut library_exports = HashSet::new();
        for export in self.library.exports() {
            if !library_exports.insert(export.as_str()) {
                return violation(format!("Library export '{}' declared twice", export));
            }
        }

        let mut hit_group_names = HashSet::new();
        for group in &self.hit_groups {
            if library_exports.contains(group.name.as_str()) || !hit_group_names.insert(group.name.as_str()) {
                return violation(format!("Hit group name '{}' is not unique", group.name));
            }
            for import in group.imports() {
                if !library_exports.contains(import) {
                    return Err(RaytracingError::MissingExport(format!(
                        "{} (imported by hit group '{}')", import, group.name
                    )).into());
                }
            }
            match (group.kind, &group.intersection) {
                (HitGroupType::ProceduralPrimitive, None) => {
                    return violation(format!(
                        "Procedural hit group '{}' needs an intersection shader", group.name
                    ));
                }
                (HitGroupType::Triangles, Some(_)) => {
                    return violation(format!(
                        "Triangle hit group '{}' cannot declare an intersection shader", group.name
                    ));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// 导出的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportKind {
    /// 可以直接放入着色器表的库导出（光线生成、未命中、可调用）
    Shader,
    /// 命中组
    HitGroup,
}

/// 管线中的一个导出，只能由创建它的管线换取标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderExport {
    pipeline: u32,
    index: u32,
    kind: ExportKind,
}

impl ShaderExport {
    pub fn kind(&self) -> ExportKind {
        self.kind
    }
}

static NEXT_PIPELINE_ID: AtomicU32 = AtomicU32::new(1);

/// 已创建的光线追踪管线
pub struct RaytracingPipeline<D: RaytracingDevice> {
    id: u32,
    state_object: D::StateObject,
    global_root_signature: RootSignature<D>,
    local_root_signature: Option<RootSignature<D>>,
    exports: Vec<(String, ExportKind, ShaderIdentifier)>,
}

impl<D: RaytracingDevice> RaytracingPipeline<D> {
    pub fn state_object(&self) -> &D::StateObject {
        &self.state_object
    }

    pub fn global_root_signature(&self) -> &RootSignature<D> {
        &self.global_root_signature
    }

    pub fn local_root_signature(&self) -> Option<&RootSignature<D>> {
        self.local_root_signature.as_ref()
    }

    /// 每条着色器记录的局部参数字节数
    pub fn local_argument_size(&self) -> u64 {
        self.local_root_signature.as_ref().map_or(0, |s| s.local_argument_size())
    }

    /// 按名字查找导出
    pub fn export(&self, name: &str) -> Result<ShaderExport> {
        self.exports
            .iter()
            .position(|(n, _, _)| n == name)
            .map(|index| ShaderExport {
                pipeline: self.id,
                index: index as u32,
                kind: self.exports[index].1,
            })
            .ok_or_else(|| RaytracingError::MissingExport(name.to_string()).into())
    }

    fn entry(&self, export: ShaderExport) -> Result<&(String, ExportKind, ShaderIdentifier)> {
        if export.pipeline != self.id {
            return Err(RaytracingError::ContractViolation(format!(
                "Shader export belongs to pipeline {}, not {}", export.pipeline, self.id
            )).into());
        }
        self.exports
            .get(export.index as usize)
            .ok_or_else(|| RaytracingError::StaleHandle(format!("{:?}", export)).into())
    }

    pub fn export_name(&self, export: ShaderExport) -> Result<&str> {
        Ok(self.entry(export)?.0.as_str())
    }

    pub fn shader_identifier(&self, export: ShaderExport) -> Result<ShaderIdentifier> {
        Ok(self.entry(export)?.2)
    }
}

/// 组装子对象并创建光线追踪状态对象
///
/// 校验失败或驱动拒绝创建都会返回错误，没有部分成功的管线。
pub fn configure_pipeline<D: RaytracingDevice>(
    device: &D,
    setup: RaytracingPipelineSetup<D>,
) -> Result<RaytracingPipeline<D>> {
    setup.validate()?;

    let subobjects = setup.subobjects();
    tracing::debug!(
        subobjects = subobjects.len(),
        hit_groups = setup.hit_groups.len(),
        payload = setup.max_payload_size,
        attributes = setup.max_attribute_size,
        recursion = setup.max_recursion_depth,
        "Creating raytracing state object"
    );
    let state_object = device.create_state_object(&subobjects)?;
    drop(subobjects);

    // 命中组内部引用的库导出不能单独放进着色器表
    let imported: HashSet<&str> = setup.hit_groups.iter().flat_map(|g| g.imports()).collect();
    let mut exports = Vec::new();
    for name in setup.library.exports() {
        if !imported.contains(name.as_str()) {
            let identifier = device.shader_identifier(&state_object, name)?;
            exports.push((name.clone(), ExportKind::Shader, identifier));
        }
    }
    for group in &setup.hit_groups {
        let identifier = device.shader_identifier(&state_object, &group.name)?;
        exports.push((group.name.clone(), ExportKind::HitGroup, identifier));
    }

    crate::engine_info!("Raytracing pipeline created with {} shader table exports", exports.len());

    Ok(RaytracingPipeline {
        id: NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed),
        state_object,
        global_root_signature: setup.global_root_signature,
        local_root_signature: setup.local_root_signature,
        exports,
    })
}
