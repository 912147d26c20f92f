//! 根签名工厂
//!
//! 全局根签名描述整次 DispatchRays 共享的资源，局部根签名描述每条
//! 着色器记录自带的参数。两者都从有序的绑定列表生成：按寄存器类型分组，
//! 每组一个描述符表，组的顺序就是该类型第一次出现的顺序。
//!
//! 生成的 `RootSignatureLayout` 与后端无关，创建后仍然保留，
//! 着色器表据此计算每条记录的局部参数大小。

use crate::core::error::{RaytracingError, Result};
use super::align::{align_up, DESCRIPTOR_HANDLE_SIZE};
use super::device::RaytracingDevice;

/// 寄存器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterType {
    /// `t` 寄存器
    Srv,
    /// `u` 寄存器
    Uav,
    /// `b` 寄存器
    Cbv,
    /// `s` 寄存器
    Sampler,
}

impl RegisterType {
    /// HLSL 寄存器前缀
    pub fn prefix(&self) -> char {
        match self {
            RegisterType::Srv => 't',
            RegisterType::Uav => 'u',
            RegisterType::Cbv => 'b',
            RegisterType::Sampler => 's',
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RegisterType::Srv => "SRV",
            RegisterType::Uav => "UAV",
            RegisterType::Cbv => "CBV",
            RegisterType::Sampler => "SAMPLER",
        }
    }
}

/// 一个资源绑定：寄存器类型、起始寄存器、寄存器空间、描述符数量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Binding {
    pub register_type: RegisterType,
    pub register: u32,
    pub space: u32,
    pub count: u32,
}

impl Binding {
    pub fn new(register_type: RegisterType, register: u32, space: u32) -> Self {
        Self {
            register_type,
            register,
            space,
            count: 1,
        }
    }

    pub fn srv(register: u32, space: u32) -> Self {
        Self::new(RegisterType::Srv, register, space)
    }

    pub fn uav(register: u32, space: u32) -> Self {
        Self::new(RegisterType::Uav, register, space)
    }

    pub fn cbv(register: u32, space: u32) -> Self {
        Self::new(RegisterType::Cbv, register, space)
    }

    pub fn sampler(register: u32, space: u32) -> Self {
        Self::new(RegisterType::Sampler, register, space)
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }
}

/// 根签名类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootSignatureKind {
    Global,
    /// 带 `D3D12_ROOT_SIGNATURE_FLAG_LOCAL_ROOT_SIGNATURE`
    Local,
}

/// 描述符表中的一个范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorRangeDesc {
    pub register_type: RegisterType,
    pub base_register: u32,
    pub register_space: u32,
    pub count: u32,
    /// 相对描述符表起点的偏移（以描述符为单位）
    pub offset_in_table: u32,
}

/// 根参数，可见性固定为所有着色器阶段
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RootParameter {
    DescriptorTable(Vec<DescriptorRangeDesc>),
    /// 内联 32 位常量
    Constants {
        register: u32,
        space: u32,
        num_values: u32,
    },
    /// 根 SRV（直接使用 GPU 地址）
    ShaderResourceView { register: u32, space: u32 },
}

impl RootParameter {
    /// 作为局部根参数时在着色器记录中占用的字节数
    pub fn argument_size(&self) -> u64 {
        match self {
            RootParameter::DescriptorTable(_) => DESCRIPTOR_HANDLE_SIZE,
            RootParameter::Constants { num_values, .. } => 4 * *num_values as u64,
            RootParameter::ShaderResourceView { .. } => 8,
        }
    }

    /// 在着色器记录中的对齐要求：描述符句柄和 GPU 地址 8 字节，常量 4 字节
    pub fn argument_alignment(&self) -> u64 {
        match self {
            RootParameter::Constants { .. } => 4,
            _ => 8,
        }
    }

    fn register_ranges(&self) -> Vec<(usize, RegisterType, u32, u32, u32)> {
        match self {
            RootParameter::DescriptorTable(ranges) => ranges
                .iter()
                .enumerate()
                .map(|(slot, r)| (slot, r.register_type, r.register_space, r.base_register, r.count))
                .collect(),
            RootParameter::Constants { register, space, .. } => vec![(0, RegisterType::Cbv, *space, *register, 1)],
            RootParameter::ShaderResourceView { register, space } => vec![(0, RegisterType::Srv, *space, *register, 1)],
        }
    }
}

/// 与后端无关的根签名布局
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RootSignatureLayout {
    pub kind: RootSignatureKind,
    pub parameters: Vec<RootParameter>,
}

impl RootSignatureLayout {
    /// 没有参数的根签名
    pub fn empty(kind: RootSignatureKind) -> Self {
        Self {
            kind,
            parameters: Vec::new(),
        }
    }

    /// 按寄存器类型分组生成描述符表
    pub fn from_bindings(kind: RootSignatureKind, bindings: &[Binding]) -> Result<Self> {
        let mut groups: Vec<(RegisterType, Vec<DescriptorRangeDesc>)> = Vec::new();

        for binding in bindings {
            if binding.count == 0 {
                return Err(RaytracingError::ContractViolation(format!(
                    "Binding {}{} (space {}) has zero descriptors",
                    binding.register_type.prefix(),
                    binding.register,
                    binding.space
                )).into());
            }

            let position = match groups.iter().position(|(t, _)| *t == binding.register_type) {
                Some(position) => position,
                None => {
                    groups.push((binding.register_type, Vec::new()));
                    groups.len() - 1
                }
            };

            let ranges = &mut groups[position].1;
            let offset_in_table = ranges.iter().map(|r| r.count).sum();
            ranges.push(DescriptorRangeDesc {
                register_type: binding.register_type,
                base_register: binding.register,
                register_space: binding.space,
                count: binding.count,
                offset_in_table,
            });
        }

        Ok(Self {
            kind,
            parameters: groups
                .into_iter()
                .map(|(_, ranges)| RootParameter::DescriptorTable(ranges))
                .collect(),
        })
    }

    /// `count` 个内联 32 位常量，绑定在 `b0, space0`
    pub fn inline_constants(kind: RootSignatureKind, count: u32) -> Result<Self> {
        if count == 0 {
            return Err(RaytracingError::ContractViolation(
                "Inline constant root signature needs at least one value".to_string(),
            ).into());
        }
        Ok(Self {
            kind,
            parameters: vec![RootParameter::Constants {
                register: 0,
                space: 0,
                num_values: count,
            }],
        })
    }

    /// 追加一个根 SRV 参数，返回它的参数索引
    pub fn push_root_srv(&mut self, register: u32, space: u32) -> u32 {
        self.parameters.push(RootParameter::ShaderResourceView { register, space });
        (self.parameters.len() - 1) as u32
    }

    /// 描述符表参数的数量
    pub fn descriptor_table_count(&self) -> usize {
        self.parameters
            .iter()
            .filter(|p| matches!(p, RootParameter::DescriptorTable(_)))
            .count()
    }

    /// 每条着色器记录中局部根参数的总字节数
    pub fn local_argument_size(&self) -> u64 {
        self.parameters
            .iter()
            .fold(0, |offset, p| align_up(offset, p.argument_alignment()) + p.argument_size())
    }

    /// 查找同一空间内重叠的寄存器范围
    ///
    /// 返回的文本与 D3D12 序列化器的诊断格式一致。
    pub fn find_register_overlap(&self) -> Option<String> {
        let mut seen: Vec<(usize, usize, RegisterType, u32, u32, u32)> = Vec::new();

        for (parameter_index, parameter) in self.parameters.iter().enumerate() {
            for (slot, register_type, space, base, count) in parameter.register_ranges() {
                let end = base as u64 + count as u64;
                for &(other_param, other_slot, other_type, other_space, other_base, other_count) in &seen {
                    let other_end = other_base as u64 + other_count as u64;
                    let overlaps = other_type == register_type
                        && other_space == space
                        && (base as u64) < other_end
                        && (other_base as u64) < end;
                    if overlaps {
                        return Some(format!(
                            "Shader register range of type {} (root parameter [{}], visibility ALL, \
                             descriptor table slot [{}]) overlaps with another shader register range \
                             (root parameter[{}], visibility ALL, descriptor table slot [{}])",
                            register_type.name(),
                            parameter_index,
                            slot,
                            other_param,
                            other_slot
                        ));
                    }
                }
                seen.push((parameter_index, slot, register_type, space, base, count));
            }
        }

        None
    }
}

/// 已创建的根签名：布局 + 后端对象
pub struct RootSignature<D: RaytracingDevice> {
    layout: RootSignatureLayout,
    handle: D::RootSignature,
}

impl<D: RaytracingDevice> Clone for RootSignature<D> {
    fn clone(&self) -> Self {
        Self {
            layout: self.layout.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<D: RaytracingDevice> RootSignature<D> {
    pub fn layout(&self) -> &RootSignatureLayout {
        &self.layout
    }

    pub fn handle(&self) -> &D::RootSignature {
        &self.handle
    }

    pub fn kind(&self) -> RootSignatureKind {
        self.layout.kind
    }

    /// 局部根参数的字节数
    pub fn local_argument_size(&self) -> u64 {
        self.layout.local_argument_size()
    }
}

/// 由布局创建根签名
///
/// 序列化失败携带驱动诊断文本返回，不做重试。
pub fn create_root_signature<D: RaytracingDevice>(device: &D, layout: RootSignatureLayout) -> Result<RootSignature<D>> {
    let handle = device.create_root_signature(&layout)?;
    tracing::debug!(
        kind = ?layout.kind,
        parameters = layout.parameters.len(),
        local_argument_size = layout.local_argument_size(),
        "Root signature created"
    );
    Ok(RootSignature { layout, handle })
}

/// 创建全局根签名，每种寄存器类型一个描述符表
pub fn create_global_signature<D: RaytracingDevice>(device: &D, bindings: &[Binding]) -> Result<RootSignature<D>> {
    create_root_signature(device, RootSignatureLayout::from_bindings(RootSignatureKind::Global, bindings)?)
}

/// 创建局部根签名，分组规则与全局根签名相同
pub fn create_local_signature<D: RaytracingDevice>(device: &D, bindings: &[Binding]) -> Result<RootSignature<D>> {
    create_root_signature(device, RootSignatureLayout::from_bindings(RootSignatureKind::Local, bindings)?)
}

/// 创建只含 `count` 个内联 32 位常量（`b0, space0`）的局部根签名
pub fn create_local_signature_inline_constants<D: RaytracingDevice>(device: &D, count: u32) -> Result<RootSignature<D>> {
    create_root_signature(device, RootSignatureLayout::inline_constants(RootSignatureKind::Local, count)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::HeadlessDevice;

    #[test]
    fn test_grouping_by_first_appearance() {
        let bindings = [
            Binding::uav(0, 0),
            Binding::srv(0, 0),
            Binding::uav(1, 0),
            Binding::cbv(0, 0),
        ];
        let layout = RootSignatureLayout::from_bindings(RootSignatureKind::Global, &bindings).unwrap();

        assert_eq!(layout.parameters.len(), 3);
        match &layout.parameters[0] {
            RootParameter::DescriptorTable(ranges) => {
                assert_eq!(ranges.len(), 2);
                assert!(ranges.iter().all(|r| r.register_type == RegisterType::Uav));
                assert_eq!(ranges[1].offset_in_table, 1);
            }
            other => panic!("unexpected parameter {:?}", other),
        }
        assert!(matches!(&layout.parameters[1], RootParameter::DescriptorTable(r) if r[0].register_type == RegisterType::Srv));
        assert!(matches!(&layout.parameters[2], RootParameter::DescriptorTable(r) if r[0].register_type == RegisterType::Cbv));
    }

    #[test]
    fn test_local_argument_sizes() {
        let tables = RootSignatureLayout::from_bindings(
            RootSignatureKind::Local,
            &[Binding::srv(0, 1), Binding::cbv(0, 1)],
        )
        .unwrap();
        assert_eq!(tables.local_argument_size(), 16);

        let constants = RootSignatureLayout::inline_constants(RootSignatureKind::Local, 4).unwrap();
        assert_eq!(constants.local_argument_size(), 16);
        assert!(RootSignatureLayout::inline_constants(RootSignatureKind::Local, 0).is_err());

        // 奇数个常量之后的根 SRV 需要 8 字节对齐
        let mut mixed = RootSignatureLayout::inline_constants(RootSignatureKind::Local, 3).unwrap();
        assert_eq!(mixed.push_root_srv(0, 0), 1);
        assert_eq!(mixed.local_argument_size(), 24);
    }

    #[test]
    fn test_zero_count_binding_rejected() {
        let result = RootSignatureLayout::from_bindings(RootSignatureKind::Global, &[Binding::srv(0, 0).with_count(0)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_register_overlap_detection() {
        let ok = RootSignatureLayout::from_bindings(
            RootSignatureKind::Global,
            &[Binding::srv(0, 0).with_count(2), Binding::srv(2, 0), Binding::srv(0, 1)],
        )
        .unwrap();
        assert!(ok.find_register_overlap().is_none());

        let conflicting = RootSignatureLayout::from_bindings(
            RootSignatureKind::Global,
            &[Binding::srv(0, 0).with_count(2), Binding::srv(1, 0)],
        )
        .unwrap();
        let message = conflicting.find_register_overlap().unwrap();
        assert!(message.contains("type SRV"));
    }

    #[test]
    fn test_creation_is_idempotent() {
        let device = HeadlessDevice::new();
        let bindings = [Binding::uav(0, 0), Binding::srv(0, 0)];

        let first = create_global_signature(&device, &bindings).unwrap();
        let second = create_global_signature(&device, &bindings).unwrap();
        assert_eq!(first.layout(), second.layout());
        assert_eq!(first.kind(), RootSignatureKind::Global);

        let local = create_local_signature(&device, &bindings).unwrap();
        assert_eq!(local.kind(), RootSignatureKind::Local);
        assert_eq!(local.local_argument_size(), 16);
    }

    #[test]
    fn test_serialization_failure_carries_diagnostics() {
        let device = HeadlessDevice::new();
        let err = create_global_signature(&device, &[Binding::uav(0, 0), Binding::uav(0, 0)])
            .err()
            .unwrap();
        let text = err.to_string();
        assert!(text.contains("Root signature serialization failed"));
        assert!(text.contains("overlaps"));
    }

    #[test]
    fn test_inline_constant_signature() {
        let device = HeadlessDevice::new();
        let signature = create_local_signature_inline_constants(&device, 4).unwrap();
        assert_eq!(
            signature.layout().parameters,
            vec![RootParameter::Constants { register: 0, space: 0, num_values: 4 }]
        );
    }
}
