//! 命令记录与同步执行模块
//!
//! 命令先记录到与后端无关的 `CommandList`，再由设备一次性翻译并提交到
//! 唯一的命令队列。每个命令列表经历
//! `Initial -> Recording -> Executable -> Pending` 四个状态，
//! 等待 Fence 完成后随 `GpuWork` 一起释放。
//!
//! 命令中引用的缓冲区是句柄的克隆，所以 GPU 执行期间资源不会被释放。

use crate::core::error::{GraphicsError, Result};
use super::acceleration::AccelerationStructureInputs;
use super::descriptor::GpuDescriptorHandle;
use super::device::RaytracingDevice;
use super::resource::{GpuVirtualAddress, ResourceState};
use super::sbt::DispatchRaysDesc;
use super::sync::FenceValue;

/// 命令列表状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListState {
    /// 初始状态
    Initial,
    /// 正在记录
    Recording,
    /// 已完成记录，可以提交
    Executable,
    /// 已提交，等待 GPU 完成
    Pending,
}

/// 一条已记录的 GPU 命令
pub enum GpuCommand<D: RaytracingDevice> {
    CopyBuffer {
        destination: D::Buffer,
        destination_offset: u64,
        source: D::Buffer,
        source_offset: u64,
        size: u64,
    },
    Transition {
        buffer: D::Buffer,
        before: ResourceState,
        after: ResourceState,
    },
    UavBarrier {
        buffer: D::Buffer,
    },
    BuildAccelerationStructure {
        inputs: AccelerationStructureInputs,
        destination: D::Buffer,
        scratch: D::Buffer,
    },
    /// 绑定设备的 CBV/SRV/UAV 堆和采样器堆
    SetDescriptorHeaps,
    SetComputeRootSignature(D::RootSignature),
    SetComputeRootDescriptorTable {
        parameter: u32,
        base: GpuDescriptorHandle,
    },
    SetComputeRootShaderResourceView {
        parameter: u32,
        address: GpuVirtualAddress,
    },
    SetComputeRoot32BitConstants {
        parameter: u32,
        values: Vec<u32>,
        offset: u32,
    },
    SetPipelineState(D::StateObject),
    DispatchRays(DispatchRaysDesc),
}

impl<D: RaytracingDevice> GpuCommand<D> {
    /// 命令名称，用于日志和错误信息
    pub fn name(&self) -> &'static str {
        match self {
            GpuCommand::CopyBuffer { .. } => "CopyBufferRegion",
            GpuCommand::Transition { .. } => "ResourceBarrier(Transition)",
            GpuCommand::UavBarrier { .. } => "ResourceBarrier(UAV)",
            GpuCommand::BuildAccelerationStructure { .. } => "BuildRaytracingAccelerationStructure",
            GpuCommand::SetDescriptorHeaps => "SetDescriptorHeaps",
            GpuCommand::SetComputeRootSignature(_) => "SetComputeRootSignature",
            GpuCommand::SetComputeRootDescriptorTable { .. } => "SetComputeRootDescriptorTable",
            GpuCommand::SetComputeRootShaderResourceView { .. } => "SetComputeRootShaderResourceView",
            GpuCommand::SetComputeRoot32BitConstants { .. } => "SetComputeRoot32BitConstants",
            GpuCommand::SetPipelineState(_) => "SetPipelineState1",
            GpuCommand::DispatchRays(_) => "DispatchRays",
        }
    }
}

/// 与后端无关的命令列表
pub struct CommandList<D: RaytracingDevice> {
    state: CommandListState,
    commands: Vec<GpuCommand<D>>,
}

impl<D: RaytracingDevice> CommandList<D> {
    /// 创建空的命令列表
    pub fn new() -> Self {
        Self {
            state: CommandListState::Initial,
            commands: Vec::new(),
        }
    }

    /// 开始记录命令
    pub fn begin(&mut self) -> Result<()> {
        match self.state {
            CommandListState::Initial => {
                self.state = CommandListState::Recording;
                Ok(())
            }
            state => Err(GraphicsError::CommandExecution(format!(
                "Cannot begin command list in {:?} state", state
            )).into()),
        }
    }

    /// 结束记录命令
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            CommandListState::Recording => {
                self.state = CommandListState::Executable;
                Ok(())
            }
            state => Err(GraphicsError::CommandExecution(format!(
                "Cannot close command list in {:?} state", state
            )).into()),
        }
    }

    /// 由提交路径调用，标记列表已交给队列
    pub fn mark_pending(&mut self) -> Result<()> {
        match self.state {
            CommandListState::Executable => {
                self.state = CommandListState::Pending;
                Ok(())
            }
            state => Err(GraphicsError::CommandExecution(format!(
                "Cannot submit command list in {:?} state", state
            )).into()),
        }
    }

    /// 获取当前状态
    pub fn state(&self) -> CommandListState {
        self.state
    }

    /// 已记录的命令
    pub fn commands(&self) -> &[GpuCommand<D>] {
        &self.commands
    }

    fn record(&mut self, command: GpuCommand<D>) -> Result<()> {
        if self.state != CommandListState::Recording {
            return Err(GraphicsError::CommandExecution(format!(
                "{} recorded while command list is {:?}",
                command.name(),
                self.state
            )).into());
        }
        self.commands.push(command);
        Ok(())
    }

    pub fn copy_buffer(
        &mut self,
        destination: &D::Buffer,
        destination_offset: u64,
        source: &D::Buffer,
        source_offset: u64,
        size: u64,
    ) -> Result<()> {
        self.record(GpuCommand::CopyBuffer {
            destination: destination.clone(),
            destination_offset,
            source: source.clone(),
            source_offset,
            size,
        })
    }

    pub fn transition(&mut self, buffer: &D::Buffer, before: ResourceState, after: ResourceState) -> Result<()> {
        self.record(GpuCommand::Transition {
            buffer: buffer.clone(),
            before,
            after,
        })
    }

    pub fn uav_barrier(&mut self, buffer: &D::Buffer) -> Result<()> {
        self.record(GpuCommand::UavBarrier { buffer: buffer.clone() })
    }

    /// 记录一次加速结构构建
    ///
    /// 目标缓冲区必须处于加速结构状态，scratch 必须处于 UAV 状态，
    /// 由执行命令的设备检查。
    pub fn build_acceleration_structure(
        &mut self,
        inputs: &AccelerationStructureInputs,
        destination: &D::Buffer,
        scratch: &D::Buffer,
    ) -> Result<()> {
        self.record(GpuCommand::BuildAccelerationStructure {
            inputs: inputs.clone(),
            destination: destination.clone(),
            scratch: scratch.clone(),
        })
    }

    pub fn set_descriptor_heaps(&mut self) -> Result<()> {
        self.record(GpuCommand::SetDescriptorHeaps)
    }

    pub fn set_compute_root_signature(&mut self, root_signature: &D::RootSignature) -> Result<()> {
        self.record(GpuCommand::SetComputeRootSignature(root_signature.clone()))
    }

    pub fn set_compute_root_descriptor_table(&mut self, parameter: u32, base: GpuDescriptorHandle) -> Result<()> {
        self.record(GpuCommand::SetComputeRootDescriptorTable { parameter, base })
    }

    pub fn set_compute_root_shader_resource_view(&mut self, parameter: u32, address: GpuVirtualAddress) -> Result<()> {
        self.record(GpuCommand::SetComputeRootShaderResourceView { parameter, address })
    }

    pub fn set_compute_root_32bit_constants(&mut self, parameter: u32, values: &[u32], offset: u32) -> Result<()> {
        self.record(GpuCommand::SetComputeRoot32BitConstants {
            parameter,
            values: values.to_vec(),
            offset,
        })
    }

    pub fn set_pipeline_state(&mut self, state_object: &D::StateObject) -> Result<()> {
        self.record(GpuCommand::SetPipelineState(state_object.clone()))
    }

    pub fn dispatch_rays(&mut self, desc: &DispatchRaysDesc) -> Result<()> {
        self.record(GpuCommand::DispatchRays(desc.clone()))
    }
}

impl<D: RaytracingDevice> Default for CommandList<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// 已提交的 GPU 工作
///
/// 持有提交的命令列表（以及其中引用的资源），直到 Fence 到达。
/// 在第一次需要结果时调用 `wait`；如果直接丢弃，`Drop` 会阻塞等待，
/// 保证资源不会在 GPU 使用期间释放。
pub struct GpuWork<'a, D: RaytracingDevice> {
    device: &'a D,
    fence_value: FenceValue,
    list: Option<CommandList<D>>,
}

impl<'a, D: RaytracingDevice> GpuWork<'a, D> {
    /// 提交对应的 Fence 值
    pub fn fence_value(&self) -> FenceValue {
        self.fence_value
    }

    /// 非阻塞地查询是否完成
    pub fn is_complete(&self) -> bool {
        self.device.completed_fence_value() >= self.fence_value
    }

    /// 阻塞直到 GPU 完成这次提交
    pub fn wait(mut self) -> Result<()> {
        self.wait_inner()
    }

    fn wait_inner(&mut self) -> Result<()> {
        if self.list.is_none() {
            return Ok(());
        }
        if !self.is_complete() {
            self.device.wait_for_fence(self.fence_value)?;
        }
        tracing::trace!(fence = self.fence_value.value(), "GPU work completed");
        self.list = None;
        Ok(())
    }
}

impl<'a, D: RaytracingDevice> Drop for GpuWork<'a, D> {
    fn drop(&mut self) {
        if let Err(e) = self.wait_inner() {
            crate::engine_error!("Failed to wait for GPU work {}: {}", self.fence_value.value(), e);
        }
    }
}

/// 记录并提交一个命令列表，不等待完成
pub fn submit<'a, D, F>(device: &'a D, record: F) -> Result<GpuWork<'a, D>>
where
    D: RaytracingDevice,
    F: FnOnce(&mut CommandList<D>) -> Result<()>,
{
    let mut list = CommandList::new();
    list.begin()?;
    record(&mut list)?;
    list.close()?;

    let fence_value = device.execute_command_list(&list)?;
    list.mark_pending()?;
    tracing::trace!(
        commands = list.commands().len(),
        fence = fence_value.value(),
        "Command list submitted"
    );

    Ok(GpuWork {
        device,
        fence_value,
        list: Some(list),
    })
}

/// 记录、提交并阻塞等待一个命令列表执行完成
///
/// 等待没有超时。调用之间不会重叠。
pub fn run_synchronously<D, F>(device: &D, record: F) -> Result<()>
where
    D: RaytracingDevice,
    F: FnOnce(&mut CommandList<D>) -> Result<()>,
{
    submit(device, record)?.wait()
}
