//! 模拟设备的资源对象
//!
//! 缓冲区是一段带状态的字节数组，句柄克隆共享同一块存储。
//! 根签名和状态对象只保存校验所需的信息。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::renderer::pipeline::ShaderIdentifier;
use crate::renderer::resource::{GpuBuffer, GpuVirtualAddress, HeapType, ResourceState};
use crate::renderer::root_signature::RootSignatureLayout;

/// 忽略锁中毒：模拟设备的数据在 panic 后仍然可读
pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(super) struct BufferStorage {
    pub(super) id: u64,
    pub(super) address: GpuVirtualAddress,
    pub(super) size: u64,
    pub(super) heap: HeapType,
    pub(super) allow_unordered_access: bool,
    pub(super) name: String,
    pub(super) data: Mutex<Vec<u8>>,
    pub(super) state: Mutex<ResourceState>,
}

/// 模拟缓冲区
#[derive(Clone)]
pub struct HeadlessBuffer {
    pub(super) storage: Arc<BufferStorage>,
}

impl HeadlessBuffer {
    /// 当前资源状态
    pub fn state(&self) -> ResourceState {
        *lock(&self.storage.state)
    }

    pub(super) fn id(&self) -> u64 {
        self.storage.id
    }

    pub(super) fn allows_unordered_access(&self) -> bool {
        self.storage.allow_unordered_access
    }

    /// 检查 `[offset, offset + len)` 是否在缓冲区内
    pub(super) fn range(&self, offset: u64, len: u64) -> Option<std::ops::Range<usize>> {
        let end = offset.checked_add(len)?;
        (end <= self.storage.size).then(|| offset as usize..end as usize)
    }
}

impl std::fmt::Debug for HeadlessBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessBuffer")
            .field("name", &self.storage.name)
            .field("address", &format_args!("{:#x}", self.storage.address))
            .field("size", &self.storage.size)
            .field("heap", &self.storage.heap)
            .finish()
    }
}

impl GpuBuffer for HeadlessBuffer {
    fn size(&self) -> u64 {
        self.storage.size
    }

    fn gpu_address(&self) -> GpuVirtualAddress {
        self.storage.address
    }

    fn heap(&self) -> HeapType {
        self.storage.heap
    }

    fn name(&self) -> &str {
        &self.storage.name
    }
}

/// 模拟根签名
#[derive(Debug, Clone)]
pub struct HeadlessRootSignature {
    pub(super) id: u64,
    pub(super) layout: Arc<RootSignatureLayout>,
}

impl HeadlessRootSignature {
    pub fn layout(&self) -> &RootSignatureLayout {
        &self.layout
    }
}

#[derive(Debug)]
pub(super) struct StateObjectInfo {
    pub(super) global_root_signature: u64,
    pub(super) identifiers: HashMap<String, ShaderIdentifier>,
}

/// 模拟光线追踪状态对象
#[derive(Debug, Clone)]
pub struct HeadlessStateObject {
    pub(super) info: Arc<StateObjectInfo>,
}

impl HeadlessStateObject {
    /// 状态对象中所有导出名（库导出和命中组）
    pub fn export_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.info.identifiers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub(super) fn knows_identifier(&self, identifier: &[u8]) -> bool {
        self.info.identifiers.values().any(|id| id.as_bytes() == identifier)
    }
}

/// 由状态对象编号和导出名生成确定性的着色器标识符（FNV-1a）
pub(super) fn make_identifier(state_object: u64, export: &str) -> ShaderIdentifier {
    let mut bytes = [0u8; 32];
    for (lane, chunk) in bytes.chunks_mut(8).enumerate() {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325 ^ (lane as u64);
        for byte in state_object.to_le_bytes().iter().chain(export.as_bytes()) {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        chunk.copy_from_slice(&hash.to_le_bytes());
    }
    ShaderIdentifier(bytes)
}
