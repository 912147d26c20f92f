//! 描述符管理模块
//!
//! 设备拥有三个描述符堆：RTV、CBV/SRV/UAV 和采样器。后两者着色器可见。
//! 示例不直接做堆内偏移运算，而是从 `DescriptorAllocator` 申请
//! `DescriptorSlot`，再由分配器换算成 CPU/GPU 句柄。
//!
//! 槽位带有代数（generation），释放后旧的槽位句柄立即失效，
//! 避免两个示例悄悄写入同一个描述符。

use crate::core::error::{RaytracingError, Result};

/// 描述符堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    /// 渲染目标视图 (RTV)
    Rtv,
    /// 常量缓冲 / 着色资源 / 无序访问视图
    CbvSrvUav,
    /// 采样器
    Sampler,
}

impl DescriptorHeapType {
    /// 堆是否着色器可见
    pub fn is_shader_visible(&self) -> bool {
        matches!(self, DescriptorHeapType::CbvSrvUav | DescriptorHeapType::Sampler)
    }

    /// 获取堆类型名称
    pub fn name(&self) -> &'static str {
        match self {
            DescriptorHeapType::Rtv => "RTV",
            DescriptorHeapType::CbvSrvUav => "CBV/SRV/UAV",
            DescriptorHeapType::Sampler => "Sampler",
        }
    }
}

/// 设备上一个描述符堆的布局信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeapInfo {
    pub heap_type: DescriptorHeapType,
    /// 堆起始 CPU 句柄
    pub cpu_start: usize,
    /// 堆起始 GPU 句柄（仅着色器可见的堆）
    pub gpu_start: Option<u64>,
    /// 相邻描述符之间的字节距离
    pub increment_size: u32,
    /// 堆容量
    pub capacity: u32,
}

/// 描述符句柄（CPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuDescriptorHandle {
    /// 句柄指针值
    pub ptr: usize,
    /// 描述符索引
    pub index: u32,
}

impl CpuDescriptorHandle {
    /// 创建新的 CPU 描述符句柄
    pub fn new(ptr: usize, index: u32) -> Self {
        Self { ptr, index }
    }

    /// 偏移句柄
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + count as usize * increment_size as usize,
            index: self.index + count,
        }
    }
}

/// 描述符句柄（GPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuDescriptorHandle {
    /// 句柄指针值
    pub ptr: u64,
    /// 描述符索引
    pub index: u32,
}

impl GpuDescriptorHandle {
    /// 创建新的 GPU 描述符句柄
    pub fn new(ptr: u64, index: u32) -> Self {
        Self { ptr, index }
    }

    /// 偏移句柄
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + count as u64 * increment_size as u64,
            index: self.index + count,
        }
    }
}

/// 堆中一个描述符槽位的句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSlot {
    heap: DescriptorHeapType,
    index: u32,
    generation: u32,
}

impl DescriptorSlot {
    pub fn heap(&self) -> DescriptorHeapType {
        self.heap
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

/// 一段连续的描述符槽位，用作描述符表的基址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorRange {
    slots: Vec<DescriptorSlot>,
}

impl DescriptorRange {
    /// 第一个槽位（描述符表基址）
    pub fn first(&self) -> DescriptorSlot {
        self.slots[0]
    }

    pub fn slots(&self) -> &[DescriptorSlot] {
        &self.slots
    }

    pub fn len(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// 描述符分配器
///
/// 单个堆的槽位管理：释放的槽位进入空闲列表优先复用，
/// 连续范围只从未使用过的尾部分配。
pub struct DescriptorAllocator {
    info: DescriptorHeapInfo,
    /// 每个槽位的当前代数
    generations: Vec<u32>,
    /// 每个槽位是否在使用
    live: Vec<bool>,
    /// 已释放、可复用的槽位
    free_list: Vec<u32>,
    /// 从未分配过的第一个槽位
    next_unused: u32,
    /// 当前已分配数量
    allocated_count: u32,
}

impl DescriptorAllocator {
    /// 创建新的描述符分配器
    pub fn new(info: DescriptorHeapInfo) -> Self {
        Self {
            info,
            generations: Vec::new(),
            live: Vec::new(),
            free_list: Vec::new(),
            next_unused: 0,
            allocated_count: 0,
        }
    }

    fn exhausted(&self) -> RaytracingError {
        RaytracingError::DescriptorHeapExhausted {
            heap: self.info.heap_type.name(),
            capacity: self.info.capacity,
        }
    }

    fn take_unused(&mut self) -> DescriptorSlot {
        let index = self.next_unused;
        self.next_unused += 1;
        self.generations.push(0);
        self.live.push(true);
        self.allocated_count += 1;
        DescriptorSlot {
            heap: self.info.heap_type,
            index,
            generation: 0,
        }
    }

    /// 分配一个描述符槽位
    pub fn allocate(&mut self) -> Result<DescriptorSlot> {
        if let Some(index) = self.free_list.pop() {
            let i = index as usize;
            self.live[i] = true;
            self.allocated_count += 1;
            return Ok(DescriptorSlot {
                heap: self.info.heap_type,
                index,
                generation: self.generations[i],
            });
        }

        if self.next_unused >= self.info.capacity {
            return Err(self.exhausted().into());
        }
        Ok(self.take_unused())
    }

    /// 分配 `count` 个连续槽位
    pub fn allocate_range(&mut self, count: u32) -> Result<DescriptorRange> {
        if count == 0 {
            return Err(RaytracingError::ContractViolation(
                "Descriptor range must contain at least one descriptor".to_string(),
            ).into());
        }
        if self.next_unused + count > self.info.capacity {
            return Err(self.exhausted().into());
        }

        let slots = (0..count).map(|_| self.take_unused()).collect();
        Ok(DescriptorRange { slots })
    }

    /// 检查槽位仍然有效
    pub fn validate(&self, slot: DescriptorSlot) -> Result<()> {
        let i = slot.index as usize;
        let valid = slot.heap == self.info.heap_type
            && i < self.live.len()
            && self.live[i]
            && self.generations[i] == slot.generation;

        if valid {
            Ok(())
        } else {
            Err(RaytracingError::StaleHandle(format!(
                "{} descriptor slot {} (generation {})",
                slot.heap.name(),
                slot.index,
                slot.generation
            )).into())
        }
    }

    /// 释放描述符槽位
    ///
    /// 重复释放或释放过期槽位返回 `StaleHandle`。
    pub fn free(&mut self, slot: DescriptorSlot) -> Result<()> {
        self.validate(slot)?;
        let i = slot.index as usize;
        self.live[i] = false;
        self.generations[i] = self.generations[i].wrapping_add(1);
        self.free_list.push(slot.index);
        self.allocated_count -= 1;
        Ok(())
    }

    /// 槽位对应的 CPU 句柄
    pub fn cpu_handle(&self, slot: DescriptorSlot) -> Result<CpuDescriptorHandle> {
        self.validate(slot)?;
        Ok(CpuDescriptorHandle::new(self.info.cpu_start, 0).offset(slot.index, self.info.increment_size))
    }

    /// 槽位对应的 GPU 句柄，仅着色器可见的堆可用
    pub fn gpu_handle(&self, slot: DescriptorSlot) -> Result<GpuDescriptorHandle> {
        self.validate(slot)?;
        let start = self.info.gpu_start.ok_or_else(|| {
            RaytracingError::ContractViolation(format!(
                "{} heap is not shader visible", self.info.heap_type.name()
            ))
        })?;
        Ok(GpuDescriptorHandle::new(start, 0).offset(slot.index, self.info.increment_size))
    }

    /// 获取已分配数量
    pub fn allocated_count(&self) -> u32 {
        self.allocated_count
    }

    /// 获取最大容量
    pub fn capacity(&self) -> u32 {
        self.info.capacity
    }

    /// 是否已满
    pub fn is_full(&self) -> bool {
        self.free_list.is_empty() && self.next_unused >= self.info.capacity
    }

    pub fn heap_type(&self) -> DescriptorHeapType {
        self.info.heap_type
    }

    pub fn stats(&self) -> DescriptorHeapStats {
        DescriptorHeapStats::new(self.info.heap_type, self.capacity(), self.allocated_count)
    }
}

/// 描述符堆统计信息
#[derive(Debug, Clone)]
pub struct DescriptorHeapStats {
    pub heap_type: DescriptorHeapType,
    /// 总容量
    pub capacity: u32,
    /// 已使用数量
    pub used: u32,
    /// 可用数量
    pub available: u32,
    /// 使用率 (0.0 - 1.0)
    pub usage_ratio: f32,
}

impl DescriptorHeapStats {
    /// 创建新的统计信息
    pub fn new(heap_type: DescriptorHeapType, capacity: u32, used: u32) -> Self {
        let available = capacity.saturating_sub(used);
        let usage_ratio = if capacity > 0 {
            used as f32 / capacity as f32
        } else {
            0.0
        };

        Self {
            heap_type,
            capacity,
            used,
            available,
            usage_ratio,
        }
    }
}

/// 设备三个描述符堆的分配器集合
pub struct DescriptorHeaps {
    rtv: DescriptorAllocator,
    cbv_srv_uav: DescriptorAllocator,
    sampler: DescriptorAllocator,
}

impl DescriptorHeaps {
    /// 按设备报告的堆布局创建分配器
    pub fn new(rtv: DescriptorHeapInfo, cbv_srv_uav: DescriptorHeapInfo, sampler: DescriptorHeapInfo) -> Self {
        Self {
            rtv: DescriptorAllocator::new(rtv),
            cbv_srv_uav: DescriptorAllocator::new(cbv_srv_uav),
            sampler: DescriptorAllocator::new(sampler),
        }
    }

    pub fn get(&self, heap: DescriptorHeapType) -> &DescriptorAllocator {
        match heap {
            DescriptorHeapType::Rtv => &self.rtv,
            DescriptorHeapType::CbvSrvUav => &self.cbv_srv_uav,
            DescriptorHeapType::Sampler => &self.sampler,
        }
    }

    pub fn get_mut(&mut self, heap: DescriptorHeapType) -> &mut DescriptorAllocator {
        match heap {
            DescriptorHeapType::Rtv => &mut self.rtv,
            DescriptorHeapType::CbvSrvUav => &mut self.cbv_srv_uav,
            DescriptorHeapType::Sampler => &mut self.sampler,
        }
    }

    /// 释放槽位，自动选择所属的堆
    pub fn free(&mut self, slot: DescriptorSlot) -> Result<()> {
        self.get_mut(slot.heap()).free(slot)
    }

    /// 获取所有统计信息
    pub fn all_stats(&self) -> Vec<DescriptorHeapStats> {
        vec![self.rtv.stats(), self.cbv_srv_uav.stats(), self.sampler.stats()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap_info(heap_type: DescriptorHeapType, capacity: u32) -> DescriptorHeapInfo {
        DescriptorHeapInfo {
            heap_type,
            cpu_start: 1000,
            gpu_start: heap_type.is_shader_visible().then_some(2000),
            increment_size: 32,
            capacity,
        }
    }

    #[test]
    fn test_heap_type() {
        assert!(DescriptorHeapType::CbvSrvUav.is_shader_visible());
        assert!(!DescriptorHeapType::Rtv.is_shader_visible());
        assert_eq!(DescriptorHeapType::Rtv.name(), "RTV");
    }

    #[test]
    fn test_cpu_descriptor_handle_offset() {
        let handle = CpuDescriptorHandle::new(1000, 0);
        let offset_handle = handle.offset(5, 32);
        assert_eq!(offset_handle.ptr, 1160); // 1000 + 5 * 32
        assert_eq!(offset_handle.index, 5);
    }

    #[test]
    fn test_gpu_descriptor_handle_offset() {
        let handle = GpuDescriptorHandle::new(2000, 0);
        let offset_handle = handle.offset(10, 32);
        assert_eq!(offset_handle.ptr, 2320); // 2000 + 10 * 32
        assert_eq!(offset_handle.index, 10);
    }

    #[test]
    fn test_descriptor_allocator() {
        let mut allocator = DescriptorAllocator::new(heap_info(DescriptorHeapType::CbvSrvUav, 10));

        let first = allocator.allocate().unwrap();
        let second = allocator.allocate().unwrap();
        assert_eq!(allocator.cpu_handle(first).unwrap().ptr, 1000);
        assert_eq!(allocator.cpu_handle(second).unwrap().ptr, 1032);
        assert_eq!(allocator.gpu_handle(second).unwrap().ptr, 2032);
        assert_eq!(allocator.allocated_count(), 2);

        // 释放后旧句柄失效，槽位被复用
        allocator.free(first).unwrap();
        assert!(allocator.cpu_handle(first).is_err());
        assert!(allocator.free(first).is_err());

        let reused = allocator.allocate().unwrap();
        assert_eq!(reused.index(), first.index());
        assert_ne!(reused, first);
        assert_eq!(allocator.cpu_handle(reused).unwrap().ptr, 1000);
    }

    #[test]
    fn test_descriptor_allocator_budget() {
        let mut allocator = DescriptorAllocator::new(heap_info(DescriptorHeapType::Rtv, 2));

        allocator.allocate().unwrap();
        allocator.allocate().unwrap();
        assert!(allocator.is_full());

        let err = allocator.allocate().unwrap_err();
        assert!(err.to_string().contains("exhausted"));
    }

    #[test]
    fn test_rtv_heap_has_no_gpu_handles() {
        let mut allocator = DescriptorAllocator::new(heap_info(DescriptorHeapType::Rtv, 4));
        let slot = allocator.allocate().unwrap();
        assert!(allocator.gpu_handle(slot).is_err());
    }

    #[test]
    fn test_contiguous_range() {
        let mut allocator = DescriptorAllocator::new(heap_info(DescriptorHeapType::CbvSrvUav, 8));
        let single = allocator.allocate().unwrap();
        allocator.free(single).unwrap();

        // 范围不使用空闲列表
        let range = allocator.allocate_range(3).unwrap();
        assert_eq!(range.len(), 3);
        let indices: Vec<u32> = range.slots().iter().map(|s| s.index()).collect();
        assert_eq!(indices, vec![1, 2, 3]);

        assert!(allocator.allocate_range(0).is_err());
        assert!(allocator.allocate_range(5).is_err());
    }

    #[test]
    fn test_slot_from_other_heap_is_rejected() {
        let mut heaps = DescriptorHeaps::new(
            heap_info(DescriptorHeapType::Rtv, 4),
            heap_info(DescriptorHeapType::CbvSrvUav, 4),
            heap_info(DescriptorHeapType::Sampler, 4),
        );
        let rtv = heaps.get_mut(DescriptorHeapType::Rtv).allocate().unwrap();
        assert!(heaps.get(DescriptorHeapType::CbvSrvUav).cpu_handle(rtv).is_err());
        heaps.free(rtv).unwrap();
    }

    #[test]
    fn test_descriptor_heap_stats() {
        let stats = DescriptorHeapStats::new(DescriptorHeapType::Rtv, 100, 50);
        assert_eq!(stats.capacity, 100);
        assert_eq!(stats.used, 50);
        assert_eq!(stats.available, 50);
        assert_eq!(stats.usage_ratio, 0.5);
    }
}
