//! GPU 同步机制模块
//!
//! 所有 GPU 工作都通过单一命令队列提交，提交后在队列上 signal 一个单调递增的
//! Fence 值。CPU 通过比较 Fence 值判断工作是否完成。
//!
//! # 使用场景
//!
//! 1. **同步执行**：构建加速结构后立即阻塞等待（`run_synchronously`）
//! 2. **延迟等待**：提交后拿到 `GpuWork`，在第一次消费结果时再等待

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Fence 值
///
/// 用于CPU-GPU同步的单调递增值。
/// CPU可以等待GPU完成特定Fence值对应的工作。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FenceValue(u64);

impl FenceValue {
    /// 创建新的Fence值
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// 获取内部值
    pub fn value(&self) -> u64 {
        self.0
    }

    /// 下一个Fence值
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// Fence 计数器
///
/// CPU 侧记录已经 signal 的最大值和已知完成的最大值。
/// 后端在 signal 时调用 `next_value`，在观察到 GPU 进度后调用
/// `update_completed_value`。克隆后共享同一组计数器。
#[derive(Debug, Clone, Default)]
pub struct FenceManager {
    /// 当前Fence值（CPU侧最后一次 signal 的值）
    current_value: Arc<AtomicU64>,
    /// 已完成的Fence值（GPU侧）
    completed_value: Arc<AtomicU64>,
}

impl FenceManager {
    /// 创建新的Fence管理器
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取当前Fence值
    pub fn current_value(&self) -> FenceValue {
        FenceValue::new(self.current_value.load(Ordering::Acquire))
    }

    /// 获取已完成的Fence值
    pub fn completed_value(&self) -> FenceValue {
        FenceValue::new(self.completed_value.load(Ordering::Acquire))
    }

    /// 获取下一个Fence值并递增计数器
    pub fn next_value(&self) -> FenceValue {
        let value = self.current_value.fetch_add(1, Ordering::AcqRel);
        FenceValue::new(value + 1)
    }

    /// 用下一个值调用 `signal`，成功后才提交该值
    ///
    /// `signal` 失败时计数器保持不变。调用方需要串行化对同一队列的 signal。
    pub fn signal_next<E>(
        &self,
        signal: impl FnOnce(FenceValue) -> std::result::Result<(), E>,
    ) -> std::result::Result<FenceValue, E> {
        let value = self.current_value().next();
        signal(value)?;
        self.current_value.fetch_max(value.value(), Ordering::AcqRel);
        Ok(value)
    }

    /// 更新已完成的Fence值
    ///
    /// 完成值只会前进，旧的观察结果被忽略。
    pub fn update_completed_value(&self, value: FenceValue) {
        self.completed_value.fetch_max(value.value(), Ordering::AcqRel);
    }

    /// 检查特定Fence值是否已完成
    pub fn is_completed(&self, value: FenceValue) -> bool {
        self.completed_value() >= value
    }

    /// 是否还有已提交但未完成的工作
    pub fn has_pending_work(&self) -> bool {
        self.completed_value() < self.current_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_value() {
        let fence = FenceValue::new(1);
        assert_eq!(fence.value(), 1);

        let next = fence.next();
        assert_eq!(next.value(), 2);
        assert_eq!(fence.value(), 1); // 原值不变
    }

    #[test]
    fn test_fence_manager() {
        let manager = FenceManager::new();

        assert_eq!(manager.current_value().value(), 0);
        assert_eq!(manager.completed_value().value(), 0);
        assert!(!manager.has_pending_work());

        let v1 = manager.next_value();
        assert_eq!(v1.value(), 1);
        let v2 = manager.next_value();
        assert_eq!(v2.value(), 2);
        assert!(manager.has_pending_work());

        // 模拟GPU完成
        manager.update_completed_value(v1);
        assert!(manager.is_completed(v1));
        assert!(!manager.is_completed(v2));

        manager.update_completed_value(v2);
        assert!(manager.is_completed(v2));
        assert!(!manager.has_pending_work());
    }

    #[test]
    fn test_completed_value_never_goes_back() {
        let manager = FenceManager::new();
        let v1 = manager.next_value();
        let v2 = manager.next_value();

        manager.update_completed_value(v2);
        manager.update_completed_value(v1);
        assert_eq!(manager.completed_value(), v2);
    }

    #[test]
    fn test_failed_signal_is_not_recorded() {
        let manager = FenceManager::new();
        let v1 = manager.signal_next(|_| Ok::<(), ()>(())).unwrap();
        assert_eq!(v1.value(), 1);

        let err = manager.signal_next(|value| Err(value));
        assert_eq!(err, Err(FenceValue::new(2)));
        assert_eq!(manager.current_value(), v1);

        // 失败后下一次 signal 仍然使用同一个值
        manager.update_completed_value(v1);
        assert!(!manager.has_pending_work());
        let v2 = manager.signal_next(|_| Ok::<(), ()>(())).unwrap();
        assert_eq!(v2.value(), 2);
    }

    #[test]
    fn test_clones_share_counters() {
        let manager = FenceManager::new();
        let observer = manager.clone();
        let v = manager.next_value();
        manager.update_completed_value(v);
        assert!(observer.is_completed(v));
    }
}
