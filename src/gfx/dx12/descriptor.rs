//! DirectX 12 描述符堆
//!
//! 每种堆类型只创建一个堆，槽位由 `renderer::descriptor::DescriptorAllocator`
//! 在 CPU 侧分配；这里只负责创建堆和暴露它的地址布局。

use windows::core::HSTRING;
use windows::Win32::Graphics::Direct3D12::*;

use crate::core::error::{GraphicsError, Result};
use crate::renderer::descriptor::{DescriptorHeapInfo, DescriptorHeapType};

/// DirectX 12 描述符堆
pub struct Dx12DescriptorHeap {
    heap: ID3D12DescriptorHeap,
    info: DescriptorHeapInfo,
}

fn map_heap_type(heap_type: DescriptorHeapType) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match heap_type {
        DescriptorHeapType::Rtv => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorHeapType::CbvSrvUav => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        DescriptorHeapType::Sampler => D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
    }
}

impl Dx12DescriptorHeap {
    /// 创建描述符堆
    ///
    /// CBV/SRV/UAV 和采样器堆创建为着色器可见，RTV 堆不可见。
    pub fn new(device: &ID3D12Device5, heap_type: DescriptorHeapType, capacity: u32) -> Result<Self> {
        let shader_visible = heap_type.is_shader_visible();
        let dx_type = map_heap_type(heap_type);

        unsafe {
            let heap_desc = D3D12_DESCRIPTOR_HEAP_DESC {
                Type: dx_type,
                NumDescriptors: capacity,
                Flags: if shader_visible {
                    D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
                } else {
                    D3D12_DESCRIPTOR_HEAP_FLAG_NONE
                },
                NodeMask: 0,
            };

            let heap: ID3D12DescriptorHeap = device.CreateDescriptorHeap(&heap_desc).map_err(|e| {
                GraphicsError::ResourceCreation(format!(
                    "Failed to create {} descriptor heap: {:?}",
                    heap_type.name(),
                    e
                ))
            })?;
            let _ = heap.SetName(&HSTRING::from(format!("{} heap", heap_type.name())));

            let cpu_start = heap.GetCPUDescriptorHandleForHeapStart().ptr;
            let gpu_start = shader_visible.then(|| heap.GetGPUDescriptorHandleForHeapStart().ptr);

            Ok(Self {
                heap,
                info: DescriptorHeapInfo {
                    heap_type,
                    cpu_start,
                    gpu_start,
                    increment_size: device.GetDescriptorHandleIncrementSize(dx_type),
                    capacity,
                },
            })
        }
    }

    /// 底层 DX12 描述符堆
    pub fn heap(&self) -> &ID3D12DescriptorHeap {
        &self.heap
    }

    /// 堆的地址布局
    pub fn info(&self) -> DescriptorHeapInfo {
        self.info
    }

    /// 句柄是否落在堆内并且按增量对齐
    pub fn contains(&self, ptr: usize) -> bool {
        let end = self.info.cpu_start + self.info.capacity as usize * self.info.increment_size as usize;
        ptr >= self.info.cpu_start
            && ptr < end
            && (ptr - self.info.cpu_start) % self.info.increment_size as usize == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_type_conversion() {
        assert_eq!(map_heap_type(DescriptorHeapType::Rtv), D3D12_DESCRIPTOR_HEAP_TYPE_RTV);
        assert_eq!(map_heap_type(DescriptorHeapType::CbvSrvUav), D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV);
        assert_eq!(map_heap_type(DescriptorHeapType::Sampler), D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER);
    }
}
