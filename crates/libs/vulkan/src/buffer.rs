use std::{
    mem::{align_of, size_of_val},
    sync::{Arc, Mutex},
};

use anyhow::Result;
use ash::vk;
use gpu_allocator::vulkan::AllocationScheme;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, Allocator},
    MemoryLocation,
};

use crate::{device::Device, Context};

/// Round `instance_size` up so that consecutive instances respect
/// `min_offset_alignment` (1 means tightly packed).
pub fn alignment_size(instance_size: vk::DeviceSize, min_offset_alignment: vk::DeviceSize) -> vk::DeviceSize {
    if min_offset_alignment > 1 {
        (instance_size + min_offset_alignment - 1) & !(min_offset_alignment - 1)
    } else {
        instance_size
    }
}

pub struct Buffer {
    device: Arc<Device>,
    allocator: Arc<Mutex<Allocator>>,
    pub(crate) inner: vk::Buffer,
    allocation: Option<Allocation>,
    pub size: vk::DeviceSize,
    pub instance_stride: vk::DeviceSize,
    pub instance_count: vk::DeviceSize,
}

impl Buffer {
    pub(crate) fn new(
        device: Arc<Device>,
        allocator: Arc<Mutex<Allocator>>,
        usage: vk::BufferUsageFlags,
        memory_location: MemoryLocation,
        instance_size: vk::DeviceSize,
        instance_count: vk::DeviceSize,
        min_offset_alignment: vk::DeviceSize,
    ) -> Result<Self> {
        let instance_stride = alignment_size(instance_size, min_offset_alignment);
        let size = instance_stride * instance_count;

        let create_info = vk::BufferCreateInfo::builder().size(size).usage(usage);
        let inner = unsafe { device.inner.create_buffer(&create_info, None)? };
        let requirements = unsafe { device.inner.get_buffer_memory_requirements(inner) };
        let allocation = allocator.lock().unwrap().allocate(&AllocationCreateDesc {
            name: "buffer",
            requirements,
            location: memory_location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        unsafe {
            device
                .inner
                .bind_buffer_memory(inner, allocation.memory(), allocation.offset())?
        };

        Ok(Self {
            device,
            allocator,
            inner,
            allocation: Some(allocation),
            size,
            instance_stride,
            instance_count,
        })
    }

    pub fn as_raw(&self) -> u64 {
        use vk::Handle;
        self.inner.as_raw()
    }

    /// Writes `data` at `offset` through the persistent mapping. Requires
    /// host-visible memory; `gpu-allocator` maps those at allocation time.
    pub fn copy_data_to_buffer<T: Copy>(&self, data: &[T]) -> Result<()> {
        self.copy_data_to_buffer_at(data, 0)
    }

    pub fn copy_data_to_buffer_at<T: Copy>(&self, data: &[T], offset: usize) -> Result<()> {
        let allocation = self
            .allocation
            .as_ref()
            .expect("buffer has no backing allocation");
        let data_ptr = allocation
            .mapped_ptr()
            .ok_or_else(|| anyhow::anyhow!("Cannot write to a buffer that is not host-visible"))?
            .as_ptr();

        unsafe {
            let data_ptr = (data_ptr as *mut u8).add(offset) as *mut std::ffi::c_void;
            let mut align =
                ash::util::Align::new(data_ptr, align_of::<T>() as _, size_of_val(data) as _);
            align.copy_from_slice(data);
        };

        Ok(())
    }

    /// Reads back `count` elements from the start of a host-visible buffer.
    pub fn read_data_from_buffer<T: Copy>(&self, count: usize) -> Result<Vec<T>> {
        let allocation = self
            .allocation
            .as_ref()
            .expect("buffer has no backing allocation");
        let data_ptr = allocation
            .mapped_ptr()
            .ok_or_else(|| anyhow::anyhow!("Cannot read from a buffer that is not host-visible"))?
            .as_ptr() as *const T;

        let mut out = Vec::with_capacity(count);
        unsafe {
            for i in 0..count {
                out.push(*data_ptr.add(i));
            }
        }

        Ok(out)
    }

    pub fn get_device_address(&self) -> u64 {
        let addr_info = vk::BufferDeviceAddressInfo::builder().buffer(self.inner);
        unsafe { self.device.inner.get_buffer_device_address(&addr_info) }
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::builder()
            .buffer(self.inner)
            .offset(0)
            .range(vk::WHOLE_SIZE)
            .build()
    }
}

impl Context {
    pub fn create_buffer(
        &self,
        usage: vk::BufferUsageFlags,
        memory_location: MemoryLocation,
        size: vk::DeviceSize,
    ) -> Result<Buffer> {
        Buffer::new(
            self.device.clone(),
            self.allocator.clone(),
            usage,
            memory_location,
            size,
            1,
            1,
        )
    }

    /// Array buffer with per-instance stride rounded up to
    /// `min_offset_alignment` (for dynamic UBO offsets and std430 SSBOs).
    pub fn create_array_buffer(
        &self,
        usage: vk::BufferUsageFlags,
        memory_location: MemoryLocation,
        instance_size: vk::DeviceSize,
        instance_count: vk::DeviceSize,
        min_offset_alignment: vk::DeviceSize,
    ) -> Result<Buffer> {
        Buffer::new(
            self.device.clone(),
            self.allocator.clone(),
            usage,
            memory_location,
            instance_size,
            instance_count,
            min_offset_alignment,
        )
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_buffer(self.inner, None) };
        self.allocator
            .lock()
            .unwrap()
            .free(self.allocation.take().unwrap())
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::alignment_size;

    #[test]
    fn tightly_packed_when_alignment_is_one() {
        assert_eq!(alignment_size(36, 1), 36);
    }

    #[test]
    fn stride_rounds_up_to_alignment() {
        assert_eq!(alignment_size(36, 64), 64);
        assert_eq!(alignment_size(64, 64), 64);
        assert_eq!(alignment_size(65, 64), 128);
    }
}
