// Buffer utilities for uniform and storage buffers
//
// Buffers are sub-allocated through gpu-allocator. Device-local data goes
// through a host-visible staging buffer and an immediate submission.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::VulkanDevice;
use crate::error::{RenderError, RenderResult};
use crate::renderer::Renderer;

/// Buffer + its memory. Must be released with `destroy`.
pub struct AllocatedBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Allocation,
}

impl AllocatedBuffer {
    pub fn new(
        device: &VulkanDevice,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> RenderResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }?;
        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = match device.allocate_memory(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };

        let bound = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(err) = bound {
            unsafe { device.device.destroy_buffer(buffer, None) };
            device.free_memory(allocation);
            return Err(err.into());
        }

        Ok(Self {
            buffer,
            size,
            allocation,
        })
    }

    /// Copy `data` into a host-visible buffer
    pub fn write(&mut self, data: &[u8]) -> RenderResult<()> {
        let mapped = self
            .allocation
            .mapped_slice_mut()
            .ok_or_else(|| RenderError::Allocation("buffer is not host visible".into()))?;
        if data.len() > mapped.len() {
            return Err(RenderError::Allocation(format!(
                "write of {} bytes into a {} byte buffer",
                data.len(),
                mapped.len()
            )));
        }
        mapped[..data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn destroy(self, device: &VulkanDevice) {
        unsafe { device.device.destroy_buffer(self.buffer, None) };
        device.free_memory(self.allocation);
    }
}

/// Create a device-local buffer holding `data`, blocking until the copy is done
pub fn upload_buffer(
    renderer: &mut Renderer<VulkanDevice>,
    name: &str,
    data: &[u8],
    usage: vk::BufferUsageFlags,
) -> RenderResult<AllocatedBuffer> {
    let device = Arc::clone(renderer.device());
    let size = data.len() as vk::DeviceSize;

    let mut staging = AllocatedBuffer::new(
        &device,
        "staging",
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
    )?;
    if let Err(err) = staging.write(data) {
        staging.destroy(&device);
        return Err(err);
    }

    let buffer = match AllocatedBuffer::new(
        &device,
        name,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuOnly,
    ) {
        Ok(buffer) => buffer,
        Err(err) => {
            staging.destroy(&device);
            return Err(err);
        }
    };

    let (src, dst) = (staging.buffer, buffer.buffer);
    let copied = renderer.immediate_submit(|cmd| {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe { device.device.cmd_copy_buffer(cmd, src, dst, &[region]) };
        Ok(())
    });

    // The immediate submission has completed, the staging copy is no longer read
    staging.destroy(&device);
    match copied {
        Ok(()) => {
            log::debug!("Uploaded {} bytes to {}", size, name);
            Ok(buffer)
        }
        Err(err) => {
            buffer.destroy(&device);
            Err(err)
        }
    }
}
