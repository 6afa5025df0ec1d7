// Synchronization primitives for one frame slot
//
// One fence (GPU -> CPU) and two semaphores (GPU -> GPU) gate every frame:
//   swapchain_semaphore: presentation engine handed us an image
//   render_semaphore:    rendering into that image finished, present may run
//   render_fence:        the slot's command buffer finished executing

use ash::vk;

use crate::backend::{QueueSubmit, RenderDevice};
use crate::error::RenderResult;

/// Frame synchronization - one per frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Synchronizer {
    pub render_fence: vk::Fence,
    pub swapchain_semaphore: vk::Semaphore,
    pub render_semaphore: vk::Semaphore,
}

impl Synchronizer {
    pub fn new<D: RenderDevice>(device: &D) -> RenderResult<Self> {
        // Start signaled so the first wait on a fresh slot returns immediately
        let render_fence = device.create_fence(true)?;
        let swapchain_semaphore = device.create_semaphore()?;
        let render_semaphore = device.create_semaphore()?;

        Ok(Self {
            render_fence,
            swapchain_semaphore,
            render_semaphore,
        })
    }

    /// Block until the slot's previous submission has finished on the GPU.
    pub fn wait<D: RenderDevice>(&self, device: &D, timeout_ns: u64) -> RenderResult<()> {
        device.wait_for_fence(self.render_fence, timeout_ns)
    }

    /// Graphics submission for `command_buffer`: wait for the swapchain image at
    /// color-attachment output, signal the render semaphore and the fence.
    pub fn graphics_submit(&self, command_buffer: vk::CommandBuffer) -> QueueSubmit {
        QueueSubmit {
            command_buffer,
            wait: Some((
                self.swapchain_semaphore,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            )),
            signal: Some(self.render_semaphore),
            fence: self.render_fence,
        }
    }

    pub fn destroy<D: RenderDevice>(&self, device: &D) {
        device.destroy_semaphore(self.render_semaphore);
        device.destroy_semaphore(self.swapchain_semaphore);
        device.destroy_fence(self.render_fence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessDevice;

    #[test]
    fn fresh_fence_is_signaled() {
        let device = HeadlessDevice::new(vk::Extent2D { width: 64, height: 64 }, 2);
        let sync = Synchronizer::new(&device).unwrap();

        sync.wait(&device, 0).unwrap();
        assert!(device.violations().is_empty());

        sync.destroy(&device);
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn graphics_submit_orders_image_render_and_fence() {
        let device = HeadlessDevice::new(vk::Extent2D { width: 64, height: 64 }, 2);
        let sync = Synchronizer::new(&device).unwrap();
        let submit = sync.graphics_submit(vk::CommandBuffer::null());

        assert_eq!(
            submit.wait,
            Some((sync.swapchain_semaphore, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT))
        );
        assert_eq!(submit.signal, Some(sync.render_semaphore));
        assert_eq!(submit.fence, sync.render_fence);

        sync.destroy(&device);
    }
}
