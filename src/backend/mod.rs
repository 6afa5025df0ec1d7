// Backend module - device seam between the frame core and the GPU
//
// Design: the core only ever talks to a `RenderDevice`. The Vulkan backend
// forwards each call to ash; the headless backend simulates the GPU timeline
// on the CPU so the synchronization contract can be checked without hardware.

pub mod background;
pub mod buffer;
pub mod device;
pub mod headless;
pub mod swapchain;

use ash::prelude::VkResult;
use ash::vk;

use crate::error::RenderResult;

pub use device::VulkanDevice;
pub use headless::HeadlessDevice;

/// One queue submission of a single primary command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSubmit {
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore to wait on and the stage that waits for it
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal: Option<vk::Semaphore>,
    /// Signaled when the command buffer finishes executing
    pub fence: vk::Fence,
}

/// A freshly created swapchain and the presentable images it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainParts {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Description of an allocator-backed image whose size follows the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub name: &'static str,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

/// Image + default view created through the device's memory allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatedImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent3D,
    pub format: vk::Format,
}

/// Every native operation the frame core performs.
///
/// Handles are plain `ash::vk` handles; ownership of what they name is tracked
/// by the core (frame ring, swapchain manager, deletion stacks), never here.
pub trait RenderDevice {
    fn graphics_queue_family(&self) -> u32;
    fn wait_idle(&self) -> RenderResult<()>;

    // Synchronization
    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RenderResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()>;
    fn create_semaphore(&self) -> RenderResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // Commands (pools are created on the graphics queue family)
    fn create_command_pool(&self) -> RenderResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn reset_command_pool(&self, pool: vk::CommandPool) -> RenderResult<()>;
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RenderResult<vk::CommandBuffer>;
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()>;
    fn queue_submit(&self, submit: &QueueSubmit) -> RenderResult<()>;

    // Descriptors
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> RenderResult<vk::DescriptorPool>;
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> RenderResult<()>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    /// Raw result so callers can tell pool exhaustion from real failures.
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet>;
    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]);
    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RenderResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    // Presentation
    fn create_swapchain(
        &self,
        extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> RenderResult<SwapchainParts>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// `Ok((index, suboptimal))`, or the raw error (e.g. `ERROR_OUT_OF_DATE_KHR`).
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
        timeout_ns: u64,
    ) -> VkResult<(u32, bool)>;
    /// `Ok(suboptimal)`, or the raw error.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool>;
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RenderResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    // Allocator-backed images
    fn create_image(&self, desc: &ImageDesc, extent: vk::Extent3D) -> RenderResult<AllocatedImage>;
    fn destroy_image(&self, image: &AllocatedImage);
}
