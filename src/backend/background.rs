// Background pass - the binary's frame recorder
//
// Per frame: upload scene uniforms into a transient buffer (released through
// the slot's deletion stack), bind them with the static constants and the draw
// image in a set from the slot's descriptor allocator, clear the draw image,
// and blit it into the acquired swapchain image. The overlay step leaves the
// swapchain image ready for presentation.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;

use super::buffer::{upload_buffer, AllocatedBuffer};
use super::{RenderDevice, VulkanDevice};
use crate::descriptors::{DescriptorLayoutBuilder, DescriptorWriter};
use crate::draw::{FrameContext, FrameRecorder};
use crate::error::{RenderError, RenderResult};
use crate::renderer::Renderer;
use crate::scene::SceneData;

/// Values that never change after startup
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct PassConstants {
    clear_color: [f32; 4],
}

pub struct BackgroundPass {
    scene_layout: vk::DescriptorSetLayout,
    constants: vk::Buffer,
    constants_size: vk::DeviceSize,
    clear_color: [f32; 4],
    writer: DescriptorWriter,
}

impl BackgroundPass {
    pub fn new(renderer: &mut Renderer<VulkanDevice>, clear_color: [f32; 4]) -> RenderResult<Self> {
        let device = Arc::clone(renderer.device());

        let scene_layout = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
            .add_binding(1, vk::DescriptorType::UNIFORM_BUFFER)
            .add_binding(2, vk::DescriptorType::STORAGE_IMAGE)
            .build(device.as_ref(), vk::ShaderStageFlags::ALL_GRAPHICS | vk::ShaderStageFlags::COMPUTE)?;
        renderer.defer(move |device: &VulkanDevice| device.destroy_descriptor_set_layout(scene_layout));

        let constants = PassConstants { clear_color };
        let constants = upload_buffer(
            renderer,
            "pass constants",
            bytemuck::bytes_of(&constants),
            vk::BufferUsageFlags::UNIFORM_BUFFER,
        )?;
        let (constants_buffer, constants_size) = (constants.buffer, constants.size);
        renderer.defer(move |device: &VulkanDevice| constants.destroy(device));

        Ok(Self {
            scene_layout,
            constants: constants_buffer,
            constants_size,
            clear_color,
            writer: DescriptorWriter::new(),
        })
    }
}

impl FrameRecorder<VulkanDevice> for BackgroundPass {
    type Scene = SceneData;

    fn record_scene(&mut self, ctx: &mut FrameContext<'_, VulkanDevice>, scene: &SceneData) -> RenderResult<()> {
        let device = ctx.device;
        let cmd = ctx.command_buffer;
        let draw_image = *ctx
            .targets
            .sized_image("draw")
            .ok_or_else(|| RenderError::InvalidState("no draw image".into()))?;

        // Scene uniforms live exactly as long as this frame's GPU work
        let mut scene_buffer = AllocatedBuffer::new(
            device,
            "scene data",
            std::mem::size_of::<SceneData>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        )?;
        let written = scene_buffer.write(scene.as_bytes());
        let scene_handle = scene_buffer.buffer;
        let scene_size = scene_buffer.size;
        let owner = Arc::clone(device);
        ctx.deletion.defer(move || scene_buffer.destroy(&owner));
        written?;

        let scene_set = ctx.descriptors.allocate(device.as_ref(), self.scene_layout)?;
        self.writer.clear();
        self.writer
            .write_buffer(0, scene_handle, scene_size, 0, vk::DescriptorType::UNIFORM_BUFFER)
            .write_buffer(1, self.constants, self.constants_size, 0, vk::DescriptorType::UNIFORM_BUFFER)
            .write_image(
                2,
                draw_image.view,
                vk::Sampler::null(),
                vk::ImageLayout::GENERAL,
                vk::DescriptorType::STORAGE_IMAGE,
            );
        self.writer.update_set(device.as_ref(), scene_set);

        let raw = &device.device;
        let draw_extent = vk::Extent2D {
            width: draw_image.extent.width,
            height: draw_image.extent.height,
        };

        transition_image(raw, cmd, draw_image.image, vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL);

        // Slow pulse on top of the configured color so frame pacing is visible
        let pulse = ((ctx.frame_number as f32) / 120.0).sin().abs();
        let [r, g, b, a] = self.clear_color;
        let clear = vk::ClearColorValue {
            float32: [r, g, b * (0.5 + 0.5 * pulse), a],
        };
        let range = subresource_range(vk::ImageAspectFlags::COLOR);
        unsafe {
            raw.cmd_clear_color_image(cmd, draw_image.image, vk::ImageLayout::GENERAL, &clear, &[range])
        };

        transition_image(
            raw,
            cmd,
            draw_image.image,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        transition_image(
            raw,
            cmd,
            ctx.targets.swapchain_image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        blit_image(raw, cmd, draw_image.image, ctx.targets.swapchain_image, draw_extent, ctx.targets.extent);

        Ok(())
    }

    fn record_overlay(&mut self, ctx: &mut FrameContext<'_, VulkanDevice>) -> RenderResult<()> {
        transition_image(
            &ctx.device.device,
            ctx.command_buffer,
            ctx.targets.swapchain_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        Ok(())
    }
}

fn subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    }
}

/// Full-pipeline layout transition. Coarse, but there is one per image per frame.
fn transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    from: vk::ImageLayout,
    to: vk::ImageLayout,
) {
    let aspect = if to == vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    };

    let barrier = vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
        .dst_access_mask(vk::AccessFlags::MEMORY_WRITE | vk::AccessFlags::MEMORY_READ)
        .old_layout(from)
        .new_layout(to)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range(aspect))
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        )
    };
}

fn blit_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    src: vk::Image,
    dst: vk::Image,
    src_extent: vk::Extent2D,
    dst_extent: vk::Extent2D,
) {
    let layers = vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    };
    let corner = |extent: vk::Extent2D| vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: 1,
    };

    let region = vk::ImageBlit {
        src_subresource: layers,
        src_offsets: [vk::Offset3D::default(), corner(src_extent)],
        dst_subresource: layers,
        dst_offsets: [vk::Offset3D::default(), corner(dst_extent)],
    };

    unsafe {
        device.cmd_blit_image(
            cmd,
            src,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dst,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
            vk::Filter::LINEAR,
        )
    };
}
