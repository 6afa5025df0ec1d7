// Swapchain - Window presentation
//
// Creates the chain of images we blit into and present. Lifetime of the
// result (views, recreation, teardown order) belongs to `SwapchainManager`.

use ash::vk;

use super::{SwapchainParts, VulkanDevice};
use crate::error::{RenderError, RenderResult};

pub(super) fn create_swapchain(
    device: &VulkanDevice,
    requested: vk::Extent2D,
    old_swapchain: vk::SwapchainKHR,
) -> RenderResult<SwapchainParts> {
    // Query surface capabilities
    let surface_caps = unsafe {
        device
            .surface_loader
            .get_physical_device_surface_capabilities(device.physical_device, device.surface)
    }?;

    // Query supported formats
    let formats = unsafe {
        device
            .surface_loader
            .get_physical_device_surface_formats(device.physical_device, device.surface)
    }?;

    // Query supported present modes
    let present_modes = unsafe {
        device
            .surface_loader
            .get_physical_device_surface_present_modes(device.physical_device, device.surface)
    }?;

    // Choose surface format (prefer SRGB)
    let surface_format = formats
        .iter()
        .find(|f| f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
        .ok_or_else(|| RenderError::InvalidState("surface reports no formats".into()))?;

    let present_mode = choose_present_mode(&present_modes, device.preferred_present_mode);

    // Choose extent
    let extent = if surface_caps.current_extent.width != u32::MAX {
        surface_caps.current_extent
    } else {
        vk::Extent2D {
            width: requested.width.clamp(
                surface_caps.min_image_extent.width,
                surface_caps.max_image_extent.width,
            ),
            height: requested.height.clamp(
                surface_caps.min_image_extent.height,
                surface_caps.max_image_extent.height,
            ),
        }
    };

    if extent.width == 0 || extent.height == 0 {
        return Err(RenderError::InvalidState("surface has zero extent".into()));
    }

    // One more than the minimum so acquire rarely blocks on the driver
    let mut image_count = surface_caps.min_image_count + 1;
    if surface_caps.max_image_count > 0 && image_count > surface_caps.max_image_count {
        image_count = surface_caps.max_image_count;
    }

    let create_info = vk::SwapchainCreateInfoKHR::builder()
        .surface(device.surface)
        .min_image_count(image_count)
        .image_format(surface_format.format)
        .image_color_space(surface_format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .pre_transform(surface_caps.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);

    let swapchain = unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }?;

    let images = match unsafe { device.swapchain_loader.get_swapchain_images(swapchain) } {
        Ok(images) => images,
        Err(err) => {
            unsafe { device.swapchain_loader.destroy_swapchain(swapchain, None) };
            return Err(err.into());
        }
    };

    log::info!(
        "Created swapchain {}x{} with {} images ({:?})",
        extent.width,
        extent.height,
        images.len(),
        present_mode
    );

    Ok(SwapchainParts {
        swapchain,
        images,
        format: surface_format.format,
        extent,
    })
}

/// `preferred` when the surface supports it, otherwise FIFO (always supported)
fn choose_present_mode(available: &[vk::PresentModeKHR], preferred: vk::PresentModeKHR) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        log::warn!("Present mode {:?} unsupported, falling back to FIFO", preferred);
        vk::PresentModeKHR::FIFO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_present_mode_falls_back_to_fifo() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&available, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&available, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }
}
