// Swapchain manager - presentable images + everything sized like them
//
// Owns the swapchain, one view per swapchain image, and the auxiliary images
// whose extent must track the surface (draw target, depth). Each generation's
// handles are released through a private deletion stack, pushed in creation
// order so the views always go before the swapchain they view.
//
// Recreate protocol: device idle -> free the old generation -> build the new
// one at the requested extent. The image count may change across generations.

use std::sync::Arc;

use ash::vk;

use crate::backend::{AllocatedImage, ImageDesc, RenderDevice};
use crate::deletion::DeletionStack;
use crate::error::{RenderError, RenderResult};

/// Result of asking the presentation engine for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// `suboptimal` images are still drawn to, then the swapchain is rebuilt
    Ready { image_index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn needs_recreate(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

/// An auxiliary image recreated with the swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizedImage {
    pub desc: ImageDesc,
    pub image: AllocatedImage,
}

/// What the recorder draws into for one frame.
#[derive(Debug, Clone, Copy)]
pub struct RenderTargets<'a> {
    pub image_index: u32,
    pub swapchain_image: vk::Image,
    pub swapchain_view: vk::ImageView,
    pub swapchain_format: vk::Format,
    pub extent: vk::Extent2D,
    pub sized: &'a [SizedImage],
}

impl<'a> RenderTargets<'a> {
    /// Auxiliary image by its description name (e.g. "draw", "depth").
    pub fn sized_image(&self, name: &str) -> Option<&'a AllocatedImage> {
        self.sized
            .iter()
            .find(|sized| sized.desc.name == name)
            .map(|sized| &sized.image)
    }
}

pub struct SwapchainManager<D: RenderDevice + 'static> {
    device: Arc<D>,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    sized_descs: Vec<ImageDesc>,
    sized: Vec<SizedImage>,
    teardown: DeletionStack,
    generation: u64,
    acquire_timeout_ns: u64,
}

impl<D: RenderDevice + 'static> SwapchainManager<D> {
    pub fn new(
        device: Arc<D>,
        extent: vk::Extent2D,
        sized_images: &[ImageDesc],
        acquire_timeout_ns: u64,
    ) -> RenderResult<Self> {
        let mut manager = Self {
            device,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent,
            sized_descs: sized_images.to_vec(),
            sized: Vec::new(),
            teardown: DeletionStack::new("swapchain"),
            generation: 0,
            acquire_timeout_ns,
        };
        manager.build(extent)?;
        Ok(manager)
    }

    pub fn acquire_next_image(&self, signal: vk::Semaphore) -> RenderResult<AcquireOutcome> {
        match self
            .device
            .acquire_next_image(self.swapchain, signal, self.acquire_timeout_ns)
        {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(err) => Err(err.into()),
        }
    }

    /// Present `image_index` once `wait` (the render semaphore) signals.
    pub fn present(&self, image_index: u32, wait: vk::Semaphore) -> RenderResult<PresentOutcome> {
        match self.device.queue_present(self.swapchain, image_index, wait) {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(err) => Err(err.into()),
        }
    }

    /// Rebuild the swapchain, its views and every sized image at `extent`.
    pub fn recreate(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RenderError::InvalidState(format!(
                "swapchain recreate at zero extent {}x{}",
                extent.width, extent.height
            )));
        }

        self.device.wait_idle()?;
        self.teardown.free();
        self.images.clear();
        self.image_views.clear();
        self.sized.clear();
        self.swapchain = vk::SwapchainKHR::null();

        self.build(extent)?;
        self.generation += 1;
        Ok(())
    }

    fn build(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        let parts = self.device.create_swapchain(extent, vk::SwapchainKHR::null())?;
        let device = Arc::clone(&self.device);
        let swapchain = parts.swapchain;
        self.teardown.defer(move || device.destroy_swapchain(swapchain));

        self.swapchain = parts.swapchain;
        self.format = parts.format;
        self.extent = parts.extent;
        self.images = parts.images;

        for &image in &self.images {
            let view = self
                .device
                .create_image_view(image, self.format, vk::ImageAspectFlags::COLOR)?;
            let device = Arc::clone(&self.device);
            self.teardown.defer(move || device.destroy_image_view(view));
            self.image_views.push(view);
        }

        let image_extent = vk::Extent3D {
            width: self.extent.width,
            height: self.extent.height,
            depth: 1,
        };
        for desc in &self.sized_descs {
            let image = self.device.create_image(desc, image_extent)?;
            let device = Arc::clone(&self.device);
            self.teardown.defer(move || device.destroy_image(&image));
            self.sized.push(SizedImage { desc: *desc, image });
        }

        log::info!(
            "Swapchain generation {}: {}x{}, {} images, {:?}",
            self.generation,
            self.extent.width,
            self.extent.height,
            self.images.len(),
            self.format
        );
        Ok(())
    }

    pub fn targets(&self, image_index: u32) -> RenderTargets<'_> {
        let index = image_index as usize;
        RenderTargets {
            image_index,
            swapchain_image: self.images[index],
            swapchain_view: self.image_views[index],
            swapchain_format: self.format,
            extent: self.extent,
            sized: &self.sized,
        }
    }

    pub fn swapchain(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn sized_images(&self) -> &[SizedImage] {
        &self.sized
    }

    pub fn sized_image(&self, name: &str) -> Option<&AllocatedImage> {
        self.sized
            .iter()
            .find(|sized| sized.desc.name == name)
            .map(|sized| &sized.image)
    }

    /// Number of recreations since construction.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Release the current generation. The device must be idle.
    pub fn destroy(&mut self) {
        self.teardown.free();
        self.images.clear();
        self.image_views.clear();
        self.sized.clear();
        self.swapchain = vk::SwapchainKHR::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessDevice;

    const DRAW: ImageDesc = ImageDesc {
        name: "draw",
        format: vk::Format::R16G16B16A16_SFLOAT,
        usage: vk::ImageUsageFlags::STORAGE,
        aspect: vk::ImageAspectFlags::COLOR,
    };

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn recreate_follows_new_extent_and_image_count() {
        let device = Arc::new(HeadlessDevice::new(extent(800, 600), 2));
        let mut manager = SwapchainManager::new(Arc::clone(&device), extent(800, 600), &[DRAW], u64::MAX).unwrap();
        assert_eq!(manager.image_views().len(), 2);

        let old_views = manager.image_views().to_vec();
        let old_draw = *manager.sized_image("draw").unwrap();

        device.set_surface_extent(extent(1280, 720));
        device.set_image_count(3);
        manager.recreate(extent(1280, 720)).unwrap();

        assert_eq!(manager.image_views().len(), 3);
        assert_eq!(manager.extent(), extent(1280, 720));
        let draw = manager.sized_image("draw").unwrap();
        assert_eq!(
            device.image_extent(draw.image),
            Some(vk::Extent3D { width: 1280, height: 720, depth: 1 })
        );
        assert!(old_views.iter().all(|&view| !device.is_live(view)));
        assert!(!device.is_live(old_draw.image));
        assert_eq!(manager.generation(), 1);

        manager.destroy();
        assert_eq!(device.live_object_count(), 0);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn out_of_date_is_an_outcome_not_an_error() {
        let device = Arc::new(HeadlessDevice::new(extent(64, 64), 2));
        let manager = SwapchainManager::new(Arc::clone(&device), extent(64, 64), &[], u64::MAX).unwrap();
        let semaphore = device.create_semaphore().unwrap();

        device.force_out_of_date(1);
        assert_eq!(manager.acquire_next_image(semaphore).unwrap(), AcquireOutcome::OutOfDate);
        assert_eq!(
            manager.acquire_next_image(semaphore).unwrap(),
            AcquireOutcome::Ready { image_index: 0, suboptimal: false }
        );
    }

    #[test]
    fn zero_extent_recreate_keeps_current_generation() {
        let device = Arc::new(HeadlessDevice::new(extent(64, 64), 2));
        let mut manager = SwapchainManager::new(Arc::clone(&device), extent(64, 64), &[DRAW], u64::MAX).unwrap();

        assert!(manager.recreate(extent(0, 64)).is_err());
        assert!(device.is_live(manager.swapchain()));
        assert_eq!(manager.generation(), 0);

        manager.destroy();
    }

    #[test]
    fn lost_device_fails_acquire() {
        let device = Arc::new(HeadlessDevice::new(extent(64, 64), 2));
        let mut manager = SwapchainManager::new(Arc::clone(&device), extent(64, 64), &[], u64::MAX).unwrap();
        let semaphore = device.create_semaphore().unwrap();
        device.lose_device();

        let err = manager.acquire_next_image(semaphore).unwrap_err();
        assert!(err.is_device_lost());

        manager.destroy();
    }
}
