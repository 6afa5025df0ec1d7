// Renderer - owner of the frame core
//
// Holds the device, swapchain manager, frame ring and immediate commander,
// plus the global deletion stack that tears them down. Each release is pushed
// right after its object is created, so shutdown replays the inverse of
// initialization order once the device is idle.

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;

use crate::backend::{ImageDesc, RenderDevice};
use crate::config::Config;
use crate::deletion::DeletionStack;
use crate::draw::{draw_frame, FrameOutcome, FrameRecorder};
use crate::error::RenderResult;
use crate::frame::{FrameDescriptorSettings, FrameRing};
use crate::immediate::ImmediateCommander;
use crate::swapchain_manager::SwapchainManager;

/// HDR target everything is drawn into before the blit to the swapchain.
pub const DRAW_IMAGE: ImageDesc = ImageDesc {
    name: "draw",
    format: vk::Format::R16G16B16A16_SFLOAT,
    usage: vk::ImageUsageFlags::from_raw(
        vk::ImageUsageFlags::TRANSFER_SRC.as_raw()
            | vk::ImageUsageFlags::TRANSFER_DST.as_raw()
            | vk::ImageUsageFlags::STORAGE.as_raw()
            | vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw(),
    ),
    aspect: vk::ImageAspectFlags::COLOR,
};

pub const DEPTH_IMAGE: ImageDesc = ImageDesc {
    name: "depth",
    format: vk::Format::D32_SFLOAT,
    usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
    aspect: vk::ImageAspectFlags::DEPTH,
};

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub extent: vk::Extent2D,
    pub frames_in_flight: usize,
    /// `u64::MAX` waits forever
    pub fence_timeout_ns: u64,
    pub descriptors: FrameDescriptorSettings,
    /// Images recreated with the swapchain at its extent
    pub sized_images: Vec<ImageDesc>,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            extent: vk::Extent2D { width: 1024, height: 1024 },
            frames_in_flight: crate::frame::FRAME_OVERLAP,
            fence_timeout_ns: u64::MAX,
            descriptors: FrameDescriptorSettings::default(),
            sized_images: vec![DRAW_IMAGE, DEPTH_IMAGE],
        }
    }
}

impl RendererSettings {
    pub fn from_config(config: &Config, extent: vk::Extent2D) -> Self {
        let fence_timeout_ns = config
            .frames
            .fence_timeout_ms
            .map(|ms| Duration::from_millis(ms).as_nanos().min(u64::MAX as u128) as u64)
            .unwrap_or(u64::MAX);

        let mut descriptors = FrameDescriptorSettings::default();
        descriptors.initial_sets = config.descriptors.initial_sets;
        descriptors.growth.factor = config.descriptors.growth_factor;
        descriptors.growth.max_sets_per_pool = config.descriptors.max_sets_per_pool;

        Self {
            extent,
            frames_in_flight: config.frames.frames_in_flight,
            fence_timeout_ns,
            descriptors,
            ..Self::default()
        }
    }
}

pub struct Renderer<D: RenderDevice + 'static> {
    device: Arc<D>,
    swapchain: SwapchainManager<D>,
    frames: FrameRing,
    immediate: ImmediateCommander,
    deletion: DeletionStack<Renderer<D>>,
    resize_requested: bool,
    shut_down: bool,
}

impl<D: RenderDevice + 'static> Renderer<D> {
    pub fn new(device: Arc<D>, settings: &RendererSettings) -> RenderResult<Self> {
        log::info!(
            "Initializing renderer: {}x{}, {} frames in flight",
            settings.extent.width,
            settings.extent.height,
            settings.frames_in_flight
        );

        let mut swapchain = SwapchainManager::new(
            Arc::clone(&device),
            settings.extent,
            &settings.sized_images,
            u64::MAX,
        )?;

        let mut frames = match FrameRing::new(
            device.as_ref(),
            settings.frames_in_flight,
            &settings.descriptors,
            settings.fence_timeout_ns,
        ) {
            Ok(frames) => frames,
            Err(err) => {
                swapchain.destroy();
                return Err(err);
            }
        };

        let immediate = match ImmediateCommander::new(device.as_ref()) {
            Ok(immediate) => immediate,
            Err(err) => {
                frames.destroy(device.as_ref());
                swapchain.destroy();
                return Err(err);
            }
        };

        let mut deletion = DeletionStack::new("renderer");
        deletion.push(|r: &mut Renderer<D>| r.swapchain.destroy());
        deletion.push(|r: &mut Renderer<D>| {
            let device = Arc::clone(&r.device);
            r.frames.destroy(device.as_ref());
        });
        deletion.push(|r: &mut Renderer<D>| {
            let device = Arc::clone(&r.device);
            r.immediate.destroy(device.as_ref());
        });

        Ok(Self {
            device,
            swapchain,
            frames,
            immediate,
            deletion,
            resize_requested: false,
            shut_down: false,
        })
    }

    /// Queue a release to run at shutdown, after everything created later.
    pub fn defer<F>(&mut self, release: F)
    where
        F: FnOnce(&D) + 'static,
    {
        self.deletion.push(move |r: &mut Renderer<D>| release(r.device.as_ref()));
    }

    /// Blocking one-shot submission outside the frame ring.
    pub fn immediate_submit<F>(&mut self, record: F) -> RenderResult<()>
    where
        F: FnOnce(vk::CommandBuffer) -> RenderResult<()>,
    {
        self.immediate.submit(self.device.as_ref(), record)
    }

    /// Draw one frame; advances the ring only if the frame was submitted.
    pub fn draw<R: FrameRecorder<D>>(&mut self, recorder: &mut R, scene: &R::Scene) -> RenderResult<FrameOutcome> {
        let outcome = draw_frame(
            &self.device,
            &self.swapchain,
            &mut self.frames,
            recorder,
            scene,
            &mut self.resize_requested,
        )?;

        if outcome == FrameOutcome::Presented {
            self.frames.advance();
        }
        Ok(outcome)
    }

    /// Run the swapchain recreate protocol and clear the resize request.
    pub fn resize(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        self.swapchain.recreate(extent)?;
        self.resize_requested = false;
        Ok(())
    }

    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    pub fn resize_requested(&self) -> bool {
        self.resize_requested
    }

    /// Idle the device, then run the deletion stack. Runs at most once.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        log::info!("Shutting down renderer...");

        if let Err(err) = self.device.wait_idle() {
            log::warn!("Device idle wait failed during shutdown: {}", err);
        }

        let mut deletion = mem::take(&mut self.deletion);
        deletion.free_with(self);
        self.deletion = deletion;

        log::info!("Renderer shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn swapchain(&self) -> &SwapchainManager<D> {
        &self.swapchain
    }

    pub fn frames(&self) -> &FrameRing {
        &self.frames
    }
}

impl<D: RenderDevice + 'static> Drop for Renderer<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
