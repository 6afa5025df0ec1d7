// Per-frame entry point
//
// One call = one frame attempt on the ring's current slot:
//   wait slot fence -> acquire image -> reset + begin -> record -> submit -> present
// Out-of-date / suboptimal results only raise the caller's resize flag.

use std::sync::Arc;

use ash::vk;

use crate::backend::RenderDevice;
use crate::deletion::DeletionStack;
use crate::descriptors::DescriptorAllocatorGrowable;
use crate::error::RenderResult;
use crate::frame::FrameRing;
use crate::swapchain_manager::{AcquireOutcome, RenderTargets, SwapchainManager};

/// Everything a recorder may use while the slot is in the Recording state.
pub struct FrameContext<'a, D> {
    pub device: &'a Arc<D>,
    pub command_buffer: vk::CommandBuffer,
    pub targets: RenderTargets<'a>,
    /// Cleared at the start of this frame, valid until the slot comes around again
    pub descriptors: &'a mut DescriptorAllocatorGrowable,
    /// Flushed once this frame's fence has signaled
    pub deletion: &'a mut DeletionStack,
    pub slot_index: usize,
    pub frame_number: u64,
}

/// Records one frame's commands. Decides *what* is drawn; never waits or submits.
pub trait FrameRecorder<D: RenderDevice> {
    type Scene;

    fn record_scene(&mut self, ctx: &mut FrameContext<'_, D>, scene: &Self::Scene) -> RenderResult<()>;

    /// Injection point for overlays, recorded after the scene into the same buffer.
    fn record_overlay(&mut self, _ctx: &mut FrameContext<'_, D>) -> RenderResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Commands were submitted and the image handed to presentation
    Presented,
    /// Acquire reported out-of-date; nothing was recorded
    Skipped,
}

/// Draw one frame into the ring's current slot.
///
/// Sets `resize_requested` when the swapchain no longer matches the surface.
/// Does not advance the ring.
pub fn draw_frame<D, R>(
    device: &Arc<D>,
    swapchain: &SwapchainManager<D>,
    frames: &mut FrameRing,
    recorder: &mut R,
    scene: &R::Scene,
    resize_requested: &mut bool,
) -> RenderResult<FrameOutcome>
where
    D: RenderDevice + 'static,
    R: FrameRecorder<D>,
{
    let index = frames.current_index();
    frames.wait(device.as_ref(), index)?;

    let sync = frames.slot(index).sync;
    let image_index = match swapchain.acquire_next_image(sync.swapchain_semaphore)? {
        AcquireOutcome::Ready { image_index, suboptimal } => {
            if suboptimal {
                *resize_requested = true;
            }
            image_index
        }
        AcquireOutcome::OutOfDate => {
            log::debug!("Acquire out of date, skipping frame");
            *resize_requested = true;
            return Ok(FrameOutcome::Skipped);
        }
    };

    let command_buffer = frames.begin(device.as_ref(), index)?;
    let frame_number = frames.frame_number();
    {
        let slot = frames.slot_mut(index);
        let mut ctx = FrameContext {
            device,
            command_buffer,
            targets: swapchain.targets(image_index),
            descriptors: &mut slot.descriptors,
            deletion: &mut slot.deletion,
            slot_index: index,
            frame_number,
        };
        recorder.record_scene(&mut ctx, scene)?;
        recorder.record_overlay(&mut ctx)?;
    }
    frames.submit(device.as_ref(), index)?;

    let presented = swapchain.present(image_index, sync.render_semaphore)?;
    if presented.needs_recreate() {
        log::debug!("Present reported {:?}", presented);
        *resize_requested = true;
    }

    log::trace!("Frame {} presented image {} from slot {}", frame_number, image_index, index);
    Ok(FrameOutcome::Presented)
}
