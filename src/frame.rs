// Frame ring - N buffered frame slots cycled round-robin
//
// Each slot owns everything the CPU writes while recording a frame: a command
// pool + primary buffer, its Synchronizer, a growable descriptor allocator and
// a deletion stack for per-frame transients. Slot lifecycle:
//
//   Idle --begin--> Recording --submit--> Submitted --wait (fence)--> Idle
//
// The CPU may only touch a slot's objects after that slot's own fence has
// signaled from its previous use, so `begin` refuses anything but Idle.

use ash::vk;

use crate::backend::RenderDevice;
use crate::deletion::DeletionStack;
use crate::descriptors::{DescriptorAllocatorGrowable, GrowthPolicy, PoolSizeRatio};
use crate::error::{RenderError, RenderResult};
use crate::sync::Synchronizer;

/// Double buffering
pub const FRAME_OVERLAP: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Recording,
    Submitted,
}

/// Per-slot descriptor allocator setup.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDescriptorSettings {
    pub initial_sets: u32,
    pub ratios: Vec<PoolSizeRatio>,
    pub growth: GrowthPolicy,
}

impl Default for FrameDescriptorSettings {
    fn default() -> Self {
        Self {
            initial_sets: 1000,
            ratios: vec![
                PoolSizeRatio { ty: vk::DescriptorType::STORAGE_IMAGE, ratio: 3.0 },
                PoolSizeRatio { ty: vk::DescriptorType::STORAGE_BUFFER, ratio: 3.0 },
                PoolSizeRatio { ty: vk::DescriptorType::UNIFORM_BUFFER, ratio: 3.0 },
                PoolSizeRatio { ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER, ratio: 4.0 },
            ],
            growth: GrowthPolicy::default(),
        }
    }
}

pub struct FrameSlot {
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    pub sync: Synchronizer,
    pub descriptors: DescriptorAllocatorGrowable,
    /// Releases for objects only this slot's in-flight work may still read
    pub deletion: DeletionStack,
    state: SlotState,
}

impl FrameSlot {
    fn new<D: RenderDevice>(device: &D, settings: &FrameDescriptorSettings) -> RenderResult<Self> {
        let command_pool = device.create_command_pool()?;
        let command_buffer = device.allocate_command_buffer(command_pool)?;
        let sync = Synchronizer::new(device)?;
        let descriptors = DescriptorAllocatorGrowable::new(
            device,
            settings.initial_sets,
            &settings.ratios,
            settings.growth,
        )?;

        Ok(Self {
            command_pool,
            command_buffer,
            sync,
            descriptors,
            deletion: DeletionStack::new("frame"),
            state: SlotState::Idle,
        })
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    fn destroy<D: RenderDevice>(&mut self, device: &D) {
        self.deletion.free();
        self.descriptors.destroy_pools(device);
        device.destroy_command_pool(self.command_pool);
        self.sync.destroy(device);
    }
}

pub struct FrameRing {
    slots: Vec<FrameSlot>,
    current: usize,
    /// Frames submitted since startup
    frame_number: u64,
    fence_timeout_ns: u64,
}

impl FrameRing {
    pub fn new<D: RenderDevice>(
        device: &D,
        slot_count: usize,
        descriptors: &FrameDescriptorSettings,
        fence_timeout_ns: u64,
    ) -> RenderResult<Self> {
        if slot_count == 0 {
            return Err(RenderError::InvalidState("frame ring needs at least one slot".into()));
        }

        let slots = (0..slot_count)
            .map(|_| FrameSlot::new(device, descriptors))
            .collect::<RenderResult<Vec<_>>>()?;

        log::info!("Created frame ring with {} slots", slot_count);
        Ok(Self {
            slots,
            current: 0,
            frame_number: 0,
            fence_timeout_ns,
        })
    }

    /// Block until slot `index`'s previous GPU use has finished, then release
    /// the slot's per-frame transients. Safe to repeat on an idle slot.
    pub fn wait<D: RenderDevice>(&mut self, device: &D, index: usize) -> RenderResult<()> {
        let timeout = self.fence_timeout_ns;
        let slot = self.slot_checked(index)?;
        if slot.state == SlotState::Recording {
            return Err(RenderError::InvalidState(format!(
                "frame slot {index} waited on while still recording"
            )));
        }

        slot.sync.wait(device, timeout)?;
        slot.deletion.free();
        slot.state = SlotState::Idle;
        Ok(())
    }

    /// Reset slot `index` for reuse and open its command buffer.
    ///
    /// The fence is left signaled here; `submit` resets it right before the
    /// submission that re-arms it.
    pub fn begin<D: RenderDevice>(&mut self, device: &D, index: usize) -> RenderResult<vk::CommandBuffer> {
        let slot = self.slot_checked(index)?;
        if slot.state != SlotState::Idle {
            return Err(RenderError::InvalidState(format!(
                "frame slot {index} begun in state {:?}",
                slot.state
            )));
        }

        device.reset_command_pool(slot.command_pool)?;
        slot.descriptors.clear_pools(device)?;
        device.begin_command_buffer(slot.command_buffer)?;
        slot.state = SlotState::Recording;

        log::trace!("Frame slot {} recording", index);
        Ok(slot.command_buffer)
    }

    /// `wait` followed by `begin`.
    pub fn acquire<D: RenderDevice>(&mut self, device: &D, index: usize) -> RenderResult<vk::CommandBuffer> {
        self.wait(device, index)?;
        self.begin(device, index)
    }

    /// Close slot `index`'s command buffer and submit it to the graphics queue.
    pub fn submit<D: RenderDevice>(&mut self, device: &D, index: usize) -> RenderResult<()> {
        let slot = self.slot_checked(index)?;
        if slot.state != SlotState::Recording {
            return Err(RenderError::InvalidState(format!(
                "frame slot {index} submitted in state {:?}",
                slot.state
            )));
        }

        device.end_command_buffer(slot.command_buffer)?;
        device.reset_fence(slot.sync.render_fence)?;
        device.queue_submit(&slot.sync.graphics_submit(slot.command_buffer))?;
        slot.state = SlotState::Submitted;

        self.frame_number += 1;
        Ok(())
    }

    /// Move to the next slot.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut FrameSlot {
        &mut self.slots[index]
    }

    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    /// Destroy every slot. The device must be idle.
    pub fn destroy<D: RenderDevice>(&mut self, device: &D) {
        for slot in &mut self.slots {
            slot.destroy(device);
        }
        self.slots.clear();
        self.current = 0;
    }

    fn slot_checked(&mut self, index: usize) -> RenderResult<&mut FrameSlot> {
        let len = self.slots.len();
        self.slots.get_mut(index).ok_or_else(|| {
            RenderError::InvalidState(format!("frame slot {index} out of range (ring of {len})"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::GpuEvent;
    use crate::backend::HeadlessDevice;
    use std::cell::Cell;
    use std::rc::Rc;

    fn setup() -> (HeadlessDevice, FrameRing, vk::SwapchainKHR) {
        let extent = vk::Extent2D { width: 64, height: 64 };
        let device = HeadlessDevice::new(extent, 3);
        let settings = FrameDescriptorSettings { initial_sets: 8, ..Default::default() };
        let ring = FrameRing::new(&device, FRAME_OVERLAP, &settings, u64::MAX).unwrap();
        let swapchain = device.create_swapchain(extent, vk::SwapchainKHR::null()).unwrap().swapchain;
        (device, ring, swapchain)
    }

    /// Acquire, record nothing, submit, present.
    fn run_frame(device: &HeadlessDevice, ring: &mut FrameRing, swapchain: vk::SwapchainKHR, index: usize) {
        ring.wait(device, index).unwrap();
        let sync = ring.slot(index).sync;
        let (image_index, _) = device
            .acquire_next_image(swapchain, sync.swapchain_semaphore, u64::MAX)
            .unwrap();
        ring.begin(device, index).unwrap();
        ring.submit(device, index).unwrap();
        device.queue_present(swapchain, image_index, sync.render_semaphore).unwrap();
    }

    #[test]
    fn third_frame_waits_on_first_slots_fence() {
        let (device, mut ring, swapchain) = setup();
        let fence0 = ring.slot(0).sync.render_fence;
        let fence1 = ring.slot(1).sync.render_fence;

        run_frame(&device, &mut ring, swapchain, 0);
        run_frame(&device, &mut ring, swapchain, 1);
        assert!(device.is_fence_pending(fence0));
        assert!(device.is_fence_pending(fence1));

        device.clear_events();
        ring.wait(&device, 0).unwrap();

        assert_eq!(
            device.events(),
            vec![GpuEvent::FenceWaited { fence: fence0, blocked: true }]
        );
        assert!(device.is_fence_pending(fence1));
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn slots_are_never_reset_while_in_flight() {
        let (device, mut ring, swapchain) = setup();
        for frame in 0..10 {
            let index = ring.current_index();
            run_frame(&device, &mut ring, swapchain, index);
            assert_eq!(ring.slot(index).state(), SlotState::Submitted);
            ring.advance();
            assert_eq!(ring.current_index(), (frame + 1) % FRAME_OVERLAP);
        }
        assert_eq!(ring.frame_number(), 10);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn beginning_a_submitted_slot_is_rejected() {
        let (device, mut ring, swapchain) = setup();
        run_frame(&device, &mut ring, swapchain, 0);

        let err = ring.begin(&device, 0).unwrap_err();
        assert!(matches!(err, RenderError::InvalidState(_)));

        ring.acquire(&device, 1).unwrap();
        assert!(matches!(ring.acquire(&device, 1), Err(RenderError::InvalidState(_))));
    }

    #[test]
    fn frame_transients_are_released_after_the_fence() {
        let (device, mut ring, swapchain) = setup();
        let released = Rc::new(Cell::new(false));

        ring.wait(&device, 0).unwrap();
        let sync = ring.slot(0).sync;
        let (image_index, _) = device
            .acquire_next_image(swapchain, sync.swapchain_semaphore, u64::MAX)
            .unwrap();
        ring.begin(&device, 0).unwrap();
        let flag = Rc::clone(&released);
        ring.slot_mut(0).deletion.defer(move || flag.set(true));
        ring.submit(&device, 0).unwrap();
        device.queue_present(swapchain, image_index, sync.render_semaphore).unwrap();

        assert!(!released.get());
        ring.wait(&device, 0).unwrap();
        assert!(released.get());
    }

    #[test]
    fn clearing_descriptors_of_an_in_flight_slot_is_flagged() {
        let (device, mut ring, swapchain) = setup();
        let layout = device.create_descriptor_set_layout(&[]).unwrap();

        ring.wait(&device, 0).unwrap();
        let sync = ring.slot(0).sync;
        let (image_index, _) = device
            .acquire_next_image(swapchain, sync.swapchain_semaphore, u64::MAX)
            .unwrap();
        ring.begin(&device, 0).unwrap();
        ring.slot_mut(0).descriptors.allocate(&device, layout).unwrap();
        ring.submit(&device, 0).unwrap();
        device.queue_present(swapchain, image_index, sync.render_semaphore).unwrap();
        assert!(device.is_fence_pending(sync.render_fence));

        ring.slot_mut(0).descriptors.clear_pools(&device).unwrap();
        assert_eq!(device.violations().len(), 1, "{:?}", device.violations());

        // Once the fence has signaled the same reset is legal
        ring.wait(&device, 0).unwrap();
        ring.begin(&device, 0).unwrap();
        assert_eq!(device.violations().len(), 1, "{:?}", device.violations());
    }

    #[test]
    fn abandoned_frame_leaves_fence_waitable() {
        let (device, mut ring, _swapchain) = setup();

        // Waited, then gave up before recording (e.g. out-of-date acquire)
        ring.wait(&device, 0).unwrap();
        ring.wait(&device, 0).unwrap();

        assert!(device.violations().is_empty(), "{:?}", device.violations());
        assert_eq!(ring.slot(0).state(), SlotState::Idle);
    }

    #[test]
    fn destroy_releases_every_slot_object() {
        let (device, mut ring, swapchain) = setup();
        run_frame(&device, &mut ring, swapchain, 0);

        device.wait_idle().unwrap();
        ring.destroy(&device);
        device.destroy_swapchain(swapchain);

        assert!(ring.is_empty());
        assert_eq!(device.live_object_count(), 0);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn zero_slots_is_rejected() {
        let device = HeadlessDevice::new(vk::Extent2D { width: 8, height: 8 }, 2);
        let result = FrameRing::new(&device, 0, &FrameDescriptorSettings::default(), u64::MAX);
        assert!(result.is_err());
    }
}
