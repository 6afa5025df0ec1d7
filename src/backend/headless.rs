// Headless device - CPU simulation of the GPU timeline
//
// Submitted work stays "in flight" until the CPU waits on its fence (or on
// device idle), which is the worst legal schedule for the frame core: any
// CPU touch of an object the GPU may still read shows up as a violation.
// Every call is appended to an event log so ordering can be asserted on.

use std::collections::{HashMap, HashSet};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;

use super::{AllocatedImage, ImageDesc, QueueSubmit, RenderDevice, SwapchainParts};
use crate::error::{RenderError, RenderResult};

/// Observable device activity, in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuEvent {
    /// `blocked` is true when the CPU had to wait for in-flight work.
    FenceWaited { fence: vk::Fence, blocked: bool },
    Submitted { command_buffer: vk::CommandBuffer, fence: vk::Fence },
    CommandPoolReset(vk::CommandPool),
    CommandBufferBegun(vk::CommandBuffer),
    DescriptorPoolCreated { pool: vk::DescriptorPool, max_sets: u32 },
    DescriptorPoolReset(vk::DescriptorPool),
    SwapchainCreated { swapchain: vk::SwapchainKHR, extent: vk::Extent2D, image_count: u32 },
    SwapchainDestroyed(vk::SwapchainKHR),
    ImageAcquired { image_index: u32 },
    Presented { image_index: u32 },
    DeviceIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectKind {
    Fence,
    Semaphore,
    CommandPool,
    DescriptorPool,
    DescriptorSetLayout,
    Swapchain,
    SwapchainImage,
    ImageView,
    Image,
}

struct FenceState {
    signaled: bool,
    pending: Option<u64>,
}

struct DescriptorPoolState {
    max_sets: u32,
    allocated: u32,
    /// Command buffers whose current recording allocated sets from this pool
    users: HashSet<u64>,
}

struct SwapchainState {
    images: Vec<u64>,
    extent: vk::Extent2D,
    next_image: u32,
}

struct State {
    next_handle: u64,
    live: HashMap<u64, ObjectKind>,
    events: Vec<GpuEvent>,
    violations: Vec<String>,

    fences: HashMap<u64, FenceState>,
    /// Semaphore -> has a pending signal nobody consumed yet
    semaphores: HashMap<u64, bool>,
    /// Command buffer -> owning pool
    buffer_pools: HashMap<u64, u64>,
    recording: HashSet<u64>,
    in_flight: HashSet<u64>,
    descriptor_pools: HashMap<u64, DescriptorPoolState>,
    swapchains: HashMap<u64, SwapchainState>,
    /// Image view -> viewed image
    view_targets: HashMap<u64, u64>,
    image_extents: HashMap<u64, vk::Extent3D>,

    surface_extent: vk::Extent2D,
    image_count: u32,
    forced_out_of_date: u32,
    forced_suboptimal_acquires: u32,
    forced_suboptimal_presents: u32,
    lost: bool,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn alloc(&mut self, kind: ObjectKind) -> u64 {
        let id = self.next_id();
        self.live.insert(id, kind);
        id
    }

    fn release(&mut self, raw: u64, kind: ObjectKind) {
        match self.live.remove(&raw) {
            Some(found) if found == kind => {}
            Some(found) => {
                self.violation(format!("destroyed {raw:#x} as {kind:?} but it is a {found:?}"))
            }
            None => self.violation(format!("destroyed unknown or already destroyed {kind:?} {raw:#x}")),
        }
    }

    fn violation(&mut self, message: String) {
        log::error!("[headless] {}", message);
        self.violations.push(message);
    }

    /// Let the GPU finish the work guarded by `fence`. Returns false if nothing was pending.
    fn complete(&mut self, fence: u64) -> bool {
        let Some(state) = self.fences.get_mut(&fence) else {
            return false;
        };
        match state.pending.take() {
            Some(command_buffer) => {
                state.signaled = true;
                self.in_flight.remove(&command_buffer);
                true
            }
            None => false,
        }
    }

    /// Consume a pending semaphore signal; false if nothing signaled it.
    fn consume_semaphore(&mut self, semaphore: u64) -> bool {
        match self.semaphores.get_mut(&semaphore) {
            Some(signaled) if *signaled => {
                *signaled = false;
                true
            }
            _ => false,
        }
    }
}

/// CPU-only `RenderDevice` that enforces the frame synchronization contract.
pub struct HeadlessDevice {
    state: Mutex<State>,
}

impl HeadlessDevice {
    pub fn new(surface_extent: vk::Extent2D, image_count: u32) -> Self {
        Self {
            state: Mutex::new(State {
                next_handle: 0x1000,
                live: HashMap::new(),
                events: Vec::new(),
                violations: Vec::new(),
                fences: HashMap::new(),
                semaphores: HashMap::new(),
                buffer_pools: HashMap::new(),
                recording: HashSet::new(),
                in_flight: HashSet::new(),
                descriptor_pools: HashMap::new(),
                swapchains: HashMap::new(),
                view_targets: HashMap::new(),
                image_extents: HashMap::new(),
                surface_extent,
                image_count: image_count.max(1),
                forced_out_of_date: 0,
                forced_suboptimal_acquires: 0,
                forced_suboptimal_presents: 0,
                lost: false,
            }),
        }
    }

    /// Simulate the window being resized; the current swapchain becomes out of date.
    pub fn set_surface_extent(&self, extent: vk::Extent2D) {
        self.state.lock().surface_extent = extent;
    }

    /// Image count used by the next swapchain created.
    pub fn set_image_count(&self, count: u32) {
        self.state.lock().image_count = count.max(1);
    }

    /// Report out-of-date on the next `acquires` acquisitions.
    pub fn force_out_of_date(&self, acquires: u32) {
        self.state.lock().forced_out_of_date = acquires;
    }

    /// Report suboptimal on the next `acquires` acquisitions and `presents` presentations.
    pub fn force_suboptimal(&self, acquires: u32, presents: u32) {
        let mut s = self.state.lock();
        s.forced_suboptimal_acquires = acquires;
        s.forced_suboptimal_presents = presents;
    }

    pub fn lose_device(&self) {
        self.state.lock().lost = true;
    }

    pub fn events(&self) -> Vec<GpuEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    pub fn live_object_count(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn is_live<H: Handle>(&self, handle: H) -> bool {
        self.state.lock().live.contains_key(&handle.as_raw())
    }

    pub fn is_fence_pending(&self, fence: vk::Fence) -> bool {
        self.state
            .lock()
            .fences
            .get(&fence.as_raw())
            .is_some_and(|f| f.pending.is_some())
    }

    pub fn descriptor_pool_count(&self) -> usize {
        self.state.lock().descriptor_pools.len()
    }

    pub fn image_extent(&self, image: vk::Image) -> Option<vk::Extent3D> {
        self.state.lock().image_extents.get(&image.as_raw()).copied()
    }
}

impl RenderDevice for HeadlessDevice {
    fn graphics_queue_family(&self) -> u32 {
        0
    }

    fn wait_idle(&self) -> RenderResult<()> {
        let mut guard = self.state.lock();
        let s = &mut *guard;
        let pending: Vec<u64> = s
            .fences
            .iter()
            .filter(|(_, f)| f.pending.is_some())
            .map(|(&raw, _)| raw)
            .collect();
        for fence in pending {
            s.complete(fence);
        }
        s.events.push(GpuEvent::DeviceIdle);

        if s.lost {
            return Err(RenderError::DeviceLost);
        }
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence> {
        let mut s = self.state.lock();
        let id = s.alloc(ObjectKind::Fence);
        s.fences.insert(id, FenceState { signaled, pending: None });
        Ok(vk::Fence::from_raw(id))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut guard = self.state.lock();
        let s = &mut *guard;
        let raw = fence.as_raw();
        if s.fences.remove(&raw).is_some_and(|f| f.pending.is_some()) {
            s.violation(format!("fence {raw:#x} destroyed while its work is in flight"));
        }
        s.release(raw, ObjectKind::Fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RenderResult<()> {
        let mut guard = self.state.lock();
        let s = &mut *guard;
        if s.lost {
            return Err(RenderError::DeviceLost);
        }

        let raw = fence.as_raw();
        let Some((signaled, pending)) = s.fences.get(&raw).map(|f| (f.signaled, f.pending.is_some()))
        else {
            s.violation(format!("wait on unknown fence {raw:#x}"));
            return Err(RenderError::InvalidState(format!("unknown fence {raw:#x}")));
        };

        if signaled {
            s.events.push(GpuEvent::FenceWaited { fence, blocked: false });
            Ok(())
        } else if pending {
            s.complete(raw);
            s.events.push(GpuEvent::FenceWaited { fence, blocked: true });
            Ok(())
        } else {
            s.violation(format!("wait on fence {raw:#x} that no submission will signal"));
            Err(RenderError::FenceTimeout { timeout_ns })
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()> {
        let mut guard = self.state.lock();
        let s = &mut *guard;
        let raw = fence.as_raw();
        let reset = s.fences.get_mut(&raw).map(|state| {
            if state.pending.is_some() {
                return false;
            }
            state.signaled = false;
            true
        });
        match reset {
            Some(true) => {}
            Some(false) => s.violation(format!("fence {raw:#x} reset while its work is in flight")),
            None => s.violation(format!("reset of unknown fence {raw:#x}")),
        }
        Ok(())
    }

    fn create_semaphore(&self) -> RenderResult<vk::Semaphore> {
        let mut s = self.state.lock();
        let id = s.alloc(ObjectKind::Semaphore);
        s.semaphores.insert(id, false);
        Ok(vk::Semaphore::from_raw(id))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut s = self.state.lock();
        s.semaphores.remove(&semaphore.as_raw());
        s.release(semaphore.as_raw(), ObjectKind::Semaphore);
    }

    fn create_command_pool(&self) -> RenderResult<vk::CommandPool> {
        let mut s = self.state.lock();
        Ok(vk::CommandPool::from_raw(s.alloc(ObjectKind::CommandPool)))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut guard = self.state.lock();
        let s = &mut *guard;
        let raw = pool.as_raw();
        let buffers: Vec<u64> = s
            .buffer_pools
            .iter()
            .filter(|(_, &owner)| owner == raw)
            .map(|(&cmd, _)| cmd)
            .collect();
        for cmd in buffers {
            if s.in_flight.contains(&cmd) {
                s.violation(format!("command pool {raw:#x} destroyed while {cmd:#x} executes"));
            }
            s.buffer_pools.remove(&cmd);
            s.recording.remove(&cmd);
        }
        s.release(raw, ObjectKind::CommandPool);
    }

    fn reset_command_pool(&self, pool: vk::CommandPool) -> RenderResult<()> {
        let mut guard = self.state.lock();
        let s = &mut *guard;
        if s.lost {
            return Err(RenderError::DeviceLost);
        }
        let raw = pool.as_raw();
        let buffers: Vec<u64> = s
            .buffer_pools
            .iter()
            .filter(|(_, &owner)| owner == raw)
            .map(|(&cmd, _)| cmd)
            .collect();
        for cmd in buffers {
            if s.in_flight.contains(&cmd) {
                s.violation(format!("command pool {raw:#x} reset while {cmd:#x} executes"));
            }
            s.recording.remove(&cmd);
        }
        s.events.push(GpuEvent::CommandPoolReset(pool));
        Ok(())
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RenderResult<vk::CommandBuffer> {
        let mut s = self.state.lock();
        let id = s.next_id();
        s.buffer_pools.insert(id, pool.as_raw());
        Ok(vk::CommandBuffer::from_raw(id))
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        let mut guard = self.state.lock();
        let s = &mut *guard;
        let raw = command_buffer.as_raw();
        if s.in_flight.contains(&raw) {
            s.violation(format!("command buffer {raw:#x} recorded while in flight"));
        }
        s.recording.insert(raw);
        for pool in s.descriptor_pools.values_mut() {
            pool.users.remove(&raw);
        }
        s.events.push(GpuEvent::CommandBufferBegun(command_buffer));
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        let mut s = self.state.lock();
        let raw = command_buffer.as_raw();
        if !s.recording.remove(&raw) {
            s.violation(format!("command buffer {raw:#x} ended without begin"));
        }
        Ok(())
    }

    fn queue_submit(&self, submit: &QueueSubmit) -> RenderResult<()> {
        let mut guard = self.state.lock();
        let s = &mut *guard;
        if s.lost {
            return Err(RenderError::DeviceLost);
        }

        let cmd = submit.command_buffer.as_raw();
        if s.recording.contains(&cmd) {
            s.violation(format!("command buffer {cmd:#x} submitted while still recording"));
        }
        if s.in_flight.contains(&cmd) {
            s.violation(format!("command buffer {cmd:#x} submitted twice"));
        }

        if let Some((semaphore, _)) = submit.wait {
            if !s.consume_semaphore(semaphore.as_raw()) {
                s.violation(format!(
                    "submission waits on semaphore {:#x} that nothing signaled",
                    semaphore.as_raw()
                ));
            }
        }
        if let Some(semaphore) = submit.signal {
            let already = s.semaphores.insert(semaphore.as_raw(), true);
            if already == Some(true) {
                s.violation(format!("semaphore {:#x} signaled twice", semaphore.as_raw()));
            }
        }

        let fence = submit.fence.as_raw();
        let armed = match s.fences.get_mut(&fence) {
            Some(state) => {
                let was_clean = !state.signaled && state.pending.is_none();
                state.signaled = false;
                state.pending = Some(cmd);
                was_clean
            }
            None => false,
        };
        if !armed {
            s.violation(format!("submitted with fence {fence:#x} that was not reset or unknown"));
        }

        s.in_flight.insert(cmd);
        s.events.push(GpuEvent::Submitted {
            command_buffer: submit.command_buffer,
            fence: submit.fence,
        });
        Ok(())
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _sizes: &[vk::DescriptorPoolSize],
    ) -> RenderResult<vk::DescriptorPool> {
        let mut s = self.state.lock();
        let id = s.alloc(ObjectKind::DescriptorPool);
        s.descriptor_pools.insert(
            id,
            DescriptorPoolState {
                max_sets,
                allocated: 0,
                users: HashSet::new(),
            },
        );
        let pool = vk::DescriptorPool::from_raw(id);
        s.events.push(GpuEvent::DescriptorPoolCreated { pool, max_sets });
        Ok(pool)
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> RenderResult<()> {
        let mut guard = self.state.lock();
        let s = &mut *guard;
        let raw = pool.as_raw();
        let busy = match s.descriptor_pools.get_mut(&raw) {
            Some(state) => {
                let busy: Vec<u64> = state
                    .users
                    .iter()
                    .copied()
                    .filter(|cmd| s.in_flight.contains(cmd))
                    .collect();
                state.allocated = 0;
                state.users.clear();
                busy
            }
            None => Vec::new(),
        };
        for cmd in busy {
            s.violation(format!("descriptor pool {raw:#x} reset while {cmd:#x} executes"));
        }
        s.events.push(GpuEvent::DescriptorPoolReset(pool));
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut s = self.state.lock();
        s.descriptor_pools.remove(&pool.as_raw());
        s.release(pool.as_raw(), ObjectKind::DescriptorPool);
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet> {
        let mut guard = self.state.lock();
        let s = &mut *guard;
        if s.lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        let raw = pool.as_raw();
        let recording = &s.recording;
        let has_room = s.descriptor_pools.get_mut(&raw).map(|state| {
            if state.allocated >= state.max_sets {
                return false;
            }
            state.allocated += 1;
            state.users.extend(recording.iter().copied());
            true
        });
        match has_room {
            Some(true) => Ok(vk::DescriptorSet::from_raw(s.next_id())),
            Some(false) => Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY),
            None => {
                s.violation(format!("descriptor set allocated from unknown pool {raw:#x}"));
                Err(vk::Result::ERROR_UNKNOWN)
            }
        }
    }

    fn update_descriptor_sets(&self, _writes: &[vk::WriteDescriptorSet]) {}

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RenderResult<vk::DescriptorSetLayout> {
        let mut s = self.state.lock();
        Ok(vk::DescriptorSetLayout::from_raw(s.alloc(ObjectKind::DescriptorSetLayout)))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state
            .lock()
            .release(layout.as_raw(), ObjectKind::DescriptorSetLayout);
    }

    fn create_swapchain(
        &self,
        extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> RenderResult<SwapchainParts> {
        let mut guard = self.state.lock();
        let s = &mut *guard;
        if s.lost {
            return Err(RenderError::DeviceLost);
        }
        if s.surface_extent.width == 0 || s.surface_extent.height == 0 {
            return Err(RenderError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        if old_swapchain != vk::SwapchainKHR::null() && !s.swapchains.contains_key(&old_swapchain.as_raw()) {
            s.violation(format!("old swapchain {:#x} is not alive", old_swapchain.as_raw()));
        }
        if extent != s.surface_extent {
            log::debug!(
                "[headless] requested {}x{}, surface is {}x{}",
                extent.width,
                extent.height,
                s.surface_extent.width,
                s.surface_extent.height
            );
        }

        // Like a real surface, the current extent wins over the request
        let extent = s.surface_extent;
        let id = s.alloc(ObjectKind::Swapchain);
        let images: Vec<u64> = (0..s.image_count)
            .map(|_| s.alloc(ObjectKind::SwapchainImage))
            .collect();
        let image_count = images.len() as u32;
        s.swapchains.insert(
            id,
            SwapchainState {
                images: images.clone(),
                extent,
                next_image: 0,
            },
        );

        let swapchain = vk::SwapchainKHR::from_raw(id);
        s.events.push(GpuEvent::SwapchainCreated { swapchain, extent, image_count });

        Ok(SwapchainParts {
            swapchain,
            images: images.into_iter().map(vk::Image::from_raw).collect(),
            format: vk::Format::B8G8R8A8_SRGB,
            extent,
        })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut guard = self.state.lock();
        let s = &mut *guard;
        let raw = swapchain.as_raw();
        if let Some(chain) = s.swapchains.remove(&raw) {
            let orphaned = s
                .view_targets
                .values()
                .filter(|&&image| chain.images.contains(&image))
                .count();
            if orphaned > 0 {
                s.violation(format!(
                    "swapchain {raw:#x} destroyed while {orphaned} image views still reference it"
                ));
            }
            for image in chain.images {
                s.release(image, ObjectKind::SwapchainImage);
            }
        }
        s.release(raw, ObjectKind::Swapchain);
        s.events.push(GpuEvent::SwapchainDestroyed(swapchain));
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
        _timeout_ns: u64,
    ) -> VkResult<(u32, bool)> {
        let mut guard = self.state.lock();
        let s = &mut *guard;
        if s.lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        if s.forced_out_of_date > 0 {
            s.forced_out_of_date -= 1;
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }

        let surface_extent = s.surface_extent;
        let acquired = s.swapchains.get_mut(&swapchain.as_raw()).map(|chain| {
            if chain.extent != surface_extent {
                return None;
            }
            let index = chain.next_image;
            chain.next_image = (index + 1) % chain.images.len() as u32;
            Some(index)
        });
        let image_index = match acquired {
            Some(Some(index)) => index,
            Some(None) => return Err(vk::Result::ERROR_OUT_OF_DATE_KHR),
            None => {
                s.violation(format!("acquire from dead swapchain {:#x}", swapchain.as_raw()));
                return Err(vk::Result::ERROR_UNKNOWN);
            }
        };

        if s.semaphores.insert(signal.as_raw(), true) == Some(true) {
            s.violation(format!(
                "acquire signals semaphore {:#x} that still has an unconsumed signal",
                signal.as_raw()
            ));
        }
        s.events.push(GpuEvent::ImageAcquired { image_index });

        let suboptimal = s.forced_suboptimal_acquires > 0;
        if suboptimal {
            s.forced_suboptimal_acquires -= 1;
        }
        Ok((image_index, suboptimal))
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut guard = self.state.lock();
        let s = &mut *guard;
        if s.lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        if !s.consume_semaphore(wait.as_raw()) {
            s.violation(format!(
                "present waits on semaphore {:#x} that nothing signaled",
                wait.as_raw()
            ));
        }

        let surface_extent = s.surface_extent;
        let Some(extent) = s.swapchains.get(&swapchain.as_raw()).map(|chain| chain.extent) else {
            s.violation(format!("present to dead swapchain {:#x}", swapchain.as_raw()));
            return Err(vk::Result::ERROR_UNKNOWN);
        };
        s.events.push(GpuEvent::Presented { image_index });

        if extent != surface_extent {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }
        if s.forced_suboptimal_presents > 0 {
            s.forced_suboptimal_presents -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> RenderResult<vk::ImageView> {
        let mut s = self.state.lock();
        if !s.live.contains_key(&image.as_raw()) {
            s.violation(format!("view created for dead image {:#x}", image.as_raw()));
        }
        let id = s.alloc(ObjectKind::ImageView);
        s.view_targets.insert(id, image.as_raw());
        Ok(vk::ImageView::from_raw(id))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut s = self.state.lock();
        s.view_targets.remove(&view.as_raw());
        s.release(view.as_raw(), ObjectKind::ImageView);
    }

    fn create_image(&self, desc: &ImageDesc, extent: vk::Extent3D) -> RenderResult<AllocatedImage> {
        let mut s = self.state.lock();
        if s.lost {
            return Err(RenderError::DeviceLost);
        }
        let image = s.alloc(ObjectKind::Image);
        s.image_extents.insert(image, extent);
        let view = s.alloc(ObjectKind::ImageView);
        s.view_targets.insert(view, image);

        Ok(AllocatedImage {
            image: vk::Image::from_raw(image),
            view: vk::ImageView::from_raw(view),
            extent,
            format: desc.format,
        })
    }

    fn destroy_image(&self, image: &AllocatedImage) {
        let mut s = self.state.lock();
        s.view_targets.remove(&image.view.as_raw());
        s.release(image.view.as_raw(), ObjectKind::ImageView);
        s.image_extents.remove(&image.image.as_raw());
        s.release(image.image.as_raw(), ObjectKind::Image);
    }
}
