// Descriptors - growable pool-of-pools allocator, layout builder, writer
//
// Pools with room sit in the ready list, exhausted ones in the full list, and a
// new pool is created on demand with geometrically growing capacity up to a cap.
// Each frame slot owns one allocator and clears it once per frame: every pool is
// reset, none destroyed, so steady-state frames create no pools.

use ash::vk;

use crate::backend::RenderDevice;
use crate::error::{RenderError, RenderResult};

/// Descriptors of type `ty` reserved per set in every pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolSizeRatio {
    pub ty: vk::DescriptorType,
    pub ratio: f32,
}

/// How pool capacity grows once the ready list runs dry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthPolicy {
    pub factor: f32,
    pub max_sets_per_pool: u32,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            factor: 1.5,
            max_sets_per_pool: 4092,
        }
    }
}

impl GrowthPolicy {
    fn grow(&self, sets: u32) -> u32 {
        let grown = (sets as f32 * self.factor) as u32;
        grown.min(self.max_sets_per_pool).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DescriptorPool {
    handle: vk::DescriptorPool,
    max_sets: u32,
}

pub struct DescriptorAllocatorGrowable {
    ratios: Vec<PoolSizeRatio>,
    ready_pools: Vec<DescriptorPool>,
    full_pools: Vec<DescriptorPool>,
    /// Capacity of the next pool created
    sets_per_pool: u32,
    policy: GrowthPolicy,
}

impl DescriptorAllocatorGrowable {
    /// Create the allocator with one pool of `initial_sets` sets ready.
    pub fn new<D: RenderDevice>(
        device: &D,
        initial_sets: u32,
        ratios: &[PoolSizeRatio],
        policy: GrowthPolicy,
    ) -> RenderResult<Self> {
        let initial_sets = initial_sets.max(1);
        let first = create_pool(device, initial_sets, ratios)?;

        Ok(Self {
            ratios: ratios.to_vec(),
            ready_pools: vec![first],
            full_pools: Vec::new(),
            sets_per_pool: policy.grow(initial_sets),
            policy,
        })
    }

    /// Allocate one set. Pool exhaustion is absorbed by moving to a new pool;
    /// only a second consecutive failure reaches the caller.
    pub fn allocate<D: RenderDevice>(
        &mut self,
        device: &D,
        layout: vk::DescriptorSetLayout,
    ) -> RenderResult<vk::DescriptorSet> {
        let pool = self.get_pool(device)?;

        let set = match device.allocate_descriptor_set(pool.handle, layout) {
            Ok(set) => set,
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                self.full_pools.push(pool);
                let retry_pool = self.get_pool(device)?;

                match device.allocate_descriptor_set(retry_pool.handle, layout) {
                    Ok(set) => {
                        self.ready_pools.push(retry_pool);
                        return Ok(set);
                    }
                    Err(
                        vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL,
                    ) => {
                        self.full_pools.push(retry_pool);
                        return Err(RenderError::DescriptorExhausted {
                            capacity: retry_pool.max_sets,
                        });
                    }
                    Err(err) => {
                        self.ready_pools.push(retry_pool);
                        return Err(err.into());
                    }
                }
            }
            Err(err) => {
                self.ready_pools.push(pool);
                return Err(err.into());
            }
        };

        self.ready_pools.push(pool);
        Ok(set)
    }

    /// Reset every pool and make all of them allocatable again.
    ///
    /// Only legal once the GPU work that used sets from these pools has finished.
    pub fn clear_pools<D: RenderDevice>(&mut self, device: &D) -> RenderResult<()> {
        for pool in &self.ready_pools {
            device.reset_descriptor_pool(pool.handle)?;
        }
        for pool in self.full_pools.drain(..) {
            device.reset_descriptor_pool(pool.handle)?;
            self.ready_pools.push(pool);
        }
        Ok(())
    }

    pub fn destroy_pools<D: RenderDevice>(&mut self, device: &D) {
        for pool in self.ready_pools.drain(..).chain(self.full_pools.drain(..)) {
            device.destroy_descriptor_pool(pool.handle);
        }
    }

    pub fn ready_pool_count(&self) -> usize {
        self.ready_pools.len()
    }

    pub fn full_pool_count(&self) -> usize {
        self.full_pools.len()
    }

    pub fn pool_count(&self) -> usize {
        self.ready_pools.len() + self.full_pools.len()
    }

    /// Capacity the next newly created pool will get.
    pub fn next_pool_capacity(&self) -> u32 {
        self.sets_per_pool
    }

    /// Set capacities of every pool, ready ones first.
    pub fn pool_capacities(&self) -> Vec<u32> {
        self.ready_pools
            .iter()
            .chain(&self.full_pools)
            .map(|pool| pool.max_sets)
            .collect()
    }

    fn get_pool<D: RenderDevice>(&mut self, device: &D) -> RenderResult<DescriptorPool> {
        if let Some(pool) = self.ready_pools.pop() {
            return Ok(pool);
        }

        let pool = create_pool(device, self.sets_per_pool, &self.ratios)?;
        self.sets_per_pool = self.policy.grow(self.sets_per_pool);
        log::debug!(
            "Descriptor allocator grew: new pool of {} sets ({} pools total)",
            pool.max_sets,
            self.pool_count() + 1
        );
        Ok(pool)
    }
}

fn create_pool<D: RenderDevice>(
    device: &D,
    set_count: u32,
    ratios: &[PoolSizeRatio],
) -> RenderResult<DescriptorPool> {
    let sizes: Vec<vk::DescriptorPoolSize> = ratios
        .iter()
        .map(|ratio| vk::DescriptorPoolSize {
            ty: ratio.ty,
            descriptor_count: ((ratio.ratio * set_count as f32) as u32).max(1),
        })
        .collect();

    let handle = device.create_descriptor_pool(set_count, &sizes)?;
    Ok(DescriptorPool {
        handle,
        max_sets: set_count,
    })
}

/// Accumulates bindings and builds a set layout from them.
#[derive(Debug, Default)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_binding(mut self, binding: u32, ty: vk::DescriptorType) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(1)
                .build(),
        );
        self
    }

    pub fn build<D: RenderDevice>(
        mut self,
        device: &D,
        stages: vk::ShaderStageFlags,
    ) -> RenderResult<vk::DescriptorSetLayout> {
        for binding in &mut self.bindings {
            binding.stage_flags |= stages;
        }
        device.create_descriptor_set_layout(&self.bindings)
    }
}

enum WriteInfo {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

struct PendingWrite {
    binding: u32,
    ty: vk::DescriptorType,
    info: WriteInfo,
}

/// Collects descriptor writes and flushes them in one update call.
#[derive(Default)]
pub struct DescriptorWriter {
    writes: Vec<PendingWrite>,
}

impl DescriptorWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_buffer(
        &mut self,
        binding: u32,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        offset: vk::DeviceSize,
        ty: vk::DescriptorType,
    ) -> &mut Self {
        self.writes.push(PendingWrite {
            binding,
            ty,
            info: WriteInfo::Buffer(vk::DescriptorBufferInfo {
                buffer,
                offset,
                range: size,
            }),
        });
        self
    }

    pub fn write_image(
        &mut self,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
        ty: vk::DescriptorType,
    ) -> &mut Self {
        self.writes.push(PendingWrite {
            binding,
            ty,
            info: WriteInfo::Image(vk::DescriptorImageInfo {
                sampler,
                image_view: view,
                image_layout: layout,
            }),
        });
        self
    }

    pub fn clear(&mut self) {
        self.writes.clear();
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn update_set<D: RenderDevice>(&self, device: &D, set: vk::DescriptorSet) {
        // The infos live in `self.writes`, which stays untouched until the call returns
        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|write| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(write.binding)
                    .descriptor_type(write.ty);
                match &write.info {
                    WriteInfo::Buffer(info) => builder.buffer_info(std::slice::from_ref(info)).build(),
                    WriteInfo::Image(info) => builder.image_info(std::slice::from_ref(info)).build(),
                }
            })
            .collect();

        device.update_descriptor_sets(&writes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessDevice;
    use crate::backend::headless::GpuEvent;

    fn ratios() -> Vec<PoolSizeRatio> {
        vec![
            PoolSizeRatio { ty: vk::DescriptorType::UNIFORM_BUFFER, ratio: 3.0 },
            PoolSizeRatio { ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER, ratio: 4.0 },
        ]
    }

    fn device() -> HeadlessDevice {
        HeadlessDevice::new(vk::Extent2D { width: 64, height: 64 }, 2)
    }

    fn pools_created(device: &HeadlessDevice) -> Vec<u32> {
        device
            .events()
            .into_iter()
            .filter_map(|event| match event {
                GpuEvent::DescriptorPoolCreated { max_sets, .. } => Some(max_sets),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn second_pool_grows_by_half_and_clear_reuses_both() {
        let device = device();
        let layout = vk::DescriptorSetLayout::null();
        let mut allocator =
            DescriptorAllocatorGrowable::new(&device, 1000, &ratios(), GrowthPolicy::default()).unwrap();

        for _ in 0..1001 {
            allocator.allocate(&device, layout).unwrap();
        }
        assert_eq!(pools_created(&device), vec![1000, 1500]);
        assert_eq!(allocator.full_pool_count(), 1);
        assert_eq!(allocator.ready_pool_count(), 1);

        allocator.clear_pools(&device).unwrap();
        assert_eq!(allocator.full_pool_count(), 0);
        assert_eq!(allocator.ready_pool_count(), 2);

        // Both pools' worth of sets fit again without creating anything
        for _ in 0..2500 {
            allocator.allocate(&device, layout).unwrap();
        }
        assert_eq!(pools_created(&device).len(), 2);
        assert_eq!(device.descriptor_pool_count(), 2);

        allocator.destroy_pools(&device);
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn capacity_growth_is_capped() {
        let policy = GrowthPolicy { factor: 1.5, max_sets_per_pool: 20 };
        let device = device();
        let mut allocator = DescriptorAllocatorGrowable::new(&device, 10, &ratios(), policy).unwrap();
        assert_eq!(allocator.next_pool_capacity(), 15);

        for _ in 0..(10 + 15 + 20 + 1) {
            allocator.allocate(&device, vk::DescriptorSetLayout::null()).unwrap();
        }
        assert_eq!(pools_created(&device), vec![10, 15, 20, 20]);
        assert_eq!(allocator.next_pool_capacity(), 20);

        allocator.destroy_pools(&device);
    }

    #[test]
    fn zero_cap_still_grows_one_set_at_a_time() {
        let policy = GrowthPolicy { factor: 1.5, max_sets_per_pool: 0 };
        let device = device();
        let mut allocator = DescriptorAllocatorGrowable::new(&device, 4, &[], policy).unwrap();
        assert_eq!(allocator.next_pool_capacity(), 1);

        for _ in 0..6 {
            allocator.allocate(&device, vk::DescriptorSetLayout::null()).unwrap();
        }
        assert_eq!(pools_created(&device), vec![4, 1, 1]);

        allocator.destroy_pools(&device);
    }

    #[test]
    fn every_pool_stays_in_exactly_one_list() {
        let device = device();
        let mut allocator =
            DescriptorAllocatorGrowable::new(&device, 4, &ratios(), GrowthPolicy::default()).unwrap();

        for _ in 0..40 {
            allocator.allocate(&device, vk::DescriptorSetLayout::null()).unwrap();
        }
        assert_eq!(allocator.pool_count(), device.descriptor_pool_count());

        allocator.clear_pools(&device).unwrap();
        assert_eq!(allocator.ready_pool_count(), device.descriptor_pool_count());

        allocator.destroy_pools(&device);
        assert_eq!(allocator.pool_count(), 0);
    }

    #[test]
    fn device_errors_are_not_treated_as_exhaustion() {
        let device = device();
        let mut allocator =
            DescriptorAllocatorGrowable::new(&device, 2, &ratios(), GrowthPolicy::default()).unwrap();
        allocator.allocate(&device, vk::DescriptorSetLayout::null()).unwrap();
        device.lose_device();

        let err = allocator
            .allocate(&device, vk::DescriptorSetLayout::null())
            .unwrap_err();
        assert!(err.is_device_lost());
        assert_eq!(allocator.pool_count(), 1);
    }

    #[test]
    fn writer_collects_writes() {
        let device = device();
        let mut writer = DescriptorWriter::new();
        writer
            .write_buffer(0, vk::Buffer::null(), 64, 0, vk::DescriptorType::UNIFORM_BUFFER)
            .write_image(
                1,
                vk::ImageView::null(),
                vk::Sampler::null(),
                vk::ImageLayout::GENERAL,
                vk::DescriptorType::STORAGE_IMAGE,
            );
        assert_eq!(writer.len(), 2);

        writer.update_set(&device, vk::DescriptorSet::null());
        writer.clear();
        assert!(writer.is_empty());
    }
}
