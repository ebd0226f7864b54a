//! Descriptor layout interning and set allocation.
//!
//! Layouts are deduplicated by structural equality so structurally
//! identical binding lists share one native handle. Sets are allocated
//! from a growable pool-of-pools that is bulk-reclaimed between frames
//! instead of freeing individual sets.

use std::collections::HashMap;

use ash::vk;

use crate::error::{GpuError, Result};

/// One descriptor binding in backend-native terms.
///
/// This is the normalized form reflection output is converted to before
/// layout creation; it is also the unit of the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

impl LayoutBinding {
    fn to_vk(self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(self.binding)
            .descriptor_type(self.descriptor_type)
            .descriptor_count(self.count)
            .stage_flags(self.stages)
    }
}

/// Interning cache for descriptor set layouts.
///
/// The cache is a bijection from normalized binding list to native handle
/// for the lifetime of the context; it is torn down as a unit at backend
/// shutdown.
#[derive(Default)]
pub struct DescriptorLayoutCache {
    layouts: HashMap<Vec<LayoutBinding>, vk::DescriptorSetLayout>,
}

impl DescriptorLayoutCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the layout for `bindings`, creating it on first use.
    ///
    /// Binding lists that are permutations of each other intern to the
    /// same handle.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn get_or_create(
        &mut self,
        device: &ash::Device,
        bindings: &[LayoutBinding],
    ) -> Result<vk::DescriptorSetLayout> {
        self.get_or_create_with(bindings, |normalized| {
            let vk_bindings: Vec<_> = normalized.iter().map(|b| b.to_vk()).collect();
            let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
            let layout = device.create_descriptor_set_layout(&layout_info, None)?;
            Ok(layout)
        })
    }

    /// Number of distinct native layouts held.
    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    /// Whether the cache holds no layouts.
    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    /// Destroy every cached layout.
    ///
    /// # Safety
    /// The device must be valid and no cached layout may be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for (_, layout) in self.layouts.drain() {
            device.destroy_descriptor_set_layout(layout, None);
        }
    }

    fn get_or_create_with(
        &mut self,
        bindings: &[LayoutBinding],
        create: impl FnOnce(&[LayoutBinding]) -> Result<vk::DescriptorSetLayout>,
    ) -> Result<vk::DescriptorSetLayout> {
        let key = normalize(bindings);
        if let Some(&layout) = self.layouts.get(&key) {
            return Ok(layout);
        }
        let layout = create(&key)?;
        self.layouts.insert(key, layout);
        Ok(layout)
    }
}

/// Normalize a binding list into cache-key order.
///
/// Already-ascending lists are used as-is; anything else gets a stable
/// sort by binding index, so two semantically identical but differently
/// ordered lists produce the same key.
fn normalize(bindings: &[LayoutBinding]) -> Vec<LayoutBinding> {
    let mut normalized = bindings.to_vec();
    if !normalized.windows(2).all(|w| w[0].binding <= w[1].binding) {
        normalized.sort_by_key(|b| b.binding);
    }
    normalized
}

/// Capacity of one descriptor pool, in sets.
const SETS_PER_POOL: u32 = 512;

/// Fixed per-type capacity mix for a freshly created pool. Generously
/// sized so a pool only runs out under real pressure.
fn pool_sizes() -> [vk::DescriptorPoolSize; 2] {
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: SETS_PER_POOL * 2,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: SETS_PER_POOL * 2,
        },
    ]
}

/// Growable pool-of-pools descriptor set allocator.
///
/// Exhausted or fragmented pools trigger exactly one retry against a
/// freshly grabbed pool; `reset` returns every used pool to the free list
/// for reuse, invalidating all sets allocated from them at once.
#[derive(Default)]
pub struct DescriptorSetAllocator {
    current: Option<vk::DescriptorPool>,
    used: Vec<vk::DescriptorPool>,
    free: Vec<vk::DescriptorPool>,
}

impl DescriptorSetAllocator {
    /// Create an allocator with no pools; the first allocation grabs one.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate one descriptor set with the given layout.
    ///
    /// # Safety
    /// The device and layout must be valid.
    pub unsafe fn allocate(
        &mut self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        self.allocate_inner(
            || {
                let sizes = pool_sizes();
                let create_info = vk::DescriptorPoolCreateInfo::default()
                    .max_sets(SETS_PER_POOL)
                    .pool_sizes(&sizes);
                let pool = device.create_descriptor_pool(&create_info, None)?;
                Ok(pool)
            },
            |pool| {
                let layouts = [layout];
                let alloc_info = vk::DescriptorSetAllocateInfo::default()
                    .descriptor_pool(pool)
                    .set_layouts(&layouts);
                device.allocate_descriptor_sets(&alloc_info).map(|sets| sets[0])
            },
        )
    }

    /// Bulk-reclaim: reset every used pool and move it to the free list.
    ///
    /// Every descriptor set allocated from those pools becomes invalid
    /// simultaneously; callers must not reference sets across a reset.
    ///
    /// # Safety
    /// The device must be valid and no set from a used pool may be bound
    /// in unsubmitted work.
    pub unsafe fn reset(&mut self, device: &ash::Device) -> Result<()> {
        self.reset_inner(|pool| {
            device.reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())?;
            Ok(())
        })
    }

    /// Number of native pools this allocator has created and still owns.
    pub fn pool_count(&self) -> usize {
        self.used.len() + self.free.len()
    }

    /// Destroy every owned pool.
    ///
    /// # Safety
    /// The device must be valid and no pool may be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        self.current = None;
        for pool in self.used.drain(..).chain(self.free.drain(..)) {
            device.destroy_descriptor_pool(pool, None);
        }
    }

    fn allocate_inner(
        &mut self,
        mut create_pool: impl FnMut() -> Result<vk::DescriptorPool>,
        mut try_allocate: impl FnMut(
            vk::DescriptorPool,
        ) -> std::result::Result<vk::DescriptorSet, vk::Result>,
    ) -> Result<vk::DescriptorSet> {
        let pool = match self.current {
            Some(pool) => pool,
            None => self.grab_pool(&mut create_pool)?,
        };

        match try_allocate(pool) {
            Ok(set) => Ok(set),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                // One retry against a fresh pool; a second failure is fatal.
                let fresh = self.grab_pool(&mut create_pool)?;
                match try_allocate(fresh) {
                    Ok(set) => Ok(set),
                    Err(
                        vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL,
                    ) => {
                        tracing::error!("descriptor allocation failed twice; giving up");
                        Err(GpuError::DescriptorExhausted)
                    }
                    Err(e) => Err(GpuError::Vulkan(e)),
                }
            }
            Err(e) => Err(GpuError::Vulkan(e)),
        }
    }

    /// Reuse a free pool or create a new one; either way it becomes the
    /// current pool and joins the used list.
    fn grab_pool(
        &mut self,
        create_pool: &mut impl FnMut() -> Result<vk::DescriptorPool>,
    ) -> Result<vk::DescriptorPool> {
        let pool = match self.free.pop() {
            Some(pool) => pool,
            None => create_pool()?,
        };
        self.used.push(pool);
        self.current = Some(pool);
        Ok(pool)
    }

    fn reset_inner(
        &mut self,
        mut reset_pool: impl FnMut(vk::DescriptorPool) -> Result<()>,
    ) -> Result<()> {
        for &pool in &self.used {
            reset_pool(pool)?;
        }
        self.free.append(&mut self.used);
        self.current = None;
        Ok(())
    }
}

/// Write a uniform buffer into a descriptor set binding.
///
/// # Safety
/// Device, set and buffer must be valid.
pub unsafe fn write_uniform_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    offset: u64,
    range: u64,
) {
    let buffer_info = vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(offset)
        .range(range);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(std::slice::from_ref(&buffer_info));

    device.update_descriptor_sets(&[write], &[]);
}

/// Write a combined image sampler into a descriptor set binding.
///
/// # Safety
/// Device, set, view and sampler must be valid.
pub unsafe fn write_combined_image_sampler(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    image_view: vk::ImageView,
    sampler: vk::Sampler,
    layout: vk::ImageLayout,
) {
    let image_info = vk::DescriptorImageInfo::default()
        .image_view(image_view)
        .sampler(sampler)
        .image_layout(layout);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(std::slice::from_ref(&image_info));

    device.update_descriptor_sets(&[write], &[]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn binding(index: u32, ty: vk::DescriptorType) -> LayoutBinding {
        LayoutBinding {
            binding: index,
            descriptor_type: ty,
            count: 1,
            stages: vk::ShaderStageFlags::FRAGMENT,
        }
    }

    #[test]
    fn permuted_binding_lists_share_one_layout() {
        let mut cache = DescriptorLayoutCache::new();
        let mut created = 0u64;
        let mut create = |_: &[LayoutBinding]| {
            created += 1;
            Ok(vk::DescriptorSetLayout::from_raw(created))
        };

        let a = [
            binding(0, vk::DescriptorType::UNIFORM_BUFFER),
            binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
        ];
        let b = [a[1], a[0]];

        let first = cache.get_or_create_with(&a, &mut create).unwrap();
        let second = cache.get_or_create_with(&b, &mut create).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn different_binding_lists_get_different_layouts() {
        let mut cache = DescriptorLayoutCache::new();
        let mut created = 0u64;
        let mut create = |_: &[LayoutBinding]| {
            created += 1;
            Ok(vk::DescriptorSetLayout::from_raw(created))
        };

        let a = [binding(0, vk::DescriptorType::UNIFORM_BUFFER)];
        let b = [binding(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)];

        let first = cache.get_or_create_with(&a, &mut create).unwrap();
        let second = cache.get_or_create_with(&b, &mut create).unwrap();
        assert_ne!(first, second);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn sorted_input_is_not_reordered() {
        let a = [
            binding(2, vk::DescriptorType::UNIFORM_BUFFER),
            binding(5, vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
        ];
        assert_eq!(normalize(&a), a.to_vec());

        let unsorted = [a[1], a[0]];
        assert_eq!(normalize(&unsorted), a.to_vec());
    }

    /// Fake pool backend with a fixed per-pool capacity.
    struct FakePools {
        next_pool: u64,
        capacity: u32,
        fill: HashMap<u64, u32>,
    }

    impl FakePools {
        fn new(capacity: u32) -> Self {
            Self {
                next_pool: 0,
                capacity,
                fill: HashMap::new(),
            }
        }

        fn create(&mut self) -> Result<vk::DescriptorPool> {
            self.next_pool += 1;
            self.fill.insert(self.next_pool, 0);
            Ok(vk::DescriptorPool::from_raw(self.next_pool))
        }

        fn try_allocate(
            &mut self,
            pool: vk::DescriptorPool,
        ) -> std::result::Result<vk::DescriptorSet, vk::Result> {
            let fill = self.fill.get_mut(&pool.as_raw()).unwrap();
            if *fill >= self.capacity {
                return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
            }
            *fill += 1;
            Ok(vk::DescriptorSet::from_raw(
                pool.as_raw() * 1000 + u64::from(*fill),
            ))
        }
    }

    #[test]
    fn pools_grow_by_ceil_of_demand_over_capacity() {
        let capacity = 4u32;
        let total = 10u32;
        let fake = std::cell::RefCell::new(FakePools::new(capacity));
        let mut allocator = DescriptorSetAllocator::new();

        for _ in 0..total {
            allocator
                .allocate_inner(
                    || fake.borrow_mut().create(),
                    |pool| fake.borrow_mut().try_allocate(pool),
                )
                .unwrap();
        }

        let expected = total.div_ceil(capacity) as usize;
        assert_eq!(allocator.pool_count(), expected);
        assert_eq!(fake.borrow().next_pool as usize, expected);
    }

    #[test]
    fn reset_recycles_pools_before_creating_new_ones() {
        let fake = std::cell::RefCell::new(FakePools::new(2));
        let mut allocator = DescriptorSetAllocator::new();

        for _ in 0..4 {
            allocator
                .allocate_inner(
                    || fake.borrow_mut().create(),
                    |pool| fake.borrow_mut().try_allocate(pool),
                )
                .unwrap();
        }
        assert_eq!(allocator.pool_count(), 2);

        allocator
            .reset_inner(|pool| {
                fake.borrow_mut().fill.insert(pool.as_raw(), 0);
                Ok(())
            })
            .unwrap();
        assert_eq!(allocator.used.len(), 0);
        assert_eq!(allocator.free.len(), 2);

        allocator
            .allocate_inner(
                || fake.borrow_mut().create(),
                |pool| fake.borrow_mut().try_allocate(pool),
            )
            .unwrap();

        // The allocation came from the free list, not a new pool.
        assert_eq!(fake.borrow().next_pool, 2);
        assert_eq!(allocator.used.len(), 1);
        assert_eq!(allocator.free.len(), 1);
    }

    #[test]
    fn second_failure_is_fatal() {
        let mut next_pool = 0u64;
        let mut allocator = DescriptorSetAllocator::new();

        let result = allocator.allocate_inner(
            || {
                next_pool += 1;
                Ok(vk::DescriptorPool::from_raw(next_pool))
            },
            |_| Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY),
        );

        assert!(matches!(result, Err(GpuError::DescriptorExhausted)));
        // The failed allocation still grabbed exactly two pools.
        assert_eq!(allocator.pool_count(), 2);
    }
}
