use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::{device::Device, AccelerationStructure, Buffer, Context, ImageView, Sampler};

pub struct DescriptorSetLayout {
    device: Arc<Device>,
    pub(crate) inner: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub(crate) fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
        binding_flags: &[vk::DescriptorBindingFlags],
    ) -> Result<Self> {
        let mut flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder().binding_flags(binding_flags);

        let dsl_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
        let dsl_info = if binding_flags.iter().any(|f| !f.is_empty()) {
            dsl_info.push_next(&mut flags_info)
        } else {
            dsl_info
        };

        let inner = unsafe { device.inner.create_descriptor_set_layout(&dsl_info, None)? };

        Ok(Self { device, inner })
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .inner
                .destroy_descriptor_set_layout(self.inner, None);
        }
    }
}

/// Small DSL for set layouts, mirrored on every pass and registry.
pub struct DescriptorSetLayoutBuilder {
    device: Arc<Device>,
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
    binding_flags: Vec<vk::DescriptorBindingFlags>,
}

impl DescriptorSetLayoutBuilder {
    pub fn add_binding(
        mut self,
        binding: u32,
        ty: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.add_binding_mut(binding, ty, stage_flags, 1, vk::DescriptorBindingFlags::empty());
        self
    }

    pub fn add_binding_count(
        mut self,
        binding: u32,
        ty: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        count: u32,
    ) -> Self {
        self.add_binding_mut(binding, ty, stage_flags, count, vk::DescriptorBindingFlags::empty());
        self
    }

    /// Runtime-sized array binding for bindless access; slots beyond the
    /// registered resources stay unwritten.
    pub fn add_bindless_binding(
        mut self,
        binding: u32,
        ty: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        count: u32,
    ) -> Self {
        self.add_binding_mut(
            binding,
            ty,
            stage_flags,
            count,
            vk::DescriptorBindingFlags::PARTIALLY_BOUND,
        );
        self
    }

    fn add_binding_mut(
        &mut self,
        binding: u32,
        ty: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        count: u32,
        flags: vk::DescriptorBindingFlags,
    ) {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(count)
                .stage_flags(stage_flags)
                .build(),
        );
        self.binding_flags.push(flags);
    }

    pub fn build(self) -> Result<DescriptorSetLayout> {
        DescriptorSetLayout::new(self.device, &self.bindings, &self.binding_flags)
    }
}

pub struct DescriptorPool {
    device: Arc<Device>,
    pub(crate) inner: vk::DescriptorPool,
}

impl DescriptorPool {
    pub(crate) fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Self> {
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);
        let inner = unsafe { device.inner.create_descriptor_pool(&pool_info, None)? };

        Ok(Self { device, inner })
    }

    pub fn allocate_sets(
        &self,
        layout: &DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<DescriptorSet>> {
        let layouts = (0..count).map(|_| layout.inner).collect::<Vec<_>>();
        let sets_alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.inner)
            .set_layouts(&layouts);
        let sets = unsafe {
            self.device
                .inner
                .allocate_descriptor_sets(&sets_alloc_info)?
        };
        let sets = sets
            .into_iter()
            .map(|inner| DescriptorSet {
                device: self.device.clone(),
                inner,
            })
            .collect::<Vec<_>>();

        Ok(sets)
    }

    pub fn allocate_set(&self, layout: &DescriptorSetLayout) -> Result<DescriptorSet> {
        Ok(self.allocate_sets(layout, 1)?.into_iter().next().unwrap())
    }

    /// Allocation variant that surfaces the raw `vk::Result` so the growable
    /// allocator can react to pool exhaustion.
    fn try_allocate_set(
        &self,
        layout: &DescriptorSetLayout,
    ) -> std::result::Result<DescriptorSet, vk::Result> {
        let layouts = [layout.inner];
        let sets_alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.inner)
            .set_layouts(&layouts);
        let sets = unsafe {
            self.device
                .inner
                .allocate_descriptor_sets(&sets_alloc_info)?
        };

        Ok(DescriptorSet {
            device: self.device.clone(),
            inner: sets[0],
        })
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.inner.destroy_descriptor_pool(self.inner, None) };
    }
}

/// Per-descriptor-type share of a pool. A ratio of 2.0 means "two descriptors
/// of this type per set the pool can hold".
#[derive(Debug, Clone, Copy)]
pub struct PoolSizeRatio {
    pub ty: vk::DescriptorType,
    pub ratio: f32,
}

pub(crate) const INITIAL_SETS_PER_POOL: u32 = 8;
pub(crate) const MAX_SETS_PER_POOL: u32 = 4092;

/// Geometric growth of the per-pool set count, capped.
pub(crate) fn next_pool_size(current: u32) -> u32 {
    current.saturating_mul(2).min(MAX_SETS_PER_POOL)
}

/// Pool-of-pools allocator. Sets are never freed individually; the whole
/// allocator is torn down at once. Pools that report out-of-memory are parked
/// in `full_pools` and replaced by a geometrically larger one.
pub struct DescriptorAllocatorGrowable {
    device: Arc<Device>,
    ratios: Vec<PoolSizeRatio>,
    ready_pools: Vec<DescriptorPool>,
    full_pools: Vec<DescriptorPool>,
    sets_per_pool: u32,
}

impl DescriptorAllocatorGrowable {
    pub(crate) fn new(device: Arc<Device>, ratios: Vec<PoolSizeRatio>) -> Self {
        Self {
            device,
            ratios,
            ready_pools: vec![],
            full_pools: vec![],
            sets_per_pool: INITIAL_SETS_PER_POOL,
        }
    }

    fn create_pool(&mut self) -> Result<DescriptorPool> {
        let max_sets = self.sets_per_pool;
        let pool_sizes = self
            .ratios
            .iter()
            .map(|r| {
                vk::DescriptorPoolSize::builder()
                    .ty(r.ty)
                    .descriptor_count(((r.ratio * max_sets as f32).ceil() as u32).max(1))
                    .build()
            })
            .collect::<Vec<_>>();

        self.sets_per_pool = next_pool_size(self.sets_per_pool);
        log::debug!("Creating descriptor pool for {max_sets} sets");

        DescriptorPool::new(self.device.clone(), max_sets, &pool_sizes)
    }

    fn get_pool(&mut self) -> Result<DescriptorPool> {
        match self.ready_pools.pop() {
            Some(pool) => Ok(pool),
            None => self.create_pool(),
        }
    }

    pub fn allocate(&mut self, layout: &DescriptorSetLayout) -> Result<DescriptorSet> {
        let pool = self.get_pool()?;

        let set = match pool.try_allocate_set(layout) {
            Ok(set) => {
                self.ready_pools.push(pool);
                set
            }
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                self.full_pools.push(pool);

                let pool = self.create_pool()?;
                let set = pool.try_allocate_set(layout)?;
                self.ready_pools.push(pool);
                set
            }
            Err(err) => return Err(err.into()),
        };

        Ok(set)
    }

    pub fn pool_count(&self) -> usize {
        self.ready_pools.len() + self.full_pools.len()
    }

    /// Full teardown. Not valid while any frame using sets from this
    /// allocator is still in flight.
    pub fn reset(&mut self) {
        self.ready_pools.clear();
        self.full_pools.clear();
        self.sets_per_pool = INITIAL_SETS_PER_POOL;
    }
}

pub struct DescriptorSet {
    device: Arc<Device>,
    pub(crate) inner: vk::DescriptorSet,
}

impl DescriptorSet {
    /// Raw handle for integrations that track descriptor sets themselves
    /// (the UI renderer's texture map).
    pub fn as_raw(&self) -> vk::DescriptorSet {
        self.inner
    }

    pub fn update(&self, writes: &[WriteDescriptorSet]) {
        use WriteDescriptorSetKind::*;

        // keep the pointed-to info structs alive until the update call
        let mut img_infos = vec![];
        let mut buffer_infos = vec![];
        let mut as_infos = vec![];

        let descriptor_writes = writes
            .iter()
            .map(|write| match write.kind {
                StorageImage { view, layout } => {
                    let img_info = vk::DescriptorImageInfo::builder()
                        .image_view(view.inner)
                        .image_layout(layout);

                    img_infos.push(img_info);

                    vk::WriteDescriptorSet::builder()
                        .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                        .dst_binding(write.binding)
                        .dst_set(self.inner)
                        .image_info(std::slice::from_ref(img_infos.last().unwrap()))
                        .build()
                }
                AccelerationStructure {
                    acceleration_structure,
                } => {
                    let write_set_as = vk::WriteDescriptorSetAccelerationStructureKHR::builder()
                        .acceleration_structures(std::slice::from_ref(
                            &acceleration_structure.inner,
                        ));

                    as_infos.push(write_set_as);

                    let mut write = vk::WriteDescriptorSet::builder()
                        .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                        .dst_binding(write.binding)
                        .dst_set(self.inner)
                        .push_next(as_infos.last_mut().unwrap())
                        .build();
                    write.descriptor_count = 1;

                    write
                }
                UniformBuffer { buffer } => {
                    let buffer_info = vk::DescriptorBufferInfo::builder()
                        .buffer(buffer.inner)
                        .range(vk::WHOLE_SIZE);

                    buffer_infos.push(buffer_info);

                    vk::WriteDescriptorSet::builder()
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .dst_binding(write.binding)
                        .dst_set(self.inner)
                        .buffer_info(std::slice::from_ref(buffer_infos.last().unwrap()))
                        .build()
                }
                StorageBuffer { buffer } => {
                    let buffer_info = vk::DescriptorBufferInfo::builder()
                        .buffer(buffer.inner)
                        .range(vk::WHOLE_SIZE);

                    buffer_infos.push(buffer_info);

                    vk::WriteDescriptorSet::builder()
                        .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                        .dst_binding(write.binding)
                        .dst_set(self.inner)
                        .buffer_info(std::slice::from_ref(buffer_infos.last().unwrap()))
                        .build()
                }
                CombinedImageSampler {
                    view,
                    sampler,
                    layout,
                } => {
                    let img_info = vk::DescriptorImageInfo::builder()
                        .image_view(view.inner)
                        .sampler(sampler.inner)
                        .image_layout(layout);

                    img_infos.push(img_info);

                    vk::WriteDescriptorSet::builder()
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .dst_binding(write.binding)
                        .dst_set(self.inner)
                        .image_info(std::slice::from_ref(img_infos.last().unwrap()))
                        .build()
                }
            })
            .collect::<Vec<_>>();

        unsafe {
            self.device
                .inner
                .update_descriptor_sets(&descriptor_writes, &[])
        };
    }

    /// Writes a whole combined-image-sampler array at `binding`, one element
    /// per entry, starting at array index 0.
    pub fn update_texture_array(
        &self,
        binding: u32,
        entries: &[(&ImageView, &Sampler, vk::ImageLayout)],
    ) {
        if entries.is_empty() {
            return;
        }

        let image_infos = entries
            .iter()
            .map(|(view, sampler, layout)| {
                vk::DescriptorImageInfo::builder()
                    .image_view(view.inner)
                    .sampler(sampler.inner)
                    .image_layout(*layout)
                    .build()
            })
            .collect::<Vec<_>>();

        let write = vk::WriteDescriptorSet::builder()
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .dst_binding(binding)
            .dst_array_element(0)
            .dst_set(self.inner)
            .image_info(&image_infos)
            .build();

        unsafe {
            self.device
                .inner
                .update_descriptor_sets(std::slice::from_ref(&write), &[])
        };
    }
}

impl Context {
    pub fn descriptor_set_layout_builder(&self) -> DescriptorSetLayoutBuilder {
        DescriptorSetLayoutBuilder {
            device: self.device.clone(),
            bindings: vec![],
            binding_flags: vec![],
        }
    }

    pub fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<DescriptorPool> {
        DescriptorPool::new(self.device.clone(), max_sets, pool_sizes)
    }

    pub fn create_descriptor_allocator(
        &self,
        ratios: Vec<PoolSizeRatio>,
    ) -> DescriptorAllocatorGrowable {
        DescriptorAllocatorGrowable::new(self.device.clone(), ratios)
    }
}

#[derive(Clone, Copy)]
pub struct WriteDescriptorSet<'a> {
    pub binding: u32,
    pub kind: WriteDescriptorSetKind<'a>,
}

#[derive(Clone, Copy)]
pub enum WriteDescriptorSetKind<'a> {
    StorageImage {
        view: &'a ImageView,
        layout: vk::ImageLayout,
    },
    AccelerationStructure {
        acceleration_structure: &'a AccelerationStructure,
    },
    UniformBuffer {
        buffer: &'a Buffer,
    },
    StorageBuffer {
        buffer: &'a Buffer,
    },
    CombinedImageSampler {
        view: &'a ImageView,
        sampler: &'a Sampler,
        layout: vk::ImageLayout,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_size_doubles_until_the_cap() {
        let mut size = INITIAL_SETS_PER_POOL;
        let mut created = vec![size];
        while size < MAX_SETS_PER_POOL {
            size = next_pool_size(size);
            created.push(size);
        }

        assert_eq!(&created[..4], &[8, 16, 32, 64]);
        assert_eq!(*created.last().unwrap(), MAX_SETS_PER_POOL);
        // growth stays capped afterwards
        assert_eq!(next_pool_size(MAX_SETS_PER_POOL), MAX_SETS_PER_POOL);
    }

    #[test]
    fn ten_thousand_sets_need_few_pools() {
        // allocating M sets creates at most ceil(log2(M)) + overflow pools
        let mut remaining = 10_000i64;
        let mut size = INITIAL_SETS_PER_POOL;
        let mut pools = 0;
        while remaining > 0 {
            remaining -= size as i64;
            size = next_pool_size(size);
            pools += 1;
        }
        assert!(pools < 50, "created {pools} pools");
    }
}
