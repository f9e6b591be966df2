use anyhow::Result;
use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::{
    utils::compute_aligned_size, Buffer, Context, RayTracingContext, RayTracingPipeline,
    RayTracingShaderGroupInfo,
};

/// One SBT section (raygen, miss, hit or callable). `offset` is relative to
/// the start of the SBT buffer; `stride` is the per-record spacing handed to
/// `vkCmdTraceRaysKHR`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SbtSection {
    pub offset: u32,
    pub size: u32,
    pub stride: u32,
    pub group_count: u32,
}

/// Section arithmetic derived from the device properties, separated from the
/// upload so it can be checked for any `(handle_size, handle_alignment,
/// base_alignment)` tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbtLayout {
    pub handle_size: u32,
    pub aligned_handle_size: u32,
    pub raygen: SbtSection,
    pub miss: SbtSection,
    pub hit: SbtSection,
    pub callable: SbtSection,
    pub total_size: u32,
}

pub fn compute_sbt_layout(
    handle_size: u32,
    handle_alignment: u32,
    base_alignment: u32,
    groups: &RayTracingShaderGroupInfo,
) -> SbtLayout {
    let aligned_handle_size = compute_aligned_size(handle_size, handle_alignment);

    let section = |group_count: u32| {
        compute_aligned_size(group_count * aligned_handle_size, base_alignment)
    };

    let raygen_size = section(groups.raygen_shader_count);
    let miss_size = section(groups.miss_shader_count);
    let hit_size = section(groups.hit_shader_count);

    // the raygen region is a single record: its stride must equal its size
    let raygen = SbtSection {
        offset: 0,
        size: raygen_size,
        stride: raygen_size,
        group_count: groups.raygen_shader_count,
    };
    let miss = SbtSection {
        offset: raygen_size,
        size: miss_size,
        stride: aligned_handle_size,
        group_count: groups.miss_shader_count,
    };
    let hit = SbtSection {
        offset: raygen_size + miss_size,
        size: hit_size,
        stride: aligned_handle_size,
        group_count: groups.hit_shader_count,
    };
    let callable = SbtSection::default();

    SbtLayout {
        handle_size,
        aligned_handle_size,
        raygen,
        miss,
        hit,
        callable,
        total_size: raygen_size + miss_size + hit_size,
    }
}

/// Places the tightly packed driver handles into a zeroed SBT byte image,
/// spacing records by the aligned handle size within each section.
pub fn pack_sbt_handles(layout: &SbtLayout, handles: &[u8]) -> Vec<u8> {
    let mut data = vec![0u8; layout.total_size as usize];
    let handle_size = layout.handle_size as usize;
    let mut handle_index = 0usize;

    for section in [&layout.raygen, &layout.miss, &layout.hit] {
        for record in 0..section.group_count as usize {
            let src = handle_index * handle_size;
            let dst = section.offset as usize + record * layout.aligned_handle_size as usize;
            data[dst..dst + handle_size].copy_from_slice(&handles[src..src + handle_size]);
            handle_index += 1;
        }
    }

    data
}

pub struct ShaderBindingTable {
    _buffer: Buffer,
    pub(crate) raygen_region: vk::StridedDeviceAddressRegionKHR,
    pub(crate) miss_region: vk::StridedDeviceAddressRegionKHR,
    pub(crate) hit_region: vk::StridedDeviceAddressRegionKHR,
    pub(crate) callable_region: vk::StridedDeviceAddressRegionKHR,
}

impl ShaderBindingTable {
    pub(crate) fn new(
        context: &Context,
        ray_tracing: &RayTracingContext,
        pipeline: &RayTracingPipeline,
    ) -> Result<Self> {
        let desc = pipeline.shader_group_info;

        let layout = compute_sbt_layout(
            ray_tracing.pipeline_properties.shader_group_handle_size,
            ray_tracing.pipeline_properties.shader_group_handle_alignment,
            ray_tracing.pipeline_properties.shader_group_base_alignment,
            &desc,
        );

        // the driver hands the handles back tightly packed
        let data_size = desc.group_count * layout.handle_size;
        let handles = unsafe {
            ray_tracing
                .pipeline_fn
                .get_ray_tracing_shader_group_handles(
                    pipeline.inner,
                    0,
                    desc.group_count,
                    data_size as _,
                )?
        };

        let sbt_data = pack_sbt_handles(&layout, &handles);

        let staging_buffer = context.create_buffer(
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            layout.total_size as _,
        )?;
        staging_buffer.copy_data_to_buffer(&sbt_data)?;

        let buffer = context.create_buffer(
            vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            layout.total_size as _,
        )?;

        context.copy_buffer(&staging_buffer, &buffer)?;

        let address = buffer.get_device_address();

        let region = |section: &SbtSection| {
            vk::StridedDeviceAddressRegionKHR::builder()
                .device_address(if section.size > 0 {
                    address + section.offset as u64
                } else {
                    0
                })
                .size(section.size as _)
                .stride(section.stride as _)
                .build()
        };

        Ok(Self {
            _buffer: buffer,
            raygen_region: region(&layout.raygen),
            miss_region: region(&layout.miss),
            hit_region: region(&layout.hit),
            callable_region: region(&layout.callable),
        })
    }
}

impl Context {
    pub fn create_shader_binding_table(
        &self,
        pipeline: &RayTracingPipeline,
    ) -> Result<ShaderBindingTable> {
        let ray_tracing = self.ray_tracing.as_ref().expect(
            "Cannot call Context::create_shader_binding_table when ray tracing is not enabled",
        );

        ShaderBindingTable::new(self, ray_tracing, pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(raygen: u32, miss: u32, hit: u32) -> RayTracingShaderGroupInfo {
        RayTracingShaderGroupInfo {
            group_count: raygen + miss + hit,
            raygen_shader_count: raygen,
            miss_shader_count: miss,
            hit_shader_count: hit,
        }
    }

    #[test]
    fn raygen_stride_equals_its_size() {
        for (h, ha, ba) in [(32, 32, 64), (32, 64, 64), (16, 32, 128), (64, 64, 256)] {
            let layout = compute_sbt_layout(h, ha, ba, &groups(1, 3, 3));
            assert_eq!(layout.raygen.stride, layout.raygen.size);
        }
    }

    #[test]
    fn sections_are_base_aligned_and_contiguous() {
        for (h, ha, ba) in [(32, 32, 64), (32, 64, 128), (16, 16, 32)] {
            let layout = compute_sbt_layout(h, ha, ba, &groups(1, 3, 3));

            for section in [&layout.raygen, &layout.miss, &layout.hit] {
                assert_eq!(section.size % ba, 0, "section size not base aligned");
                assert_eq!(section.offset % ba, 0, "section offset not base aligned");
            }

            assert_eq!(layout.raygen.offset + layout.raygen.size, layout.miss.offset);
            assert_eq!(layout.miss.offset + layout.miss.size, layout.hit.offset);
            assert_eq!(layout.hit.offset + layout.hit.size, layout.total_size);
        }
    }

    #[test]
    fn per_record_slots_use_the_aligned_handle_size() {
        let layout = compute_sbt_layout(32, 64, 64, &groups(1, 2, 2));
        assert_eq!(layout.aligned_handle_size, 64);
        assert_eq!(layout.miss.stride, 64);
        assert_eq!(layout.hit.stride, 64);
    }

    #[test]
    fn handles_land_at_their_record_slots() {
        let g = groups(1, 3, 3);
        let layout = compute_sbt_layout(4, 8, 16, &g);

        // seven groups, four bytes each, values 1..=7
        let handles: Vec<u8> = (1..=7u8).flat_map(|v| [v; 4]).collect();
        let packed = pack_sbt_handles(&layout, &handles);

        assert_eq!(packed.len(), layout.total_size as usize);
        assert_eq!(packed[layout.raygen.offset as usize], 1);
        for record in 0..3 {
            let miss = (layout.miss.offset + record * layout.miss.stride) as usize;
            assert_eq!(packed[miss], 2 + record as u8);
            let hit = (layout.hit.offset + record * layout.hit.stride) as usize;
            assert_eq!(packed[hit], 5 + record as u8);
        }
        // padding between records stays zero
        assert_eq!(packed[layout.miss.offset as usize + 4], 0);
    }

    #[test]
    fn callable_section_is_empty() {
        let layout = compute_sbt_layout(32, 32, 64, &groups(1, 3, 3));
        assert_eq!(layout.callable.size, 0);
        assert_eq!(layout.callable.stride, 0);
    }
}
