use std::{ffi::CString, sync::Arc};

use anyhow::Result;
use ash::{vk, Device as AshDevice};

use crate::{
    instance::Instance,
    physical_device::PhysicalDevice,
    queue::{Queue, QueueFamily},
};

pub struct Device {
    pub inner: AshDevice,
}

impl Device {
    pub(crate) fn new(
        instance: &Instance,
        physical_device: &PhysicalDevice,
        queue_families: &[QueueFamily],
        required_extensions: &[&str],
        device_features: &DeviceFeatures,
    ) -> Result<Self> {
        let queue_priorities = [1.0f32];

        let queue_create_infos = {
            let mut indices = queue_families.iter().map(|f| f.index).collect::<Vec<_>>();
            indices.dedup();

            indices
                .iter()
                .map(|index| {
                    vk::DeviceQueueCreateInfo::builder()
                        .queue_family_index(*index)
                        .queue_priorities(&queue_priorities)
                        .build()
                })
                .collect::<Vec<_>>()
        };

        let device_extensions_ptrs = required_extensions
            .iter()
            .map(|e| CString::new(*e))
            .collect::<Result<Vec<_>, _>>()?;
        let device_extensions_ptrs = device_extensions_ptrs
            .iter()
            .map(|e| e.as_ptr())
            .collect::<Vec<_>>();

        let mut ray_tracing_feature = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::builder()
            .ray_tracing_pipeline(device_features.ray_tracing_pipeline);
        let mut acceleration_struct_feature =
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::builder()
                .acceleration_structure(device_features.acceleration_structure);
        let mut vulkan_12_features = vk::PhysicalDeviceVulkan12Features::builder()
            .runtime_descriptor_array(device_features.runtime_descriptor_array)
            .shader_sampled_image_array_non_uniform_indexing(
                device_features.sampled_image_array_non_uniform_indexing,
            )
            .descriptor_binding_partially_bound(device_features.descriptor_binding_partially_bound)
            .buffer_device_address(device_features.buffer_device_address);
        let mut vulkan_13_features =
            vk::PhysicalDeviceVulkan13Features::builder().synchronization2(true);
        let mut image_2d_view_of_3d_feature =
            vk::PhysicalDeviceImage2DViewOf3DFeaturesEXT::builder()
                .image2_d_view_of3_d(device_features.image_2d_view_of_3d);

        let pf = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: device_features.sampler_anisotropy.into(),
            fill_mode_non_solid: device_features.fill_mode_non_solid.into(),
            shader_int64: vk::TRUE,
            ..Default::default()
        };

        let mut features = vk::PhysicalDeviceFeatures2::builder()
            .features(pf)
            .push_next(&mut acceleration_struct_feature)
            .push_next(&mut ray_tracing_feature)
            .push_next(&mut vulkan_12_features)
            .push_next(&mut vulkan_13_features);
        // The feature chain is truncated when the extension is absent; pushing a
        // struct the driver does not know is an instance-level error.
        if device_features.image_2d_view_of_3d {
            features = features.push_next(&mut image_2d_view_of_3d_feature);
        }

        let device_create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_extensions_ptrs)
            .push_next(&mut features);

        let inner = unsafe {
            instance
                .inner
                .create_device(physical_device.inner, &device_create_info, None)?
        };

        Ok(Self { inner })
    }

    pub fn get_queue(self: &Arc<Self>, queue_family: QueueFamily, queue_index: u32) -> Queue {
        let inner = unsafe { self.inner.get_device_queue(queue_family.index, queue_index) };
        Queue::new(self.clone(), inner)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            self.inner.destroy_device(None);
        }
    }
}

/// Feature set the renderer depends on. Missing any `required()` feature on
/// every enumerated device is a startup failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceFeatures {
    pub ray_tracing_pipeline: bool,
    pub acceleration_structure: bool,
    pub runtime_descriptor_array: bool,
    pub sampled_image_array_non_uniform_indexing: bool,
    pub descriptor_binding_partially_bound: bool,
    pub buffer_device_address: bool,
    pub image_2d_view_of_3d: bool,
    pub sampler_anisotropy: bool,
    pub fill_mode_non_solid: bool,
    pub synchronization2: bool,
}

impl DeviceFeatures {
    pub fn is_compatible_with(&self, requirements: &Self) -> bool {
        (!requirements.ray_tracing_pipeline || self.ray_tracing_pipeline)
            && (!requirements.acceleration_structure || self.acceleration_structure)
            && (!requirements.runtime_descriptor_array || self.runtime_descriptor_array)
            && (!requirements.sampled_image_array_non_uniform_indexing
                || self.sampled_image_array_non_uniform_indexing)
            && (!requirements.descriptor_binding_partially_bound
                || self.descriptor_binding_partially_bound)
            && (!requirements.buffer_device_address || self.buffer_device_address)
            && (!requirements.image_2d_view_of_3d || self.image_2d_view_of_3d)
            && (!requirements.sampler_anisotropy || self.sampler_anisotropy)
            && (!requirements.fill_mode_non_solid || self.fill_mode_non_solid)
            && (!requirements.synchronization2 || self.synchronization2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full() -> DeviceFeatures {
        DeviceFeatures {
            ray_tracing_pipeline: true,
            acceleration_structure: true,
            runtime_descriptor_array: true,
            sampled_image_array_non_uniform_indexing: true,
            descriptor_binding_partially_bound: true,
            buffer_device_address: true,
            image_2d_view_of_3d: true,
            sampler_anisotropy: true,
            fill_mode_non_solid: true,
            synchronization2: true,
        }
    }

    #[test]
    fn full_feature_set_satisfies_itself() {
        assert!(full().is_compatible_with(&full()));
    }

    #[test]
    fn missing_required_feature_is_incompatible() {
        let supported = DeviceFeatures {
            ray_tracing_pipeline: false,
            ..full()
        };
        assert!(!supported.is_compatible_with(&full()));
    }

    #[test]
    fn extra_features_do_not_hurt() {
        let required = DeviceFeatures {
            buffer_device_address: true,
            ..Default::default()
        };
        assert!(full().is_compatible_with(&required));
    }
}
