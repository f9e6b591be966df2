use std::sync::Arc;

use anyhow::Result;
use ash::vk;

use crate::{device::Device, Context};

pub struct Sampler {
    device: Arc<Device>,
    pub(crate) inner: vk::Sampler,
}

impl Sampler {
    pub(crate) fn new(device: Arc<Device>, create_info: &vk::SamplerCreateInfo) -> Result<Self> {
        let inner = unsafe { device.inner.create_sampler(create_info, None)? };

        Ok(Self { device, inner })
    }
}

impl Context {
    pub fn create_sampler(&self, create_info: &vk::SamplerCreateInfo) -> Result<Sampler> {
        Sampler::new(self.device.clone(), create_info)
    }

    /// Linear clamp-to-edge sampler used for render targets sampled by the UI.
    pub fn create_render_target_sampler(&self) -> Result<Sampler> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .anisotropy_enable(true)
            .max_anisotropy(self.physical_device.limits.max_sampler_anisotropy)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST);

        self.create_sampler(&info)
    }

    /// Nearest sampler with unnormalized coordinates, shared by the denoiser
    /// images and the blue-noise textures.
    pub fn create_unnormalized_nearest_sampler(&self) -> Result<Sampler> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .unnormalized_coordinates(true)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST);

        self.create_sampler(&info)
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.inner.destroy_sampler(self.inner, None);
        }
    }
}
