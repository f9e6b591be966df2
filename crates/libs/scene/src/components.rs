use glam::{Vec3, Vec4};

use crate::{Camera, ResourceId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshComponent {
    pub mesh: ResourceId,
}

impl MeshComponent {
    pub fn new(mesh: ResourceId) -> Self {
        Self { mesh }
    }
}

/// Binds a material resource to an entity with per-instance overrides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialComponent {
    pub material: ResourceId,
    pub tiling_factor: f32,
    pub tint: Vec3,
}

impl MaterialComponent {
    pub fn new(material: ResourceId) -> Self {
        Self {
            material,
            tiling_factor: 1.0,
            tint: Vec3::ONE,
        }
    }

    pub fn builder(material: ResourceId) -> MaterialComponentBuilder {
        MaterialComponentBuilder {
            material,
            tiling_factor: None,
            tint: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MaterialComponentBuilder {
    material: ResourceId,
    tiling_factor: Option<f32>,
    tint: Option<Vec3>,
}

impl MaterialComponentBuilder {
    pub fn tiling_factor(mut self, tiling_factor: f32) -> Self {
        self.tiling_factor = Some(tiling_factor);
        self
    }

    pub fn tint(mut self, tint: Vec3) -> Self {
        self.tint = Some(tint);
        self
    }

    pub fn build(self) -> MaterialComponent {
        MaterialComponent {
            material: self.material,
            tiling_factor: self.tiling_factor.unwrap_or(1.0),
            tint: self.tint.unwrap_or(Vec3::ONE),
        }
    }
}

/// Participating-medium parameters. `phase_function_g` is the
/// Henyey-Greenstein anisotropy in `[-1, 1]`: 0 is isotropic, positive
/// scatters forward, negative backward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeComponent {
    pub absorption: Vec4,
    pub scattering: Vec4,
    pub phase_function_g: f32,
    pub density_texture: Option<ResourceId>,
    pub detail_texture: Option<ResourceId>,
}

impl VolumeComponent {
    pub fn builder() -> VolumeComponentBuilder {
        VolumeComponentBuilder::default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeComponentBuilder {
    absorption: Option<Vec4>,
    scattering: Option<Vec4>,
    phase_function_g: Option<f32>,
    density_texture: Option<ResourceId>,
    detail_texture: Option<ResourceId>,
}

impl VolumeComponentBuilder {
    pub fn absorption(mut self, absorption: Vec4) -> Self {
        self.absorption = Some(absorption);
        self
    }

    pub fn scattering(mut self, scattering: Vec4) -> Self {
        self.scattering = Some(scattering);
        self
    }

    pub fn phase_function_g(mut self, g: f32) -> Self {
        self.phase_function_g = Some(g);
        self
    }

    pub fn density_texture(mut self, id: ResourceId) -> Self {
        self.density_texture = Some(id);
        self
    }

    pub fn detail_texture(mut self, id: ResourceId) -> Self {
        self.detail_texture = Some(id);
        self
    }

    pub fn build(self) -> VolumeComponent {
        let g = self.phase_function_g.unwrap_or(0.0);
        assert!(
            (-1.0..=1.0).contains(&g),
            "phase function g must be in [-1, 1]"
        );

        VolumeComponent {
            absorption: self.absorption.unwrap_or(Vec4::ZERO),
            scattering: self.scattering.unwrap_or(Vec4::ZERO),
            phase_function_g: g,
            density_texture: self.density_texture,
            detail_texture: self.detail_texture,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLightComponent {
    pub intensity: f32,
}

impl Default for PointLightComponent {
    fn default() -> Self {
        Self { intensity: 1.0 }
    }
}

impl PointLightComponent {
    pub fn new(intensity: f32) -> Self {
        Self { intensity }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorComponent {
    pub color: Vec3,
}

impl ColorComponent {
    pub fn new(color: Vec3) -> Self {
        Self { color }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NameComponent {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraComponent {
    pub camera: Camera,
    pub is_main_camera: bool,
}

impl CameraComponent {
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            is_main_camera: true,
        }
    }
}

/// Behavior hook owned by the scripting collaborator; the renderer never
/// looks inside.
pub trait Script {
    fn on_attach(&mut self) {}
    fn on_update(&mut self, dt: f32);
}

pub struct ScriptComponent {
    pub script: Box<dyn Script>,
}

impl ScriptComponent {
    pub fn new(script: Box<dyn Script>) -> Self {
        Self { script }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_component_builder_fills_defaults() {
        let id = ResourceId::new();
        let component = MaterialComponent::builder(id).tint(Vec3::X).build();
        assert_eq!(component.material, id);
        assert_eq!(component.tiling_factor, 1.0);
        assert_eq!(component.tint, Vec3::X);
    }

    #[test]
    fn volume_builder_defaults_to_isotropic() {
        let volume = VolumeComponent::builder().build();
        assert_eq!(volume.phase_function_g, 0.0);
        assert!(volume.density_texture.is_none());
    }

    #[test]
    #[should_panic]
    fn volume_builder_rejects_out_of_range_g() {
        VolumeComponent::builder().phase_function_g(1.5).build();
    }
}
