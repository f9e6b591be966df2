use glam::Vec4;

use crate::ResourceId;

/// CPU-side material description. Texture slots are resource ids into the
/// texture registry; `None` means "use the scalar factor".
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialDesc {
    pub id: ResourceId,
    pub albedo_color: Vec4,
    pub emissive_color: Vec4,
    pub albedo_map: Option<ResourceId>,
    pub normal_map: Option<ResourceId>,
    pub ambient_occlusion_map: Option<ResourceId>,
    pub metallic_map: Option<ResourceId>,
    pub roughness_map: Option<ResourceId>,
    pub emissive_map: Option<ResourceId>,
    pub metallic: f32,
    pub roughness: f32,
    pub transmission: f32,
    pub ior: f32,
    pub bp_specular_intensity: f32,
    pub bp_specular_shininess: f32,
}

impl MaterialDesc {
    pub fn builder() -> MaterialDescBuilder {
        MaterialDescBuilder::default()
    }

    pub fn is_emissive(&self) -> bool {
        self.emissive_color.truncate().max_element() > 0.0 || self.emissive_map.is_some()
    }
}

impl Default for MaterialDesc {
    fn default() -> Self {
        MaterialDescBuilder::default().build()
    }
}

/// All fields optional; `build` substitutes the engine defaults.
#[derive(Debug, Clone, Default)]
pub struct MaterialDescBuilder {
    albedo_color: Option<Vec4>,
    emissive_color: Option<Vec4>,
    albedo_map: Option<ResourceId>,
    normal_map: Option<ResourceId>,
    ambient_occlusion_map: Option<ResourceId>,
    metallic_map: Option<ResourceId>,
    roughness_map: Option<ResourceId>,
    emissive_map: Option<ResourceId>,
    metallic: Option<f32>,
    roughness: Option<f32>,
    transmission: Option<f32>,
    ior: Option<f32>,
    bp_specular_intensity: Option<f32>,
    bp_specular_shininess: Option<f32>,
}

impl MaterialDescBuilder {
    pub fn albedo_color(mut self, color: Vec4) -> Self {
        self.albedo_color = Some(color);
        self
    }

    pub fn emissive_color(mut self, color: Vec4) -> Self {
        self.emissive_color = Some(color);
        self
    }

    pub fn albedo_map(mut self, id: ResourceId) -> Self {
        self.albedo_map = Some(id);
        self
    }

    pub fn normal_map(mut self, id: ResourceId) -> Self {
        self.normal_map = Some(id);
        self
    }

    pub fn ambient_occlusion_map(mut self, id: ResourceId) -> Self {
        self.ambient_occlusion_map = Some(id);
        self
    }

    pub fn metallic_map(mut self, id: ResourceId) -> Self {
        self.metallic_map = Some(id);
        self
    }

    pub fn roughness_map(mut self, id: ResourceId) -> Self {
        self.roughness_map = Some(id);
        self
    }

    pub fn emissive_map(mut self, id: ResourceId) -> Self {
        self.emissive_map = Some(id);
        self
    }

    pub fn metallic(mut self, metallic: f32) -> Self {
        self.metallic = Some(metallic);
        self
    }

    pub fn roughness(mut self, roughness: f32) -> Self {
        self.roughness = Some(roughness);
        self
    }

    pub fn transmission(mut self, transmission: f32) -> Self {
        self.transmission = Some(transmission);
        self
    }

    pub fn ior(mut self, ior: f32) -> Self {
        self.ior = Some(ior);
        self
    }

    pub fn bp_specular_intensity(mut self, intensity: f32) -> Self {
        self.bp_specular_intensity = Some(intensity);
        self
    }

    pub fn bp_specular_shininess(mut self, shininess: f32) -> Self {
        self.bp_specular_shininess = Some(shininess);
        self
    }

    pub fn build(self) -> MaterialDesc {
        MaterialDesc {
            id: ResourceId::new(),
            albedo_color: self.albedo_color.unwrap_or(Vec4::ONE),
            emissive_color: self.emissive_color.unwrap_or(Vec4::ZERO),
            albedo_map: self.albedo_map,
            normal_map: self.normal_map,
            ambient_occlusion_map: self.ambient_occlusion_map,
            metallic_map: self.metallic_map,
            roughness_map: self.roughness_map,
            emissive_map: self.emissive_map,
            metallic: self.metallic.unwrap_or(0.0),
            roughness: self.roughness.unwrap_or(1.0),
            transmission: self.transmission.unwrap_or(0.0),
            ior: self.ior.unwrap_or(1.5),
            bp_specular_intensity: self.bp_specular_intensity.unwrap_or(0.5),
            bp_specular_shininess: self.bp_specular_shininess.unwrap_or(32.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_substituted_for_unset_fields() {
        let material = MaterialDesc::builder().metallic(0.8).build();
        assert_eq!(material.albedo_color, Vec4::ONE);
        assert_eq!(material.metallic, 0.8);
        assert_eq!(material.ior, 1.5);
        assert!(material.albedo_map.is_none());
    }

    #[test]
    fn emissive_test_checks_color_and_map() {
        assert!(!MaterialDesc::default().is_emissive());

        let lit = MaterialDesc::builder()
            .emissive_color(Vec4::new(2.0, 2.0, 2.0, 1.0))
            .build();
        assert!(lit.is_emissive());

        let mapped = MaterialDesc::builder()
            .emissive_map(ResourceId::new())
            .build();
        assert!(mapped.is_emissive());
    }
}
