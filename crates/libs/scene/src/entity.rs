use crate::{
    CameraComponent, ColorComponent, Environment, MaterialComponent, MeshComponent,
    PointLightComponent, ResourceId, ScriptComponent, Transform, VolumeComponent,
};

/// An id plus an open set of optional components.
pub struct Entity {
    pub id: ResourceId,
    pub name: String,
    pub transform: Option<Transform>,
    pub mesh: Option<MeshComponent>,
    pub material: Option<MaterialComponent>,
    pub volume: Option<VolumeComponent>,
    pub point_light: Option<PointLightComponent>,
    pub color: Option<ColorComponent>,
    pub camera: Option<CameraComponent>,
    pub script: Option<ScriptComponent>,
}

impl Entity {
    fn new(name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(),
            name: name.into(),
            transform: None,
            mesh: None,
            material: None,
            volume: None,
            point_light: None,
            color: None,
            camera: None,
            script: None,
        }
    }

    /// True for entities the renderer draws or traces: they need geometry and
    /// either a surface material or a participating medium.
    pub fn is_renderable(&self) -> bool {
        self.transform.is_some()
            && self.mesh.is_some()
            && (self.material.is_some() || self.volume.is_some())
    }
}

pub struct Scene {
    entities: Vec<Entity>,
    pub environment: Environment,
}

impl Scene {
    pub fn new(environment: Environment) -> Self {
        Self {
            entities: vec![],
            environment,
        }
    }

    pub fn create_entity(&mut self, name: impl Into<String>) -> &mut Entity {
        self.entities.push(Entity::new(name));
        self.entities.last_mut().unwrap()
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn entities_mut(&mut self) -> &mut [Entity] {
        &mut self.entities
    }

    /// Entities with `Transform + Mesh` and at least one of
    /// `Material | Volume`, in creation order. Instance indices assigned
    /// during TLAS builds follow this order.
    pub fn renderables(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| e.is_renderable())
    }

    /// Entities with `Transform + PointLight + Color`.
    pub fn point_lights(&self) -> impl Iterator<Item = &Entity> {
        self.entities
            .iter()
            .filter(|e| e.transform.is_some() && e.point_light.is_some() && e.color.is_some())
    }

    /// The first entity flagged as the main camera.
    pub fn main_camera(&self) -> Option<&Entity> {
        self.entities.iter().find(|e| {
            e.transform.is_some()
                && e.camera
                    .as_ref()
                    .map(|c| c.is_main_camera)
                    .unwrap_or(false)
        })
    }

    pub fn main_camera_mut(&mut self) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|e| {
            e.transform.is_some()
                && e.camera
                    .as_ref()
                    .map(|c| c.is_main_camera)
                    .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Camera;
    use glam::Vec3;

    #[test]
    fn renderables_require_material_or_volume() {
        let mut scene = Scene::new(Environment::default_grey());

        let bare = scene.create_entity("bare mesh");
        bare.transform = Some(Transform::default());
        bare.mesh = Some(MeshComponent::new(ResourceId::new()));

        let lit = scene.create_entity("lit mesh");
        lit.transform = Some(Transform::default());
        lit.mesh = Some(MeshComponent::new(ResourceId::new()));
        lit.material = Some(MaterialComponent::new(ResourceId::new()));

        let fog = scene.create_entity("fog");
        fog.transform = Some(Transform::default());
        fog.mesh = Some(MeshComponent::new(ResourceId::new()));
        fog.volume = Some(VolumeComponent::builder().build());

        let names: Vec<_> = scene.renderables().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["lit mesh", "fog"]);
    }

    #[test]
    fn main_camera_is_the_first_flagged_entity() {
        let mut scene = Scene::new(Environment::default_grey());

        let secondary = scene.create_entity("probe");
        secondary.transform = Some(Transform::default());
        secondary.camera = Some(CameraComponent {
            camera: Camera::default(),
            is_main_camera: false,
        });

        let main = scene.create_entity("main camera");
        main.transform = Some(Transform::from_translation(Vec3::new(0.0, 0.0, -5.0)));
        main.camera = Some(CameraComponent::new(Camera::default()));

        assert_eq!(scene.main_camera().unwrap().name, "main camera");
    }

    #[test]
    fn point_lights_need_color_and_transform() {
        let mut scene = Scene::new(Environment::default_grey());

        let dark = scene.create_entity("no color");
        dark.transform = Some(Transform::default());
        dark.point_light = Some(PointLightComponent::default());

        let lamp = scene.create_entity("lamp");
        lamp.transform = Some(Transform::default());
        lamp.point_light = Some(PointLightComponent::new(4.0));
        lamp.color = Some(ColorComponent::new(Vec3::ONE));

        assert_eq!(scene.point_lights().count(), 1);
    }
}
