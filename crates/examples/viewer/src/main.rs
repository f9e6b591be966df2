use anyhow::Result;
use app::{AppConfig, Layer, LayerContext};
use clap::Parser;
use glam::{Vec3, Vec4};
use renderer::{RenderAssets, RenderConfig, TextureAsset};
use scene::{
    Camera, CameraComponent, ColorComponent, Environment, MaterialComponent, MaterialDesc,
    MeshComponent, MeshData, PointLightComponent, Scene, Transform, VolumeComponent,
};

mod demo_scene;

use demo_scene::checkerboard;

#[derive(Parser, Debug)]
#[command(about = "Volumetric path tracing viewer")]
struct Args {
    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Start on the rasterized forward branch.
    #[arg(long)]
    no_raytracing: bool,

    /// Disable the three-pass denoiser.
    #[arg(long)]
    no_denoising: bool,

    /// Load SPIR-V compiled next to the shader sources instead of
    /// `out/shaders`.
    #[arg(long)]
    shader_source_dir: bool,

    /// Number of preloaded blue-noise textures (0 disables the stack).
    #[arg(long, default_value_t = 64)]
    blue_noise_count: u32,
}

struct OrbitLightLayer {
    angle: f32,
}

impl Layer for OrbitLightLayer {
    fn on_update(&mut self, ctx: &mut LayerContext, dt: f32) {
        self.angle = (self.angle + dt * 0.5) % std::f32::consts::TAU;

        for entity in ctx.scene.entities_mut() {
            if entity.point_light.is_none() || entity.name != "orbit light" {
                continue;
            }
            let transform = entity.transform.as_mut().unwrap();
            transform.translation.x = self.angle.cos() * 2.5;
            transform.translation.z = 2.0 + self.angle.sin() * 2.5;
        }
    }
}

fn build_scene(assets: &mut RenderAssets) -> Scene {
    let mut scene = Scene::new(Environment::default_grey());

    // checkerboard albedo for the floor and the cube
    let checker = checkerboard(256, 32);
    let checker_id = checker.id;
    assets.textures.push(TextureAsset {
        id: checker.id,
        data: checker.data,
        alias: Some("checker".into()),
    });

    let cube = MeshData::cube();
    let cube_id = cube.id;
    let quad = MeshData::quad();
    let quad_id = quad.id;
    assets.meshes.push(cube);
    assets.meshes.push(quad);

    let cube_material = MaterialDesc::builder()
        .albedo_map(checker_id)
        .roughness(0.4)
        .build();
    let cube_material_id = cube_material.id;
    assets.materials.push(cube_material);

    let floor_material = MaterialDesc::builder()
        .albedo_color(Vec4::new(0.8, 0.8, 0.85, 1.0))
        .roughness(0.9)
        .build();
    let floor_material_id = floor_material.id;
    assets.materials.push(floor_material);

    let lamp_material = MaterialDesc::builder()
        .emissive_color(Vec4::new(8.0, 7.5, 6.0, 1.0))
        .build();
    let lamp_material_id = lamp_material.id;
    assets.materials.push(lamp_material);

    // camera (Y points down, matching the renderer's view conventions)
    let camera_entity = scene.create_entity("main camera");
    camera_entity.transform = Some(Transform::from_translation(Vec3::new(0.0, -1.0, -4.0)));
    camera_entity.camera = Some(CameraComponent::new(Camera::default()));

    let cube_entity = scene.create_entity("cube");
    cube_entity.transform = Some(Transform::new(
        Vec3::new(0.0, -0.5, 2.0),
        Vec3::ONE,
        Vec3::new(0.0, 0.6, 0.0),
    ));
    cube_entity.mesh = Some(MeshComponent::new(cube_id));
    cube_entity.material = Some(MaterialComponent::new(cube_material_id));

    let floor = scene.create_entity("floor");
    floor.transform = Some(Transform::new(
        Vec3::new(0.0, 0.0, 2.0),
        Vec3::new(12.0, 1.0, 12.0),
        Vec3::ZERO,
    ));
    floor.mesh = Some(MeshComponent::new(quad_id));
    floor.material = Some(
        MaterialComponent::builder(floor_material_id)
            .tiling_factor(6.0)
            .build(),
    );

    // area light for the path tracer's next-event estimation
    let lamp = scene.create_entity("ceiling lamp");
    lamp.transform = Some(Transform::new(
        Vec3::new(0.0, -3.5, 2.0),
        Vec3::new(1.5, 1.0, 1.5),
        Vec3::new(std::f32::consts::PI, 0.0, 0.0),
    ));
    lamp.mesh = Some(MeshComponent::new(quad_id));
    lamp.material = Some(MaterialComponent::new(lamp_material_id));

    // participating medium bound to the generated density texture
    let fog = scene.create_entity("fog volume");
    fog.transform = Some(Transform::new(
        Vec3::new(2.5, -1.0, 2.5),
        Vec3::new(2.0, 2.0, 2.0),
        Vec3::ZERO,
    ));
    fog.mesh = Some(MeshComponent::new(cube_id));
    fog.volume = Some(
        VolumeComponent::builder()
            .absorption(Vec4::new(0.1, 0.1, 0.1, 1.0))
            .scattering(Vec4::new(0.8, 0.9, 1.0, 1.0))
            .phase_function_g(0.2)
            .build(),
    );

    let orbit_light = scene.create_entity("orbit light");
    orbit_light.transform = Some(Transform {
        translation: Vec3::new(2.5, -2.0, 2.0),
        scale: Vec3::splat(0.1),
        ..Default::default()
    });
    orbit_light.point_light = Some(PointLightComponent::new(3.0));
    orbit_light.color = Some(ColorComponent::new(Vec3::new(1.0, 0.85, 0.6)));

    let fill_light = scene.create_entity("fill light");
    fill_light.transform = Some(Transform {
        translation: Vec3::new(-2.0, -2.5, 0.5),
        scale: Vec3::splat(0.1),
        ..Default::default()
    });
    fill_light.point_light = Some(PointLightComponent::new(1.5));
    fill_light.color = Some(ColorComponent::new(Vec3::new(0.5, 0.7, 1.0)));

    scene
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = AppConfig {
        title: "lucerna viewer".into(),
        width: args.width,
        height: args.height,
        resizable: true,
        render: RenderConfig {
            raytracing_enabled: !args.no_raytracing,
            denoising_enabled: !args.no_denoising,
            use_compiled_shaders: !args.shader_source_dir,
            blue_noise_count: args.blue_noise_count,
            ..RenderConfig::default()
        },
    };

    let mut assets = RenderAssets::default();
    let scene = build_scene(&mut assets);

    app::run(
        config,
        scene,
        assets,
        vec![Box::new(OrbitLightLayer { angle: 0.0 })],
    )
}
