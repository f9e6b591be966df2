mod blue_noise;
mod config;
mod error;
mod frame;
mod master;
mod mesh;
mod passes;
mod registry;
mod renderer;
mod rt_scene;
mod shader_loader;
mod texture;

pub use blue_noise::*;
pub use config::*;
pub use error::*;
pub use frame::*;
pub use master::*;
pub use mesh::*;
pub use passes::*;
pub use registry::*;
pub use renderer::*;
pub use rt_scene::*;
pub use shader_loader::*;
pub use texture::*;
