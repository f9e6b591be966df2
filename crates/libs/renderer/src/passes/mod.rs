mod debug;
mod denoiser;
mod density;
mod forward;
mod path_tracer;
mod point_light;
mod shadow;
mod skybox;

pub use debug::*;
pub use denoiser::*;
pub use density::*;
pub use forward::*;
pub use path_tracer::*;
pub use point_light::*;
pub use shadow::*;
pub use skybox::*;
