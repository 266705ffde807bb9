//! Scene description consumed by the pipeline

mod camera;
mod light;

pub use camera::*;
pub use light::*;
