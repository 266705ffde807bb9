//! Resource management
//!
//! Global buffers and images passed between dispatches.

mod buffer;
mod texture;

pub use buffer::*;
pub use texture::*;
