//! Drawing of compiled materials: the backend capability, the shared GPU context and the frame
//! loop.

mod backend;
mod context;
mod headless;
mod program_layout;
mod renderer;
mod wgpu_backend;

pub use backend::*;
pub use context::*;
pub use headless::*;
pub use renderer::*;
pub use wgpu_backend::*;
