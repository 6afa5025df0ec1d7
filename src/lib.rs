// Frame-lifecycle core of a Vulkan renderer
//
// Leaves first: deletion stack, descriptor allocator, synchronizer, frame ring,
// immediate commander, swapchain manager. `draw` and `render_loop` compose them
// and `renderer` owns the whole graph. All native calls go through
// `backend::RenderDevice`.

pub mod backend;
pub mod config;
pub mod deletion;
pub mod descriptors;
pub mod draw;
pub mod error;
pub mod frame;
pub mod immediate;
pub mod render_loop;
pub mod renderer;
pub mod scene;
pub mod swapchain_manager;
pub mod sync;

pub use error::{RenderError, RenderResult};
