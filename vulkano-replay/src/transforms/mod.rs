//! The transforms shipped with the crate.
//!
//! [`CommandSplitter`](command_splitter::CommandSplitter) makes insertion points appear in the
//! stream. [`FramebufferReader`](framebuffer_reader::FramebufferReader) consumes them, so it
//! must come after a splitter in the chain. The other transforms stand on their own.

pub mod capture_logger;
pub mod command_splitter;
pub mod fragment_shader_simplifier;
pub mod frame_loop;
pub mod framebuffer_reader;
pub mod issues;
pub mod readback;
pub mod split_render_pass;
pub mod stencil_overdraw;
pub mod vertex_minimizer;
