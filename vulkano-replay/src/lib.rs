#![doc(html_logo_url = "https://raw.githubusercontent.com/vulkano-rs/vulkano/master/logo.png")]
//! Command-stream transforms for Vulkan capture and replay.
//!
//! A capture is a linear stream of Vulkan API calls ([`Cmd`]) together with a replica of the
//! state a driver would track while executing them ([`GlobalState`]). Before the stream is
//! handed to a replay target it runs through a chain of [`Transform`]s. Each transform sees the
//! commands in stream order, may forward, drop or rewrite them, and may synthesize new device
//! objects and commands of its own. The chain terminates in a [`ReplayWriter`], which applies
//! every command to the state and encodes it for the replay target.
//!
//! The transforms shipped with this crate live in the [`transforms`] module:
//!
//! - [`CommandSplitter`] splits command buffers and render passes so that work can be inserted
//!   after any command, at any nesting depth.
//! - [`FramebufferReader`] reads back the contents of a color or depth attachment at an
//!   insertion point.
//! - [`StencilOverdraw`] renders a stencil image counting how many times each pixel was
//!   touched, and reads it back.
//! - [`IssueDetector`], [`FrameLoop`], [`VertexMinimizer`], [`FragmentShaderSimplifier`] and
//!   [`CaptureLogger`] cover debugging, profiling and archiving.
//!
//! # Object model
//!
//! Every Vulkan object is identified by a typed handle such as [`Image`] or [`RenderPass`].
//! Handles are plain 64-bit values and convert losslessly to and from their `ash::vk`
//! counterparts. The arguments of each call are plain value types: rewriting a command means
//! cloning its arguments and changing the clone, never mutating the original.
//!
//! [`Cmd`]: command::Cmd
//! [`GlobalState`]: state::GlobalState
//! [`Transform`]: transform::Transform
//! [`ReplayWriter`]: replay::ReplayWriter
//! [`CommandSplitter`]: transforms::command_splitter::CommandSplitter
//! [`FramebufferReader`]: transforms::framebuffer_reader::FramebufferReader
//! [`StencilOverdraw`]: transforms::stencil_overdraw::StencilOverdraw
//! [`IssueDetector`]: transforms::issues::IssueDetector
//! [`FrameLoop`]: transforms::frame_loop::FrameLoop
//! [`VertexMinimizer`]: transforms::vertex_minimizer::VertexMinimizer
//! [`FragmentShaderSimplifier`]: transforms::fragment_shader_simplifier::FragmentShaderSimplifier
//! [`CaptureLogger`]: transforms::capture_logger::CaptureLogger
//! [`Image`]: image::Image
//! [`RenderPass`]: render_pass::RenderPass

use std::{fmt::Debug, hash::Hash};

pub use ash;

mod macros;

pub mod alloc;
pub mod buffer;
pub mod builder;
pub mod capture;
pub mod command;
pub mod command_buffer;
pub mod descriptor;
pub mod device;
pub mod format;
pub mod image;
pub mod image_data;
pub mod memory;
pub mod pipeline;
pub mod render_pass;
pub mod replay;
pub mod shader;
pub mod state;
pub mod sub_cmd_idx;
pub mod swapchain;
pub mod sync;
pub mod transform;
pub mod transforms;

#[cfg(test)]
mod tests;

/// Represents memory size and offset values on a Vulkan device.
/// Analogous to the Rust `usize` type on the host.
pub type DeviceSize = u64;

/// Implemented by every object handle of the model.
pub trait Handle: Copy + Eq + Hash + Debug {
    /// The name of the object type, used in error messages.
    const TYPE_NAME: &'static str;

    /// Creates a handle from its raw value.
    fn from_raw(raw: u64) -> Self;

    /// Returns the raw value of the handle.
    fn as_raw(self) -> u64;
}

/// A helper type for non-exhaustive structs.
///
/// This type cannot be constructed outside this crate. Structures that have a field of this type
/// can therefore not be constructed with a struct literal from outside. Instead, they should be
/// constructed using [`Default::default()`] or a provided constructor function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NonExhaustive(pub(crate) ());
