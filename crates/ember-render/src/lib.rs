//! Frame orchestration for the ember command pipeline.
//!
//! Producers record work into [`CommandList`](ember_commands::CommandList)s
//! handed out by the [`Renderer`], submit them, and commit once per frame.
//! The committed frame travels through a pooled MPSC queue to a render thread
//! (or is replayed inline in single-threaded mode), where the
//! [`CommandDispatcher`] decodes each buffer and drives a [`RenderBackend`].
//!
//! Backpressure is structural: command buffers come from a fixed pool,
//! submissions are bounded, and a counting semaphore caps the number of
//! frames in flight.

mod backend;
mod dispatch;
mod frame;
mod renderer;

pub use backend::{NullBackend, RenderBackend, RenderState};
pub use dispatch::CommandDispatcher;
pub use frame::{FrameInfo, FrameRing};
pub use renderer::{Renderer, RendererConfig, SubmitError, ThreadMode};
