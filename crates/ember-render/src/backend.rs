//! The capability interface a graphics backend implements.

use ember_commands::{
    BufferUsage, ClearColorData, PipelineStateFlags, PixelFormat, UniformType, ViewportData,
};

/// Resource bindings accumulated while replaying one frame.
///
/// `draw` and `draw_instanced` carry no operands of their own; they read
/// whatever the preceding `set_*` commands bound here. The dispatcher resets
/// this at the start of every frame, so bindings never leak across frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderState {
    pub vertex_buffer: u32,
    pub first_vertex: u32,
    pub vertex_count: u32,
    pub index_buffer: u32,
    pub first_index: u32,
    pub index_count: u32,
    pub program: u32,
    pub instance_buffer: u32,
}

/// One method per command tag, plus frame bracketing.
///
/// Every method defaults to a successful no-op so a backend only implements
/// what its device actually supports. Creation and draw methods return
/// whether the device accepted the operation; the dispatcher logs failures
/// and keeps replaying.
///
/// Replay happens on a single thread (the render thread, or the committing
/// thread in single-threaded mode), so implementations never see concurrent
/// calls. `Send` is required because the backend is moved onto the render
/// thread.
#[allow(unused_variables)]
pub trait RenderBackend: Send {
    fn init(&mut self) -> bool {
        true
    }

    fn begin_frame(&mut self) -> bool {
        true
    }

    fn end_frame(&mut self) -> bool {
        true
    }

    fn set_viewport(&mut self, viewport: ViewportData) -> bool {
        true
    }

    fn set_clear_color(&mut self, color: ClearColorData) -> bool {
        true
    }

    fn create_vertex_buffer(&mut self, id: u32, data: &[u8], usage: BufferUsage) -> bool {
        true
    }

    fn set_vertex_buffer(&mut self, id: u32, first_vertex: u32, count: u32) -> bool {
        true
    }

    fn update_vertex_buffer(&mut self, id: u32, data: &[u8]) -> bool {
        true
    }

    fn create_index_buffer(&mut self, id: u32, data: &[u8]) -> bool {
        true
    }

    fn set_index_buffer(&mut self, id: u32, first_index: u32, count: u32) -> bool {
        true
    }

    fn create_program(&mut self, id: u32, vs_source: &[u8], fs_source: &[u8]) -> bool {
        true
    }

    fn set_program(&mut self, id: u32) -> bool {
        true
    }

    fn create_uniform(&mut self, id: u32, uniform_type: UniformType, size: u32) -> bool {
        true
    }

    fn set_uniform(&mut self, id: u32, index: u32) -> bool {
        true
    }

    fn update_uniform(&mut self, id: u32, offset: u32, data: &[u8]) -> bool {
        true
    }

    fn create_instance_buffer(&mut self, id: u32, stride: u32, size: u32) -> bool {
        true
    }

    fn set_instance_buffer(&mut self, id: u32, index: u32) -> bool {
        true
    }

    fn update_instance_buffer(&mut self, id: u32, index: u32, data: &[u8]) -> bool {
        true
    }

    fn create_texture(
        &mut self,
        id: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
        mipmapped: bool,
    ) -> bool {
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn create_texture_region(
        &mut self,
        texture: u32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
        data: &[u8],
    ) -> bool {
        true
    }

    fn set_texture(&mut self, id: u32, index: u32) -> bool {
        true
    }

    fn set_state(&mut self, flags: PipelineStateFlags) -> bool {
        true
    }

    fn draw(&mut self, state: &RenderState) -> bool {
        true
    }

    fn draw_instanced(&mut self, state: &RenderState, instances: u32) -> bool {
        true
    }
}

/// Backend that accepts everything and renders nothing. Used when the
/// renderer is constructed without a device, and in tests that only exercise
/// the pipeline.
#[derive(Debug, Default)]
pub struct NullBackend;

impl RenderBackend for NullBackend {}
