//! Decodes a recorded command stream and drives a backend.

use tracing::{error, warn};

use ember_commands::{
    BufferUsage, ClearColorData, CommandBuffer, CommandOp, CreateIndexBufferData,
    CreateInstanceBufferData, CreateProgramData, CreateTextureData, CreateTextureRegionData,
    CreateUniformData, CreateVertexBufferData, DrawInstancedData, PipelineStateFlags, PixelFormat,
    SetIndexBufferData, SetInstanceBufferData, SetProgramData, SetStateData, SetTextureData,
    SetUniformData, SetVertexBufferData, UniformType, UpdateInstanceBufferData, UpdateUniformData,
    UpdateVertexBufferData, ViewportData,
};

use crate::backend::{RenderBackend, RenderState};

/// Replays command buffers against a [`RenderBackend`].
///
/// The dispatcher owns the [`RenderState`] that `draw` commands read
/// implicitly. It lives for one drain pass: the renderer resets it at the
/// start of each frame and dispatches every list of that frame through the
/// same instance, so bindings carry across lists within a frame but never
/// across frames.
#[derive(Debug, Default)]
pub struct CommandDispatcher {
    state: RenderState,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all bindings. Called once per frame before the first list.
    pub fn reset(&mut self) {
        self.state = RenderState::default();
    }

    pub fn state(&self) -> &RenderState {
        &self.state
    }

    /// Walks `buffer` from its current cursor to its recorded size, calling
    /// one backend method per command.
    ///
    /// A tag that maps to no known command, or a stream that ends in the
    /// middle of a payload, abandons the rest of the buffer; everything
    /// already replayed stands.
    pub fn dispatch(&mut self, buffer: &mut CommandBuffer, backend: &mut dyn RenderBackend) {
        while let Some(tag) = buffer.read_tag() {
            let Some(op) = CommandOp::from_u8(tag) else {
                error!(tag, "unknown command tag, abandoning buffer");
                return;
            };
            if !self.dispatch_one(op, buffer, backend) {
                error!(?op, "truncated payload, abandoning buffer");
                return;
            }
        }
    }

    /// Replays a single command. Returns `false` if its payload could not be
    /// read.
    fn dispatch_one(
        &mut self,
        op: CommandOp,
        buffer: &mut CommandBuffer,
        backend: &mut dyn RenderBackend,
    ) -> bool {
        match op {
            CommandOp::Unknown => {}
            CommandOp::Init => {
                if !backend.init() {
                    error!("backend failed to initialize");
                }
            }
            CommandOp::SetViewport => {
                let Some(viewport) = buffer.read::<ViewportData>() else {
                    return false;
                };
                backend.set_viewport(viewport);
            }
            CommandOp::SetClearColor => {
                let Some(color) = buffer.read::<ClearColorData>() else {
                    return false;
                };
                backend.set_clear_color(color);
            }
            CommandOp::CreateVertexBuffer => {
                let Some(record) = buffer.read::<CreateVertexBufferData>() else {
                    return false;
                };
                let Some(data) = buffer.read_bytes(record.data_size as usize) else {
                    return false;
                };
                let usage = BufferUsage::from_u32(record.usage).unwrap_or_default();
                if !backend.create_vertex_buffer(record.id, data, usage) {
                    error!(id = record.id, "backend rejected vertex buffer creation");
                }
            }
            CommandOp::SetVertexBuffer => {
                let Some(record) = buffer.read::<SetVertexBufferData>() else {
                    return false;
                };
                self.state.vertex_buffer = record.id;
                self.state.first_vertex = record.first_vertex;
                self.state.vertex_count = record.count;
                backend.set_vertex_buffer(record.id, record.first_vertex, record.count);
            }
            CommandOp::UpdateVertexBuffer => {
                let Some(record) = buffer.read::<UpdateVertexBufferData>() else {
                    return false;
                };
                let Some(data) = buffer.read_bytes(record.data_size as usize) else {
                    return false;
                };
                backend.update_vertex_buffer(record.id, data);
            }
            CommandOp::CreateIndexBuffer => {
                let Some(record) = buffer.read::<CreateIndexBufferData>() else {
                    return false;
                };
                let Some(data) = buffer.read_bytes(record.data_size as usize) else {
                    return false;
                };
                if !backend.create_index_buffer(record.id, data) {
                    error!(id = record.id, "backend rejected index buffer creation");
                }
            }
            CommandOp::SetIndexBuffer => {
                let Some(record) = buffer.read::<SetIndexBufferData>() else {
                    return false;
                };
                self.state.index_buffer = record.id;
                self.state.first_index = record.first_index;
                self.state.index_count = record.count;
                backend.set_index_buffer(record.id, record.first_index, record.count);
            }
            CommandOp::CreateProgram => {
                let Some(record) = buffer.read::<CreateProgramData>() else {
                    return false;
                };
                let Some((vs, fs)) =
                    buffer.read_bytes_pair(record.vs_size as usize, record.fs_size as usize)
                else {
                    return false;
                };
                if !backend.create_program(record.id, vs, fs) {
                    error!(id = record.id, "backend rejected program creation");
                }
            }
            CommandOp::SetProgram => {
                let Some(record) = buffer.read::<SetProgramData>() else {
                    return false;
                };
                self.state.program = record.id;
                backend.set_program(record.id);
            }
            CommandOp::CreateUniform => {
                let Some(record) = buffer.read::<CreateUniformData>() else {
                    return false;
                };
                let Some(uniform_type) = UniformType::from_u32(record.uniform_type) else {
                    warn!(
                        id = record.id,
                        raw = record.uniform_type,
                        "unrecognized uniform type, skipping command"
                    );
                    return true;
                };
                backend.create_uniform(record.id, uniform_type, record.size);
            }
            CommandOp::SetUniform => {
                let Some(record) = buffer.read::<SetUniformData>() else {
                    return false;
                };
                backend.set_uniform(record.id, record.index);
            }
            CommandOp::UpdateUniform => {
                let Some(record) = buffer.read::<UpdateUniformData>() else {
                    return false;
                };
                let Some(data) = buffer.read_bytes(record.data_size as usize) else {
                    return false;
                };
                backend.update_uniform(record.id, record.offset, data);
            }
            CommandOp::CreateInstanceBuffer => {
                let Some(record) = buffer.read::<CreateInstanceBufferData>() else {
                    return false;
                };
                backend.create_instance_buffer(record.id, record.stride, record.size);
            }
            CommandOp::SetInstanceBuffer => {
                let Some(record) = buffer.read::<SetInstanceBufferData>() else {
                    return false;
                };
                self.state.instance_buffer = record.id;
                backend.set_instance_buffer(record.id, record.index);
            }
            CommandOp::UpdateInstanceBuffer => {
                let Some(record) = buffer.read::<UpdateInstanceBufferData>() else {
                    return false;
                };
                let Some(data) = buffer.read_bytes(record.data_size as usize) else {
                    return false;
                };
                backend.update_instance_buffer(record.id, record.index, data);
            }
            CommandOp::CreateTexture => {
                let Some(record) = buffer.read::<CreateTextureData>() else {
                    return false;
                };
                let Some(format) = PixelFormat::from_u32(record.format) else {
                    warn!(
                        id = record.id,
                        raw = record.format,
                        "unrecognized pixel format, skipping command"
                    );
                    return true;
                };
                if !backend.create_texture(
                    record.id,
                    record.width,
                    record.height,
                    format,
                    record.mipmapped != 0,
                ) {
                    error!(id = record.id, "backend rejected texture creation");
                }
            }
            CommandOp::CreateTextureRegion => {
                let Some(record) = buffer.read::<CreateTextureRegionData>() else {
                    return false;
                };
                let Some(data) = buffer.read_bytes(record.data_size as usize) else {
                    return false;
                };
                let Some(format) = PixelFormat::from_u32(record.format) else {
                    warn!(
                        id = record.id,
                        raw = record.format,
                        "unrecognized pixel format, skipping command"
                    );
                    return true;
                };
                backend.create_texture_region(
                    record.id,
                    record.x,
                    record.y,
                    record.width,
                    record.height,
                    format,
                    data,
                );
            }
            CommandOp::SetTexture => {
                let Some(record) = buffer.read::<SetTextureData>() else {
                    return false;
                };
                backend.set_texture(record.id, record.index);
            }
            CommandOp::SetState => {
                let Some(record) = buffer.read::<SetStateData>() else {
                    return false;
                };
                backend.set_state(PipelineStateFlags::from_bits_truncate(record.flags));
            }
            CommandOp::Draw => {
                if !backend.draw(&self.state) {
                    error!(state = ?self.state, "backend rejected draw");
                }
            }
            CommandOp::DrawInstanced => {
                let Some(record) = buffer.read::<DrawInstancedData>() else {
                    return false;
                };
                if !backend.draw_instanced(&self.state, record.instances) {
                    error!(state = ?self.state, instances = record.instances,
                        "backend rejected instanced draw");
                }
            }
        }
        true
    }
}
