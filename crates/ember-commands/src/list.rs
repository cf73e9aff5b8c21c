//! Producer-facing command recording API.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ember_core::PooledBlock;

use crate::buffer::CommandBuffer;
use crate::ops::{
    ClearColorData, CommandOp, CreateIndexBufferData, CreateInstanceBufferData, CreateProgramData,
    CreateTextureData, CreateTextureRegionData, CreateUniformData, CreateVertexBufferData,
    DrawInstancedData, BufferUsage, PipelineStateFlags, PixelFormat, SetIndexBufferData,
    SetInstanceBufferData, SetProgramData, SetStateData, SetTextureData, SetUniformData,
    SetVertexBufferData, UniformType, UpdateInstanceBufferData, UpdateUniformData,
    UpdateVertexBufferData, ViewportData,
};

/// Handle value that never names a live resource.
pub const INVALID_HANDLE: u32 = 0;

/// Mints opaque, non-reusing resource handles.
///
/// One allocator is shared by every [`CommandList`] of a renderer so handles
/// stay unique across lists and across producer threads. The pipeline never
/// validates or frees handles; they belong to the backend once the creation
/// command is replayed.
#[derive(Debug)]
pub struct HandleAllocator {
    next: AtomicU32,
}

impl HandleAllocator {
    pub fn new() -> Self {
        // 0 is reserved for INVALID_HANDLE.
        Self {
            next: AtomicU32::new(1),
        }
    }

    pub fn mint(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// One recording pass over one pooled [`CommandBuffer`].
///
/// Every method serializes exactly one command; nothing blocks. Creation
/// methods mint and return a fresh handle (or [`INVALID_HANDLE`] when the
/// write did not fit); mutation methods return whether the write fit.
pub struct CommandList {
    buffer: PooledBlock<CommandBuffer>,
    handles: Arc<HandleAllocator>,
    /// Optional producer-side ordering hint; the pipeline itself replays
    /// lists in submission order.
    pub sort_key: u64,
}

impl CommandList {
    /// Starts a recording pass on `buffer`, clearing whatever the previous
    /// pass left behind.
    pub fn new(mut buffer: PooledBlock<CommandBuffer>, handles: Arc<HandleAllocator>) -> Self {
        buffer.clear();
        // A freshly cleared buffer is always Ready, so this cannot fail.
        let _ = buffer.begin_recording();
        Self {
            buffer,
            handles,
            sort_key: 0,
        }
    }

    pub fn cursor(&self) -> usize {
        self.buffer.cursor()
    }

    pub fn size(&self) -> usize {
        self.buffer.size()
    }

    pub fn reset_cursor(&mut self) {
        self.buffer.reset_cursor();
    }

    /// Seals the list; no further commands can be recorded.
    pub fn finish(&mut self) {
        let _ = self.buffer.end_recording();
    }

    pub fn buffer(&self) -> &CommandBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut CommandBuffer {
        &mut self.buffer
    }

    /// Hands the underlying pooled buffer back to the caller (dropping it
    /// returns the block to the pool).
    pub fn into_buffer(self) -> PooledBlock<CommandBuffer> {
        self.buffer
    }

    pub fn init(&mut self) -> bool {
        self.buffer.write_op(CommandOp::Init).is_ok()
    }

    pub fn set_viewport(&mut self, viewport: ViewportData) -> bool {
        self.buffer.write(CommandOp::SetViewport, &viewport).is_ok()
    }

    pub fn set_clear_color(&mut self, color: ClearColorData) -> bool {
        self.buffer.write(CommandOp::SetClearColor, &color).is_ok()
    }

    pub fn create_vertex_buffer(&mut self, initial_data: &[u8], usage: BufferUsage) -> u32 {
        let id = self.handles.mint();
        let record = CreateVertexBufferData {
            id,
            usage: usage as u32,
            data_size: initial_data.len() as u32,
        };
        match self
            .buffer
            .write_with_data(CommandOp::CreateVertexBuffer, &record, initial_data)
        {
            Ok(()) => id,
            Err(_) => INVALID_HANDLE,
        }
    }

    pub fn set_vertex_buffer(&mut self, id: u32, first_vertex: u32, count: u32) -> bool {
        let record = SetVertexBufferData {
            id,
            first_vertex,
            count,
        };
        self.buffer.write(CommandOp::SetVertexBuffer, &record).is_ok()
    }

    pub fn update_vertex_buffer(&mut self, id: u32, data: &[u8]) -> bool {
        let record = UpdateVertexBufferData {
            id,
            data_size: data.len() as u32,
        };
        self.buffer
            .write_with_data(CommandOp::UpdateVertexBuffer, &record, data)
            .is_ok()
    }

    pub fn create_index_buffer(&mut self, initial_data: &[u8]) -> u32 {
        let id = self.handles.mint();
        let record = CreateIndexBufferData {
            id,
            data_size: initial_data.len() as u32,
        };
        match self
            .buffer
            .write_with_data(CommandOp::CreateIndexBuffer, &record, initial_data)
        {
            Ok(()) => id,
            Err(_) => INVALID_HANDLE,
        }
    }

    pub fn set_index_buffer(&mut self, id: u32, first_index: u32, count: u32) -> bool {
        let record = SetIndexBufferData {
            id,
            first_index,
            count,
        };
        self.buffer.write(CommandOp::SetIndexBuffer, &record).is_ok()
    }

    pub fn create_uniform(&mut self, uniform_type: UniformType, size: u32) -> u32 {
        let id = self.handles.mint();
        let record = CreateUniformData {
            id,
            uniform_type: uniform_type as u32,
            size,
        };
        match self.buffer.write(CommandOp::CreateUniform, &record) {
            Ok(()) => id,
            Err(_) => INVALID_HANDLE,
        }
    }

    pub fn set_uniform(&mut self, id: u32, index: u32) -> bool {
        let record = SetUniformData { id, index };
        self.buffer.write(CommandOp::SetUniform, &record).is_ok()
    }

    pub fn update_uniform(&mut self, id: u32, data: &[u8], offset: u32) -> bool {
        let record = UpdateUniformData {
            id,
            offset,
            data_size: data.len() as u32,
        };
        self.buffer
            .write_with_data(CommandOp::UpdateUniform, &record, data)
            .is_ok()
    }

    pub fn create_program(&mut self, vs_source: &[u8], fs_source: &[u8]) -> u32 {
        let id = self.handles.mint();
        let record = CreateProgramData {
            id,
            vs_size: vs_source.len() as u32,
            fs_size: fs_source.len() as u32,
        };
        // Both source blobs travel back to back after the record.
        match self
            .buffer
            .write_with_data_pair(CommandOp::CreateProgram, &record, vs_source, fs_source)
        {
            Ok(()) => id,
            Err(_) => INVALID_HANDLE,
        }
    }

    pub fn set_program(&mut self, id: u32) -> bool {
        let record = SetProgramData { id };
        self.buffer.write(CommandOp::SetProgram, &record).is_ok()
    }

    pub fn create_instance_buffer(&mut self, stride: u32, size: u32) -> u32 {
        let id = self.handles.mint();
        let record = CreateInstanceBufferData { id, stride, size };
        match self.buffer.write(CommandOp::CreateInstanceBuffer, &record) {
            Ok(()) => id,
            Err(_) => INVALID_HANDLE,
        }
    }

    pub fn set_instance_buffer(&mut self, id: u32, index: u32) -> bool {
        let record = SetInstanceBufferData { id, index };
        self.buffer
            .write(CommandOp::SetInstanceBuffer, &record)
            .is_ok()
    }

    pub fn update_instance_buffer(&mut self, id: u32, data: &[u8], index: u32) -> bool {
        let record = UpdateInstanceBufferData {
            id,
            index,
            data_size: data.len() as u32,
        };
        self.buffer
            .write_with_data(CommandOp::UpdateInstanceBuffer, &record, data)
            .is_ok()
    }

    pub fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
        mipmapped: bool,
    ) -> u32 {
        let id = self.handles.mint();
        let record = CreateTextureData {
            id,
            width,
            height,
            format: format as u32,
            mipmapped: u32::from(mipmapped),
        };
        match self.buffer.write(CommandOp::CreateTexture, &record) {
            Ok(()) => id,
            Err(_) => INVALID_HANDLE,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_texture_region(
        &mut self,
        texture: u32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
        data: &[u8],
    ) -> bool {
        let record = CreateTextureRegionData {
            id: texture,
            x,
            y,
            width,
            height,
            format: format as u32,
            data_size: data.len() as u32,
        };
        self.buffer
            .write_with_data(CommandOp::CreateTextureRegion, &record, data)
            .is_ok()
    }

    pub fn set_texture(&mut self, id: u32, index: u32) -> bool {
        let record = SetTextureData { id, index };
        self.buffer.write(CommandOp::SetTexture, &record).is_ok()
    }

    pub fn set_state(&mut self, flags: PipelineStateFlags) -> bool {
        let record = SetStateData {
            flags: flags.bits(),
        };
        self.buffer.write(CommandOp::SetState, &record).is_ok()
    }

    pub fn draw(&mut self) -> bool {
        self.buffer.write_op(CommandOp::Draw).is_ok()
    }

    pub fn draw_instanced(&mut self, instances: u32) -> bool {
        let record = DrawInstancedData { instances };
        self.buffer.write(CommandOp::DrawInstanced, &record).is_ok()
    }
}
