//! The ember command wire protocol.
//!
//! Producer code records graphics work through a [`CommandList`], which
//! serializes each operation as a one-byte tag followed by a fixed-layout
//! `#[repr(C)]` record (plus inline trailing bytes for operations that carry
//! bulk data) into a pooled [`CommandBuffer`]. The consumer decodes the same
//! stream tag by tag and replays it against a backend.
//!
//! The format is a private, in-process byte layout: native endianness, no
//! versioning, and no cross-process compatibility guarantee. Compatibility is
//! only required between a producer and consumer compiled into the same
//! image.

mod buffer;
mod list;
mod ops;

pub use buffer::{BufferState, CommandBuffer, CommandError};
pub use list::{CommandList, HandleAllocator, INVALID_HANDLE};
pub use ops::{
    BufferUsage, ClearColorData, CommandOp, CreateIndexBufferData, CreateInstanceBufferData,
    CreateProgramData, CreateTextureData, CreateTextureRegionData, CreateUniformData,
    CreateVertexBufferData, DrawInstancedData, PipelineStateFlags, PixelFormat, SetIndexBufferData,
    SetInstanceBufferData, SetProgramData, SetStateData, SetTextureData, SetUniformData,
    SetVertexBufferData, UniformType, UpdateInstanceBufferData, UpdateUniformData,
    UpdateVertexBufferData, ViewportData,
};
