//! Command tags and fixed-layout payload records.
//!
//! Every operation has exactly one tag value. Records are `#[repr(C)]`
//! `Pod` structs of `u32`/`f32` fields only, so their byte layout is the
//! same on the write and read side of the pipeline and reads can be done
//! unaligned straight out of the byte stream. Enumerated values travel as
//! raw `u32` fields and are re-validated at decode time.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

/// One-byte command tag.
///
/// Tag 0 is reserved: a zeroed buffer decodes as a run of `Unknown` tags,
/// which the dispatcher treats as no-ops.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandOp {
    Unknown = 0,
    Init = 1,
    SetViewport = 2,
    SetClearColor = 3,
    CreateVertexBuffer = 4,
    CreateIndexBuffer = 5,
    CreateProgram = 6,
    CreateUniform = 7,
    CreateInstanceBuffer = 8,
    CreateTexture = 9,
    CreateTextureRegion = 10,
    SetVertexBuffer = 11,
    SetIndexBuffer = 12,
    SetProgram = 13,
    SetUniform = 14,
    SetInstanceBuffer = 15,
    SetTexture = 16,
    UpdateVertexBuffer = 17,
    UpdateUniform = 18,
    UpdateInstanceBuffer = 19,
    Draw = 20,
    DrawInstanced = 21,
    SetState = 22,
}

impl CommandOp {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unknown),
            1 => Some(Self::Init),
            2 => Some(Self::SetViewport),
            3 => Some(Self::SetClearColor),
            4 => Some(Self::CreateVertexBuffer),
            5 => Some(Self::CreateIndexBuffer),
            6 => Some(Self::CreateProgram),
            7 => Some(Self::CreateUniform),
            8 => Some(Self::CreateInstanceBuffer),
            9 => Some(Self::CreateTexture),
            10 => Some(Self::CreateTextureRegion),
            11 => Some(Self::SetVertexBuffer),
            12 => Some(Self::SetIndexBuffer),
            13 => Some(Self::SetProgram),
            14 => Some(Self::SetUniform),
            15 => Some(Self::SetInstanceBuffer),
            16 => Some(Self::SetTexture),
            17 => Some(Self::UpdateVertexBuffer),
            18 => Some(Self::UpdateUniform),
            19 => Some(Self::UpdateInstanceBuffer),
            20 => Some(Self::Draw),
            21 => Some(Self::DrawInstanced),
            22 => Some(Self::SetState),
            _ => None,
        }
    }
}

/// How a buffer resource will be written after creation.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BufferUsage {
    #[default]
    None = 0,
    /// Written once at creation.
    Static = 1,
    /// Rewritten during the frame loop.
    Dynamic = 2,
}

impl BufferUsage {
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Static),
            2 => Some(Self::Dynamic),
            _ => None,
        }
    }
}

/// Shape of the data bound to a shader uniform.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniformType {
    Vec1 = 0,
    Vec2 = 1,
    Vec3 = 2,
    Vec4 = 3,
    Mat2 = 4,
    Mat3 = 5,
    Mat4 = 6,
    Tex1d = 7,
    Tex2d = 8,
    Tex3d = 9,
    Cubemap = 10,
}

impl UniformType {
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Vec1),
            1 => Some(Self::Vec2),
            2 => Some(Self::Vec3),
            3 => Some(Self::Vec4),
            4 => Some(Self::Mat2),
            5 => Some(Self::Mat3),
            6 => Some(Self::Mat4),
            7 => Some(Self::Tex1d),
            8 => Some(Self::Tex2d),
            9 => Some(Self::Tex3d),
            10 => Some(Self::Cubemap),
            _ => None,
        }
    }
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    R8 = 0,
    R16 = 1,
    R32 = 2,
    Rg8 = 3,
    Rg16 = 4,
    Rg32 = 5,
    Rgb8 = 6,
    Bgra8 = 7,
    Rgba8 = 8,
    Rgba16 = 9,
    Rgba32 = 10,
    Depth = 11,
    Stencil = 12,
}

impl PixelFormat {
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::R8),
            1 => Some(Self::R16),
            2 => Some(Self::R32),
            3 => Some(Self::Rg8),
            4 => Some(Self::Rg16),
            5 => Some(Self::Rg32),
            6 => Some(Self::Rgb8),
            7 => Some(Self::Bgra8),
            8 => Some(Self::Rgba8),
            9 => Some(Self::Rgba16),
            10 => Some(Self::Rgba32),
            11 => Some(Self::Depth),
            12 => Some(Self::Stencil),
            _ => None,
        }
    }

    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R8 => 1,
            Self::R16 | Self::Rg8 => 2,
            Self::R32 | Self::Rg16 | Self::Rgba8 | Self::Bgra8 | Self::Depth | Self::Stencil => 4,
            Self::Rgb8 => 3,
            Self::Rg32 | Self::Rgba16 => 8,
            Self::Rgba32 => 16,
        }
    }
}

bitflags! {
    /// Fixed-function pipeline state carried by `set_state`.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PipelineStateFlags: u32 {
        const CULLING_NONE = 1 << 0;
        const CULLING_BACKFACE = 1 << 1;
        const CULLING_FRONTFACE = 1 << 2;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ViewportData {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ClearColorData {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// `data_size` trailing bytes of initial contents follow the record.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CreateVertexBufferData {
    pub id: u32,
    pub usage: u32,
    pub data_size: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SetVertexBufferData {
    pub id: u32,
    pub first_vertex: u32,
    pub count: u32,
}

/// `data_size` trailing bytes of replacement contents follow the record.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct UpdateVertexBufferData {
    pub id: u32,
    pub data_size: u32,
}

/// `data_size` trailing bytes of initial contents follow the record.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CreateIndexBufferData {
    pub id: u32,
    pub data_size: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SetIndexBufferData {
    pub id: u32,
    pub first_index: u32,
    pub count: u32,
}

/// `vs_size` bytes of vertex shader source followed by `fs_size` bytes of
/// fragment shader source trail the record.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CreateProgramData {
    pub id: u32,
    pub vs_size: u32,
    pub fs_size: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SetProgramData {
    pub id: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CreateUniformData {
    pub id: u32,
    pub uniform_type: u32,
    pub size: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SetUniformData {
    pub id: u32,
    pub index: u32,
}

/// `data_size` trailing bytes of uniform contents follow the record.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct UpdateUniformData {
    pub id: u32,
    pub offset: u32,
    pub data_size: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CreateInstanceBufferData {
    pub id: u32,
    pub stride: u32,
    pub size: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SetInstanceBufferData {
    pub id: u32,
    pub index: u32,
}

/// `data_size` trailing bytes of instance contents follow the record.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct UpdateInstanceBufferData {
    pub id: u32,
    pub index: u32,
    pub data_size: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CreateTextureData {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    /// 0 or 1; bools are not `Pod`.
    pub mipmapped: u32,
}

/// `data_size` trailing bytes of pixel data follow the record.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CreateTextureRegionData {
    pub id: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub data_size: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SetTextureData {
    pub id: u32,
    pub index: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SetStateData {
    pub flags: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawInstancedData {
    pub instances: u32,
}
