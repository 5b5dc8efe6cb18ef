//! Common types shared between backends

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const MAP_WRITE: Self = Self(1 << 1);
    pub const COPY_SRC: Self = Self(1 << 2);
    pub const COPY_DST: Self = Self(1 << 3);
    pub const INDEX: Self = Self(1 << 4);
    pub const VERTEX: Self = Self(1 << 5);
    pub const UNIFORM: Self = Self(1 << 6);
    pub const STORAGE: Self = Self(1 << 7);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Memory heap a buffer lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapType {
    /// Device-local memory, not host visible
    Default,
    /// Host-visible memory used as a copy source
    Upload,
}

/// Usage state of a buffer as seen by the GPU.
///
/// Transitions are explicit and only the edges accepted by
/// [`ResourceState::can_transition_to`] are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Undefined,
    CopyDestination,
    /// Host-written and readable by the copy engine (upload heap)
    GenericRead,
    /// Readable as vertex, index, or shader resource data
    ShaderReadable,
}

impl ResourceState {
    pub fn can_transition_to(self, next: ResourceState) -> bool {
        use ResourceState::*;
        matches!(
            (self, next),
            (Undefined, CopyDestination)
                | (Undefined, GenericRead)
                | (CopyDestination, ShaderReadable)
                | (ShaderReadable, CopyDestination)
        )
    }
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
    pub heap: HeapType,
    pub initial_state: ResourceState,
}

impl BufferDescriptor {
    /// Device-local buffer that starts as a copy destination.
    pub fn destination(label: impl Into<String>, size: u64, usage: BufferUsage) -> Self {
        Self {
            label: Some(label.into()),
            size,
            usage: usage | BufferUsage::COPY_DST,
            heap: HeapType::Default,
            initial_state: ResourceState::CopyDestination,
        }
    }

    /// Host-visible buffer used as a copy source.
    pub fn staging(label: impl Into<String>, size: u64) -> Self {
        Self {
            label: Some(label.into()),
            size,
            usage: BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC,
            heap: HeapType::Upload,
            initial_state: ResourceState::GenericRead,
        }
    }
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
    Sint32,
    Unorm8x4,
    Unorm10_10_10_2,
}

impl VertexFormat {
    /// Element size for the 32-bit float formats the mesh loader interprets.
    pub fn float_size(&self) -> Option<u32> {
        match self {
            VertexFormat::Float32 => Some(4),
            VertexFormat::Float32x2 => Some(8),
            VertexFormat::Float32x3 => Some(12),
            VertexFormat::Float32x4 => Some(16),
            _ => None,
        }
    }
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub fn size(&self) -> u32 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }

    pub fn from_size(size: u32) -> Option<Self> {
        match size {
            2 => Some(IndexFormat::Uint16),
            4 => Some(IndexFormat::Uint32),
            _ => None,
        }
    }
}

/// Binding description of a vertex stream in a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferView {
    pub buffer: super::BufferHandle,
    pub offset: u64,
    pub size: u64,
    pub stride: u32,
}

/// Binding description of an index stream in a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBufferView {
    pub buffer: super::BufferHandle,
    pub offset: u64,
    pub size: u64,
    pub format: IndexFormat,
}
