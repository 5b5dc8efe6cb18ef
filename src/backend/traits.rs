//! Core backend abstraction traits
//!
//! The upload pipeline only talks to the GPU through these capabilities.
//! Device, queue, command allocator and command list are owned by the
//! caller and lent to the pipeline for the duration of one upload.

use crate::backend::types::*;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create fence: {0}")]
    FenceCreationFailed(String),
    #[error("Failed to write buffer: {0}")]
    WriteFailed(String),
    #[error("Command recording failed: {0}")]
    RecordingFailed(String),
    #[error("Submission failed: {0}")]
    SubmissionFailed(String),
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
    #[error("Invalid resource state: {0}")]
    InvalidState(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a monotonically increasing GPU fence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceHandle(pub(crate) u64);

/// Resource creation and host-side synchronization.
pub trait GpuDevice {
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Map an upload-heap buffer, copy `data` at `offset`, and unmap it.
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_fence(&mut self, initial_value: u64) -> BackendResult<FenceHandle>;

    /// Last value the GPU has signaled on `fence`.
    fn fence_value(&self, fence: FenceHandle) -> BackendResult<u64>;

    /// Block the calling thread until `fence` reaches `value`. No timeout.
    fn wait_for_fence(&mut self, fence: FenceHandle, value: u64) -> BackendResult<()>;

    fn destroy_fence(&mut self, fence: FenceHandle);
}

/// Backing memory for recorded commands.
pub trait CommandAllocator {
    /// Reclaim memory from previous recordings. The GPU must be done with them.
    fn reset(&mut self) -> BackendResult<()>;
}

/// A recording target for GPU commands.
pub trait CommandList {
    type Allocator: CommandAllocator;

    /// Begin a fresh recording backed by `allocator`.
    fn reset(&mut self, allocator: &mut Self::Allocator) -> BackendResult<()>;

    /// Copy `size` bytes from the start of `src` to the start of `dst`.
    fn copy_buffer(&mut self, dst: BufferHandle, src: BufferHandle, size: u64) -> BackendResult<()>;

    fn transition(
        &mut self,
        buffer: BufferHandle,
        before: ResourceState,
        after: ResourceState,
    ) -> BackendResult<()>;

    /// Finish recording. The list can then be executed.
    fn close(&mut self) -> BackendResult<()>;
}

/// Submission queue.
pub trait CommandQueue {
    type List: CommandList;

    fn execute(&mut self, list: &mut Self::List) -> BackendResult<()>;

    /// Signal `fence` to `value` once all previously submitted work completes.
    fn signal(&mut self, fence: FenceHandle, value: u64) -> BackendResult<()>;
}
