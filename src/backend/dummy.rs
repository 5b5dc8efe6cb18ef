//! Dummy GPU backend for testing and development.
//!
//! Buffers live in host memory and commands are replayed on submission, so
//! uploads complete immediately and their results can be read back. Resource
//! states and command-list lifecycle are validated the way a debug layer
//! would validate them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::traits::*;
use super::types::*;

#[derive(Debug)]
struct DummyBuffer {
    label: Option<String>,
    data: Vec<u8>,
    heap: HeapType,
    state: ResourceState,
}

#[derive(Debug, Default)]
struct DummyState {
    buffers: HashMap<u64, DummyBuffer>,
    fences: HashMap<u64, u64>,
    next_id: u64,
    buffer_budget: Option<usize>,
    submissions: usize,
}

impl DummyState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn buffer_mut(&mut self, handle: BufferHandle) -> BackendResult<&mut DummyBuffer> {
        self.buffers
            .get_mut(&handle.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("buffer {}", handle.0)))
    }

    fn replay(&mut self, command: &DummyCommand) -> BackendResult<()> {
        match *command {
            DummyCommand::Copy { dst, src, size } => {
                let source = self
                    .buffers
                    .get(&src.0)
                    .ok_or_else(|| BackendError::InvalidHandle(format!("buffer {}", src.0)))?;
                if source.heap != HeapType::Upload || source.state != ResourceState::GenericRead {
                    return Err(BackendError::InvalidState(format!(
                        "copy source {:?} is not a readable upload buffer",
                        source.label
                    )));
                }
                let len = size as usize;
                if len > source.data.len() {
                    return Err(BackendError::SubmissionFailed(format!(
                        "copy of {len} bytes overruns source {:?}",
                        source.label
                    )));
                }
                let bytes = source.data[..len].to_vec();

                let target = self.buffer_mut(dst)?;
                if target.state != ResourceState::CopyDestination {
                    return Err(BackendError::InvalidState(format!(
                        "copy destination {:?} is in state {:?}",
                        target.label, target.state
                    )));
                }
                if len > target.data.len() {
                    return Err(BackendError::SubmissionFailed(format!(
                        "copy of {len} bytes overruns destination {:?}",
                        target.label
                    )));
                }
                target.data[..len].copy_from_slice(&bytes);
            }
            DummyCommand::Transition {
                buffer,
                before,
                after,
            } => {
                let target = self.buffer_mut(buffer)?;
                if target.state != before {
                    return Err(BackendError::InvalidState(format!(
                        "buffer {:?} is in state {:?}, barrier expected {:?}",
                        target.label, target.state, before
                    )));
                }
                target.state = after;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum DummyCommand {
    Copy {
        dst: BufferHandle,
        src: BufferHandle,
        size: u64,
    },
    Transition {
        buffer: BufferHandle,
        before: ResourceState,
        after: ResourceState,
    },
}

/// Dummy GPU backend.
///
/// Hands out device, queue, allocator and list objects that share one
/// host-memory state.
#[derive(Debug, Clone, Default)]
pub struct DummyBackend {
    shared: Arc<Mutex<DummyState>>,
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the backend name.
    pub fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    pub fn device(&self) -> DummyDevice {
        DummyDevice {
            shared: self.shared.clone(),
        }
    }

    pub fn queue(&self) -> DummyQueue {
        DummyQueue {
            shared: self.shared.clone(),
        }
    }

    pub fn command_allocator(&self) -> DummyCommandAllocator {
        DummyCommandAllocator { resets: 0 }
    }

    pub fn command_list(&self) -> DummyCommandList {
        DummyCommandList {
            commands: Vec::new(),
            recording: false,
        }
    }

    /// Let the next `count` buffer creations succeed, then fail with out-of-memory.
    pub fn fail_buffer_creation_after(&self, count: usize) {
        self.shared.lock().buffer_budget = Some(count);
    }

    /// Contents of a live buffer.
    pub fn read_buffer(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.shared
            .lock()
            .buffers
            .get(&buffer.0)
            .map(|b| b.data.clone())
    }

    pub fn buffer_state(&self, buffer: BufferHandle) -> Option<ResourceState> {
        self.shared.lock().buffers.get(&buffer.0).map(|b| b.state)
    }

    pub fn buffer_heap(&self, buffer: BufferHandle) -> Option<HeapType> {
        self.shared.lock().buffers.get(&buffer.0).map(|b| b.heap)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.shared.lock().buffers.len()
    }

    pub fn live_fence_count(&self) -> usize {
        self.shared.lock().fences.len()
    }

    pub fn submission_count(&self) -> usize {
        self.shared.lock().submissions
    }
}

#[derive(Debug)]
pub struct DummyDevice {
    shared: Arc<Mutex<DummyState>>,
}

impl GpuDevice for DummyDevice {
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {}, heap: {:?})",
            desc.label,
            desc.size,
            desc.heap
        );
        let mut state = self.shared.lock();
        if let Some(budget) = state.buffer_budget.as_mut() {
            if *budget == 0 {
                return Err(BackendError::OutOfMemory);
            }
            *budget -= 1;
        }

        let id = state.next_id();
        state.buffers.insert(
            id,
            DummyBuffer {
                label: desc.label.clone(),
                data: vec![0; desc.size as usize],
                heap: desc.heap,
                state: desc.initial_state,
            },
        );
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let mut state = self.shared.lock();
        let target = state.buffer_mut(buffer)?;
        if target.heap != HeapType::Upload {
            return Err(BackendError::InvalidState(format!(
                "buffer {:?} is not host visible",
                target.label
            )));
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > target.data.len() {
            return Err(BackendError::WriteFailed(format!(
                "write of {} bytes at {} overruns buffer {:?}",
                data.len(),
                offset,
                target.label
            )));
        }
        target.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        log::trace!("DummyBackend: destroying buffer {}", buffer.0);
        self.shared.lock().buffers.remove(&buffer.0);
    }

    fn create_fence(&mut self, initial_value: u64) -> BackendResult<FenceHandle> {
        let mut state = self.shared.lock();
        let id = state.next_id();
        state.fences.insert(id, initial_value);
        Ok(FenceHandle(id))
    }

    fn fence_value(&self, fence: FenceHandle) -> BackendResult<u64> {
        self.shared
            .lock()
            .fences
            .get(&fence.0)
            .copied()
            .ok_or_else(|| BackendError::InvalidHandle(format!("fence {}", fence.0)))
    }

    fn wait_for_fence(&mut self, fence: FenceHandle, value: u64) -> BackendResult<()> {
        // Submissions execute synchronously, so an unreached value can never be reached.
        let completed = self.fence_value(fence)?;
        if completed < value {
            return Err(BackendError::InvalidState(format!(
                "fence {} is at {completed} and nothing pending signals {value}",
                fence.0
            )));
        }
        Ok(())
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        self.shared.lock().fences.remove(&fence.0);
    }
}

#[derive(Debug)]
pub struct DummyCommandAllocator {
    resets: u32,
}

impl DummyCommandAllocator {
    pub fn reset_count(&self) -> u32 {
        self.resets
    }
}

impl CommandAllocator for DummyCommandAllocator {
    fn reset(&mut self) -> BackendResult<()> {
        self.resets += 1;
        Ok(())
    }
}

#[derive(Debug)]
pub struct DummyCommandList {
    commands: Vec<DummyCommand>,
    recording: bool,
}

impl DummyCommandList {
    fn record(&mut self, command: DummyCommand) -> BackendResult<()> {
        if !self.recording {
            return Err(BackendError::RecordingFailed(
                "command list is closed".into(),
            ));
        }
        self.commands.push(command);
        Ok(())
    }
}

impl CommandList for DummyCommandList {
    type Allocator = DummyCommandAllocator;

    fn reset(&mut self, _allocator: &mut DummyCommandAllocator) -> BackendResult<()> {
        if self.recording {
            return Err(BackendError::RecordingFailed(
                "command list reset while recording".into(),
            ));
        }
        self.commands.clear();
        self.recording = true;
        Ok(())
    }

    fn copy_buffer(&mut self, dst: BufferHandle, src: BufferHandle, size: u64) -> BackendResult<()> {
        self.record(DummyCommand::Copy { dst, src, size })
    }

    fn transition(
        &mut self,
        buffer: BufferHandle,
        before: ResourceState,
        after: ResourceState,
    ) -> BackendResult<()> {
        if !before.can_transition_to(after) {
            return Err(BackendError::InvalidState(format!(
                "illegal transition {before:?} -> {after:?}"
            )));
        }
        self.record(DummyCommand::Transition {
            buffer,
            before,
            after,
        })
    }

    fn close(&mut self) -> BackendResult<()> {
        if !self.recording {
            return Err(BackendError::RecordingFailed(
                "command list is already closed".into(),
            ));
        }
        self.recording = false;
        Ok(())
    }
}

#[derive(Debug)]
pub struct DummyQueue {
    shared: Arc<Mutex<DummyState>>,
}

impl CommandQueue for DummyQueue {
    type List = DummyCommandList;

    fn execute(&mut self, list: &mut DummyCommandList) -> BackendResult<()> {
        if list.recording {
            return Err(BackendError::SubmissionFailed(
                "command list was not closed".into(),
            ));
        }
        log::trace!("DummyBackend: executing {} commands", list.commands.len());
        let mut state = self.shared.lock();
        for command in &list.commands {
            state.replay(command)?;
        }
        state.submissions += 1;
        Ok(())
    }

    fn signal(&mut self, fence: FenceHandle, value: u64) -> BackendResult<()> {
        let mut state = self.shared.lock();
        let current = state
            .fences
            .get_mut(&fence.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("fence {}", fence.0)))?;
        *current = (*current).max(value);
        Ok(())
    }
}
