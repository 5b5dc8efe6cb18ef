//! wgpu backend implementation
//!
//! wgpu tracks resource states itself, so transitions are only validated.
//! Staging buffers are created mapped and unmapped at submission. Fences
//! are counters advanced by queue work-done callbacks.

use crate::backend::traits::*;
use crate::backend::types::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct WgpuBuffer {
    buffer: wgpu::Buffer,
    /// Requested size; the wgpu buffer is padded to the copy alignment
    size: u64,
    mapped: bool,
}

#[derive(Default)]
struct WgpuResources {
    buffers: HashMap<u64, WgpuBuffer>,
    fences: HashMap<u64, Arc<AtomicU64>>,
    next_id: u64,
}

impl WgpuResources {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn buffer(&self, handle: BufferHandle) -> BackendResult<&WgpuBuffer> {
        self.buffers
            .get(&handle.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("buffer {}", handle.0)))
    }

    fn fence(&self, handle: FenceHandle) -> BackendResult<Arc<AtomicU64>> {
        self.fences
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| BackendError::InvalidHandle(format!("fence {}", handle.0)))
    }
}

struct WgpuShared {
    device: wgpu::Device,
    queue: wgpu::Queue,
    resources: Mutex<WgpuResources>,
}

/// wgpu backend.
#[derive(Clone)]
pub struct WgpuBackend {
    shared: Arc<WgpuShared>,
    adapter_info: wgpu::AdapterInfo,
}

impl WgpuBackend {
    fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
        let mut result = wgpu::BufferUsages::empty();
        if usage.contains(BufferUsage::MAP_WRITE) {
            result |= wgpu::BufferUsages::MAP_WRITE;
        }
        if usage.contains(BufferUsage::COPY_SRC) {
            result |= wgpu::BufferUsages::COPY_SRC;
        }
        if usage.contains(BufferUsage::COPY_DST) {
            result |= wgpu::BufferUsages::COPY_DST;
        }
        if usage.contains(BufferUsage::INDEX) {
            result |= wgpu::BufferUsages::INDEX;
        }
        if usage.contains(BufferUsage::VERTEX) {
            result |= wgpu::BufferUsages::VERTEX;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            result |= wgpu::BufferUsages::UNIFORM;
        }
        if usage.contains(BufferUsage::STORAGE) {
            result |= wgpu::BufferUsages::STORAGE;
        }
        result
    }

    /// Create a headless device on the highest-performance adapter.
    pub fn new() -> BackendResult<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> BackendResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Meshlet Asset Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        Ok(Self {
            shared: Arc::new(WgpuShared {
                device,
                queue,
                resources: Mutex::new(WgpuResources::default()),
            }),
            adapter_info,
        })
    }

    /// Get the backend name.
    pub fn name(&self) -> &'static str {
        "wgpu Backend"
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    pub fn limits(&self) -> wgpu::Limits {
        self.shared.device.limits()
    }

    pub fn device(&self) -> WgpuDevice {
        WgpuDevice {
            shared: self.shared.clone(),
        }
    }

    pub fn queue(&self) -> WgpuQueue {
        WgpuQueue {
            shared: self.shared.clone(),
        }
    }

    pub fn command_allocator(&self) -> WgpuCommandAllocator {
        WgpuCommandAllocator
    }

    pub fn command_list(&self) -> WgpuCommandList {
        WgpuCommandList {
            shared: self.shared.clone(),
            encoder: None,
            finished: None,
            staging_sources: Vec::new(),
        }
    }
}

pub struct WgpuDevice {
    shared: Arc<WgpuShared>,
}

impl GpuDevice for WgpuDevice {
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let size = wgpu::util::align_to(desc.size, wgpu::COPY_BUFFER_ALIGNMENT);
        let max_size = self.shared.device.limits().max_buffer_size;
        if size > max_size {
            return Err(BackendError::BufferCreationFailed(format!(
                "{} bytes exceeds the device limit of {} bytes",
                desc.size, max_size
            )));
        }

        let mapped = desc.heap == HeapType::Upload;
        let device = &self.shared.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size,
            usage: WgpuBackend::convert_buffer_usage(desc.usage),
            mapped_at_creation: mapped,
        });
        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        if let Some(error) = out_of_memory.or(validation) {
            buffer.destroy();
            log::error!("Buffer {:?} creation failed: {}", desc.label, error);
            return Err(match error {
                wgpu::Error::OutOfMemory { .. } => BackendError::OutOfMemory,
                other => BackendError::BufferCreationFailed(other.to_string()),
            });
        }

        let mut resources = self.shared.resources.lock();
        let id = resources.next_id();
        resources.buffers.insert(
            id,
            WgpuBuffer {
                buffer,
                size: desc.size,
                mapped,
            },
        );

        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let resources = self.shared.resources.lock();
        let target = resources.buffer(buffer)?;
        if !target.mapped {
            return Err(BackendError::WriteFailed(format!(
                "buffer {} is not mapped",
                buffer.0
            )));
        }

        let start = offset as usize;
        let end = start
            .checked_add(data.len())
            .filter(|&end| end as u64 <= target.size)
            .ok_or_else(|| {
                BackendError::WriteFailed(format!(
                    "write of {} bytes at {} overruns buffer {}",
                    data.len(),
                    offset,
                    buffer.0
                ))
            })?;

        let mut mapped = target.buffer.slice(..).get_mapped_range_mut();
        mapped[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(removed) = self.shared.resources.lock().buffers.remove(&buffer.0) {
            removed.buffer.destroy();
        }
    }

    fn create_fence(&mut self, initial_value: u64) -> BackendResult<FenceHandle> {
        let mut resources = self.shared.resources.lock();
        let id = resources.next_id();
        resources
            .fences
            .insert(id, Arc::new(AtomicU64::new(initial_value)));
        Ok(FenceHandle(id))
    }

    fn fence_value(&self, fence: FenceHandle) -> BackendResult<u64> {
        let counter = self.shared.resources.lock().fence(fence)?;
        self.shared.device.poll(wgpu::Maintain::Poll);
        Ok(counter.load(Ordering::Acquire))
    }

    fn wait_for_fence(&mut self, fence: FenceHandle, value: u64) -> BackendResult<()> {
        let counter = self.shared.resources.lock().fence(fence)?;
        if counter.load(Ordering::Acquire) >= value {
            return Ok(());
        }
        // Blocks until every submission so far has completed.
        self.shared.device.poll(wgpu::Maintain::Wait);
        let completed = counter.load(Ordering::Acquire);
        if completed < value {
            return Err(BackendError::InvalidState(format!(
                "fence {} is at {completed} and nothing pending signals {value}",
                fence.0
            )));
        }
        Ok(())
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        self.shared.resources.lock().fences.remove(&fence.0);
    }
}

/// wgpu allocates command memory per encoder, so there is nothing to reset.
pub struct WgpuCommandAllocator;

impl CommandAllocator for WgpuCommandAllocator {
    fn reset(&mut self) -> BackendResult<()> {
        Ok(())
    }
}

pub struct WgpuCommandList {
    shared: Arc<WgpuShared>,
    encoder: Option<wgpu::CommandEncoder>,
    finished: Option<wgpu::CommandBuffer>,
    /// Copy sources to unmap before submission
    staging_sources: Vec<BufferHandle>,
}

impl WgpuCommandList {
    fn encoder(&mut self) -> BackendResult<&mut wgpu::CommandEncoder> {
        self.encoder
            .as_mut()
            .ok_or_else(|| BackendError::RecordingFailed("command list is closed".into()))
    }
}

impl CommandList for WgpuCommandList {
    type Allocator = WgpuCommandAllocator;

    fn reset(&mut self, _allocator: &mut WgpuCommandAllocator) -> BackendResult<()> {
        if self.encoder.is_some() {
            return Err(BackendError::RecordingFailed(
                "command list reset while recording".into(),
            ));
        }
        self.finished = None;
        self.staging_sources.clear();
        self.encoder = Some(
            self.shared
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Upload Encoder"),
                }),
        );
        Ok(())
    }

    fn copy_buffer(&mut self, dst: BufferHandle, src: BufferHandle, size: u64) -> BackendResult<()> {
        let shared = self.shared.clone();
        let resources = shared.resources.lock();
        let source = resources.buffer(src)?;
        let destination = resources.buffer(dst)?;
        if size > source.size || size > destination.size {
            return Err(BackendError::RecordingFailed(format!(
                "copy of {size} bytes overruns buffer {} or {}",
                src.0, dst.0
            )));
        }

        let padded = wgpu::util::align_to(size, wgpu::COPY_BUFFER_ALIGNMENT);
        self.encoder()?
            .copy_buffer_to_buffer(&source.buffer, 0, &destination.buffer, 0, padded);
        self.staging_sources.push(src);
        Ok(())
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
        self.encoder()?;
        self.shared.resources.lock().buffer(buffer)?;
        Ok(())
    }

    fn close(&mut self) -> BackendResult<()> {
        let encoder = self
            .encoder
            .take()
            .ok_or_else(|| BackendError::RecordingFailed("command list is already closed".into()))?;
        self.finished = Some(encoder.finish());
        Ok(())
    }
}

pub struct WgpuQueue {
    shared: Arc<WgpuShared>,
}

impl CommandQueue for WgpuQueue {
    type List = WgpuCommandList;

    fn execute(&mut self, list: &mut WgpuCommandList) -> BackendResult<()> {
        let command_buffer = list
            .finished
            .take()
            .ok_or_else(|| BackendError::SubmissionFailed("command list was not closed".into()))?;

        {
            let mut resources = self.shared.resources.lock();
            for handle in list.staging_sources.drain(..) {
                if let Some(source) = resources.buffers.get_mut(&handle.0) {
                    if source.mapped {
                        source.buffer.unmap();
                        source.mapped = false;
                    }
                }
            }
        }

        let device = &self.shared.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.shared.queue.submit(Some(command_buffer));
        let validation = pollster::block_on(device.pop_error_scope());
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        match out_of_memory.or(validation) {
            Some(wgpu::Error::OutOfMemory { .. }) => Err(BackendError::OutOfMemory),
            Some(other) => Err(BackendError::SubmissionFailed(other.to_string())),
            None => Ok(()),
        }
    }

    fn signal(&mut self, fence: FenceHandle, value: u64) -> BackendResult<()> {
        let counter = self.shared.resources.lock().fence(fence)?;
        self.shared.queue.on_submitted_work_done(move || {
            counter.fetch_max(value, Ordering::AcqRel);
        });
        Ok(())
    }
}
