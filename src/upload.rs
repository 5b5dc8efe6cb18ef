//! Staged GPU upload of a model's streams
//!
//! One upload call walks a fixed sequence of stages:
//!
//! 1. **Idle → ResourcesAllocated**: a device-local destination buffer in
//!    the copy-destination state and a host-visible staging buffer per
//!    stream, plus the completion fence.
//! 2. **→ StagingPopulated**: stream bytes are copied into the staging
//!    buffers on the host.
//! 3. **→ Submitted**: one copy and one copy-destination → shader-readable
//!    transition per stream are recorded, the list is closed, executed, and
//!    the fence signal is enqueued.
//! 4. **→ Complete**: the calling thread blocks until the fence is reached,
//!    then the staging buffers and fence are released.
//!
//! Any failure destroys every buffer the call created. The model only gains
//! GPU state once the whole sequence has completed.

use std::borrow::Cow;

use bytemuck::Pod;

use crate::backend::*;
use crate::config::ModelConfig;
use crate::error::{ModelError, ModelResult};
use crate::resources::{MeshGpuResources, MeshRef, Model, PrimGpuResources};

/// Fence value signaled once the upload's copies have executed.
const UPLOAD_FENCE_VALUE: u64 = 1;

/// Progress of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Idle,
    ResourcesAllocated,
    StagingPopulated,
    Submitted,
    Complete,
}

/// Where an uploaded stream's buffer is recorded in the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamTarget {
    MeshIndices(usize),
    MeshVertices { mesh: usize, slot: usize },
    MeshMeshlets(usize),
    MeshUniqueVertexIndices(usize),
    MeshPrimitiveIndices(usize),
    MeshCullData(usize),
    MeshInfo(usize),
    PrimIndices,
    PrimVertices,
}

/// One stream to upload.
#[derive(Debug, Clone)]
pub struct UploadStream<'a> {
    target: StreamTarget,
    label: String,
    usage: BufferUsage,
    bytes: Cow<'a, [u8]>,
}

impl UploadStream<'_> {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Collect every non-empty stream of `model` in upload order.
pub fn collect_streams<'a>(model: &'a Model, config: &ModelConfig) -> Vec<UploadStream<'a>> {
    let mut streams = Vec::new();
    let mut push = |target: StreamTarget, label: String, usage: BufferUsage, bytes: Cow<'a, [u8]>| {
        if bytes.is_empty() {
            log::trace!("Skipping empty stream {}", label);
            return;
        }
        streams.push(UploadStream {
            target,
            label,
            usage,
            bytes,
        });
    };

    if let Some(prim) = model.prim() {
        let buffer = model.buffer();
        push(
            StreamTarget::PrimIndices,
            format!("{} prim indices", config.label),
            BufferUsage::INDEX,
            Cow::Borrowed(buffer.slice(&prim.indices)),
        );
        push(
            StreamTarget::PrimVertices,
            format!("{} prim vertices", config.label),
            BufferUsage::VERTEX,
            Cow::Borrowed(buffer.slice(&prim.vertices)),
        );
    }

    for (i, mesh) in model.meshes().enumerate() {
        push(
            StreamTarget::MeshIndices(i),
            format!("{} mesh {} indices", config.label, i),
            BufferUsage::INDEX | BufferUsage::STORAGE,
            Cow::Borrowed(mesh.index_bytes()),
        );
        for slot in 0..mesh.vertex_slots.len() {
            push(
                StreamTarget::MeshVertices { mesh: i, slot },
                format!("{} mesh {} vertices {}", config.label, i, slot),
                BufferUsage::VERTEX | BufferUsage::STORAGE,
                Cow::Borrowed(mesh.vertex_bytes(slot).unwrap_or_default()),
            );
        }
        if config.upload_meshlets {
            push_meshlet_streams(&mut push, i, mesh, config);
        }
    }

    streams
}

fn push_meshlet_streams<'a>(
    push: &mut impl FnMut(StreamTarget, String, BufferUsage, Cow<'a, [u8]>),
    i: usize,
    mesh: MeshRef<'a>,
    config: &ModelConfig,
) {
    push(
        StreamTarget::MeshMeshlets(i),
        format!("{} mesh {} meshlets", config.label, i),
        BufferUsage::STORAGE,
        element_bytes(mesh.meshlets()),
    );
    push(
        StreamTarget::MeshUniqueVertexIndices(i),
        format!("{} mesh {} unique vertex indices", config.label, i),
        BufferUsage::STORAGE,
        Cow::Borrowed(mesh.unique_vertex_index_bytes()),
    );
    push(
        StreamTarget::MeshPrimitiveIndices(i),
        format!("{} mesh {} primitive indices", config.label, i),
        BufferUsage::STORAGE,
        element_bytes(mesh.primitive_indices()),
    );
    push(
        StreamTarget::MeshCullData(i),
        format!("{} mesh {} cull data", config.label, i),
        BufferUsage::STORAGE,
        element_bytes(mesh.cull_data()),
    );
    if mesh.meshlet_count() > 0 {
        push(
            StreamTarget::MeshInfo(i),
            format!("{} mesh {} info", config.label, i),
            BufferUsage::UNIFORM,
            Cow::Owned(bytemuck::bytes_of(&mesh.mesh_info()).to_vec()),
        );
    }
}

fn element_bytes<T: Pod>(elements: Cow<'_, [T]>) -> Cow<'_, [u8]> {
    match elements {
        Cow::Borrowed(elements) => Cow::Borrowed(bytemuck::cast_slice(elements)),
        Cow::Owned(elements) => Cow::Owned(bytemuck::cast_slice(&elements).to_vec()),
    }
}

/// Drives one upload through its stages.
///
/// Buffers and the fence created so far are destroyed when the pipeline is
/// dropped before [`UploadPipeline::finish`].
pub struct UploadPipeline<'d, D: GpuDevice> {
    device: &'d mut D,
    stage: UploadStage,
    destinations: Vec<BufferHandle>,
    staging: Vec<BufferHandle>,
    fence: Option<FenceHandle>,
}

impl<'d, D: GpuDevice> UploadPipeline<'d, D> {
    pub fn new(device: &'d mut D) -> Self {
        Self {
            device,
            stage: UploadStage::Idle,
            destinations: Vec::new(),
            staging: Vec::new(),
            fence: None,
        }
    }

    pub fn stage(&self) -> UploadStage {
        self.stage
    }

    fn expect_stage(&self, expected: UploadStage) -> BackendResult<()> {
        if self.stage != expected {
            return Err(BackendError::InvalidState(format!(
                "upload is {:?}, expected {:?}",
                self.stage, expected
            )));
        }
        Ok(())
    }

    fn advance(&mut self, to: UploadStage) {
        log::debug!("Upload stage {:?} -> {:?}", self.stage, to);
        self.stage = to;
    }

    /// Create destination and staging buffers for every stream, and the fence.
    pub fn allocate(&mut self, streams: &[UploadStream<'_>]) -> BackendResult<()> {
        self.expect_stage(UploadStage::Idle)?;
        for stream in streams {
            let size = stream.bytes.len() as u64;
            log::trace!("Allocating {} ({} bytes)", stream.label, size);
            let destination = self.device.create_buffer(&BufferDescriptor::destination(
                stream.label.as_str(),
                size,
                stream.usage,
            ))?;
            self.destinations.push(destination);
            let staging = self
                .device
                .create_buffer(&BufferDescriptor::staging(format!("{} staging", stream.label), size))?;
            self.staging.push(staging);
        }
        self.fence = Some(self.device.create_fence(0)?);
        self.advance(UploadStage::ResourcesAllocated);
        Ok(())
    }

    /// Copy every stream's bytes into its staging buffer.
    pub fn populate(&mut self, streams: &[UploadStream<'_>]) -> BackendResult<()> {
        self.expect_stage(UploadStage::ResourcesAllocated)?;
        for (stream, &staging) in streams.iter().zip(&self.staging) {
            self.device.write_buffer(staging, 0, &stream.bytes)?;
        }
        self.advance(UploadStage::StagingPopulated);
        Ok(())
    }

    /// Record copies and transitions, submit them, and enqueue the fence signal.
    pub fn submit<Q: CommandQueue>(
        &mut self,
        streams: &[UploadStream<'_>],
        queue: &mut Q,
        allocator: &mut <Q::List as CommandList>::Allocator,
        list: &mut Q::List,
    ) -> BackendResult<()> {
        self.expect_stage(UploadStage::StagingPopulated)?;
        let fence = self
            .fence
            .ok_or_else(|| BackendError::InvalidState("upload fence missing".into()))?;

        allocator.reset()?;
        list.reset(allocator)?;
        for ((stream, &destination), &staging) in
            streams.iter().zip(&self.destinations).zip(&self.staging)
        {
            list.copy_buffer(destination, staging, stream.bytes.len() as u64)?;
            list.transition(
                destination,
                ResourceState::CopyDestination,
                ResourceState::ShaderReadable,
            )?;
        }
        list.close()?;
        queue.execute(list)?;
        queue.signal(fence, UPLOAD_FENCE_VALUE)?;
        self.advance(UploadStage::Submitted);
        Ok(())
    }

    /// Block until the submitted copies have executed, then free staging memory.
    pub fn wait(&mut self) -> BackendResult<()> {
        self.expect_stage(UploadStage::Submitted)?;
        let fence = self
            .fence
            .ok_or_else(|| BackendError::InvalidState("upload fence missing".into()))?;
        if self.device.fence_value(fence)? < UPLOAD_FENCE_VALUE {
            self.device.wait_for_fence(fence, UPLOAD_FENCE_VALUE)?;
        }
        self.release_transient();
        self.advance(UploadStage::Complete);
        Ok(())
    }

    /// Hand over the destination buffers, in stream order.
    pub fn finish(mut self) -> BackendResult<Vec<BufferHandle>> {
        self.expect_stage(UploadStage::Complete)?;
        Ok(std::mem::take(&mut self.destinations))
    }

    fn release_transient(&mut self) {
        for buffer in self.staging.drain(..) {
            self.device.destroy_buffer(buffer);
        }
        if let Some(fence) = self.fence.take() {
            self.device.destroy_fence(fence);
        }
    }
}

impl<D: GpuDevice> Drop for UploadPipeline<'_, D> {
    fn drop(&mut self) {
        if !self.destinations.is_empty() || !self.staging.is_empty() {
            log::warn!(
                "Upload aborted in stage {:?}, releasing {} buffers",
                self.stage,
                self.destinations.len() + self.staging.len()
            );
        }
        for buffer in self.destinations.drain(..) {
            self.device.destroy_buffer(buffer);
        }
        self.release_transient();
    }
}

impl Model {
    /// Upload every stream to device-local GPU buffers and wait for completion.
    ///
    /// Blocks until the copies have executed. On failure no GPU buffers
    /// created by this call survive and the model keeps no GPU state.
    pub fn upload<D, Q>(
        &mut self,
        device: &mut D,
        queue: &mut Q,
        allocator: &mut <Q::List as CommandList>::Allocator,
        list: &mut Q::List,
        config: &ModelConfig,
    ) -> ModelResult<()>
    where
        D: GpuDevice,
        Q: CommandQueue,
    {
        if self.meshes().any(|m| m.gpu.is_some()) || self.prim().is_some_and(|p| p.gpu.is_some()) {
            return Err(ModelError::Gpu(BackendError::InvalidState(
                "model is already uploaded".into(),
            )));
        }

        let streams = collect_streams(self, config);
        log::debug!("Uploading {} streams", streams.len());

        let mut pipeline = UploadPipeline::new(device);
        pipeline.allocate(&streams)?;
        pipeline.populate(&streams)?;
        pipeline.submit(&streams, queue, allocator, list)?;
        pipeline.wait()?;
        let buffers = pipeline.finish()?;

        let placed: Vec<(StreamTarget, BufferHandle, u64)> = streams
            .iter()
            .zip(buffers)
            .map(|(stream, buffer)| (stream.target, buffer, stream.bytes.len() as u64))
            .collect();
        drop(streams);

        self.attach_gpu_resources(&placed);
        log::info!("Uploaded model '{}' ({} buffers)", config.label, placed.len());
        Ok(())
    }

    fn attach_gpu_resources(&mut self, placed: &[(StreamTarget, BufferHandle, u64)]) {
        let (_, meshes, prim) = self.parts_mut();

        for mesh in meshes.iter_mut() {
            mesh.gpu = Some(MeshGpuResources {
                vertex_buffers: Vec::new(),
                vertex_views: vec![None; mesh.vertex_slots.len()],
                index_buffer: None,
                index_view: None,
                meshlet_buffer: None,
                unique_vertex_index_buffer: None,
                primitive_index_buffer: None,
                cull_data_buffer: None,
                mesh_info_buffer: None,
            });
        }
        let mut prim_gpu = PrimGpuResources {
            vertex_buffer: None,
            vertex_view: None,
            index_buffer: None,
            index_view: None,
        };

        for &(target, buffer, size) in placed {
            match target {
                StreamTarget::PrimIndices => {
                    if let Some(prim) = prim.as_deref() {
                        prim_gpu.index_buffer = Some(buffer);
                        prim_gpu.index_view = Some(IndexBufferView {
                            buffer,
                            offset: 0,
                            size: u64::from(prim.index_count) * u64::from(prim.index_format.size()),
                            format: prim.index_format,
                        });
                    }
                }
                StreamTarget::PrimVertices => {
                    if let Some(prim) = prim.as_deref() {
                        prim_gpu.vertex_buffer = Some(buffer);
                        prim_gpu.vertex_view = Some(VertexBufferView {
                            buffer,
                            offset: 0,
                            size,
                            stride: prim.vertex_stride,
                        });
                    }
                }
                StreamTarget::MeshIndices(i) => {
                    let mesh = &mut meshes[i];
                    let view = mesh.index_format().map(|format| IndexBufferView {
                        buffer,
                        offset: 0,
                        size: u64::from(mesh.index_count) * u64::from(mesh.index_size),
                        format,
                    });
                    if let Some(gpu) = mesh.gpu.as_mut() {
                        gpu.index_buffer = Some(buffer);
                        gpu.index_view = view;
                    }
                }
                StreamTarget::MeshVertices { mesh: i, slot } => {
                    let mesh = &mut meshes[i];
                    let stride = mesh.vertex_slots[slot].stride;
                    if let Some(gpu) = mesh.gpu.as_mut() {
                        gpu.vertex_buffers.push(buffer);
                        gpu.vertex_views[slot] = Some(VertexBufferView {
                            buffer,
                            offset: 0,
                            size,
                            stride,
                        });
                    }
                }
                StreamTarget::MeshMeshlets(i) => set_mesh_buffer(meshes, i, |gpu| &mut gpu.meshlet_buffer, buffer),
                StreamTarget::MeshUniqueVertexIndices(i) => {
                    set_mesh_buffer(meshes, i, |gpu| &mut gpu.unique_vertex_index_buffer, buffer)
                }
                StreamTarget::MeshPrimitiveIndices(i) => {
                    set_mesh_buffer(meshes, i, |gpu| &mut gpu.primitive_index_buffer, buffer)
                }
                StreamTarget::MeshCullData(i) => set_mesh_buffer(meshes, i, |gpu| &mut gpu.cull_data_buffer, buffer),
                StreamTarget::MeshInfo(i) => set_mesh_buffer(meshes, i, |gpu| &mut gpu.mesh_info_buffer, buffer),
            }
        }

        if let Some(prim) = prim {
            prim.gpu = Some(prim_gpu);
        }
    }
}

fn set_mesh_buffer(
    meshes: &mut [crate::resources::Mesh],
    index: usize,
    field: impl FnOnce(&mut MeshGpuResources) -> &mut Option<BufferHandle>,
    buffer: BufferHandle,
) {
    if let Some(gpu) = meshes[index].gpu.as_mut() {
        *field(gpu) = Some(buffer);
    }
}
