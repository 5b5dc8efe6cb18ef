//! Vulkan backend implementation using ash
//!
//! Runs headless: no surface or swapchain is created. Fences are timeline
//! semaphores, which need Vulkan 1.2. Memory comes from gpu-allocator.

use crate::backend::traits::*;
use crate::backend::types::*;
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct VkBuffer {
    buffer: vk::Buffer,
    allocation: Allocation,
    size: u64,
}

#[derive(Default)]
struct VkResources {
    buffers: HashMap<u64, VkBuffer>,
    fences: HashMap<u64, vk::Semaphore>,
    next_id: u64,
}

impl VkResources {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn buffer(&self, handle: BufferHandle) -> BackendResult<&VkBuffer> {
        self.buffers
            .get(&handle.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("buffer {}", handle.0)))
    }

    fn fence(&self, handle: FenceHandle) -> BackendResult<vk::Semaphore> {
        self.fences
            .get(&handle.0)
            .copied()
            .ok_or_else(|| BackendError::InvalidHandle(format!("fence {}", handle.0)))
    }
}

/// State shared by every object handed out by a [`VulkanBackend`].
struct VulkanShared {
    _entry: ash::Entry,
    instance: ash::Instance,
    device: ash::Device,
    queue: Mutex<vk::Queue>,
    queue_family: u32,
    allocator: Mutex<Option<Allocator>>,
    resources: Mutex<VkResources>,
}

impl VulkanShared {
    fn free_buffer(&self, buffer: VkBuffer) {
        unsafe {
            self.device.destroy_buffer(buffer.buffer, None);
        }
        if let Some(allocator) = self.allocator.lock().as_mut() {
            if let Err(e) = allocator.free(buffer.allocation) {
                log::warn!("Failed to free buffer allocation: {}", e);
            }
        }
    }
}

impl Drop for VulkanShared {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            let resources = std::mem::take(&mut *self.resources.lock());
            for (_, buffer) in resources.buffers {
                self.free_buffer(buffer);
            }
            for (_, semaphore) in resources.fences {
                self.device.destroy_semaphore(semaphore, None);
            }

            // Drop the allocator before destroying the device
            drop(self.allocator.lock().take());

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Vulkan backend.
///
/// Owns the instance and logical device. Device, queue, allocator and list
/// wrappers share them through reference counting, so the device outlives
/// every wrapper.
#[derive(Clone)]
pub struct VulkanBackend {
    shared: Arc<VulkanShared>,
}

impl VulkanBackend {
    /// Create a headless Vulkan 1.2 device on the first adapter with a
    /// graphics or compute queue and timeline semaphore support.
    pub fn new() -> BackendResult<Self> {
        unsafe {
            let entry = ash::Entry::load()
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

            let app_info = vk::ApplicationInfo {
                p_application_name: c"meshlet-asset".as_ptr(),
                application_version: vk::make_api_version(0, 0, 1, 0),
                p_engine_name: c"meshlet-asset".as_ptr(),
                engine_version: vk::make_api_version(0, 0, 1, 0),
                api_version: vk::API_VERSION_1_2,
                ..Default::default()
            };

            let instance_info = vk::InstanceCreateInfo {
                p_application_info: &app_info,
                ..Default::default()
            };

            let instance = entry
                .create_instance(&instance_info, None)
                .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

            let selected = match Self::select_physical_device(&instance) {
                Ok(selected) => selected,
                Err(e) => {
                    instance.destroy_instance(None);
                    return Err(e);
                }
            };
            let (physical_device, queue_family) = selected;

            let queue_priorities = [1.0f32];
            let queue_info = vk::DeviceQueueCreateInfo {
                queue_family_index: queue_family,
                queue_count: 1,
                p_queue_priorities: queue_priorities.as_ptr(),
                ..Default::default()
            };

            let mut features12 = vk::PhysicalDeviceVulkan12Features {
                timeline_semaphore: vk::TRUE,
                ..Default::default()
            };
            let device_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(std::slice::from_ref(&queue_info))
                .push_next(&mut features12);

            let device = match instance.create_device(physical_device, &device_info, None) {
                Ok(device) => device,
                Err(e) => {
                    instance.destroy_instance(None);
                    return Err(BackendError::DeviceCreationFailed(e.to_string()));
                }
            };

            let queue = device.get_device_queue(queue_family, 0);

            let allocator = match Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            }) {
                Ok(allocator) => allocator,
                Err(e) => {
                    device.destroy_device(None);
                    instance.destroy_instance(None);
                    return Err(BackendError::InitializationFailed(e.to_string()));
                }
            };

            let properties = instance.get_physical_device_properties(physical_device);
            let name = properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            log::info!("Vulkan device: {} (queue family {})", name, queue_family);

            Ok(Self {
                shared: Arc::new(VulkanShared {
                    _entry: entry,
                    instance,
                    device,
                    queue: Mutex::new(queue),
                    queue_family,
                    allocator: Mutex::new(Some(allocator)),
                    resources: Mutex::new(VkResources::default()),
                }),
            })
        }
    }

    fn find_queue_family(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Option<u32> {
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        queue_families
            .iter()
            .position(|family| {
                family
                    .queue_flags
                    .intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            })
            .map(|index| index as u32)
    }

    fn select_physical_device(instance: &ash::Instance) -> BackendResult<(vk::PhysicalDevice, u32)> {
        let physical_devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        physical_devices
            .into_iter()
            .filter(|&pd| {
                let properties = unsafe { instance.get_physical_device_properties(pd) };
                properties.api_version >= vk::API_VERSION_1_2
            })
            .find_map(|pd| Self::find_queue_family(instance, pd).map(|family| (pd, family)))
            .ok_or_else(|| BackendError::InitializationFailed("No suitable physical device".into()))
    }

    /// Get the backend name.
    pub fn name(&self) -> &'static str {
        "Vulkan Backend"
    }

    pub fn device(&self) -> VulkanDevice {
        VulkanDevice {
            shared: self.shared.clone(),
        }
    }

    pub fn queue(&self) -> VulkanQueue {
        VulkanQueue {
            shared: self.shared.clone(),
        }
    }

    /// Create a command pool on the device's queue family.
    pub fn command_allocator(&self) -> BackendResult<VulkanCommandAllocator> {
        let pool_info = vk::CommandPoolCreateInfo {
            queue_family_index: self.shared.queue_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };

        let pool = unsafe { self.shared.device.create_command_pool(&pool_info, None) }
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        Ok(VulkanCommandAllocator {
            shared: self.shared.clone(),
            pool,
        })
    }

    pub fn command_list(&self) -> VulkanCommandList {
        VulkanCommandList {
            shared: self.shared.clone(),
            command_buffer: None,
            recording: false,
        }
    }
}

fn memory_location(heap: HeapType) -> MemoryLocation {
    match heap {
        HeapType::Upload => MemoryLocation::CpuToGpu,
        HeapType::Default => MemoryLocation::GpuOnly,
    }
}

fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

/// Access mask and pipeline stage for a buffer in `state`.
fn access_and_stage(state: ResourceState) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match state {
        ResourceState::Undefined => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        ResourceState::CopyDestination => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        ResourceState::GenericRead => (vk::AccessFlags::HOST_WRITE, vk::PipelineStageFlags::HOST),
        ResourceState::ShaderReadable => (
            vk::AccessFlags::SHADER_READ
                | vk::AccessFlags::VERTEX_ATTRIBUTE_READ
                | vk::AccessFlags::INDEX_READ
                | vk::AccessFlags::UNIFORM_READ,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

pub struct VulkanDevice {
    shared: Arc<VulkanShared>,
}

impl GpuDevice for VulkanDevice {
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?} has zero size",
                desc.label
            )));
        }
        let device = &self.shared.device;
        unsafe {
            let buffer_info = vk::BufferCreateInfo {
                size: desc.size,
                usage: convert_buffer_usage(desc.usage),
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                ..Default::default()
            };

            let buffer = device
                .create_buffer(&buffer_info, None)
                .map_err(|e| BackendError::BufferCreationFailed(e.to_string()))?;

            let requirements = device.get_buffer_memory_requirements(buffer);

            let allocated = self
                .shared
                .allocator
                .lock()
                .as_mut()
                .ok_or_else(|| BackendError::BufferCreationFailed("Allocator not available".into()))
                .and_then(|allocator| {
                    allocator
                        .allocate(&AllocationCreateDesc {
                            name: desc.label.as_deref().unwrap_or("buffer"),
                            requirements,
                            location: memory_location(desc.heap),
                            linear: true,
                            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                        })
                        .map_err(|e| match e {
                            gpu_allocator::AllocationError::OutOfMemory => BackendError::OutOfMemory,
                            other => BackendError::BufferCreationFailed(other.to_string()),
                        })
                });
            let allocation = match allocated {
                Ok(allocation) => allocation,
                Err(e) => {
                    device.destroy_buffer(buffer, None);
                    return Err(e);
                }
            };

            let vk_buffer = VkBuffer {
                buffer,
                allocation,
                size: desc.size,
            };
            if let Err(e) = device.bind_buffer_memory(
                buffer,
                vk_buffer.allocation.memory(),
                vk_buffer.allocation.offset(),
            ) {
                self.shared.free_buffer(vk_buffer);
                return Err(BackendError::BufferCreationFailed(e.to_string()));
            }

            let mut resources = self.shared.resources.lock();
            let id = resources.next_id();
            resources.buffers.insert(id, vk_buffer);
            Ok(BufferHandle(id))
        }
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let mut resources = self.shared.resources.lock();
        let vk_buffer = resources
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("buffer {}", buffer.0)))?;
        let size = vk_buffer.size as usize;
        let mapped = vk_buffer
            .allocation
            .mapped_slice_mut()
            .ok_or_else(|| BackendError::WriteFailed(format!("buffer {} is not host visible", buffer.0)))?;

        let start = offset as usize;
        let end = start
            .checked_add(data.len())
            .filter(|&end| end <= size.min(mapped.len()))
            .ok_or_else(|| {
                BackendError::WriteFailed(format!(
                    "write of {} bytes at {} overruns buffer {}",
                    data.len(),
                    offset,
                    buffer.0
                ))
            })?;
        mapped[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        let removed = self.shared.resources.lock().buffers.remove(&buffer.0);
        if let Some(vk_buffer) = removed {
            self.shared.free_buffer(vk_buffer);
        }
    }

    fn create_fence(&mut self, initial_value: u64) -> BackendResult<FenceHandle> {
        let mut type_info = vk::SemaphoreTypeCreateInfo {
            semaphore_type: vk::SemaphoreType::TIMELINE,
            initial_value,
            ..Default::default()
        };
        let semaphore_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore = unsafe { self.shared.device.create_semaphore(&semaphore_info, None) }
            .map_err(|e| BackendError::FenceCreationFailed(e.to_string()))?;

        let mut resources = self.shared.resources.lock();
        let id = resources.next_id();
        resources.fences.insert(id, semaphore);
        Ok(FenceHandle(id))
    }

    fn fence_value(&self, fence: FenceHandle) -> BackendResult<u64> {
        let semaphore = self.shared.resources.lock().fence(fence)?;
        unsafe { self.shared.device.get_semaphore_counter_value(semaphore) }.map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
            other => BackendError::InvalidState(other.to_string()),
        })
    }

    fn wait_for_fence(&mut self, fence: FenceHandle, value: u64) -> BackendResult<()> {
        let semaphore = self.shared.resources.lock().fence(fence)?;
        let semaphores = [semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        unsafe { self.shared.device.wait_semaphores(&wait_info, u64::MAX) }.map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
            other => BackendError::InvalidState(other.to_string()),
        })
    }

    fn destroy_fence(&mut self, fence: FenceHandle) {
        let removed = self.shared.resources.lock().fences.remove(&fence.0);
        if let Some(semaphore) = removed {
            unsafe {
                self.shared.device.destroy_semaphore(semaphore, None);
            }
        }
    }
}

/// A command pool. Command buffers recorded from it are freed with it.
pub struct VulkanCommandAllocator {
    shared: Arc<VulkanShared>,
    pool: vk::CommandPool,
}

impl CommandAllocator for VulkanCommandAllocator {
    fn reset(&mut self) -> BackendResult<()> {
        unsafe {
            self.shared
                .device
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())
        }
        .map_err(|e| BackendError::RecordingFailed(e.to_string()))
    }
}

impl Drop for VulkanCommandAllocator {
    fn drop(&mut self) {
        unsafe {
            let _ = self.shared.device.device_wait_idle();
            self.shared.device.destroy_command_pool(self.pool, None);
        }
    }
}

pub struct VulkanCommandList {
    shared: Arc<VulkanShared>,
    /// Pool the buffer was allocated from, and the buffer
    command_buffer: Option<(vk::CommandPool, vk::CommandBuffer)>,
    recording: bool,
}

impl VulkanCommandList {
    fn recording_buffer(&self) -> BackendResult<vk::CommandBuffer> {
        match self.command_buffer {
            Some((_, command_buffer)) if self.recording => Ok(command_buffer),
            _ => Err(BackendError::RecordingFailed("command list is closed".into())),
        }
    }
}

impl CommandList for VulkanCommandList {
    type Allocator = VulkanCommandAllocator;

    fn reset(&mut self, allocator: &mut VulkanCommandAllocator) -> BackendResult<()> {
        if self.recording {
            return Err(BackendError::RecordingFailed(
                "command list reset while recording".into(),
            ));
        }
        let device = &self.shared.device;
        unsafe {
            let command_buffer = match self.command_buffer {
                Some((pool, command_buffer)) if pool == allocator.pool => {
                    device
                        .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                        .map_err(|e| BackendError::RecordingFailed(e.to_string()))?;
                    command_buffer
                }
                _ => {
                    let alloc_info = vk::CommandBufferAllocateInfo {
                        command_pool: allocator.pool,
                        level: vk::CommandBufferLevel::PRIMARY,
                        command_buffer_count: 1,
                        ..Default::default()
                    };
                    let command_buffer = device
                        .allocate_command_buffers(&alloc_info)
                        .map_err(|e| BackendError::RecordingFailed(e.to_string()))?
                        .first()
                        .copied()
                        .ok_or_else(|| BackendError::RecordingFailed("no command buffer allocated".into()))?;
                    self.command_buffer = Some((allocator.pool, command_buffer));
                    command_buffer
                }
            };

            let begin_info = vk::CommandBufferBeginInfo {
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(|e| BackendError::RecordingFailed(e.to_string()))?;
        }
        self.recording = true;
        Ok(())
    }

    fn copy_buffer(&mut self, dst: BufferHandle, src: BufferHandle, size: u64) -> BackendResult<()> {
        let command_buffer = self.recording_buffer()?;
        let (dst, src) = {
            let resources = self.shared.resources.lock();
            (resources.buffer(dst)?.buffer, resources.buffer(src)?.buffer)
        };
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.shared
                .device
                .cmd_copy_buffer(command_buffer, src, dst, &[region]);
        }
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
        let command_buffer = self.recording_buffer()?;
        let buffer = self.shared.resources.lock().buffer(buffer)?.buffer;

        let (src_access_mask, src_stage) = access_and_stage(before);
        let (dst_access_mask, dst_stage) = access_and_stage(after);
        let barrier = vk::BufferMemoryBarrier {
            src_access_mask,
            dst_access_mask,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            buffer,
            offset: 0,
            size: vk::WHOLE_SIZE,
            ..Default::default()
        };
        unsafe {
            self.shared.device.cmd_pipeline_barrier(
                command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            );
        }
        Ok(())
    }

    fn close(&mut self) -> BackendResult<()> {
        let command_buffer = self.recording_buffer()?;
        unsafe { self.shared.device.end_command_buffer(command_buffer) }
            .map_err(|e| BackendError::RecordingFailed(e.to_string()))?;
        self.recording = false;
        Ok(())
    }
}

pub struct VulkanQueue {
    shared: Arc<VulkanShared>,
}

impl CommandQueue for VulkanQueue {
    type List = VulkanCommandList;

    fn execute(&mut self, list: &mut VulkanCommandList) -> BackendResult<()> {
        let command_buffer = match list.command_buffer {
            Some((_, command_buffer)) if !list.recording => command_buffer,
            _ => {
                return Err(BackendError::SubmissionFailed(
                    "command list was not closed".into(),
                ))
            }
        };
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

        let queue = self.shared.queue.lock();
        unsafe {
            self.shared
                .device
                .queue_submit(*queue, &[submit_info], vk::Fence::null())
        }
        .map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
            other => BackendError::SubmissionFailed(other.to_string()),
        })
    }

    fn signal(&mut self, fence: FenceHandle, value: u64) -> BackendResult<()> {
        let semaphore = self.shared.resources.lock().fence(fence)?;
        let semaphores = [semaphore];
        let values = [value];
        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&values);
        let submit_info = vk::SubmitInfo::default()
            .signal_semaphores(&semaphores)
            .push_next(&mut timeline_info);

        let queue = self.shared.queue.lock();
        unsafe {
            self.shared
                .device
                .queue_submit(*queue, &[submit_info], vk::Fence::null())
        }
        .map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
            other => BackendError::SubmissionFailed(other.to_string()),
        })
    }
}
