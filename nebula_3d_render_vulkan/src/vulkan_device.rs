/// VulkanDevice - queue negotiation, logical device creation and the
/// submission lifecycle
///
/// The device walks an explicit lifecycle: bind a physical device, create
/// the logical device, initialize queues, then drive submissions until it
/// is destroyed (or the hardware reports loss, which is terminal for this
/// instance of the device).

use nebula_3d_render::nebula3d::utils::{HashedName, Ownership, SortedSet};
use nebula_3d_render::nebula3d::{
    DeviceConfig, Error, RenderSystem, Result, SharedBufferPool, SubmissionType,
};
use nebula_3d_render::{gpu_debug, gpu_error, gpu_info, gpu_warn};

use crate::vulkan_instance::{self, VulkanInstance, VulkanPhysicalDevice};
use crate::vulkan_queue::{QueueUsage, VulkanQueue};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};

use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::os::raw::c_char;
use std::sync::{Arc, Mutex};

/// Access flags that are legal in a barrier's source access mask
///
/// Source access masks describe writes that must be made available;
/// read bits are meaningless there and trip validation, so they are all
/// masked away.
pub const SRC_VALID_ACCESS_FLAGS: vk::AccessFlags = vk::AccessFlags::from_raw(
    !(vk::AccessFlags::INDIRECT_COMMAND_READ.as_raw()
        | vk::AccessFlags::INDEX_READ.as_raw()
        | vk::AccessFlags::VERTEX_ATTRIBUTE_READ.as_raw()
        | vk::AccessFlags::UNIFORM_READ.as_raw()
        | vk::AccessFlags::INPUT_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags::SHADER_READ.as_raw()
        | vk::AccessFlags::COLOR_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags::TRANSFER_READ.as_raw()
        | vk::AccessFlags::HOST_READ.as_raw()
        | vk::AccessFlags::MEMORY_READ.as_raw()),
);

/// Lifecycle position of a `VulkanDevice`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Constructed, no physical device bound yet
    Uninitialized,
    /// Physical device bound, capabilities queried
    PhysicalDeviceBound,
    /// Logical device created (or adopted from the host)
    Created,
    /// Queue wrappers built, command buffers recording
    QueuesReady,
    /// At least one submission or stall has run
    Active,
    /// The hardware reported loss while active. Terminal
    Lost,
    /// Explicitly torn down. Terminal
    Destroyed,
}

/// Whether the underlying device is still usable
///
/// Loss is sticky: the first recorded reason is kept and the state never
/// goes back to `Healthy` for this device instance. Recovery means
/// rebuilding from a fresh physical-device enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceLossState {
    Healthy,
    Lost(vk::Result),
}

impl DeviceLossState {
    pub fn is_lost(&self) -> bool {
        matches!(self, DeviceLossState::Lost(_))
    }

    /// The first loss reason observed, if any
    pub fn reason(&self) -> Option<vk::Result> {
        match self {
            DeviceLossState::Healthy => None,
            DeviceLossState::Lost(reason) => Some(*reason),
        }
    }
}

/// One negotiated queue: role, family and index within the family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectedQueue {
    pub usage: QueueUsage,
    pub family_idx: u32,
    pub queue_idx: u32,
}

/// Per-family creation request derived from the queue selections
#[derive(Debug, Clone, PartialEq)]
pub struct QueueCreationRequest {
    pub family_idx: u32,
    pub priorities: Vec<f32>,
}

/// A device extension ask, fatal or droppable when unsupported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedExtension {
    pub name: String,
    pub required: bool,
}

impl RequestedExtension {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

/// Feature bits negotiated through the extended feature chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceExtraFeatures {
    pub storage_input_output16: bool,
    pub shader_float16: bool,
    pub shader_int8: bool,
    pub pipeline_creation_cache_control: bool,
}

/// Pre-existing device handles supplied by a host application
///
/// The wrapped handles are borrowed, never destroyed. Claimed extensions
/// are cross-checked against what the GPU actually reports, same as
/// external instance claims.
pub struct VulkanExternalDevice {
    pub physical_device: vk::PhysicalDevice,
    pub device: vk::Device,
    pub device_extensions: Vec<String>,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

// ============================================================================
// Queue selection
// ============================================================================

fn family_supports(usage: QueueUsage, flags: vk::QueueFlags) -> bool {
    match usage {
        QueueUsage::Graphics => flags.contains(vk::QueueFlags::GRAPHICS),
        QueueUsage::Compute => flags.contains(vk::QueueFlags::COMPUTE),
        // Graphics and compute families support transfer even when the
        // bit is not advertised
        QueueUsage::Transfer => flags.intersects(
            vk::QueueFlags::TRANSFER | vk::QueueFlags::COMPUTE | vk::QueueFlags::GRAPHICS,
        ),
    }
}

/// Select the graphics queue from the reported queue families
///
/// Picks the first family advertising graphics capability that still has
/// an unclaimed queue slot and consumes one slot from `used_counts`. A
/// device with no graphics-capable family is unusable for rendering, so
/// finding none is fatal.
pub fn find_graphics_queue(
    family_props: &[vk::QueueFamilyProperties],
    used_counts: &mut [u32],
) -> Result<SelectedQueue> {
    for (idx, props) in family_props.iter().enumerate() {
        if !family_supports(QueueUsage::Graphics, props.queue_flags) {
            continue;
        }
        if used_counts[idx] >= props.queue_count {
            continue;
        }
        let selection = SelectedQueue {
            usage: QueueUsage::Graphics,
            family_idx: idx as u32,
            queue_idx: used_counts[idx],
        };
        used_counts[idx] += 1;
        gpu_debug!(
            "nebula3d::vulkan",
            "Graphics queue: family {}, queue {}",
            selection.family_idx,
            selection.queue_idx
        );
        return Ok(selection);
    }

    gpu_error!(
        "nebula3d::vulkan",
        "No graphics-capable queue family found on this GPU"
    );
    Err(Error::InitializationFailed(
        "No graphics-capable queue family found on this GPU".to_string(),
    ))
}

/// Select up to `max_num_queues` additional queues for `usage`
///
/// Dedicated non-graphics families are preferred; spare slots in the
/// graphics family come next; as a last resort a single selection
/// aliasing the graphics queue itself is returned, so the caller always
/// gets at least one queue (async overlap is lost, not availability).
fn find_aux_queues(
    usage: QueueUsage,
    family_props: &[vk::QueueFamilyProperties],
    used_counts: &mut [u32],
    graphics_family_idx: u32,
    max_num_queues: u32,
) -> Vec<SelectedQueue> {
    let mut selections = Vec::new();
    if max_num_queues == 0 {
        return selections;
    }

    // Dedicated families first
    for (idx, props) in family_props.iter().enumerate() {
        if selections.len() as u32 >= max_num_queues {
            break;
        }
        if idx as u32 == graphics_family_idx || !family_supports(usage, props.queue_flags) {
            continue;
        }
        while (selections.len() as u32) < max_num_queues && used_counts[idx] < props.queue_count {
            selections.push(SelectedQueue {
                usage,
                family_idx: idx as u32,
                queue_idx: used_counts[idx],
            });
            used_counts[idx] += 1;
        }
    }

    // Spare slots in the graphics family
    if selections.is_empty() {
        let graphics_idx = graphics_family_idx as usize;
        let props = &family_props[graphics_idx];
        while (selections.len() as u32) < max_num_queues
            && used_counts[graphics_idx] < props.queue_count
        {
            selections.push(SelectedQueue {
                usage,
                family_idx: graphics_family_idx,
                queue_idx: used_counts[graphics_idx],
            });
            used_counts[graphics_idx] += 1;
        }
    }

    // Alias the graphics queue itself; no slot is consumed
    if selections.is_empty() {
        gpu_debug!(
            "nebula3d::vulkan",
            "No dedicated {:?} queue available, aliasing the graphics queue",
            usage
        );
        selections.push(SelectedQueue {
            usage,
            family_idx: graphics_family_idx,
            queue_idx: 0,
        });
    }

    selections
}

/// Compute-queue selection, see `find_aux_queues` for the fallback order
pub fn find_compute_queues(
    family_props: &[vk::QueueFamilyProperties],
    used_counts: &mut [u32],
    graphics_family_idx: u32,
    max_num_queues: u32,
) -> Vec<SelectedQueue> {
    find_aux_queues(
        QueueUsage::Compute,
        family_props,
        used_counts,
        graphics_family_idx,
        max_num_queues,
    )
}

/// Transfer-queue selection, see `find_aux_queues` for the fallback order
pub fn find_transfer_queues(
    family_props: &[vk::QueueFamilyProperties],
    used_counts: &mut [u32],
    graphics_family_idx: u32,
    max_num_queues: u32,
) -> Vec<SelectedQueue> {
    find_aux_queues(
        QueueUsage::Transfer,
        family_props,
        used_counts,
        graphics_family_idx,
        max_num_queues,
    )
}

/// Collapse queue selections into one creation record per distinct family
///
/// The priority list is sized to the highest queue index requested from
/// that family; aliased selections collapse into the existing record.
pub fn fill_queue_creation_info(selections: &[SelectedQueue]) -> Vec<QueueCreationRequest> {
    let mut requests: Vec<QueueCreationRequest> = Vec::new();
    for selection in selections {
        let needed = (selection.queue_idx + 1) as usize;
        match requests
            .iter_mut()
            .find(|request| request.family_idx == selection.family_idx)
        {
            Some(request) => {
                if request.priorities.len() < needed {
                    request.priorities.resize(needed, 1.0);
                }
            }
            None => {
                requests.push(QueueCreationRequest {
                    family_idx: selection.family_idx,
                    priorities: vec![1.0; needed],
                });
            }
        }
    }
    requests
}

// ============================================================================
// Feature negotiation
// ============================================================================

/// Copy the core features this backend requests out of the supported set
///
/// Never claims more than what was queried: a feature the runtime does
/// not support stays disabled in the request (asking for it would be a
/// creation-time error).
pub fn fill_device_features(supported: &vk::PhysicalDeviceFeatures) -> vk::PhysicalDeviceFeatures {
    vk::PhysicalDeviceFeatures::default()
        .independent_blend(supported.independent_blend != 0)
        .geometry_shader(supported.geometry_shader != 0)
        .tessellation_shader(supported.tessellation_shader != 0)
        .multi_draw_indirect(supported.multi_draw_indirect != 0)
        .depth_clamp(supported.depth_clamp != 0)
        .fill_mode_non_solid(supported.fill_mode_non_solid != 0)
        .wide_lines(supported.wide_lines != 0)
        .sampler_anisotropy(supported.sampler_anisotropy != 0)
        .texture_compression_bc(supported.texture_compression_bc != 0)
        .shader_clip_distance(supported.shader_clip_distance != 0)
        .shader_int16(supported.shader_int16 != 0)
}

/// Pipeline stages usable on this device given its feature set
pub fn compute_supported_stages(features: &vk::PhysicalDeviceFeatures) -> vk::PipelineStageFlags {
    let mut stages = vk::PipelineStageFlags::from_raw(u32::MAX);
    if features.geometry_shader == 0 {
        stages &= !vk::PipelineStageFlags::GEOMETRY_SHADER;
    }
    if features.tessellation_shader == 0 {
        stages &= !(vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER
            | vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER);
    }
    stages
}

/// Resolve extension requests against what the GPU reports
///
/// A missing required extension is a fatal configuration error naming
/// the extension; missing optional extensions are dropped with a
/// warning. Duplicate requests collapse to one entry.
pub fn resolve_extensions(
    requested: &[RequestedExtension],
    available: &SortedSet<String>,
) -> Result<Vec<String>> {
    let mut enabled: Vec<String> = Vec::with_capacity(requested.len());
    for request in requested {
        if !available.contains(request.name.as_str()) {
            if request.required {
                gpu_error!(
                    "nebula3d::vulkan",
                    "Required device extension '{}' is not supported by this GPU",
                    request.name
                );
                return Err(Error::InitializationFailed(format!(
                    "Required device extension '{}' is not supported by this GPU",
                    request.name
                )));
            }
            gpu_warn!(
                "nebula3d::vulkan",
                "Optional device extension '{}' is not supported by this GPU and was dropped",
                request.name
            );
            continue;
        }
        if !enabled.contains(&request.name) {
            enabled.push(request.name.clone());
        }
    }
    Ok(enabled)
}

// ============================================================================
// VulkanDevice
// ============================================================================

/// The logical device plus everything needed to drive it
///
/// Owns the selected queues, the pipeline cache and the GPU memory
/// allocator. Intended to be owned and driven by a single render thread;
/// no internal locking beyond the allocator's mutex.
///
/// # Example
///
/// ```ignore
/// let instance = Arc::new(VulkanInstance::new(&config, None)?);
/// let mut device = VulkanDevice::new(instance.clone(), &config);
/// let physical = instance.find_by_name(config.device_name.as_deref().unwrap_or("")).clone();
/// device.set_physical_device(&physical)?;
/// device.create_device(&[])?;
/// device.init_queues()?;
/// device.commit_and_next_command_buffer(SubmissionType::NewFrameIdx)?;
/// device.destroy();
/// ```
pub struct VulkanDevice {
    instance: Option<Arc<VulkanInstance>>,
    config: DeviceConfig,

    physical_device: vk::PhysicalDevice,
    physical_device_info: Option<VulkanPhysicalDevice>,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    features: vk::PhysicalDeviceFeatures,
    extra_features: DeviceExtraFeatures,
    available_extensions: SortedSet<String>,
    supported_stages: vk::PipelineStageFlags,
    non_coherent_atom_size: u64,

    device: Option<Ownership<ash::Device>>,
    allocator: Option<ManuallyDrop<Arc<Mutex<Allocator>>>>,
    pipeline_cache: vk::PipelineCache,
    debug_utils_device: Option<ash::ext::debug_utils::Device>,

    enabled_extensions: SortedSet<String>,
    enabled_extension_hashes: SortedSet<HashedName>,

    graphics_selection: Option<SelectedQueue>,
    compute_selections: Vec<SelectedQueue>,
    transfer_selections: Vec<SelectedQueue>,
    external_graphics_queue: Option<vk::Queue>,

    graphics_queue: Option<VulkanQueue>,
    compute_queues: Vec<VulkanQueue>,
    transfer_queues: Vec<VulkanQueue>,
    present_queue: Option<vk::Queue>,

    state: DeviceState,
    loss_state: DeviceLossState,

    render_system: Option<Arc<dyn RenderSystem>>,
    buffer_pool: Option<SharedBufferPool>,
}

impl VulkanDevice {
    /// Create an empty device bound to nothing yet
    pub fn new(instance: Arc<VulkanInstance>, config: &DeviceConfig) -> Self {
        Self {
            instance: Some(instance),
            config: config.clone(),
            physical_device: vk::PhysicalDevice::null(),
            physical_device_info: None,
            properties: vk::PhysicalDeviceProperties::default(),
            memory_properties: vk::PhysicalDeviceMemoryProperties::default(),
            features: vk::PhysicalDeviceFeatures::default(),
            extra_features: DeviceExtraFeatures::default(),
            available_extensions: SortedSet::new(),
            supported_stages: vk::PipelineStageFlags::from_raw(u32::MAX),
            non_coherent_atom_size: 1,
            device: None,
            allocator: None,
            pipeline_cache: vk::PipelineCache::null(),
            debug_utils_device: None,
            enabled_extensions: SortedSet::new(),
            enabled_extension_hashes: SortedSet::new(),
            graphics_selection: None,
            compute_selections: Vec::new(),
            transfer_selections: Vec::new(),
            external_graphics_queue: None,
            graphics_queue: None,
            compute_queues: Vec::new(),
            transfer_queues: Vec::new(),
            present_queue: None,
            state: DeviceState::Uninitialized,
            loss_state: DeviceLossState::Healthy,
            render_system: None,
            buffer_pool: None,
        }
    }

    // ===== Lifecycle =====

    /// Bind a physical device and query its capabilities
    pub fn set_physical_device(&mut self, physical: &VulkanPhysicalDevice) -> Result<()> {
        self.expect_state(DeviceState::Uninitialized, "set_physical_device")?;
        let instance = self.instance_handle()?;

        self.physical_device = physical.handle;
        self.physical_device_info = Some(physical.clone());

        unsafe {
            self.properties = instance.raw().get_physical_device_properties(physical.handle);
            self.memory_properties = instance
                .raw()
                .get_physical_device_memory_properties(physical.handle);
        }
        self.fill_device_features2(&instance);
        self.supported_stages = compute_supported_stages(&self.features);
        self.non_coherent_atom_size = self.properties.limits.non_coherent_atom_size.max(1);
        self.available_extensions = supported_device_extensions(&instance, physical.handle)?;

        gpu_info!(
            "nebula3d::vulkan",
            "Physical device bound: {} ({} device extensions available)",
            physical.name,
            self.available_extensions.len()
        );

        self.state = DeviceState::PhysicalDeviceBound;
        Ok(())
    }

    /// Adopt a host-supplied physical and logical device
    ///
    /// Skips queue-family negotiation and device creation entirely; the
    /// supplied graphics and present queues are used as-is. Claimed
    /// device extensions are downgraded to what discovery confirms.
    /// Destruction never frees the adopted handles.
    pub fn set_external_device(&mut self, external: &VulkanExternalDevice) -> Result<()> {
        self.expect_state(DeviceState::Uninitialized, "set_external_device")?;
        let instance = self.instance_handle()?;

        self.physical_device = external.physical_device;
        unsafe {
            self.properties = instance
                .raw()
                .get_physical_device_properties(external.physical_device);
            self.memory_properties = instance
                .raw()
                .get_physical_device_memory_properties(external.physical_device);
        }
        self.fill_device_features2(&instance);
        self.supported_stages = compute_supported_stages(&self.features);
        self.non_coherent_atom_size = self.properties.limits.non_coherent_atom_size.max(1);
        self.available_extensions =
            supported_device_extensions(&instance, external.physical_device)?;

        let device_name = self
            .properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
            .to_string();
        self.physical_device_info = Some(VulkanPhysicalDevice {
            handle: external.physical_device,
            name: device_name.clone(),
            vendor_id: self.properties.vendor_id,
            device_id: self.properties.device_id,
            device_type: self.properties.device_type,
        });

        // Claims are never trusted over discovery
        let mut verified: Vec<String> = Vec::new();
        for claimed in &external.device_extensions {
            if self.available_extensions.contains(claimed.as_str()) {
                if !verified.contains(claimed) {
                    verified.push(claimed.clone());
                }
            } else {
                gpu_warn!(
                    "nebula3d::vulkan",
                    "Externally claimed device extension '{}' is not supported by this GPU and was dropped",
                    claimed
                );
            }
        }

        let device = unsafe { ash::Device::load(instance.raw().fp_v1_0(), external.device) };

        // The external queue has no family attached to it; assume the
        // first graphics-capable family, which is where compliant hosts
        // get their queue from
        let family_props = unsafe {
            instance
                .raw()
                .get_physical_device_queue_family_properties(external.physical_device)
        };
        let mut used_counts = vec![0u32; family_props.len()];
        let graphics_selection = find_graphics_queue(&family_props, &mut used_counts)?;
        self.graphics_selection = Some(graphics_selection);
        self.external_graphics_queue = Some(external.graphics_queue);
        self.present_queue = Some(external.present_queue);

        self.finish_device_setup(&instance, device, verified, Ownership::External)?;

        gpu_info!(
            "nebula3d::vulkan",
            "Adopted external Vulkan device: {} ({} verified extensions)",
            device_name,
            self.enabled_extensions.len()
        );
        self.state = DeviceState::Created;
        Ok(())
    }

    /// Create the logical device from the negotiated queues and features
    ///
    /// # Arguments
    ///
    /// * `requested_extensions` - Device extensions to enable; required
    ///   ones are validated against availability before creation so a
    ///   missing extension fails fast with its name
    pub fn create_device(&mut self, requested_extensions: &[RequestedExtension]) -> Result<()> {
        self.expect_state(DeviceState::PhysicalDeviceBound, "create_device")?;
        let instance = self.instance_handle()?;

        // Negotiate queues
        let family_props = unsafe {
            instance
                .raw()
                .get_physical_device_queue_family_properties(self.physical_device)
        };
        let mut used_counts = vec![0u32; family_props.len()];
        let graphics_selection = find_graphics_queue(&family_props, &mut used_counts)?;
        self.compute_selections = find_compute_queues(
            &family_props,
            &mut used_counts,
            graphics_selection.family_idx,
            self.config.max_compute_queues,
        );
        self.transfer_selections = find_transfer_queues(
            &family_props,
            &mut used_counts,
            graphics_selection.family_idx,
            self.config.max_transfer_queues,
        );
        self.graphics_selection = Some(graphics_selection);

        let mut all_selections = vec![graphics_selection];
        all_selections.extend_from_slice(&self.compute_selections);
        all_selections.extend_from_slice(&self.transfer_selections);
        let queue_requests = fill_queue_creation_info(&all_selections);
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = queue_requests
            .iter()
            .map(|request| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(request.family_idx)
                    .queue_priorities(&request.priorities)
            })
            .collect();

        // Resolve extensions, failing fast on missing required ones
        let enabled_names = resolve_extensions(requested_extensions, &self.available_extensions)?;
        let extension_cstrings = vulkan_instance::to_cstrings(enabled_names.iter())?;
        let extension_ptrs: Vec<*const c_char> = extension_cstrings
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        // Request the supported subset of core and extended features
        let requested_features = fill_device_features(&self.features);
        let mut features_16bit = vk::PhysicalDevice16BitStorageFeatures::default()
            .storage_input_output16(self.extra_features.storage_input_output16);
        let mut features_f16_i8 = vk::PhysicalDeviceShaderFloat16Int8Features::default()
            .shader_float16(self.extra_features.shader_float16)
            .shader_int8(self.extra_features.shader_int8);
        let mut features_cache_control =
            vk::PhysicalDevicePipelineCreationCacheControlFeatures::default()
                .pipeline_creation_cache_control(self.extra_features.pipeline_creation_cache_control);
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .features(requested_features)
            .push_next(&mut features_16bit)
            .push_next(&mut features_f16_i8)
            .push_next(&mut features_cache_control);

        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_ptrs)
            .push_next(&mut features2);

        let device = unsafe {
            instance
                .raw()
                .create_device(self.physical_device, &device_info, None)
        }
        .map_err(|e| {
            gpu_error!(
                "nebula3d::vulkan",
                "Failed to create logical device: {:?}",
                e
            );
            Error::InitializationFailed(format!("Failed to create logical device: {:?}", e))
        })?;

        self.finish_device_setup(&instance, device, enabled_names, Ownership::Owned)?;

        gpu_info!(
            "nebula3d::vulkan",
            "Logical device created: {} extensions, {} compute and {} transfer queues",
            self.enabled_extensions.len(),
            self.compute_selections.len(),
            self.transfer_selections.len()
        );
        self.state = DeviceState::Created;
        Ok(())
    }

    /// Shared tail of device adoption and creation: pipeline cache,
    /// allocator, debug labels, extension bookkeeping
    fn finish_device_setup(
        &mut self,
        instance: &VulkanInstance,
        device: ash::Device,
        enabled_names: Vec<String>,
        wrap: fn(ash::Device) -> Ownership<ash::Device>,
    ) -> Result<()> {
        let cache_info = vk::PipelineCacheCreateInfo::default();
        self.pipeline_cache = unsafe { device.create_pipeline_cache(&cache_info, None) }
            .map_err(|e| {
                gpu_error!(
                    "nebula3d::vulkan",
                    "Failed to create pipeline cache: {:?}",
                    e
                );
                Error::InitializationFailed(format!("Failed to create pipeline cache: {:?}", e))
            })?;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.raw().clone(),
            device: device.clone(),
            physical_device: self.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| {
            gpu_error!(
                "nebula3d::vulkan",
                "Failed to create GPU memory allocator: {:?}",
                e
            );
            Error::InitializationFailed(format!("Failed to create GPU memory allocator: {:?}", e))
        })?;
        self.allocator = Some(ManuallyDrop::new(Arc::new(Mutex::new(allocator))));

        if instance.debug_labels_enabled() {
            self.debug_utils_device =
                Some(ash::ext::debug_utils::Device::new(instance.raw(), &device));
        }

        self.enabled_extension_hashes = enabled_names
            .iter()
            .map(|name| HashedName::new(name))
            .collect();
        self.enabled_extensions = SortedSet::from_vec(enabled_names);
        self.device = Some(wrap(device));
        Ok(())
    }

    /// Build the queue wrappers for the negotiated selections
    ///
    /// Must run after `create_device` (or `set_external_device`); queues
    /// do not exist before the logical device does. The graphics queue
    /// owns the per-frame command-buffer rotation.
    pub fn init_queues(&mut self) -> Result<()> {
        self.expect_state(DeviceState::Created, "init_queues")?;
        let device = self.device_handle()?.clone();

        let graphics_selection = self.graphics_selection.ok_or_else(|| {
            Error::InvalidResource("init_queues called before queue negotiation".to_string())
        })?;
        let graphics_handle = match self.external_graphics_queue {
            Some(queue) => queue,
            None => unsafe {
                device.get_device_queue(graphics_selection.family_idx, graphics_selection.queue_idx)
            },
        };
        self.graphics_queue = Some(VulkanQueue::new(
            device.clone(),
            QueueUsage::Graphics,
            graphics_selection.family_idx,
            graphics_selection.queue_idx,
            graphics_handle,
            self.config.frames_in_flight,
        )?);

        let compute_selections = self.compute_selections.clone();
        for selection in compute_selections {
            let handle =
                unsafe { device.get_device_queue(selection.family_idx, selection.queue_idx) };
            self.compute_queues.push(VulkanQueue::new(
                device.clone(),
                QueueUsage::Compute,
                selection.family_idx,
                selection.queue_idx,
                handle,
                self.config.frames_in_flight,
            )?);
        }

        let transfer_selections = self.transfer_selections.clone();
        for selection in transfer_selections {
            let handle =
                unsafe { device.get_device_queue(selection.family_idx, selection.queue_idx) };
            self.transfer_queues.push(VulkanQueue::new(
                device.clone(),
                QueueUsage::Transfer,
                selection.family_idx,
                selection.queue_idx,
                handle,
                self.config.frames_in_flight,
            )?);
        }

        gpu_info!(
            "nebula3d::vulkan",
            "Queues ready: 1 graphics, {} compute, {} transfer ({} frames in flight)",
            self.compute_queues.len(),
            self.transfer_queues.len(),
            self.config.frames_in_flight
        );
        self.state = DeviceState::QueuesReady;
        Ok(())
    }

    // ===== Submission =====

    /// Submit the open command buffer and start recording the next one
    ///
    /// The sole mechanism by which recorded work reaches the hardware.
    /// Submission is asynchronous; only `stall` guarantees completion.
    /// Blocks only on the fence of the command buffer being reused,
    /// which bounds the number of in-flight frames.
    pub fn commit_and_next_command_buffer(
        &mut self,
        submission_type: SubmissionType,
    ) -> Result<()> {
        if let DeviceLossState::Lost(reason) = self.loss_state {
            return Err(Error::DeviceLost(format!(
                "Submission refused, device already lost: {:?}",
                reason
            )));
        }
        self.expect_live("commit_and_next_command_buffer")?;
        self.state = DeviceState::Active;

        let consume_semaphores = submission_type == SubmissionType::EndFrameAndSwap;
        let queue = self.graphics_queue.as_mut().ok_or_else(|| {
            Error::InvalidResource("Submission without an initialized graphics queue".to_string())
        })?;
        if let Err(result) = queue.commit_and_next_command_buffer(consume_semaphores) {
            return Err(self.submission_error("Command buffer submission", result));
        }

        match submission_type {
            SubmissionType::FlushOnly => {}
            SubmissionType::NewFrameIdx | SubmissionType::EndFrameAndSwap => {
                if let Some(pool) = &self.buffer_pool {
                    pool.notify_new_command_buffer();
                }
            }
        }
        Ok(())
    }

    /// Block until the GPU drained all submitted work
    ///
    /// On an already-lost device this reports the loss immediately
    /// instead of waiting forever. After a successful drain the owning
    /// render system is notified so CPU-side bookkeeping can reset.
    pub fn stall(&mut self) -> Result<()> {
        if let DeviceLossState::Lost(reason) = self.loss_state {
            gpu_warn!(
                "nebula3d::vulkan",
                "Stall requested on a lost device: {:?}",
                reason
            );
            return Err(Error::DeviceLost(format!(
                "Device already lost: {:?}",
                reason
            )));
        }
        self.expect_live("stall")?;
        self.state = DeviceState::Active;

        let device = self.device_handle()?.clone();
        if let Err(result) = unsafe { device.device_wait_idle() } {
            return Err(self.submission_error("Device stall", result));
        }

        if let Some(queue) = self.graphics_queue.as_mut() {
            queue.notify_device_stalled();
        }
        if let Some(render_system) = &self.render_system {
            render_system.notify_device_stalled();
        }
        Ok(())
    }

    /// Drain the GPU, swallowing device-loss reports
    ///
    /// Teardown paths call this when the device may already be beyond
    /// saving; loss is still recorded (it stays sticky), it just is not
    /// propagated as an error.
    pub fn stall_ignoring_device_lost(&mut self) {
        if self.loss_state.is_lost() {
            return;
        }
        let Some(ownership) = self.device.as_ref() else {
            return;
        };
        let device = ownership.get().clone();

        if let Err(result) = unsafe { device.device_wait_idle() } {
            if result == vk::Result::ERROR_DEVICE_LOST {
                self.record_device_loss(result);
            } else {
                gpu_warn!(
                    "nebula3d::vulkan",
                    "Wait-idle during teardown failed: {:?}",
                    result
                );
            }
            return;
        }
        if let Some(queue) = self.graphics_queue.as_mut() {
            queue.notify_device_stalled();
        }
    }

    /// True once the device reported loss. Permanently true afterwards
    pub fn is_device_lost(&self) -> bool {
        self.loss_state.is_lost()
    }

    /// Membership test against the sorted enabled-extension hashes
    pub fn has_device_extension(&self, extension: &str) -> bool {
        self.enabled_extension_hashes
            .contains(&HashedName::new(extension))
    }

    // ===== Teardown =====

    /// Tear everything down in dependency order. Idempotent
    pub fn destroy(&mut self) {
        if self.state == DeviceState::Destroyed {
            return;
        }

        if self.device.is_some() {
            // 1. Drain outstanding work; loss at this point is noise
            self.stall_ignoring_device_lost();

            // 2. Allocator releases memory through the device, so it
            //    goes first
            if let Some(allocator) = self.allocator.take() {
                drop(ManuallyDrop::into_inner(allocator));
            }

            // 3. Pipeline cache
            if let Some(ownership) = self.device.as_ref() {
                if self.pipeline_cache != vk::PipelineCache::null() {
                    unsafe {
                        ownership
                            .get()
                            .destroy_pipeline_cache(self.pipeline_cache, None)
                    };
                    self.pipeline_cache = vk::PipelineCache::null();
                }
            }

            // 4. Queue objects own command pools and fences
            if let Some(queue) = self.graphics_queue.as_mut() {
                queue.destroy();
            }
            for queue in self.compute_queues.iter_mut() {
                queue.destroy();
            }
            for queue in self.transfer_queues.iter_mut() {
                queue.destroy();
            }
            self.graphics_queue = None;
            self.compute_queues.clear();
            self.transfer_queues.clear();

            // 5. The logical device itself, only when owned
            if let Some(ownership) = self.device.take() {
                if let Some(device) = ownership.take_owned() {
                    unsafe { device.destroy_device(None) };
                }
            }
        }

        self.debug_utils_device = None;
        self.present_queue = None;
        self.external_graphics_queue = None;
        self.render_system = None;
        self.buffer_pool = None;

        // 6. Release the instance reference so it can be torn down
        //    after us
        self.instance = None;

        self.state = DeviceState::Destroyed;
        gpu_debug!("nebula3d::vulkan", "Vulkan device destroyed");
    }

    // ===== Collaborators =====

    pub fn set_render_system(&mut self, render_system: Arc<dyn RenderSystem>) {
        self.render_system = Some(render_system);
    }

    pub fn set_buffer_pool(&mut self, pool: SharedBufferPool) {
        self.buffer_pool = Some(pool);
    }

    /// Record the queue the presentation collaborator will present on
    pub fn set_present_queue(&mut self, queue: vk::Queue) {
        self.present_queue = Some(queue);
    }

    // ===== Debug labels =====

    /// Open a command-buffer debug label; no-op without debug utils
    pub fn begin_debug_label(&self, cmd: vk::CommandBuffer, label: &str) {
        let Some(debug_utils) = &self.debug_utils_device else {
            return;
        };
        let Ok(name) = CString::new(label) else {
            return;
        };
        let label_info = vk::DebugUtilsLabelEXT::default().label_name(&name);
        unsafe { debug_utils.cmd_begin_debug_utils_label(cmd, &label_info) };
    }

    /// Close the innermost debug label; no-op without debug utils
    pub fn end_debug_label(&self, cmd: vk::CommandBuffer) {
        if let Some(debug_utils) = &self.debug_utils_device {
            unsafe { debug_utils.cmd_end_debug_utils_label(cmd) };
        }
    }

    // ===== Accessors =====

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn loss_state(&self) -> DeviceLossState {
        self.loss_state
    }

    pub fn instance(&self) -> Option<&Arc<VulkanInstance>> {
        self.instance.as_ref()
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn physical_device_info(&self) -> Option<&VulkanPhysicalDevice> {
        self.physical_device_info.as_ref()
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    pub fn features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.features
    }

    pub fn extra_features(&self) -> DeviceExtraFeatures {
        self.extra_features
    }

    pub fn available_extensions(&self) -> &SortedSet<String> {
        &self.available_extensions
    }

    pub fn enabled_extensions(&self) -> &SortedSet<String> {
        &self.enabled_extensions
    }

    pub fn supported_stages(&self) -> vk::PipelineStageFlags {
        self.supported_stages
    }

    pub fn non_coherent_atom_size(&self) -> u64 {
        self.non_coherent_atom_size
    }

    pub fn is_external(&self) -> bool {
        self.device
            .as_ref()
            .map(|ownership| ownership.is_external())
            .unwrap_or(false)
    }

    /// Loaded logical-device function table, once created
    pub fn logical_device(&self) -> Option<&ash::Device> {
        self.device.as_ref().map(|ownership| ownership.get())
    }

    /// Shared handle to the GPU memory allocator, once created
    pub fn allocator(&self) -> Option<Arc<Mutex<Allocator>>> {
        self.allocator
            .as_ref()
            .map(|allocator| Arc::clone(allocator))
    }

    pub fn pipeline_cache(&self) -> vk::PipelineCache {
        self.pipeline_cache
    }

    pub fn graphics_queue(&self) -> Option<&VulkanQueue> {
        self.graphics_queue.as_ref()
    }

    pub fn graphics_queue_mut(&mut self) -> Option<&mut VulkanQueue> {
        self.graphics_queue.as_mut()
    }

    pub fn compute_queues(&self) -> &[VulkanQueue] {
        &self.compute_queues
    }

    pub fn transfer_queues(&self) -> &[VulkanQueue] {
        &self.transfer_queues
    }

    pub fn present_queue(&self) -> Option<vk::Queue> {
        self.present_queue
    }

    // ===== Internals =====

    fn instance_handle(&self) -> Result<Arc<VulkanInstance>> {
        self.instance.clone().ok_or_else(|| {
            Error::InvalidResource("Device instance reference already cleared".to_string())
        })
    }

    fn device_handle(&self) -> Result<&ash::Device> {
        self.device
            .as_ref()
            .map(|ownership| ownership.get())
            .ok_or_else(|| Error::InvalidResource("Logical device not created".to_string()))
    }

    fn expect_state(&self, expected: DeviceState, operation: &str) -> Result<()> {
        debug_assert!(
            self.state == expected,
            "{} called in state {:?}",
            operation,
            self.state
        );
        if self.state != expected {
            return Err(Error::InvalidResource(format!(
                "{} called in state {:?}",
                operation, self.state
            )));
        }
        Ok(())
    }

    fn expect_live(&self, operation: &str) -> Result<()> {
        let live = self.state == DeviceState::QueuesReady || self.state == DeviceState::Active;
        debug_assert!(live, "{} called in state {:?}", operation, self.state);
        if !live {
            return Err(Error::InvalidResource(format!(
                "{} called in state {:?}",
                operation, self.state
            )));
        }
        Ok(())
    }

    /// Query the extended feature chain and copy out the subset this
    /// backend understands
    fn fill_device_features2(&mut self, instance: &VulkanInstance) {
        let mut features_16bit = vk::PhysicalDevice16BitStorageFeatures::default();
        let mut features_f16_i8 = vk::PhysicalDeviceShaderFloat16Int8Features::default();
        let mut features_cache_control =
            vk::PhysicalDevicePipelineCreationCacheControlFeatures::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut features_16bit)
            .push_next(&mut features_f16_i8)
            .push_next(&mut features_cache_control);

        unsafe {
            instance
                .raw()
                .get_physical_device_features2(self.physical_device, &mut features2)
        };

        self.features = features2.features;
        self.extra_features = DeviceExtraFeatures {
            storage_input_output16: features_16bit.storage_input_output16 != 0,
            shader_float16: features_f16_i8.shader_float16 != 0,
            shader_int8: features_f16_i8.shader_int8 != 0,
            pipeline_creation_cache_control: features_cache_control.pipeline_creation_cache_control
                != 0,
        };
    }

    /// Record the first loss reason; later reports keep the original
    fn record_device_loss(&mut self, reason: vk::Result) {
        if self.loss_state.is_lost() {
            return;
        }
        gpu_error!("nebula3d::vulkan", "Device lost: {:?}", reason);
        self.loss_state = DeviceLossState::Lost(reason);
        if self.state == DeviceState::Active {
            self.state = DeviceState::Lost;
        }
    }

    /// Turn a raw submission failure into the right error, recording
    /// loss when that is what it was
    fn submission_error(&mut self, what: &str, result: vk::Result) -> Error {
        if result == vk::Result::ERROR_DEVICE_LOST {
            self.record_device_loss(result);
            Error::DeviceLost(format!("{} reported device loss", what))
        } else {
            gpu_error!("nebula3d::vulkan", "{} failed: {:?}", what, result);
            Error::BackendError(format!("{} failed: {:?}", what, result))
        }
    }
}

/// Device extension names the GPU actually reports
fn supported_device_extensions(
    instance: &VulkanInstance,
    physical_device: vk::PhysicalDevice,
) -> Result<SortedSet<String>> {
    let properties = unsafe {
        instance
            .raw()
            .enumerate_device_extension_properties(physical_device)
    }
    .map_err(|e| {
        gpu_error!(
            "nebula3d::vulkan",
            "Failed to enumerate device extensions: {:?}",
            e
        );
        Error::InitializationFailed(format!("Failed to enumerate device extensions: {:?}", e))
    })?;

    Ok(properties
        .iter()
        .filter_map(|props| props.extension_name_as_c_str().ok())
        .filter_map(|name| name.to_str().ok().map(str::to_owned))
        .collect())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "vulkan_device_tests.rs"]
mod tests;
