/// VulkanInstance - instance ownership, capability discovery and GPU enumeration
///
/// The instance is the root object of the backend: it owns the `VkInstance`
/// handle (or borrows an externally created one), knows which extensions and
/// layers are *actually* enabled, and caches the physical-device list.
/// Re-enumerating physical devices after hardware removal requires a fresh
/// instance, as the driver caches the device list per instance.

use nebula_3d_render::nebula3d::utils::{Ownership, SortedSet};
use nebula_3d_render::nebula3d::{DeviceConfig, Error, Result};
use nebula_3d_render::{gpu_error, gpu_info, gpu_warn};

use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};

/// Use it to pass an external instance
///
/// The claimed layers and extensions are verified against what the
/// runtime actually supports. Host frameworks let you request layers and
/// extensions but give no feedback on whether the request was honored,
/// so a claim is only trusted when discovery confirms it.
pub struct VulkanExternalInstance {
    pub instance: vk::Instance,
    pub instance_layers: Vec<String>,
    pub instance_extensions: Vec<String>,
}

/// Immutable snapshot of one GPU's identity
///
/// Queried once per instance lifetime by `init_physical_device_list`.
#[derive(Debug, Clone)]
pub struct VulkanPhysicalDevice {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    pub device_type: vk::PhysicalDeviceType,
}

/// Vulkan instance wrapper
///
/// Owns the enabled extension/layer sets (sorted, deduplicated), the
/// optional debug messenger, and the cached physical-device list.
/// Construct, then call `init_debug_features` and
/// `init_physical_device_list` before sharing it with a device.
pub struct VulkanInstance {
    entry: ash::Entry,
    instance: Ownership<ash::Instance>,

    /// Extensions actually enabled on the instance. Sorted
    enabled_extensions: SortedSet<String>,
    /// Layers actually enabled on the instance. Sorted
    enabled_layers: SortedSet<String>,

    physical_devices: Vec<VulkanPhysicalDevice>,

    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    debug_labels_enabled: bool,
}

impl VulkanInstance {
    /// Create a new Vulkan instance
    ///
    /// Requests the validation layer and debug-utils extension when
    /// validation is enabled (via `DeviceConfig` or the
    /// `vulkan-validation` feature), and the surface extensions for
    /// `display_handle` when one is supplied. Anything the runtime does
    /// not support is dropped with a warning instead of failing creation.
    ///
    /// # Arguments
    ///
    /// * `config` - Application name/version and validation switches
    /// * `display_handle` - Display to request surface extensions for, if
    ///   the application will present
    pub fn new(config: &DeviceConfig, display_handle: Option<RawDisplayHandle>) -> Result<Self> {
        unsafe {
            // Load the Vulkan library
            let entry = ash::Entry::load().map_err(|e| {
                gpu_error!("nebula3d::vulkan", "Failed to load Vulkan library: {:?}", e);
                Error::InitializationFailed(format!("Failed to load Vulkan library: {:?}", e))
            })?;

            let enable_validation = config.enable_validation || cfg!(feature = "vulkan-validation");

            // Discovery: what this runtime actually supports
            let (supported_extensions, supported_layers) =
                Self::supported_extensions_and_layers(&entry)?;

            // Assemble the requested extension list
            let mut requested_extensions: Vec<String> = Vec::new();
            if let Some(display_handle) = display_handle {
                let surface_extensions = ash_window::enumerate_required_extensions(display_handle)
                    .map_err(|e| {
                        gpu_error!(
                            "nebula3d::vulkan",
                            "Failed to get required surface extensions: {:?}",
                            e
                        );
                        Error::InitializationFailed(format!(
                            "Failed to get required surface extensions: {:?}",
                            e
                        ))
                    })?;
                for &name_ptr in surface_extensions {
                    requested_extensions
                        .push(CStr::from_ptr(name_ptr).to_string_lossy().into_owned());
                }
            }
            if enable_validation {
                requested_extensions
                    .push(ash::ext::debug_utils::NAME.to_string_lossy().into_owned());
            }

            let mut requested_layers: Vec<String> = Vec::new();
            if enable_validation {
                requested_layers.push("VK_LAYER_KHRONOS_validation".to_string());
            }

            // Downgrade requests the runtime cannot honor
            let enabled_extensions =
                retain_supported("extension", &requested_extensions, &supported_extensions);
            let enabled_layers = retain_supported("layer", &requested_layers, &supported_layers);

            let extension_cstrings = to_cstrings(enabled_extensions.iter())?;
            let layer_cstrings = to_cstrings(enabled_layers.iter())?;
            let extension_ptrs: Vec<*const c_char> =
                extension_cstrings.iter().map(|name| name.as_ptr()).collect();
            let layer_ptrs: Vec<*const c_char> =
                layer_cstrings.iter().map(|name| name.as_ptr()).collect();

            let app_name = CString::new(config.app_name.as_str()).map_err(|_| {
                Error::InvalidResource(format!(
                    "Application name '{}' contains an interior NUL byte",
                    config.app_name
                ))
            })?;

            // Application Info
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(0, config.app_version, 0, 0))
                .engine_name(c"Nebula3D")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_3);

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_ptrs)
                .enabled_extension_names(&extension_ptrs);

            let instance = entry.create_instance(&create_info, None).map_err(|e| {
                gpu_error!("nebula3d::vulkan", "Failed to create Vulkan instance: {:?}", e);
                Error::InitializationFailed(format!("Failed to create instance: {:?}", e))
            })?;

            gpu_info!(
                "nebula3d::vulkan",
                "Vulkan instance created ({} extensions, {} layers)",
                enabled_extensions.len(),
                enabled_layers.len()
            );

            Ok(Self {
                entry,
                instance: Ownership::Owned(instance),
                enabled_extensions,
                enabled_layers,
                physical_devices: Vec::new(),
                debug_utils: None,
                debug_messenger: None,
                debug_labels_enabled: false,
            })
        }
    }

    /// Wrap an externally created instance without taking ownership
    ///
    /// The external claims are cross-checked against discovery; claims
    /// the runtime does not confirm are dropped (downgraded, never
    /// upgraded). Destruction will not touch the foreign handle.
    pub fn from_external(external: VulkanExternalInstance) -> Result<Self> {
        unsafe {
            let entry = ash::Entry::load().map_err(|e| {
                gpu_error!("nebula3d::vulkan", "Failed to load Vulkan library: {:?}", e);
                Error::InitializationFailed(format!("Failed to load Vulkan library: {:?}", e))
            })?;

            let (enabled_extensions, enabled_layers) =
                Self::enumerate_extensions_and_layers(&entry, &external)?;

            let instance = ash::Instance::load(entry.static_fn(), external.instance);

            gpu_info!(
                "nebula3d::vulkan",
                "Adopted external Vulkan instance ({} verified extensions, {} verified layers)",
                enabled_extensions.len(),
                enabled_layers.len()
            );

            Ok(Self {
                entry,
                instance: Ownership::External(instance),
                enabled_extensions,
                enabled_layers,
                physical_devices: Vec::new(),
                debug_utils: None,
                debug_messenger: None,
                debug_labels_enabled: false,
            })
        }
    }

    /// Verify external claims against what the runtime reports
    ///
    /// Read-only discovery: queries the supported extension and layer
    /// sets and intersects them with the claims carried by `external`.
    /// Returns `(extensions, layers)` as sorted sets.
    pub fn enumerate_extensions_and_layers(
        entry: &ash::Entry,
        external: &VulkanExternalInstance,
    ) -> Result<(SortedSet<String>, SortedSet<String>)> {
        let (supported_extensions, supported_layers) =
            Self::supported_extensions_and_layers(entry)?;
        let extensions = retain_supported(
            "extension",
            &external.instance_extensions,
            &supported_extensions,
        );
        let layers = retain_supported("layer", &external.instance_layers, &supported_layers);
        Ok((extensions, layers))
    }

    /// Query the extension and layer names this runtime supports
    fn supported_extensions_and_layers(entry: &ash::Entry) -> Result<(Vec<String>, Vec<String>)> {
        unsafe {
            let extension_props = entry
                .enumerate_instance_extension_properties(None)
                .map_err(|e| {
                    gpu_error!(
                        "nebula3d::vulkan",
                        "Failed to enumerate instance extensions: {:?}",
                        e
                    );
                    Error::InitializationFailed(format!(
                        "Failed to enumerate instance extensions: {:?}",
                        e
                    ))
                })?;
            let extensions = extension_props
                .iter()
                .filter_map(|props| props.extension_name_as_c_str().ok())
                .filter_map(|name| name.to_str().ok())
                .map(str::to_string)
                .collect();

            let layer_props = entry.enumerate_instance_layer_properties().map_err(|e| {
                gpu_error!(
                    "nebula3d::vulkan",
                    "Failed to enumerate instance layers: {:?}",
                    e
                );
                Error::InitializationFailed(format!(
                    "Failed to enumerate instance layers: {:?}",
                    e
                ))
            })?;
            let layers = layer_props
                .iter()
                .filter_map(|props| props.layer_name_as_c_str().ok())
                .filter_map(|name| name.to_str().ok())
                .map(str::to_string)
                .collect();

            Ok((extensions, layers))
        }
    }

    /// Whether `extension` was actually enabled at construction time
    ///
    /// O(log n) binary search over the sorted enabled list.
    pub fn has_extension(&self, extension: &str) -> bool {
        self.enabled_extensions.contains(extension)
    }

    /// Whether `layer` was actually enabled at construction time
    pub fn has_layer(&self, layer: &str) -> bool {
        self.enabled_layers.contains(layer)
    }

    /// Register the debug messenger and enable debug labels
    ///
    /// Absence of the debug-utils extension is not an error; the
    /// messenger is simply not registered. When a frame-capture tool
    /// (RenderDoc) is attached, messenger registration is skipped since
    /// the capture layer provides its own reporting, but labels stay
    /// enabled so captures are annotated.
    pub fn init_debug_features(&mut self, has_renderdoc_api: bool) {
        self.debug_labels_enabled = self.has_extension("VK_EXT_debug_utils");

        if has_renderdoc_api {
            gpu_info!(
                "nebula3d::vulkan",
                "Frame capture layer detected, skipping debug messenger registration"
            );
            return;
        }
        if !self.debug_labels_enabled {
            gpu_info!(
                "nebula3d::vulkan",
                "VK_EXT_debug_utils not enabled, debug messenger unavailable"
            );
            return;
        }

        let debug_utils = ash::ext::debug_utils::Instance::new(&self.entry, self.raw());

        let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(crate::debug::vulkan_debug_callback));

        unsafe {
            match debug_utils.create_debug_utils_messenger(&debug_info, None) {
                Ok(messenger) => {
                    self.debug_utils = Some(debug_utils);
                    self.debug_messenger = Some(messenger);
                    gpu_info!("nebula3d::vulkan", "Debug messenger registered");
                }
                Err(e) => {
                    gpu_warn!(
                        "nebula3d::vulkan",
                        "Failed to register debug messenger: {:?}",
                        e
                    );
                }
            }
        }
    }

    /// Query and cache the physical devices visible to this instance
    ///
    /// Must be re-invoked after instance recreation. Zero visible
    /// devices is an initialization error.
    pub fn init_physical_device_list(&mut self) -> Result<()> {
        let instance = self.instance.get();

        let handles = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
            gpu_error!(
                "nebula3d::vulkan",
                "Failed to enumerate physical devices: {:?}",
                e
            );
            Error::InitializationFailed(format!("Failed to enumerate physical devices: {:?}", e))
        })?;

        if handles.is_empty() {
            gpu_error!("nebula3d::vulkan", "No Vulkan-capable GPU found");
            return Err(Error::InitializationFailed(
                "No Vulkan-capable GPU found".to_string(),
            ));
        }

        self.physical_devices.clear();
        for handle in handles {
            let props = unsafe { instance.get_physical_device_properties(handle) };
            let name = props
                .device_name_as_c_str()
                .ok()
                .and_then(|name| name.to_str().ok())
                .unwrap_or("Unknown Device")
                .to_string();

            gpu_info!(
                "nebula3d::vulkan",
                "Found physical device '{}' (vendor {:#06x}, device {:#06x}, {:?})",
                name,
                props.vendor_id,
                props.device_id,
                props.device_type
            );

            self.physical_devices.push(VulkanPhysicalDevice {
                handle,
                name,
                vendor_id: props.vendor_id,
                device_id: props.device_id,
                device_type: props.device_type,
            });
        }

        Ok(())
    }

    /// Cached physical-device list, in driver order
    pub fn physical_devices(&self) -> &[VulkanPhysicalDevice] {
        &self.physical_devices
    }

    /// Find a physical device by its reported name
    ///
    /// Never fails: when `name` matches nothing (or is empty), the first
    /// enumerated device is returned so callers can always proceed with
    /// *some* device rather than erroring on a config typo.
    /// `init_physical_device_list` must have run first.
    pub fn find_by_name(&self, name: &str) -> &VulkanPhysicalDevice {
        debug_assert!(
            !self.physical_devices.is_empty(),
            "init_physical_device_list must run before find_by_name"
        );
        match find_index_by_name(&self.physical_devices, name) {
            Some(idx) => &self.physical_devices[idx],
            None => {
                if !name.is_empty() {
                    gpu_warn!(
                        "nebula3d::vulkan",
                        "Physical device '{}' not found, using '{}'",
                        name,
                        self.physical_devices[0].name
                    );
                }
                &self.physical_devices[0]
            }
        }
    }

    /// Loaded instance-level function table
    pub fn raw(&self) -> &ash::Instance {
        self.instance.get()
    }

    /// Library entry points (needed for surface creation)
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Whether the underlying handle is borrowed from a host application
    pub fn is_external(&self) -> bool {
        self.instance.is_external()
    }

    /// Whether devices created on this instance should load debug-label
    /// function pointers
    pub fn debug_labels_enabled(&self) -> bool {
        self.debug_labels_enabled
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            // 1. Release the debug messenger before the instance dies
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            // 2. Destroy the instance handle, unless it is foreign
            if let Ownership::Owned(instance) = &self.instance {
                instance.destroy_instance(None);
            }
        }
    }
}

/// Keep only the requested names that discovery confirms, warning about
/// each dropped request
fn retain_supported(kind: &str, requested: &[String], supported: &[String]) -> SortedSet<String> {
    let supported: SortedSet<String> = supported.iter().cloned().collect();
    let mut verified = SortedSet::new();
    for name in requested {
        if supported.contains(name.as_str()) {
            verified.insert(name.clone());
        } else {
            gpu_warn!(
                "nebula3d::vulkan",
                "Instance {} '{}' is not supported by this runtime and was dropped",
                kind,
                name
            );
        }
    }
    verified
}

/// Exact-name lookup into the physical-device list
fn find_index_by_name(devices: &[VulkanPhysicalDevice], name: &str) -> Option<usize> {
    if name.is_empty() {
        return None;
    }
    devices.iter().position(|device| device.name == name)
}

/// Convert a set of names to NUL-terminated strings for the API
pub(crate) fn to_cstrings<'a>(names: impl Iterator<Item = &'a String>) -> Result<Vec<CString>> {
    names
        .map(|name| {
            CString::new(name.as_str()).map_err(|_| {
                Error::InvalidResource(format!("Name '{}' contains an interior NUL byte", name))
            })
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "vulkan_instance_tests.rs"]
mod tests;
