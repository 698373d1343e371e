use std::collections::HashSet;

use anyhow::{Result, anyhow};
use vulkanalia::prelude::v1_3::*;
use vulkanalia::vk::KhrSurfaceExtension;

use crate::error::Error;
use crate::vulkan::instance::VALIDATION_LAYER;

pub const DEVICE_EXTENSIONS: &[vk::ExtensionName] = &[vk::KHR_SWAPCHAIN_EXTENSION.name];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
    /// A transfer-only family when the device has one, else `graphics`.
    pub transfer: u32,
}

impl QueueFamilyIndices {
    pub unsafe fn get(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let properties = instance.get_physical_device_queue_family_properties(physical_device);
        Self::select(&properties, |index| {
            Ok(instance.get_physical_device_surface_support_khr(physical_device, index, surface)?)
        })
    }

    pub fn select(
        properties: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> Result<bool>,
    ) -> Result<Self> {
        let graphics = properties
            .iter()
            .position(|p| p.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|i| i as u32);

        let mut present = None;
        for index in 0..properties.len() as u32 {
            if supports_present(index)? {
                present = Some(index);
                break;
            }
        }

        let dedicated_transfer = properties
            .iter()
            .position(|p| {
                p.queue_flags.contains(vk::QueueFlags::TRANSFER)
                    && !p.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            })
            .map(|i| i as u32);

        match (graphics, present) {
            (Some(graphics), Some(present)) => Ok(Self {
                graphics,
                present,
                transfer: dedicated_transfer.unwrap_or(graphics),
            }),
            _ => Err(Error::MissingQueueFamilies.into()),
        }
    }

    fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics];
        for family in [self.present, self.transfer] {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

/// Sharing mode applied to every buffer and image the engine creates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferSharing {
    pub mode: vk::SharingMode,
    pub queue_families: Vec<u32>,
}

impl BufferSharing {
    pub fn new(indices: &QueueFamilyIndices) -> Self {
        if indices.graphics != indices.transfer {
            Self {
                mode: vk::SharingMode::CONCURRENT,
                queue_families: vec![indices.graphics, indices.transfer],
            }
        } else {
            Self {
                mode: vk::SharingMode::EXCLUSIVE,
                queue_families: Vec::new(),
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn get(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        Ok(Self {
            capabilities: instance
                .get_physical_device_surface_capabilities_khr(physical_device, surface)?,
            formats: instance.get_physical_device_surface_formats_khr(physical_device, surface)?,
            present_modes: instance
                .get_physical_device_surface_present_modes_khr(physical_device, surface)?,
        })
    }
}

pub unsafe fn pick_physical_device(
    instance: &Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
    for physical_device in instance.enumerate_physical_devices()? {
        let properties = instance.get_physical_device_properties(physical_device);

        match check_physical_device(instance, surface, physical_device) {
            Ok(indices) => {
                log::info!(
                    "Selected physical device (`{}`), queue families: {:?}.",
                    properties.device_name,
                    indices
                );
                return Ok((physical_device, indices));
            }
            Err(error) => log::warn!(
                "Skipping physical device (`{}`): {}",
                properties.device_name,
                error
            ),
        }
    }

    Err(Error::NoSuitableDevice.into())
}

unsafe fn check_physical_device(
    instance: &Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> Result<QueueFamilyIndices> {
    let indices = QueueFamilyIndices::get(instance, surface, physical_device)?;
    check_physical_device_extensions(instance, physical_device)?;

    let support = SwapchainSupport::get(instance, surface, physical_device)?;
    if support.formats.is_empty() || support.present_modes.is_empty() {
        return Err(anyhow!("Insufficient swapchain support."));
    }

    Ok(indices)
}

unsafe fn check_physical_device_extensions(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<()> {
    let extensions = available_device_extensions(instance, physical_device)?;
    if DEVICE_EXTENSIONS.iter().all(|e| extensions.contains(e)) {
        Ok(())
    } else {
        Err(anyhow!("Missing required device extensions."))
    }
}

unsafe fn available_device_extensions(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<HashSet<vk::ExtensionName>> {
    Ok(instance
        .enumerate_device_extension_properties(physical_device, None)?
        .iter()
        .map(|e| e.extension_name)
        .collect())
}

/// Provisional extension, so not among vulkanalia's default constants.
pub static PORTABILITY_SUBSET_EXTENSION: vk::ExtensionName =
    vk::ExtensionName::from_bytes(b"VK_KHR_portability_subset");

/// Portability implementations require the subset extension to be enabled.
pub fn needs_portability_subset(available: &HashSet<vk::ExtensionName>) -> bool {
    available.contains(&PORTABILITY_SUBSET_EXTENSION)
}

pub unsafe fn create_logical_device(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    indices: &QueueFamilyIndices,
    validation: bool,
) -> Result<Device> {
    let queue_priorities = &[1.0];
    let queue_infos = indices
        .unique()
        .into_iter()
        .map(|i| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(i)
                .queue_priorities(queue_priorities)
        })
        .collect::<Vec<_>>();

    let layers = if validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        vec![]
    };

    let mut extensions = DEVICE_EXTENSIONS
        .iter()
        .map(|n| n.as_ptr())
        .collect::<Vec<_>>();

    let available = available_device_extensions(instance, physical_device)?;
    if needs_portability_subset(&available) {
        extensions.push(PORTABILITY_SUBSET_EXTENSION.as_ptr());
    }

    let features = vk::PhysicalDeviceFeatures::builder();

    let info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_infos)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    Ok(instance.create_device(physical_device, &info, None)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_dedicated_transfer_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = QueueFamilyIndices::select(&families, |i| Ok(i == 0)).unwrap();
        assert_eq!(
            indices,
            QueueFamilyIndices {
                graphics: 0,
                present: 0,
                transfer: 1
            }
        );
    }

    #[test]
    fn transfer_falls_back_to_graphics() {
        let families = [
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
        ];
        let indices = QueueFamilyIndices::select(&families, |_| Ok(true)).unwrap();
        assert_eq!(indices.graphics, 1);
        assert_eq!(indices.present, 0);
        assert_eq!(indices.transfer, 1);
    }

    #[test]
    fn missing_present_family_is_an_error() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let error = QueueFamilyIndices::select(&families, |_| Ok(false)).unwrap_err();
        assert_eq!(
            error.downcast_ref::<Error>(),
            Some(&Error::MissingQueueFamilies)
        );
    }

    #[test]
    fn sharing_mode_follows_transfer_family() {
        let shared = QueueFamilyIndices {
            graphics: 0,
            present: 0,
            transfer: 0,
        };
        assert_eq!(BufferSharing::new(&shared).mode, vk::SharingMode::EXCLUSIVE);
        assert!(BufferSharing::new(&shared).queue_families.is_empty());

        let split = QueueFamilyIndices {
            transfer: 2,
            ..shared
        };
        let sharing = BufferSharing::new(&split);
        assert_eq!(sharing.mode, vk::SharingMode::CONCURRENT);
        assert_eq!(sharing.queue_families, vec![0, 2]);
    }

    #[test]
    fn unique_families_are_deduplicated() {
        let indices = QueueFamilyIndices {
            graphics: 0,
            present: 1,
            transfer: 0,
        };
        assert_eq!(indices.unique(), vec![0, 1]);
    }

    #[test]
    fn portability_subset_enabled_only_when_offered() {
        let mut available: HashSet<vk::ExtensionName> =
            DEVICE_EXTENSIONS.iter().copied().collect();
        assert!(!needs_portability_subset(&available));

        available.insert(vk::ExtensionName::from_bytes(b"VK_KHR_portability_subset"));
        assert!(needs_portability_subset(&available));
    }
}
