use std::sync::Arc;

use anyhow::{Result, anyhow};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use vulkanalia::loader::{LIBRARY, LibloadingLoader};
use vulkanalia::prelude::v1_3::*;
use vulkanalia::vk::KhrSurfaceExtension;
use vulkanalia::window as vk_window;

use crate::config::AppInfo;
use crate::vulkan::device::{self, BufferSharing, QueueFamilyIndices};
use crate::vulkan::instance;

/// Device-level state shared by the engine and every sprite batch.
///
/// Held behind an [`Arc`] so the device outlives whichever of its users is
/// dropped last.
pub struct Context {
    #[allow(dead_code)]
    entry: Entry,
    pub instance: Instance,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub device: Device,
    pub queue_families: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub transfer_queue: vk::Queue,
    pub sharing: BufferSharing,
    /// Graphics family pool: frame command buffers and layout transitions.
    pub general_pool: vk::CommandPool,
    /// Transfer family pool: staging copies.
    pub transfer_pool: vk::CommandPool,
}

impl Context {
    /// # Safety
    ///
    /// `window` must outlive the returned context.
    pub unsafe fn create<W>(window: &W, app_info: &AppInfo, validation: bool) -> Result<Arc<Self>>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let loader = LibloadingLoader::new(LIBRARY)?;
        let entry = Entry::new(loader).map_err(|b| anyhow!("{}", b))?;
        let (instance, validation) =
            instance::create_instance(window, &entry, app_info, validation)?;

        let surface = vk_window::create_surface(&instance, window, window)
            .inspect_err(|_| instance.destroy_instance(None))?;

        let (physical_device, queue_families, device) =
            match open_device(&instance, surface, validation) {
                Ok(parts) => parts,
                Err(error) => {
                    instance.destroy_surface_khr(surface, None);
                    instance.destroy_instance(None);
                    return Err(error);
                }
            };

        let (general_pool, transfer_pool) = match create_command_pools(&device, &queue_families) {
            Ok(pools) => pools,
            Err(error) => {
                device.destroy_device(None);
                instance.destroy_surface_khr(surface, None);
                instance.destroy_instance(None);
                return Err(error);
            }
        };

        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        Ok(Arc::new(Self {
            graphics_queue: device.get_device_queue(queue_families.graphics, 0),
            present_queue: device.get_device_queue(queue_families.present, 0),
            transfer_queue: device.get_device_queue(queue_families.transfer, 0),
            sharing: BufferSharing::new(&queue_families),
            entry,
            instance,
            surface,
            physical_device,
            memory_properties,
            device,
            queue_families,
            general_pool,
            transfer_pool,
        }))
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe {
            if let Err(error) = self.device.device_wait_idle() {
                log::warn!("Failed to wait for device idle during teardown: {error}");
            }
            self.device.destroy_command_pool(self.transfer_pool, None);
            self.device.destroy_command_pool(self.general_pool, None);
            self.device.destroy_device(None);
            self.instance.destroy_surface_khr(self.surface, None);
            self.instance.destroy_instance(None);
        }
        log::debug!("Vulkan context destroyed.");
    }
}

unsafe fn open_device(
    instance: &Instance,
    surface: vk::SurfaceKHR,
    validation: bool,
) -> Result<(vk::PhysicalDevice, QueueFamilyIndices, Device)> {
    let (physical_device, queue_families) = device::pick_physical_device(instance, surface)?;
    let device =
        device::create_logical_device(instance, physical_device, &queue_families, validation)?;
    Ok((physical_device, queue_families, device))
}

unsafe fn create_command_pools(
    device: &Device,
    queue_families: &QueueFamilyIndices,
) -> Result<(vk::CommandPool, vk::CommandPool)> {
    let info = vk::CommandPoolCreateInfo::builder()
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        .queue_family_index(queue_families.graphics);
    let general_pool = device.create_command_pool(&info, None)?;

    let info = vk::CommandPoolCreateInfo::builder()
        .flags(vk::CommandPoolCreateFlags::TRANSIENT)
        .queue_family_index(queue_families.transfer);
    let transfer_pool = device
        .create_command_pool(&info, None)
        .inspect_err(|_| device.destroy_command_pool(general_pool, None))?;

    Ok((general_pool, transfer_pool))
}
