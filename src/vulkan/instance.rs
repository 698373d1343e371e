use std::collections::HashSet;
use std::ffi::CString;

use anyhow::Result;
use raw_window_handle::HasWindowHandle;
use vulkanalia::prelude::v1_3::*;
use vulkanalia::window as vk_window;

use crate::config::{AppInfo, ENGINE_NAME};

pub const VALIDATION_LAYER: vk::ExtensionName =
    vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation");

/// Creates the instance. Returns it together with whether validation ended
/// up enabled, since device creation must enable the same layers.
pub unsafe fn create_instance(
    window: &dyn HasWindowHandle,
    entry: &Entry,
    app_info: &AppInfo,
    validation: bool,
) -> Result<(Instance, bool)> {
    let loader_version = entry
        .enumerate_instance_version()
        .unwrap_or(vk::make_version(1, 0, 0));
    log::info!(
        "Vulkan loader version: {}.{}.{}",
        vk::version_major(loader_version),
        vk::version_minor(loader_version),
        vk::version_patch(loader_version)
    );

    let application_name = CString::new(app_info.name.as_str())?;
    let application_info = vk::ApplicationInfo::builder()
        .application_name(application_name.as_bytes_with_nul())
        .application_version(app_info.vk_version())
        .engine_name(ENGINE_NAME)
        .engine_version(vk::make_version(0, 1, 0))
        .api_version(vk::make_version(1, 0, 0));

    let mut extensions = vk_window::get_required_instance_extensions(window)
        .iter()
        .map(|e| e.as_ptr())
        .collect::<Vec<_>>();

    // MoltenVK is only enumerated when portability devices are requested.
    let flags = if cfg!(target_os = "macos") {
        extensions.push(vk::KHR_PORTABILITY_ENUMERATION_EXTENSION.name.as_ptr());
        extensions.push(vk::KHR_GET_PHYSICAL_DEVICE_PROPERTIES2_EXTENSION.name.as_ptr());
        vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
    } else {
        vk::InstanceCreateFlags::empty()
    };

    let validation = validation && validation_layer_available(entry)?;
    let layers = if validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let info = vk::InstanceCreateInfo::builder()
        .application_info(&application_info)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions)
        .flags(flags);

    let instance = entry.create_instance(&info, None)?;

    Ok((instance, validation))
}

unsafe fn validation_layer_available(entry: &Entry) -> Result<bool> {
    let available_layers = entry
        .enumerate_instance_layer_properties()?
        .iter()
        .map(|l| l.layer_name)
        .collect::<HashSet<_>>();

    if available_layers.contains(&VALIDATION_LAYER) {
        log::info!("Validation layer enabled.");
        Ok(true)
    } else {
        log::warn!("Validation layer requested but not supported, continuing without it.");
        Ok(false)
    }
}
