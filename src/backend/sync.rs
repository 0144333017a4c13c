// Synchronization primitives
//
// One frame in flight, so a single pair of semaphores orders
// acquire -> render -> present on the GPU. The host side waits on the present
// queue instead of a fence.

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;

pub struct FrameSync {
    /// Signalled by acquire, waited on by the submit
    pub image_available: vk::Semaphore,
    /// Signalled by the submit, waited on by present
    pub render_finished: vk::Semaphore,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();

        unsafe {
            let image_available = device
                .device
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create image-available semaphore")?;
            let render_finished = match device.device.create_semaphore(&semaphore_info, None) {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    device.device.destroy_semaphore(image_available, None);
                    return Err(e).context("Failed to create render-finished semaphore");
                }
            };

            Ok(Self {
                image_available,
                render_finished,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
        }
    }
}
