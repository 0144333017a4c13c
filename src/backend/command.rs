// Command pool and one-shot command buffers
//
// Frame command buffers are pre-recorded and resubmitted every frame; uploads
// use a throwaway buffer that is submitted and waited on immediately.

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;

pub fn create_command_pool(device: &VulkanDevice) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(device.queue_families.graphics);

    unsafe { device.device.create_command_pool(&pool_info, None) }
        .context("Failed to create command pool")
}

pub fn allocate_command_buffers(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    count: u32,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);

    unsafe { device.device.allocate_command_buffers(&alloc_info) }
        .context("Failed to allocate command buffers")
}

/// Record into a fresh command buffer, submit it on the graphics queue and
/// block until it has finished.
pub fn submit_one_shot<F>(device: &VulkanDevice, pool: vk::CommandPool, record: F) -> Result<()>
where
    F: FnOnce(&ash::Device, vk::CommandBuffer),
{
    let cmd = allocate_command_buffers(device, pool, 1)?[0];

    let result = (|| -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device
                .device
                .begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin one-shot command buffer")?;

            record(&device.device, cmd);

            device
                .device
                .end_command_buffer(cmd)
                .context("Failed to end one-shot command buffer")?;

            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            device
                .device
                .queue_submit(device.graphics_queue, &[submit_info.build()], vk::Fence::null())
                .context("Failed to submit one-shot command buffer")?;
            device
                .device
                .queue_wait_idle(device.graphics_queue)
                .context("Failed to wait for one-shot command buffer")?;
        }
        Ok(())
    })();

    unsafe { device.device.free_command_buffers(pool, &[cmd]) };
    result
}
