// Buffer utilities for vertex, index, and uniform buffers
//
// Every buffer gets its own `VkDeviceMemory` allocation. Geometry lives in
// device-local memory and is filled through a staging buffer; uniform buffers
// stay host-visible and are rewritten in place each frame.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;

use super::command::submit_one_shot;
use super::VulkanDevice;
use crate::error::InitError;

/// A buffer and the memory bound to it
#[derive(Debug, Clone, Copy)]
pub struct Buffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl Buffer {
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// First memory type allowed by `type_filter` that has all of `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32, InitError> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            let has_type = (type_filter & (1 << i)) != 0;
            let has_properties = memory_properties.memory_types[i as usize]
                .property_flags
                .contains(properties);
            has_type && has_properties
        })
        .ok_or(InitError::NoMemoryType)
}

/// Allocate and bind memory for `requirements`
pub fn allocate_memory(
    device: &VulkanDevice,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(
        &device.memory_properties,
        requirements.memory_type_bits,
        properties,
    )?;

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    unsafe { device.device.allocate_memory(&alloc_info, None) }.context("Failed to allocate memory")
}

/// Helper to create a GPU buffer with specified usage and memory properties
pub fn create_buffer(
    device: &VulkanDevice,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_properties: vk::MemoryPropertyFlags,
) -> Result<Buffer> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
        .context("Failed to create buffer")?;

    let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };
    let memory = allocate_memory(device, requirements, memory_properties)?;

    unsafe { device.device.bind_buffer_memory(buffer, memory, 0) }
        .context("Failed to bind buffer memory")?;

    Ok(Buffer {
        buffer,
        memory,
        size,
    })
}

/// Map, copy, unmap. The memory must be host-visible and coherent.
pub fn write_buffer<T: Pod>(device: &ash::Device, buffer: &Buffer, data: &[T]) -> Result<()> {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    anyhow::ensure!(
        bytes.len() as vk::DeviceSize <= buffer.size,
        "Write of {} bytes overflows {}-byte buffer",
        bytes.len(),
        buffer.size
    );

    unsafe {
        let ptr = device
            .map_memory(
                buffer.memory,
                0,
                bytes.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )
            .context("Failed to map buffer memory")? as *mut u8;

        ptr.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
        device.unmap_memory(buffer.memory);
    }

    Ok(())
}

/// Host-visible staging buffer already filled with `data`
pub fn create_staging_buffer<T: Pod>(device: &VulkanDevice, data: &[T]) -> Result<Buffer> {
    let size = std::mem::size_of_val(data) as vk::DeviceSize;
    let staging = create_buffer(
        device,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;
    write_buffer(&device.device, &staging, data)?;
    Ok(staging)
}

/// Upload `data` into a new device-local buffer through a staging copy
pub fn create_device_local_buffer<T: Pod>(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    usage: vk::BufferUsageFlags,
    data: &[T],
) -> Result<Buffer> {
    let staging = create_staging_buffer(device, data)?;

    let buffer = create_buffer(
        device,
        staging.size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    let copied = submit_one_shot(device, pool, |dev, cmd| {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: staging.size,
        };
        unsafe { dev.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]) };
    });

    staging.destroy(&device.device);
    copied?;

    Ok(buffer)
}

/// Host-visible buffer sized for one `T`, rewritten every frame
pub fn create_uniform_buffer<T: Pod>(device: &VulkanDevice) -> Result<Buffer> {
    create_buffer(
        device,
        std::mem::size_of::<T>() as vk::DeviceSize,
        vk::BufferUsageFlags::UNIFORM_BUFFER,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        props
    }

    #[test]
    fn picks_first_type_with_all_properties() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);

        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&props, 0b111, wanted).unwrap(), 2);
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn respects_the_type_filter() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        assert_eq!(
            find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            1
        );
    }

    #[test]
    fn no_matching_type_is_fatal() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type(&props, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap_err();
        assert!(matches!(err, InitError::NoMemoryType));
    }
}
