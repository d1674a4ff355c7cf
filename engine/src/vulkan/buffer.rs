use std::mem::size_of_val;
use std::ptr::copy_nonoverlapping as memcpy;
use std::rc::Rc;

use anyhow::Result;
use vulkanalia::prelude::v1_0::*;

use super::{context::VulkanContext, image::VulkanImage};
use crate::error::RendererError;

/// A GPU object that needs device memory bound to it.
#[derive(Copy, Clone, Debug)]
pub enum ResourceHandle {
    Buffer(vk::Buffer),
    Image(vk::Image),
}

impl ResourceHandle {
    unsafe fn memory_requirements(&self, device: &Device) -> vk::MemoryRequirements {
        match *self {
            ResourceHandle::Buffer(buffer) => device.get_buffer_memory_requirements(buffer),
            ResourceHandle::Image(image) => device.get_image_memory_requirements(image),
        }
    }

    unsafe fn bind(&self, device: &Device, memory: vk::DeviceMemory) -> VkResult<()> {
        match *self {
            ResourceHandle::Buffer(buffer) => device.bind_buffer_memory(buffer, memory, 0),
            ResourceHandle::Image(image) => device.bind_image_memory(image, memory, 0),
        }
    }
}

/// First memory type allowed by `filter` that has every flag in `flags`.
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    filter: u32,
    flags: vk::MemoryPropertyFlags,
) -> Result<u32, RendererError> {
    (0..memory.memory_type_count)
        .find(|i| {
            let suitable = (filter & (1 << i)) != 0;
            let memory_type = memory.memory_types[*i as usize];
            suitable && memory_type.property_flags.contains(flags)
        })
        .ok_or(RendererError::NoMemoryType { filter, flags })
}

/// Allocates memory matching the resource's requirements and binds it at
/// offset zero. The allocation is freed again if binding fails.
pub unsafe fn allocate_and_bind(
    ctx: &VulkanContext,
    resource: ResourceHandle,
    flags: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let device = ctx.device();
    let requirements = resource.memory_requirements(device);

    let memory_type_index =
        find_memory_type(&ctx.memory_properties(), requirements.memory_type_bits, flags)?;

    let info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    let memory = device.allocate_memory(&info, None)?;

    if let Err(e) = resource.bind(device, memory) {
        device.free_memory(memory, None);
        return Err(e.into());
    }

    Ok(memory)
}

#[derive(Debug)]
pub struct VulkanBuffer {
    ctx: Rc<VulkanContext>,
    pub handle: vk::Buffer,
    memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl VulkanBuffer {
    pub unsafe fn create(
        ctx: &Rc<VulkanContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let device = ctx.device();

        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = device.create_buffer(&info, None)?;

        let memory = match allocate_and_bind(ctx, ResourceHandle::Buffer(handle), properties) {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_buffer(handle, None);
                return Err(e);
            }
        };

        Ok(Self {
            ctx: ctx.clone(),
            handle,
            memory,
            size,
        })
    }

    /// Creates a device-local buffer holding `data`, uploaded through a
    /// temporary host-visible staging buffer.
    pub unsafe fn with_data<T: Copy>(
        ctx: &Rc<VulkanContext>,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        let size = size_of_val(data) as vk::DeviceSize;

        let staging = Self::staging(ctx, size)?;
        staging.write(data)?;

        let buffer = Self::create(
            ctx,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        staging.copy_to(&buffer)?;

        Ok(buffer)
    }

    pub unsafe fn staging(ctx: &Rc<VulkanContext>, size: vk::DeviceSize) -> Result<Self> {
        Self::create(
            ctx,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::HOST_VISIBLE,
        )
    }

    /// Copies `data` to the start of a host-visible buffer.
    pub unsafe fn write<T: Copy>(&self, data: &[T]) -> Result<()> {
        let size = size_of_val(data) as vk::DeviceSize;
        debug_assert!(size <= self.size);

        let device = self.ctx.device();
        let memory = device.map_memory(self.memory, 0, size, vk::MemoryMapFlags::empty())?;
        memcpy(data.as_ptr(), memory.cast(), data.len());
        device.unmap_memory(self.memory);

        Ok(())
    }

    pub unsafe fn copy_to(&self, destination: &VulkanBuffer) -> Result<()> {
        let regions = vk::BufferCopy::builder().size(self.size);

        self.ctx.submit_once(|device, command_buffer| {
            device.cmd_copy_buffer(command_buffer, self.handle, destination.handle, &[regions]);
        })
    }

    /// Copies tightly packed pixels into mip level 0. The image must be in
    /// `TRANSFER_DST_OPTIMAL`.
    pub unsafe fn copy_to_image(&self, image: &VulkanImage) -> Result<()> {
        let subresource = vk::ImageSubresourceLayers::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1);

        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(subresource)
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: image.extent.width,
                height: image.extent.height,
                depth: 1,
            });

        self.ctx.submit_once(|device, command_buffer| {
            device.cmd_copy_buffer_to_image(
                command_buffer,
                self.handle,
                image.handle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        })
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe {
            device.destroy_buffer(self.handle, None);
            device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties::default();
        properties.memory_type_count = types.len() as u32;
        for (i, flags) in types.iter().enumerate() {
            properties.memory_types[i].property_flags = *flags;
        }
        properties
    }

    #[test]
    fn finds_first_type_with_all_flags() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            host,
            host | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        assert_eq!(find_memory_type(&properties, 0b1111, host).unwrap(), 2);
        assert_eq!(
            find_memory_type(&properties, 0b1111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn respects_type_filter() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let properties = memory_properties(&[host, host, host]);

        assert_eq!(find_memory_type(&properties, 0b100, host).unwrap(), 2);
    }

    #[test]
    fn reports_missing_memory_type() {
        let properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);

        let err = find_memory_type(&properties, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE)
            .unwrap_err();
        assert!(matches!(err, RendererError::NoMemoryType { filter: 0b1, .. }));

        // Types past memory_type_count are ignored even if the filter allows them.
        assert!(find_memory_type(&properties, !0, vk::MemoryPropertyFlags::HOST_VISIBLE).is_err());
    }
}
