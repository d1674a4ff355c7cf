use std::rc::Rc;

use anyhow::Result;
use log::*;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder, InstanceV1_0};
use vulkanalia::{Device, Instance};
use winit::window::Window;

use super::command_buffer::VulkanCommandBuffer;
use super::device::{self, PhysicalDeviceInfo, VulkanDevice};
use super::instance::VulkanInstance;
use super::render_pass;
use super::swapchain::SwapchainSupport;

/// The device context every other GPU object is created from.
///
/// Shared as `Rc<VulkanContext>`; each wrapper keeps a clone, so the device
/// outlives everything allocated on it. Field order is the teardown order
/// after the command pool: logical device, then instance.
#[derive(Debug)]
pub struct VulkanContext {
    pub command_pool: vk::CommandPool,
    pub physical: PhysicalDeviceInfo,
    pub device: VulkanDevice,
    pub instance: VulkanInstance,
}

impl VulkanContext {
    pub unsafe fn new(window: &Window, title: &str, validation: bool) -> Result<Rc<Self>> {
        let instance = VulkanInstance::new(window, title, validation)?;
        let physical = device::pick_physical_device(&instance)?;
        let device = VulkanDevice::new(&instance, &physical)?;
        let command_pool =
            VulkanCommandBuffer::create_command_pool(&device, physical.indices.graphics)?;

        Ok(Rc::new(Self {
            command_pool,
            physical,
            device,
            instance,
        }))
    }

    pub fn device(&self) -> &Device {
        &self.device.vk_device
    }

    pub fn instance(&self) -> &Instance {
        &self.instance.vk_instance
    }

    pub unsafe fn swapchain_support(&self) -> Result<SwapchainSupport> {
        SwapchainSupport::get(&self.instance, self.physical.handle)
    }

    pub unsafe fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.instance()
            .get_physical_device_memory_properties(self.physical.handle)
    }

    pub unsafe fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        self.instance()
            .get_physical_device_format_properties(self.physical.handle, format)
    }

    pub unsafe fn depth_format(&self) -> vk::Format {
        render_pass::depth_format(|f| self.format_properties(f))
    }

    /// Records `commands` into a throwaway command buffer, submits it to the
    /// graphics queue and blocks until the queue is idle.
    pub unsafe fn submit_once(&self, commands: impl FnOnce(&Device, vk::CommandBuffer)) -> Result<()> {
        let device = self.device();

        let info = vk::CommandBufferAllocateInfo::builder()
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_pool(self.command_pool)
            .command_buffer_count(1);

        let command_buffer = device.allocate_command_buffers(&info)?[0];

        let info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        let result = (|| -> Result<()> {
            device.begin_command_buffer(command_buffer, &info)?;
            commands(device, command_buffer);
            device.end_command_buffer(command_buffer)?;

            let command_buffers = &[command_buffer];
            let info = vk::SubmitInfo::builder().command_buffers(command_buffers);

            device.queue_submit(self.device.graphics_queue, &[info], vk::Fence::null())?;
            device.queue_wait_idle(self.device.graphics_queue)?;
            Ok(())
        })();

        device.free_command_buffers(self.command_pool, &[command_buffer]);
        result
    }

    pub unsafe fn wait_idle(&self) -> Result<()> {
        self.device().device_wait_idle()?;
        Ok(())
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            self.device()
                .destroy_command_pool(self.command_pool, None);
        }
        debug!("Destroyed command pool.");
    }
}
