use anyhow::Result;
use vulkanalia::vk::{self, DeviceV1_0, HasBuilder};
use vulkanalia::Device;

use super::{device::VulkanDevice, model::VulkanModel, pipeline::VulkanPipeline};

/// Everything one frame's draw recording reads.
pub struct DrawInfo<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub pipeline: &'a VulkanPipeline,
    pub descriptor_set: vk::DescriptorSet,
    pub models: &'a [VulkanModel],
    pub clear_color: [f32; 4],
}

#[derive(Debug)]
pub struct VulkanCommandBuffer;

impl VulkanCommandBuffer {
    pub unsafe fn create_command_pool(
        device: &VulkanDevice,
        queue_family: u32,
    ) -> Result<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);

        Ok(device.vk_device.create_command_pool(&info, None)?)
    }

    /// One primary command buffer per frame slot. Freed with the pool.
    pub unsafe fn create_command_buffers(
        device: &Device,
        command_pool: vk::CommandPool,
        count: usize,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);

        Ok(device.allocate_command_buffers(&allocate_info)?)
    }

    pub unsafe fn record(
        device: &Device,
        command_buffer: vk::CommandBuffer,
        draw: &DrawInfo,
    ) -> Result<()> {
        let info = vk::CommandBufferBeginInfo::builder();

        device.begin_command_buffer(command_buffer, &info)?;

        let render_area = vk::Rect2D::builder()
            .offset(vk::Offset2D::default())
            .extent(draw.extent);

        let color_clear_value = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: draw.clear_color,
            },
        };

        let depth_clear_value = vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        };

        // Matches the attachment order: color, depth, resolve.
        let clear_values = &[color_clear_value, depth_clear_value];
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(draw.render_pass)
            .framebuffer(draw.framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);

        device.cmd_begin_render_pass(command_buffer, &info, vk::SubpassContents::INLINE);

        device.cmd_bind_pipeline(
            command_buffer,
            vk::PipelineBindPoint::GRAPHICS,
            draw.pipeline.handle,
        );

        device.cmd_bind_descriptor_sets(
            command_buffer,
            vk::PipelineBindPoint::GRAPHICS,
            draw.pipeline.layout,
            0,
            &[draw.descriptor_set],
            &[],
        );

        for model in draw.models {
            device.cmd_bind_vertex_buffers(command_buffer, 0, &[model.vertex_buffer.handle], &[0]);
            device.cmd_bind_index_buffer(
                command_buffer,
                model.index_buffer.handle,
                0,
                vk::IndexType::UINT32,
            );
            device.cmd_draw_indexed(command_buffer, model.index_count, 1, 0, 0, 0);
        }

        device.cmd_end_render_pass(command_buffer);

        device.end_command_buffer(command_buffer)?;

        Ok(())
    }
}
