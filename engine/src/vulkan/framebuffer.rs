use std::rc::Rc;

use anyhow::Result;
use vulkanalia::vk::{self, DeviceV1_0, HasBuilder};

use super::context::VulkanContext;
use super::image::{ImageDescription, VulkanImage};
use super::render_pass::VulkanRenderPass;
use super::swapchain::VulkanSwapchain;

/// Per-swapchain attachments: the shared multisampled color and depth
/// targets plus one framebuffer per swapchain image.
#[derive(Debug)]
pub struct RenderTargets {
    ctx: Rc<VulkanContext>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub depth: VulkanImage,
    pub color: VulkanImage,
}

impl RenderTargets {
    pub unsafe fn create(
        ctx: &Rc<VulkanContext>,
        swapchain: &VulkanSwapchain,
        render_pass: &VulkanRenderPass,
        depth_format: vk::Format,
    ) -> Result<Self> {
        let samples = ctx.physical.msaa_samples;

        let color = VulkanImage::create(
            ctx,
            &ImageDescription {
                extent: swapchain.extent,
                format: swapchain.format,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
                memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                mip_levels: 1,
                samples,
                aspects: vk::ImageAspectFlags::COLOR,
            },
        )?;

        let depth = VulkanImage::create(
            ctx,
            &ImageDescription {
                extent: swapchain.extent,
                format: depth_format,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                mip_levels: 1,
                samples,
                aspects: vk::ImageAspectFlags::DEPTH,
            },
        )?;

        let mut targets = Self {
            ctx: ctx.clone(),
            framebuffers: Vec::with_capacity(swapchain.image_views.len()),
            depth,
            color,
        };

        for view in &swapchain.image_views {
            let attachments = &[targets.color.view, targets.depth.view, *view];
            let create_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass.handle)
                .attachments(attachments)
                .width(swapchain.extent.width)
                .height(swapchain.extent.height)
                .layers(1);

            let framebuffer = ctx.device().create_framebuffer(&create_info, None)?;
            targets.framebuffers.push(framebuffer);
        }

        Ok(targets)
    }
}

impl Drop for RenderTargets {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe {
            self.framebuffers
                .iter()
                .for_each(|f| device.destroy_framebuffer(*f, None));
        }
    }
}
