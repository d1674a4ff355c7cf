use std::rc::Rc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use log::*;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder, KhrSwapchainExtension};
use winit::window::Window;

use command_buffer::{DrawInfo, VulkanCommandBuffer};
use context::VulkanContext;
use descriptor::{UniformBufferObject, VulkanDescriptorSetLayout, VulkanDescriptors};
use framebuffer::RenderTargets;
use model::VulkanModel;
use pipeline::VulkanPipeline;
use render_pass::VulkanRenderPass;
use swapchain::{SwapchainStatus, VulkanSwapchain};
use sync::{FrameSync, FrameTracker};
use texture::{VulkanSampler, VulkanTexture};

use crate::config::RendererConfig;

mod buffer;
mod command_buffer;
mod constants;
mod context;
mod descriptor;
mod device;
mod framebuffer;
mod image;
mod instance;
mod model;
mod pipeline;
mod render_pass;
mod swapchain;
mod sync;
mod texture;
mod vertex;

/// Everything that depends on the swapchain extent or format. Built and
/// torn down as a unit; field order is the teardown order.
#[derive(Debug)]
struct SwapchainGeneration {
    targets: RenderTargets,
    pipeline: VulkanPipeline,
    render_pass: VulkanRenderPass,
    swapchain: VulkanSwapchain,
}

impl SwapchainGeneration {
    unsafe fn create(
        ctx: &Rc<VulkanContext>,
        window: &Window,
        config: &RendererConfig,
        set_layout: &VulkanDescriptorSetLayout,
        depth_format: vk::Format,
        old: Option<&VulkanSwapchain>,
    ) -> Result<Self> {
        let size = window.inner_size();
        let swapchain = VulkanSwapchain::create(ctx, (size.width, size.height), old)?;
        let render_pass = VulkanRenderPass::create(ctx, swapchain.format, depth_format)?;
        let pipeline = VulkanPipeline::create(
            ctx,
            &config.shaders,
            &render_pass,
            set_layout.handle,
            swapchain.extent,
        )?;
        let targets = RenderTargets::create(ctx, &swapchain, &render_pass, depth_format)?;

        Ok(Self {
            targets,
            pipeline,
            render_pass,
            swapchain,
        })
    }

    /// Destroys everything but the swapchain, which is handed back so the
    /// next one can be created from it.
    fn retire(self) -> VulkanSwapchain {
        let Self {
            targets,
            pipeline,
            render_pass,
            swapchain,
        } = self;

        drop(targets);
        drop(pipeline);
        drop(render_pass);
        swapchain
    }
}

/// Owns every GPU object. Fields are dropped top to bottom, and the
/// context, which owns the device, goes last.
#[derive(Debug)]
pub struct VulkanRenderer {
    frames: Vec<FrameSync>,
    command_buffers: Vec<vk::CommandBuffer>,
    generation: Option<SwapchainGeneration>,
    descriptors: VulkanDescriptors,
    models: Vec<VulkanModel>,
    _sampler: VulkanSampler,
    _texture: VulkanTexture,
    set_layout: VulkanDescriptorSetLayout,
    tracker: FrameTracker,
    status: SwapchainStatus,
    minimized: bool,
    depth_format: vk::Format,
    config: RendererConfig,
    start: Instant,
    ctx: Rc<VulkanContext>,
}

impl VulkanRenderer {
    pub unsafe fn new(window: &Window, config: RendererConfig) -> Result<VulkanRenderer> {
        let ctx = VulkanContext::new(window, &config.window.title, config.validation)?;
        let depth_format = ctx.depth_format();
        debug!("Using depth format {:?}.", depth_format);

        let set_layout = VulkanDescriptorSetLayout::create(&ctx)?;
        let generation =
            SwapchainGeneration::create(&ctx, window, &config, &set_layout, depth_format, None)?;

        let shared = config
            .models
            .first()
            .ok_or_else(|| anyhow!("No models configured."))?;

        // Every model is drawn with the same descriptor set.
        for path in config.ignored_textures() {
            warn!(
                "Only `{}` is sampled; ignoring texture `{}`.",
                shared.texture.display(),
                path.display()
            );
        }

        let texture = VulkanTexture::load(&ctx, &shared.texture, shared.mipmaps)?;
        let sampler = VulkanSampler::create(&ctx, texture.image.mip_levels)?;

        let models = config
            .models
            .iter()
            .map(|m| VulkanModel::load(&ctx, m))
            .collect::<Result<Vec<_>>>()?;

        let descriptors = VulkanDescriptors::create(
            &ctx,
            &set_layout,
            &texture,
            &sampler,
            constants::MAX_FRAMES_IN_FLIGHT,
        )?;

        let command_buffers = VulkanCommandBuffer::create_command_buffers(
            ctx.device(),
            ctx.command_pool,
            constants::MAX_FRAMES_IN_FLIGHT,
        )?;

        let frames = (0..constants::MAX_FRAMES_IN_FLIGHT)
            .map(|_| FrameSync::create(&ctx))
            .collect::<Result<Vec<_>>>()?;

        info!("Renderer ready ({} models).", models.len());

        Ok(VulkanRenderer {
            frames,
            command_buffers,
            generation: Some(generation),
            descriptors,
            models,
            _sampler: sampler,
            _texture: texture,
            set_layout,
            tracker: FrameTracker::new(constants::MAX_FRAMES_IN_FLIGHT),
            status: SwapchainStatus::default(),
            minimized: false,
            depth_format,
            config,
            start: Instant::now(),
            ctx,
        })
    }

    /// Marks the swapchain stale; it is rebuilt at the end of the next frame.
    pub fn resized(&mut self) {
        self.status.request();
    }

    pub unsafe fn render(&mut self, window: &Window) -> Result<()> {
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            if !self.minimized {
                debug!("Window minimized; pausing rendering.");
                self.minimized = true;
            }
            return Ok(());
        }

        if self.minimized {
            self.minimized = false;
            self.status.request();
        }

        if self.status.needs_recreation() {
            self.recreate_swapchain(window)?;
        }

        let ctx = self.ctx.clone();
        let device = ctx.device();
        let slot = self.tracker.current();
        let sync = &self.frames[slot];

        device.wait_for_fences(&[sync.in_flight], true, u64::MAX)?;
        self.tracker.fence_signaled();

        let generation = self
            .generation
            .as_ref()
            .ok_or_else(|| anyhow!("Swapchain missing outside recreation."))?;

        let result = device.acquire_next_image_khr(
            generation.swapchain.handle,
            u64::MAX,
            sync.image_available,
            vk::Fence::null(),
        );

        let image_index = match result {
            Ok((image_index, code)) => {
                self.status.observe(Ok(code))?;
                image_index as usize
            }
            Err(vk::ErrorCode::OUT_OF_DATE_KHR) => {
                self.tracker.abandon();
                self.status.request();
                return self.recreate_swapchain(window);
            }
            Err(e) => return Err(anyhow!(e)),
        };

        self.tracker.begin_recording()?;
        device.reset_fences(&[sync.in_flight])?;

        let ubo = UniformBufferObject::at_time(
            self.start.elapsed().as_secs_f32(),
            generation.swapchain.extent,
        );
        self.descriptors.update(slot, &ubo)?;

        let command_buffer = self.command_buffers[slot];
        device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
        VulkanCommandBuffer::record(
            device,
            command_buffer,
            &DrawInfo {
                render_pass: generation.render_pass.handle,
                framebuffer: generation.targets.framebuffers[image_index],
                extent: generation.swapchain.extent,
                pipeline: &generation.pipeline,
                descriptor_set: self.descriptors.sets[slot],
                models: &self.models,
                clear_color: self.config.clear_color,
            },
        )?;

        let wait_semaphores = &[sync.image_available];
        let wait_stages = &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = &[command_buffer];
        let signal_semaphores = &[sync.render_finished];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signal_semaphores);

        device.queue_submit(ctx.device.graphics_queue, &[submit_info], sync.in_flight)?;
        self.tracker.submitted();

        let swapchains = &[generation.swapchain.handle];
        let image_indices = &[image_index as u32];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(signal_semaphores)
            .swapchains(swapchains)
            .image_indices(image_indices);

        let result = device.queue_present_khr(ctx.device.present_queue, &present_info);
        self.tracker.presenting();

        match self.status.observe(result) {
            Ok(_) | Err(vk::ErrorCode::OUT_OF_DATE_KHR) => {}
            Err(e) => return Err(anyhow!(e)),
        }

        self.tracker.advance();

        if self.status.needs_recreation() {
            self.recreate_swapchain(window)?;
        }

        Ok(())
    }

    unsafe fn recreate_swapchain(&mut self, window: &Window) -> Result<()> {
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            self.minimized = true;
            return Ok(());
        }

        if !self.status.begin() {
            return Ok(());
        }

        self.ctx.wait_idle()?;

        let old = self.generation.take().map(SwapchainGeneration::retire);
        let generation = SwapchainGeneration::create(
            &self.ctx,
            window,
            &self.config,
            &self.set_layout,
            self.depth_format,
            old.as_ref(),
        )?;
        drop(old);

        self.generation = Some(generation);
        self.status.finish();

        debug!("Recreated swapchain.");
        Ok(())
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.ctx.wait_idle() {
                error!("Failed to wait for device idle: {}", e);
            }
        }
        debug!("Destroying renderer.");
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use super::*;

    fn assert_debug<T: Debug>() {}

    #[test]
    fn renderer_objects_are_debuggable() {
        assert_debug::<VulkanSwapchain>();
        assert_debug::<SwapchainGeneration>();
        assert_debug::<VulkanRenderer>();
    }
}
