use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use vulkanalia::bytecode::Bytecode;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder};
use vulkanalia::Device;

use super::constants;
use super::context::VulkanContext;
use super::render_pass::VulkanRenderPass;
use super::vertex::Vertex;
use crate::config::ShaderConfig;
use crate::error::RendererError;

pub fn read_shader(path: &Path) -> Result<Vec<u8>, RendererError> {
    fs::read(path).map_err(|source| RendererError::ShaderRead {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug)]
pub struct VulkanPipeline {
    ctx: Rc<VulkanContext>,
    pub layout: vk::PipelineLayout,
    pub handle: vk::Pipeline,
}

impl VulkanPipeline {
    /// Viewport and scissor are baked in, so the pipeline is rebuilt with
    /// every swapchain.
    pub unsafe fn create(
        ctx: &Rc<VulkanContext>,
        shaders: &ShaderConfig,
        render_pass: &VulkanRenderPass,
        set_layout: vk::DescriptorSetLayout,
        extent: vk::Extent2D,
    ) -> Result<VulkanPipeline> {
        let device = ctx.device();

        let vert = read_shader(&shaders.vertex)?;
        let frag = read_shader(&shaders.fragment)?;

        let vertex_shader_module = VulkanPipeline::create_shader_module(device, &vert)?;
        let fragment_shader_module = match VulkanPipeline::create_shader_module(device, &frag) {
            Ok(module) => module,
            Err(e) => {
                device.destroy_shader_module(vertex_shader_module, None);
                return Err(e);
            }
        };

        let result = Self::build(
            ctx,
            vertex_shader_module,
            fragment_shader_module,
            render_pass,
            set_layout,
            extent,
        );

        // destroy shader modules
        device.destroy_shader_module(vertex_shader_module, None);
        device.destroy_shader_module(fragment_shader_module, None);

        result
    }

    unsafe fn build(
        ctx: &Rc<VulkanContext>,
        vertex_shader_module: vk::ShaderModule,
        fragment_shader_module: vk::ShaderModule,
        render_pass: &VulkanRenderPass,
        set_layout: vk::DescriptorSetLayout,
        extent: vk::Extent2D,
    ) -> Result<VulkanPipeline> {
        let device = ctx.device();
        let physical = &ctx.physical;

        let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_shader_module)
            .name(b"main\0");

        let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment_shader_module)
            .name(b"main\0");

        let binding_descriptions = &[Vertex::binding_description()];
        let attribute_descriptions = Vertex::attribute_descriptions();
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport = vk::Viewport::builder()
            .x(0.0)
            .y(0.0)
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0);

        let scissor = vk::Rect2D::builder()
            .offset(vk::Offset2D { x: 0, y: 0 })
            .extent(extent);

        let viewports = &[viewport];
        let scissors = &[scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(viewports)
            .scissors(scissors);

        // rasterizer
        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        // multisampling
        let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(physical.sample_shading)
            .min_sample_shading(constants::MIN_SAMPLE_SHADING)
            .rasterization_samples(physical.msaa_samples);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        // color blending
        let attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::all())
            .blend_enable(false);

        let attachments = &[attachment];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(attachments)
            .blend_constants([0.0, 0.0, 0.0, 0.0]);

        // layout
        let set_layouts = &[set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts);
        let layout = device.create_pipeline_layout(&layout_info, None)?;

        let stages = &[vert_stage, frag_stage];
        let info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .layout(layout)
            .render_pass(render_pass.handle)
            .subpass(0);

        let handle = match device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None) {
            Ok((pipelines, _)) => pipelines[0],
            Err(e) => {
                device.destroy_pipeline_layout(layout, None);
                return Err(e.into());
            }
        };

        Ok(VulkanPipeline {
            ctx: ctx.clone(),
            layout,
            handle,
        })
    }

    unsafe fn create_shader_module(device: &Device, bytecode: &[u8]) -> Result<vk::ShaderModule> {
        let bytecode =
            Bytecode::new(bytecode).map_err(|e| anyhow!("Invalid shader bytecode: {:?}", e))?;
        let info = vk::ShaderModuleCreateInfo::builder()
            .code_size(bytecode.code_size())
            .code(bytecode.code());

        Ok(device.create_shader_module(&info, None)?)
    }
}

impl Drop for VulkanPipeline {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe {
            device.destroy_pipeline(self.handle, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_shader_names_the_path() {
        let err = read_shader(Path::new("shaders/missing.spv")).unwrap_err();

        assert!(matches!(err, RendererError::ShaderRead { .. }));
        assert!(err.to_string().contains("shaders/missing.spv"));
    }
}
