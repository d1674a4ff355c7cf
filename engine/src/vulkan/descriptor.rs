use std::mem::size_of;
use std::rc::Rc;
use std::slice;

use anyhow::Result;
use nalgebra::{Matrix4, Point3, Vector3};
use vulkanalia::vk::{self, DeviceV1_0, HasBuilder};

use super::buffer::VulkanBuffer;
use super::context::VulkanContext;
use super::texture::{VulkanSampler, VulkanTexture};

pub type Mat4 = Matrix4<f32>;

/// Transform block read by the vertex shader at binding 0.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    /// The model spins 90 degrees per second about Z, seen from (2, 2, 2).
    pub fn at_time(seconds: f32, extent: vk::Extent2D) -> Self {
        let model = Mat4::from_axis_angle(&Vector3::z_axis(), seconds * 90f32.to_radians());

        let view = Mat4::look_at_rh(
            &Point3::new(2.0, 2.0, 2.0),
            &Point3::origin(),
            &Vector3::z_axis(),
        );

        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let mut proj = Mat4::new_perspective(aspect, 45f32.to_radians(), 0.1, 10.0);
        proj[(1, 1)] *= -1.0;

        // Clip depth from [-1, 1] to [0, 1].
        #[rustfmt::skip]
        let depth_correction = Mat4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 0.5, 0.5,
            0.0, 0.0, 0.0, 1.0,
        );

        Self {
            model,
            view,
            proj: depth_correction * proj,
        }
    }
}

#[derive(Debug)]
pub struct VulkanDescriptorSetLayout {
    ctx: Rc<VulkanContext>,
    pub handle: vk::DescriptorSetLayout,
}

impl VulkanDescriptorSetLayout {
    pub unsafe fn create(ctx: &Rc<VulkanContext>) -> Result<Self> {
        let ubo_binding = vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX);

        let sampler_binding = vk::DescriptorSetLayoutBinding::builder()
            .binding(1)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT);

        let bindings = &[ubo_binding, sampler_binding];
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);

        let handle = ctx.device().create_descriptor_set_layout(&info, None)?;

        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }
}

impl Drop for VulkanDescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.ctx
                .device()
                .destroy_descriptor_set_layout(self.handle, None);
        }
    }
}

/// One uniform buffer and one descriptor set per frame slot.
#[derive(Debug)]
pub struct VulkanDescriptors {
    ctx: Rc<VulkanContext>,
    pool: vk::DescriptorPool,
    pub sets: Vec<vk::DescriptorSet>,
    uniforms: Vec<VulkanBuffer>,
}

impl VulkanDescriptors {
    pub unsafe fn create(
        ctx: &Rc<VulkanContext>,
        layout: &VulkanDescriptorSetLayout,
        texture: &VulkanTexture,
        sampler: &VulkanSampler,
        count: usize,
    ) -> Result<Self> {
        let device = ctx.device();

        let uniforms = (0..count)
            .map(|_| {
                VulkanBuffer::create(
                    ctx,
                    size_of::<UniformBufferObject>() as vk::DeviceSize,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::HOST_VISIBLE,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let ubo_size = vk::DescriptorPoolSize::builder()
            .type_(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(count as u32);

        let sampler_size = vk::DescriptorPoolSize::builder()
            .type_(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(count as u32);

        let pool_sizes = &[ubo_size, sampler_size];
        let info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(pool_sizes)
            .max_sets(count as u32);

        let pool = device.create_descriptor_pool(&info, None)?;

        let mut descriptors = Self {
            ctx: ctx.clone(),
            pool,
            sets: Vec::new(),
            uniforms,
        };

        let layouts = vec![layout.handle; count];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        descriptors.sets = device.allocate_descriptor_sets(&info)?;

        for (set, uniform) in descriptors.sets.iter().zip(&descriptors.uniforms) {
            let info = vk::DescriptorBufferInfo::builder()
                .buffer(uniform.handle)
                .offset(0)
                .range(size_of::<UniformBufferObject>() as vk::DeviceSize);

            let buffer_info = &[info];
            let ubo_write = vk::WriteDescriptorSet::builder()
                .dst_set(*set)
                .dst_binding(0)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(buffer_info);

            let info = vk::DescriptorImageInfo::builder()
                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .image_view(texture.image.view)
                .sampler(sampler.handle);

            let image_info = &[info];
            let sampler_write = vk::WriteDescriptorSet::builder()
                .dst_set(*set)
                .dst_binding(1)
                .dst_array_element(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(image_info);

            device.update_descriptor_sets(
                &[ubo_write, sampler_write],
                &[] as &[vk::CopyDescriptorSet],
            );
        }

        Ok(descriptors)
    }

    /// The slot's fence must have been waited on first.
    pub unsafe fn update(&self, slot: usize, ubo: &UniformBufferObject) -> Result<()> {
        self.uniforms[slot].write(slice::from_ref(ubo))
    }
}

impl Drop for VulkanDescriptors {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().destroy_descriptor_pool(self.pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::Vector4;

    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    #[test]
    fn block_is_three_packed_matrices() {
        assert_eq!(size_of::<UniformBufferObject>(), 3 * 64);
    }

    #[test]
    fn model_rotates_quarter_turn_per_second() {
        let ubo = UniformBufferObject::at_time(0.0, EXTENT);
        assert_relative_eq!(ubo.model, Mat4::identity(), epsilon = 1e-6);

        let ubo = UniformBufferObject::at_time(1.0, EXTENT);
        let rotated = ubo.model * Vector4::new(1.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(rotated, Vector4::new(0.0, 1.0, 0.0, 1.0), epsilon = 1e-6);
    }

    #[test]
    fn view_places_eye_at_origin() {
        let ubo = UniformBufferObject::at_time(0.0, EXTENT);

        let eye = ubo.view * Vector4::new(2.0, 2.0, 2.0, 1.0);
        assert_relative_eq!(eye, Vector4::new(0.0, 0.0, 0.0, 1.0), epsilon = 1e-5);

        // The target sits straight ahead, down -Z in view space.
        let target = ubo.view * Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(target.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(target.y, 0.0, epsilon = 1e-5);
        assert_relative_eq!(target.z, -(12f32.sqrt()), epsilon = 1e-5);
    }

    #[test]
    fn projection_maps_depth_to_unit_range() {
        let ubo = UniformBufferObject::at_time(0.0, EXTENT);

        let near = ubo.proj * Vector4::new(0.0, 0.0, -0.1, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);

        let far = ubo.proj * Vector4::new(0.0, 0.0, -10.0, 1.0);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn projection_flips_y() {
        let ubo = UniformBufferObject::at_time(0.0, EXTENT);

        let up = ubo.proj * Vector4::new(0.0, 1.0, -1.0, 1.0);
        assert!(up.y < 0.0);
    }

    #[test]
    fn aspect_follows_extent() {
        let wide = UniformBufferObject::at_time(0.0, EXTENT);
        let square = UniformBufferObject::at_time(
            0.0,
            vk::Extent2D {
                width: 600,
                height: 600,
            },
        );

        assert_relative_eq!(
            wide.proj[(0, 0)] * 800.0 / 600.0,
            square.proj[(0, 0)],
            epsilon = 1e-5
        );
    }
}
