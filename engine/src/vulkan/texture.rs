use std::path::Path;
use std::rc::Rc;

use anyhow::Result;
use log::*;
use vulkanalia::prelude::v1_0::*;

use super::buffer::VulkanBuffer;
use super::constants;
use super::context::VulkanContext;
use super::image::{ImageDescription, VulkanImage};
use crate::error::RendererError;

/// Length of the full mip chain: `floor(log2(max(width, height))) + 1`.
pub fn mip_levels(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Levels allocated for a texture; a single level unless mipmaps are wanted.
pub fn texture_levels(width: u32, height: u32, mipmaps: bool) -> u32 {
    if mipmaps {
        mip_levels(width, height)
    } else {
        1
    }
}

/// One command of the mip generation sequence.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MipStep {
    Barrier {
        level: u32,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        dst_stage: vk::PipelineStageFlags,
    },
    /// Blit level `src_level` (of the given size) into `src_level + 1`.
    Blit {
        src_level: u32,
        src_size: (i32, i32),
        dst_size: (i32, i32),
    },
}

/// Plans the barrier and blit sequence that fills levels `1..levels` from
/// level 0. Every level is expected in `TRANSFER_DST_OPTIMAL` beforehand and
/// ends in `SHADER_READ_ONLY_OPTIMAL`.
pub fn plan_mip_chain(width: u32, height: u32, levels: u32) -> Vec<MipStep> {
    let mut steps = Vec::new();
    let mut mip_width = width as i32;
    let mut mip_height = height as i32;

    for level in 1..levels {
        let src_level = level - 1;

        steps.push(MipStep::Barrier {
            level: src_level,
            old: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::TRANSFER_READ,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        });

        let dst_size = ((mip_width / 2).max(1), (mip_height / 2).max(1));

        steps.push(MipStep::Blit {
            src_level,
            src_size: (mip_width, mip_height),
            dst_size,
        });

        steps.push(MipStep::Barrier {
            level: src_level,
            old: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            new: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            src_access: vk::AccessFlags::TRANSFER_READ,
            dst_access: vk::AccessFlags::SHADER_READ,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        });

        mip_width = dst_size.0;
        mip_height = dst_size.1;
    }

    steps.push(MipStep::Barrier {
        level: levels.saturating_sub(1),
        old: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        new: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        src_access: vk::AccessFlags::TRANSFER_WRITE,
        dst_access: vk::AccessFlags::SHADER_READ,
        dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
    });

    steps
}

unsafe fn record_mip_chain(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    steps: &[MipStep],
) {
    for step in steps {
        match *step {
            MipStep::Barrier {
                level,
                old,
                new,
                src_access,
                dst_access,
                dst_stage,
            } => {
                let subresource = vk::ImageSubresourceRange::builder()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(level)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1);

                let barrier = vk::ImageMemoryBarrier::builder()
                    .image(image)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .subresource_range(subresource)
                    .old_layout(old)
                    .new_layout(new)
                    .src_access_mask(src_access)
                    .dst_access_mask(dst_access);

                device.cmd_pipeline_barrier(
                    command_buffer,
                    vk::PipelineStageFlags::TRANSFER,
                    dst_stage,
                    vk::DependencyFlags::empty(),
                    &[] as &[vk::MemoryBarrier],
                    &[] as &[vk::BufferMemoryBarrier],
                    &[barrier],
                );
            }
            MipStep::Blit {
                src_level,
                src_size,
                dst_size,
            } => {
                let src_subresource = vk::ImageSubresourceLayers::builder()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(src_level)
                    .base_array_layer(0)
                    .layer_count(1);

                let dst_subresource = vk::ImageSubresourceLayers::builder()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(src_level + 1)
                    .base_array_layer(0)
                    .layer_count(1);

                let blit = vk::ImageBlit::builder()
                    .src_offsets([
                        vk::Offset3D { x: 0, y: 0, z: 0 },
                        vk::Offset3D {
                            x: src_size.0,
                            y: src_size.1,
                            z: 1,
                        },
                    ])
                    .src_subresource(src_subresource)
                    .dst_offsets([
                        vk::Offset3D { x: 0, y: 0, z: 0 },
                        vk::Offset3D {
                            x: dst_size.0,
                            y: dst_size.1,
                            z: 1,
                        },
                    ])
                    .dst_subresource(dst_subresource);

                device.cmd_blit_image(
                    command_buffer,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::NEAREST,
                );
            }
        }
    }
}

/// RGBA8 pixels decoded from an image file.
#[derive(Clone, Debug)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn open(path: &Path) -> Result<Self, RendererError> {
        let image = image::open(path).map_err(|e| RendererError::Asset {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(Self::from_rgba(image.to_rgba8()))
    }

    #[cfg(test)]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, image::ImageError> {
        Ok(Self::from_rgba(image::load_from_memory(bytes)?.to_rgba8()))
    }

    fn from_rgba(rgba: image::RgbaImage) -> Self {
        let (width, height) = rgba.dimensions();
        Self {
            width,
            height,
            pixels: rgba.into_raw(),
        }
    }
}

#[derive(Debug)]
pub struct VulkanTexture {
    pub image: VulkanImage,
}

impl VulkanTexture {
    pub unsafe fn load(ctx: &Rc<VulkanContext>, path: &Path, mipmaps: bool) -> Result<Self> {
        let decoded = DecodedImage::open(path)?;
        let texture = Self::upload(ctx, &decoded, mipmaps)?;

        info!(
            "Loaded texture `{}` ({}x{}, {} mip levels).",
            path.display(),
            decoded.width,
            decoded.height,
            texture.image.mip_levels
        );

        Ok(texture)
    }

    pub unsafe fn upload(ctx: &Rc<VulkanContext>, decoded: &DecodedImage, mipmaps: bool) -> Result<Self> {
        let format = constants::TEXTURE_FORMAT;

        let mut mipmaps = mipmaps;
        if mipmaps && !Self::supports_blit(ctx, format) {
            warn!("Texture format {:?} does not support blitting; skipping mipmaps.", format);
            mipmaps = false;
        }

        let levels = texture_levels(decoded.width, decoded.height, mipmaps);

        let staging = VulkanBuffer::staging(ctx, decoded.pixels.len() as vk::DeviceSize)?;
        staging.write(&decoded.pixels)?;

        let image = VulkanImage::create(
            ctx,
            &ImageDescription {
                extent: vk::Extent2D {
                    width: decoded.width,
                    height: decoded.height,
                },
                format,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC,
                memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                mip_levels: levels,
                samples: vk::SampleCountFlags::_1,
                aspects: vk::ImageAspectFlags::COLOR,
            },
        )?;

        image.transition_layout(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        staging.copy_to_image(&image)?;

        if mipmaps {
            let steps = plan_mip_chain(decoded.width, decoded.height, levels);
            ctx.submit_once(|device, command_buffer| {
                record_mip_chain(device, command_buffer, image.handle, &steps);
            })?;
        } else {
            image.transition_layout(
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )?;
        }

        Ok(Self { image })
    }

    unsafe fn supports_blit(ctx: &VulkanContext, format: vk::Format) -> bool {
        ctx.format_properties(format)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::BLIT_SRC | vk::FormatFeatureFlags::BLIT_DST)
    }
}

#[derive(Debug)]
pub struct VulkanSampler {
    ctx: Rc<VulkanContext>,
    pub handle: vk::Sampler,
}

impl VulkanSampler {
    /// `max_lod` should cover the longest mip chain sampled through it.
    pub unsafe fn create(ctx: &Rc<VulkanContext>, max_lod: u32) -> Result<Self> {
        let physical = &ctx.physical;

        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(physical.anisotropy)
            .max_anisotropy(if physical.anisotropy {
                physical.max_anisotropy
            } else {
                1.0
            })
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(max_lod as f32)
            .mip_lod_bias(0.0);

        let handle = ctx.device().create_sampler(&info, None)?;

        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }
}

impl Drop for VulkanSampler {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device().destroy_sampler(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Cursor;

    use super::*;

    /// Replays a plan against per-level layouts, failing on any barrier or
    /// blit that sees a level in the wrong layout.
    fn simulate(steps: &[MipStep], levels: u32) -> Vec<vk::ImageLayout> {
        let mut layouts = vec![vk::ImageLayout::TRANSFER_DST_OPTIMAL; levels as usize];
        for step in steps {
            match *step {
                MipStep::Barrier { level, old, new, .. } => {
                    assert_eq!(layouts[level as usize], old, "barrier on level {level}");
                    layouts[level as usize] = new;
                }
                MipStep::Blit { src_level, .. } => {
                    assert_eq!(layouts[src_level as usize], vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
                    assert_eq!(
                        layouts[src_level as usize + 1],
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL
                    );
                }
            }
        }
        layouts
    }

    #[test]
    fn mip_levels_follow_largest_side() {
        assert_eq!(mip_levels(1, 1), 1);
        assert_eq!(mip_levels(2, 1), 2);
        assert_eq!(mip_levels(512, 512), 10);
        assert_eq!(mip_levels(1024, 768), 11);
        assert_eq!(mip_levels(300, 1000), 10);

        for (w, h) in [(3, 5), (640, 480), (4096, 17), (1, 65535)] {
            let expected = (w.max(h) as f64).log2().floor() as u32 + 1;
            assert_eq!(mip_levels(w, h), expected, "{w}x{h}");
        }
    }

    #[test]
    fn mipmaps_off_allocates_one_level() {
        assert_eq!(texture_levels(512, 512, false), 1);
        assert_eq!(texture_levels(512, 512, true), 10);
    }

    #[test]
    fn mip_chain_ends_shader_readable() {
        let (width, height) = (1024, 768);
        let levels = mip_levels(width, height);
        let steps = plan_mip_chain(width, height, levels);

        let layouts = simulate(&steps, levels);
        assert!(layouts
            .iter()
            .all(|l| *l == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
    }

    #[test]
    fn mip_chain_halves_until_one() {
        let steps = plan_mip_chain(8, 2, mip_levels(8, 2));

        let blits: Vec<_> = steps
            .iter()
            .filter_map(|s| match s {
                MipStep::Blit {
                    src_size, dst_size, ..
                } => Some((*src_size, *dst_size)),
                _ => None,
            })
            .collect();

        assert_eq!(
            blits,
            vec![((8, 2), (4, 1)), ((4, 1), (2, 1)), ((2, 1), (1, 1))]
        );
    }

    #[test]
    fn each_level_gets_one_final_transition() {
        let levels = mip_levels(64, 64);
        let steps = plan_mip_chain(64, 64, levels);

        let mut finals: HashMap<u32, usize> = HashMap::new();
        for step in &steps {
            if let MipStep::Barrier { level, new, .. } = step {
                if *new == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL {
                    *finals.entry(*level).or_default() += 1;
                }
            }
        }

        assert_eq!(finals.len(), levels as usize);
        assert!(finals.values().all(|n| *n == 1));
    }

    #[test]
    fn single_level_is_transitioned_directly() {
        let steps = plan_mip_chain(1, 1, 1);

        assert_eq!(steps.len(), 1);
        assert_eq!(
            simulate(&steps, 1),
            vec![vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL]
        );
    }

    #[test]
    fn decodes_png_to_rgba() {
        let mut source = image::RgbImage::new(3, 2);
        source.put_pixel(2, 1, image::Rgb([10, 20, 30]));

        let mut bytes = Vec::new();
        source
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let decoded = DecodedImage::from_bytes(&bytes).unwrap();
        assert_eq!((decoded.width, decoded.height), (3, 2));
        assert_eq!(decoded.pixels.len(), 3 * 2 * 4);
        assert_eq!(&decoded.pixels[20..24], &[10, 20, 30, 255]);
    }

    #[test]
    fn missing_texture_is_an_asset_error() {
        let err = DecodedImage::open(Path::new("does/not/exist.png")).unwrap_err();
        assert!(matches!(err, RendererError::Asset { .. }));
    }
}
