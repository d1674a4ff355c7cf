use anyhow::{anyhow, Result};
use log::*;
use std::collections::HashSet;
use thiserror::Error;
use vulkanalia::vk::{self, DeviceV1_0, HasBuilder, InstanceV1_0, KhrSurfaceExtension};
use vulkanalia::{Device, Version};

use super::{constants, instance::VulkanInstance, swapchain::SwapchainSupport};
use crate::error::RendererError;

#[derive(Debug, Error)]
#[error("Missing {0}.")]
pub struct SuitabilityError(pub &'static str);

/// Everything physical device selection needs to know about one candidate.
#[derive(Clone, Debug)]
pub struct DeviceProfile {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub max_image_dimension_2d: u32,
    pub api_version: Version,
    pub geometry_shader: bool,
    pub extensions_supported: bool,
    pub swapchain_adequate: bool,
    pub queue_families: Option<QueueFamilyIndices>,
}

impl DeviceProfile {
    /// The first hard requirement this device fails, if any.
    pub fn rejection(&self) -> Option<SuitabilityError> {
        if self.api_version <= constants::MIN_EXCLUSIVE_API_VERSION {
            Some(SuitabilityError("a recent enough API version"))
        } else if !self.geometry_shader {
            Some(SuitabilityError("geometry shader support"))
        } else if !self.extensions_supported {
            Some(SuitabilityError("required device extensions"))
        } else if !self.swapchain_adequate {
            Some(SuitabilityError("adequate swapchain support"))
        } else if self.queue_families.is_none() {
            Some(SuitabilityError("required queue families"))
        } else {
            None
        }
    }

    /// Discrete GPUs get a flat bonus on top of the largest 2D image size.
    /// Any failed requirement zeroes the score.
    pub fn score(&self) -> u32 {
        if self.rejection().is_some() {
            return 0;
        }

        let mut score = self.max_image_dimension_2d;
        if self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += constants::DISCRETE_GPU_BONUS;
        }
        score
    }
}

/// Returns the highest scoring candidate, or `None` if every score is zero.
pub fn pick_best<T>(candidates: impl IntoIterator<Item = (T, u32)>) -> Option<T> {
    candidates
        .into_iter()
        .filter(|(_, score)| *score > 0)
        .max_by_key(|(_, score)| *score)
        .map(|(candidate, _)| candidate)
}

/// Largest sample count usable for both color and depth attachments.
pub fn max_usable_sample_count(
    color: vk::SampleCountFlags,
    depth: vk::SampleCountFlags,
) -> vk::SampleCountFlags {
    let counts = color & depth;
    [
        vk::SampleCountFlags::_64,
        vk::SampleCountFlags::_32,
        vk::SampleCountFlags::_16,
        vk::SampleCountFlags::_8,
        vk::SampleCountFlags::_4,
        vk::SampleCountFlags::_2,
    ]
    .into_iter()
    .find(|c| counts.contains(*c))
    .unwrap_or(vk::SampleCountFlags::_1)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Scans the families once, keeping the first graphics-capable family and
    /// the first one that can present to the surface.
    pub fn find(
        properties: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> Result<bool>,
    ) -> Result<Option<Self>> {
        let mut graphics = None;
        let mut present = None;

        for (index, family) in properties.iter().enumerate() {
            let index = index as u32;

            // Graphics families always accept transfer commands.
            if graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics = Some(index);
            }

            if present.is_none() && supports_present(index)? {
                present = Some(index);
            }

            if graphics.is_some() && present.is_some() {
                break;
            }
        }

        Ok(graphics
            .zip(present)
            .map(|(graphics, present)| Self { graphics, present }))
    }

    /// `Ok(None)` when the device lacks a family; API failures are errors.
    pub unsafe fn get(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Option<Self>> {
        let properties = instance
            .vk_instance
            .get_physical_device_queue_family_properties(physical_device);

        Self::find(&properties, |index| {
            Ok(instance.vk_instance.get_physical_device_surface_support_khr(
                physical_device,
                index,
                instance.surface,
            )?)
        })
    }

    /// The distinct families a queue has to be created for.
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// The chosen physical device together with the capabilities the rest of
/// the renderer adapts to.
#[derive(Copy, Clone, Debug)]
pub struct PhysicalDeviceInfo {
    pub handle: vk::PhysicalDevice,
    pub indices: QueueFamilyIndices,
    pub msaa_samples: vk::SampleCountFlags,
    pub anisotropy: bool,
    pub max_anisotropy: f32,
    pub sample_shading: bool,
}

unsafe fn probe_physical_device(
    instance: &VulkanInstance,
    physical_device: vk::PhysicalDevice,
) -> Result<DeviceProfile> {
    let properties = instance
        .vk_instance
        .get_physical_device_properties(physical_device);
    let features = instance
        .vk_instance
        .get_physical_device_features(physical_device);

    let extensions = instance
        .vk_instance
        .enumerate_device_extension_properties(physical_device, None)?
        .iter()
        .map(|e| e.extension_name)
        .collect::<HashSet<_>>();
    let extensions_supported = constants::DEVICE_EXTENSIONS
        .iter()
        .all(|e| extensions.contains(e));

    let swapchain_adequate = extensions_supported && {
        let support = SwapchainSupport::get(instance, physical_device)?;
        !support.formats.is_empty() && !support.present_modes.is_empty()
    };

    Ok(DeviceProfile {
        name: properties.device_name.to_string(),
        device_type: properties.device_type,
        max_image_dimension_2d: properties.limits.max_image_dimension_2d,
        api_version: Version::from(properties.api_version),
        geometry_shader: features.geometry_shader == vk::TRUE,
        extensions_supported,
        swapchain_adequate,
        queue_families: QueueFamilyIndices::get(instance, physical_device)?,
    })
}

pub unsafe fn pick_physical_device(instance: &VulkanInstance) -> Result<PhysicalDeviceInfo> {
    let mut candidates = Vec::new();
    for physical_device in instance.vk_instance.enumerate_physical_devices()? {
        let profile = probe_physical_device(instance, physical_device)?;
        if let Some(error) = profile.rejection() {
            warn!("Skipping physical device (`{}`): {}", profile.name, error);
        }
        let score = profile.score();
        candidates.push(((physical_device, profile), score));
    }

    let (physical_device, profile) =
        pick_best(candidates).ok_or_else(|| anyhow!(RendererError::NoSuitableDevice))?;
    info!(
        "Selected physical device (`{}`, score {}).",
        profile.name,
        profile.score()
    );

    let properties = instance
        .vk_instance
        .get_physical_device_properties(physical_device);
    let features = instance
        .vk_instance
        .get_physical_device_features(physical_device);

    let msaa_samples = max_usable_sample_count(
        properties.limits.framebuffer_color_sample_counts,
        properties.limits.framebuffer_depth_sample_counts,
    );
    info!("Using {:?} samples per pixel.", msaa_samples);

    let anisotropy = features.sampler_anisotropy == vk::TRUE;
    if !anisotropy {
        warn!("Anisotropic sampling unsupported, disabling it.");
    }

    let sample_shading = features.sample_rate_shading == vk::TRUE;
    if !sample_shading {
        warn!("Sample rate shading unsupported, disabling it.");
    }

    Ok(PhysicalDeviceInfo {
        handle: physical_device,
        indices: profile
            .queue_families
            .ok_or_else(|| anyhow!(RendererError::MissingQueueFamilies))?,
        msaa_samples,
        anisotropy,
        max_anisotropy: properties.limits.max_sampler_anisotropy,
        sample_shading,
    })
}

/// The logical device and the queues retrieved from it.
#[derive(Debug)]
pub struct VulkanDevice {
    pub vk_device: Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

impl VulkanDevice {
    pub unsafe fn new(
        instance: &VulkanInstance,
        physical: &PhysicalDeviceInfo,
    ) -> Result<VulkanDevice> {
        let queue_priorities = &[1.0];
        let queue_infos = physical
            .indices
            .unique()
            .into_iter()
            .map(|i| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(i)
                    .queue_priorities(queue_priorities)
            })
            .collect::<Vec<_>>();

        let layers = if instance.validation {
            vec![constants::VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let mut extensions = constants::DEVICE_EXTENSIONS
            .iter()
            .map(|n| n.as_ptr())
            .collect::<Vec<_>>();

        // Required by Vulkan SDK on macOS since 1.3.216.
        if cfg!(target_os = "macos")
            && instance.entry.version()? >= constants::PORTABILITY_MACOS_VERSION
        {
            extensions.push(vk::KHR_PORTABILITY_SUBSET_EXTENSION.name.as_ptr());
        }

        let features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(physical.anisotropy)
            .sample_rate_shading(physical.sample_shading);

        let info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = instance
            .vk_instance
            .create_device(physical.handle, &info, None)?;

        let graphics_queue = device.get_device_queue(physical.indices.graphics, 0);
        let present_queue = device.get_device_queue(physical.indices.present, 0);

        Ok(VulkanDevice {
            vk_device: device,
            graphics_queue,
            present_queue,
        })
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            self.vk_device.destroy_device(None);
        }
        debug!("Destroyed logical device.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(device_type: vk::PhysicalDeviceType, max_image_dimension_2d: u32) -> DeviceProfile {
        DeviceProfile {
            name: "test".to_string(),
            device_type,
            max_image_dimension_2d,
            api_version: Version::new(1, 3, 0),
            geometry_shader: true,
            extensions_supported: true,
            swapchain_adequate: true,
            queue_families: Some(QueueFamilyIndices {
                graphics: 0,
                present: 0,
            }),
        }
    }

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn discrete_gpu_outscores_integrated() {
        let integrated = profile(vk::PhysicalDeviceType::INTEGRATED_GPU, 1200);
        let discrete = profile(vk::PhysicalDeviceType::DISCRETE_GPU, 2000);

        assert_eq!(integrated.score(), 1200);
        assert_eq!(discrete.score(), 3000);

        let picked = pick_best([
            ("integrated", integrated.score()),
            ("discrete", discrete.score()),
        ]);
        assert_eq!(picked, Some("discrete"));
    }

    #[test]
    fn missing_geometry_shader_zeroes_score() {
        let mut device = profile(vk::PhysicalDeviceType::DISCRETE_GPU, 16384);
        device.geometry_shader = false;

        assert_eq!(device.score(), 0);
        assert!(device.rejection().is_some());
        assert_eq!(pick_best([(device.name.clone(), device.score())]), None);
    }

    #[test]
    fn every_hard_requirement_zeroes_score() {
        let base = profile(vk::PhysicalDeviceType::DISCRETE_GPU, 4096);

        let mut old = base.clone();
        old.api_version = Version::new(1, 2, 198);
        assert_eq!(old.score(), 0);

        let mut no_extensions = base.clone();
        no_extensions.extensions_supported = false;
        assert_eq!(no_extensions.score(), 0);

        let mut no_swapchain = base.clone();
        no_swapchain.swapchain_adequate = false;
        assert_eq!(no_swapchain.score(), 0);

        let mut no_queues = base.clone();
        no_queues.queue_families = None;
        assert_eq!(no_queues.score(), 0);

        let mut newer = base;
        newer.api_version = Version::new(1, 2, 199);
        assert_eq!(newer.score(), 5096);
    }

    #[test]
    fn no_candidates_picks_nothing() {
        assert_eq!(pick_best(Vec::<(u8, u32)>::new()), None);
    }

    #[test]
    fn queue_families_may_coincide() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
        ];
        let indices = QueueFamilyIndices::find(&families, |_| Ok(true))
            .unwrap()
            .unwrap();

        assert_eq!(indices.present, 0);
        assert_eq!(indices.graphics, 1);
        assert_eq!(indices.unique(), vec![1, 0]);
    }

    #[test]
    fn queue_families_take_first_match() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::find(&families, |i| Ok(i >= 1))
            .unwrap()
            .unwrap();

        assert_eq!(indices, QueueFamilyIndices { graphics: 0, present: 1 });
    }

    #[test]
    fn queue_families_stop_scanning_once_complete() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let mut queried = Vec::new();
        let indices = QueueFamilyIndices::find(&families, |i| {
            queried.push(i);
            Ok(true)
        })
        .unwrap()
        .unwrap();

        assert_eq!(indices.unique(), vec![0]);
        assert_eq!(queried, vec![0]);
    }

    #[test]
    fn missing_present_support_yields_none() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert_eq!(
            QueueFamilyIndices::find(&families, |_| Ok(false)).unwrap(),
            None
        );
    }

    #[test]
    fn present_query_failure_is_an_error_not_a_missing_family() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let result = QueueFamilyIndices::find(&families, |_| {
            Err(anyhow!(vk::ErrorCode::SURFACE_LOST_KHR))
        });

        assert!(result.is_err());
    }

    #[test]
    fn sample_count_uses_shared_maximum() {
        let color = vk::SampleCountFlags::_1
            | vk::SampleCountFlags::_2
            | vk::SampleCountFlags::_4
            | vk::SampleCountFlags::_8;
        let depth = vk::SampleCountFlags::_1 | vk::SampleCountFlags::_2 | vk::SampleCountFlags::_4;

        assert_eq!(max_usable_sample_count(color, depth), vk::SampleCountFlags::_4);
        assert_eq!(
            max_usable_sample_count(vk::SampleCountFlags::_1, vk::SampleCountFlags::_1),
            vk::SampleCountFlags::_1
        );
    }
}
