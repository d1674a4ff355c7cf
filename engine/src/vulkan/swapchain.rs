use std::rc::Rc;

use anyhow::Result;
use log::*;
use vulkanalia::VkResult;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder, KhrSurfaceExtension, KhrSwapchainExtension};

use super::{context::VulkanContext, image, instance::VulkanInstance};

/// What the surface supports on a given physical device.
#[derive(Clone, Debug)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn get(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let vk_instance = &instance.vk_instance;
        Ok(Self {
            capabilities: vk_instance
                .get_physical_device_surface_capabilities_khr(physical_device, instance.surface)?,
            formats: vk_instance
                .get_physical_device_surface_formats_khr(physical_device, instance.surface)?,
            present_modes: vk_instance
                .get_physical_device_surface_present_modes_khr(physical_device, instance.surface)?,
        })
    }
}

/// Prefers BGRA8 sRGB in the sRGB nonlinear color space, else the first
/// format the surface lists.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .cloned()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or_else(|| formats[0])
}

/// Mailbox when available; FIFO is guaranteed to exist.
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .cloned()
        .find(|m| *m == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Uses the surface's current extent unless it is the `u32::MAX` sentinel,
/// in which case the framebuffer size is clamped into the allowed range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer_size: (u32, u32),
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let (width, height) = framebuffer_size;
    vk::Extent2D::builder()
        .width(width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ))
        .height(height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ))
        .build()
}

/// The presentable image chain of one swapchain generation.
#[derive(Debug)]
pub struct VulkanSwapchain {
    ctx: Rc<VulkanContext>,
    pub handle: vk::SwapchainKHR,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl VulkanSwapchain {
    /// Creates a new chain. `old` is handed to the driver so presentation
    /// can carry over; the caller destroys it afterwards.
    pub unsafe fn create(
        ctx: &Rc<VulkanContext>,
        framebuffer_size: (u32, u32),
        old: Option<&VulkanSwapchain>,
    ) -> Result<VulkanSwapchain> {
        let support = ctx.swapchain_support()?;

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, framebuffer_size);

        let mut image_count = support.capabilities.min_image_count + 1;
        if support.capabilities.max_image_count != 0
            && image_count > support.capabilities.max_image_count
        {
            image_count = support.capabilities.max_image_count;
        }

        let indices = ctx.physical.indices;
        let mut queue_family_indices = vec![];
        let image_sharing_mode = if indices.graphics != indices.present {
            queue_family_indices.push(indices.graphics);
            queue_family_indices.push(indices.present);
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };

        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(ctx.instance.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(image_sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old.map_or(vk::SwapchainKHR::null(), |o| o.handle));

        let device = ctx.device();
        let handle = device.create_swapchain_khr(&info, None)?;
        let images = device.get_swapchain_images_khr(handle)?;

        let image_views = images
            .iter()
            .map(|i| {
                image::create_image_view(
                    device,
                    *i,
                    surface_format.format,
                    vk::ImageAspectFlags::COLOR,
                    1,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "Created swapchain ({} images, {:?}, {:?}, {}x{}).",
            images.len(),
            surface_format.format,
            present_mode,
            extent.width,
            extent.height
        );

        Ok(VulkanSwapchain {
            ctx: ctx.clone(),
            handle,
            image_views,
            format: surface_format.format,
            extent,
        })
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe {
            self.image_views
                .iter()
                .for_each(|v| device.destroy_image_view(*v, None));
            device.destroy_swapchain_khr(self.handle, None);
        }
        debug!("Destroyed swapchain.");
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SwapchainState {
    Valid,
    Recreating,
}

/// Tracks whether the current swapchain generation is still usable.
///
/// Requests arriving while a recreation is underway are coalesced into one
/// follow-up recreation instead of starting a second teardown.
#[derive(Debug)]
pub struct SwapchainStatus {
    state: SwapchainState,
    pending: bool,
}

impl Default for SwapchainStatus {
    fn default() -> Self {
        Self {
            state: SwapchainState::Valid,
            pending: false,
        }
    }
}

impl SwapchainStatus {
    #[cfg(test)]
    pub fn state(&self) -> SwapchainState {
        self.state
    }

    /// Marks the swapchain as incompatible with the surface.
    pub fn request(&mut self) {
        self.pending = true;
    }

    /// Requests recreation for a suboptimal or out-of-date acquire/present
    /// result. The result is handed back unchanged.
    pub fn observe(&mut self, result: VkResult<vk::SuccessCode>) -> VkResult<vk::SuccessCode> {
        if let Ok(vk::SuccessCode::SUBOPTIMAL_KHR) | Err(vk::ErrorCode::OUT_OF_DATE_KHR) = result {
            self.request();
        }
        result
    }

    pub fn needs_recreation(&self) -> bool {
        self.pending && self.state == SwapchainState::Valid
    }

    /// Enters `Recreating`. Returns `false` if a recreation is already running.
    pub fn begin(&mut self) -> bool {
        if self.state == SwapchainState::Recreating {
            self.pending = true;
            return false;
        }
        self.state = SwapchainState::Recreating;
        self.pending = false;
        true
    }

    pub fn finish(&mut self) {
        self.state = SwapchainState::Valid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn capabilities(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: min.0, height: min.1 },
            max_image_extent: vk::Extent2D { width: max.0, height: max.1 },
            ..Default::default()
        }
    }

    #[test]
    fn preferred_surface_format_wins_anywhere_in_list() {
        let preferred = format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
            preferred,
        ];

        assert_eq!(choose_surface_format(&formats), preferred);
    }

    #[test]
    fn surface_format_falls_back_to_first() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];

        assert_eq!(choose_surface_format(&formats), formats[0]);
    }

    #[test]
    fn present_mode_prefers_mailbox() {
        let modes = [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&[]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn defined_current_extent_is_used_verbatim() {
        let caps = capabilities((1024, 768), (1, 1), (4096, 4096));
        let extent = choose_extent(&caps, (10, 10));
        assert_eq!((extent.width, extent.height), (1024, 768));
    }

    #[test]
    fn undefined_extent_clamps_framebuffer_size() {
        let caps = capabilities((u32::MAX, u32::MAX), (200, 100), (1920, 1080));

        let inside = choose_extent(&caps, (800, 600));
        assert_eq!((inside.width, inside.height), (800, 600));

        let above = choose_extent(&caps, (4000, 50));
        assert_eq!((above.width, above.height), (1920, 100));

        let below = choose_extent(&caps, (0, 2000));
        assert_eq!((below.width, below.height), (200, 1080));
    }

    #[test]
    fn recreation_runs_once_per_request() {
        let mut status = SwapchainStatus::default();
        assert!(!status.needs_recreation());

        status.request();
        status.request();
        assert!(status.needs_recreation());

        assert!(status.begin());
        assert_eq!(status.state(), SwapchainState::Recreating);
        assert!(!status.needs_recreation());

        status.finish();
        assert_eq!(status.state(), SwapchainState::Valid);
        assert!(!status.needs_recreation());
    }

    #[test]
    fn suboptimal_and_out_of_date_request_recreation() {
        let mut status = SwapchainStatus::default();
        assert_eq!(status.observe(Ok(vk::SuccessCode::SUCCESS)), Ok(vk::SuccessCode::SUCCESS));
        assert!(!status.needs_recreation());

        assert_eq!(
            status.observe(Ok(vk::SuccessCode::SUBOPTIMAL_KHR)),
            Ok(vk::SuccessCode::SUBOPTIMAL_KHR)
        );
        assert!(status.needs_recreation());

        let mut status = SwapchainStatus::default();
        assert_eq!(
            status.observe(Err(vk::ErrorCode::OUT_OF_DATE_KHR)),
            Err(vk::ErrorCode::OUT_OF_DATE_KHR)
        );
        assert!(status.needs_recreation());
    }

    #[test]
    fn other_errors_pass_through_without_recreation() {
        let mut status = SwapchainStatus::default();
        assert_eq!(
            status.observe(Err(vk::ErrorCode::DEVICE_LOST)),
            Err(vk::ErrorCode::DEVICE_LOST)
        );
        assert!(!status.needs_recreation());
    }

    #[test]
    fn nested_recreation_is_refused_and_coalesced() {
        let mut status = SwapchainStatus::default();
        status.request();
        assert!(status.begin());

        // A resize reported mid-recreation must not start a second teardown.
        status.request();
        assert!(!status.begin());
        assert!(!status.needs_recreation());

        status.finish();
        assert!(status.needs_recreation());
        assert!(status.begin());
        status.finish();
        assert!(!status.needs_recreation());
    }
}
