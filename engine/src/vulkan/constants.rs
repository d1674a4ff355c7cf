use vulkanalia::{vk, Version};

pub const PORTABILITY_MACOS_VERSION: Version = Version::new(1, 3, 216);
pub const VALIDATION_LAYER: vk::ExtensionName =
    vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation");

pub const DEVICE_EXTENSIONS: &[vk::ExtensionName] = &[vk::KHR_SWAPCHAIN_EXTENSION.name];

/// Devices reporting this API version or older are not considered.
pub const MIN_EXCLUSIVE_API_VERSION: Version = Version::new(1, 2, 198);

pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Score bonus for discrete GPUs during physical device selection.
pub const DISCRETE_GPU_BONUS: u32 = 1000;

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

pub const DEPTH_FORMAT_CANDIDATES: &[vk::Format] = &[
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub const MIN_SAMPLE_SHADING: f32 = 0.2;
