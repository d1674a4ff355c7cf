use std::path::PathBuf;

use thiserror::Error;
use vulkanalia::vk;

/// Fatal conditions raised while building or driving the renderer.
///
/// Everything here aborts startup (or the frame loop); out-of-date and
/// suboptimal swapchains are handled by recreation and never show up as
/// errors.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Failed to find a suitable physical device.")]
    NoSuitableDevice,

    #[error("Missing required queue families.")]
    MissingQueueFamilies,

    #[error("No memory type matches filter {filter:#b} with properties {flags:?}.")]
    NoMemoryType {
        filter: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("Unsupported image layout transition {old:?} -> {new:?}.")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    #[error("Failed to read shader `{}`: {source}", .path.display())]
    ShaderRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load asset `{}`: {reason}", .path.display())]
    Asset { path: PathBuf, reason: String },

    #[error("Frame slot {slot} is still in flight.")]
    FrameSlotInUse { slot: usize },
}
