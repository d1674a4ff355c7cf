use std::rc::Rc;

use anyhow::Result;
use vulkanalia::vk::{self, DeviceV1_0, HasBuilder};

use super::context::VulkanContext;
use crate::error::RendererError;

/// Synchronization primitives owned by one frame slot.
#[derive(Debug)]
pub struct FrameSync {
    ctx: Rc<VulkanContext>,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// The fence starts signaled so the first wait on it returns at once.
    pub unsafe fn create(ctx: &Rc<VulkanContext>) -> Result<Self> {
        let device = ctx.device();

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        // Destroying a null handle is a no-op, so Drop handles a partial slot.
        let mut sync = Self {
            ctx: ctx.clone(),
            image_available: device.create_semaphore(&semaphore_info, None)?,
            render_finished: vk::Semaphore::default(),
            in_flight: vk::Fence::default(),
        };

        sync.render_finished = device.create_semaphore(&semaphore_info, None)?;
        sync.in_flight = device.create_fence(&fence_info, None)?;

        Ok(sync)
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe {
            device.destroy_fence(self.in_flight, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_semaphore(self.image_available, None);
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameSlotState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

#[derive(Copy, Clone, Debug)]
struct Slot {
    state: FrameSlotState,
    // Set on submit, cleared once the CPU has waited on the slot's fence.
    fence_pending: bool,
}

/// Tracks which frame slot is current and where it is in the
/// acquire, record, submit, present cycle.
#[derive(Debug)]
pub struct FrameTracker {
    slots: Vec<Slot>,
    current: usize,
}

impl FrameTracker {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            slots: vec![
                Slot {
                    state: FrameSlotState::Idle,
                    fence_pending: false,
                };
                frames_in_flight.max(1)
            ],
            current: 0,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    #[cfg(test)]
    pub fn state(&self, slot: usize) -> FrameSlotState {
        self.slots[slot].state
    }

    /// Called once the current slot's fence has been waited on.
    pub fn fence_signaled(&mut self) {
        let slot = &mut self.slots[self.current];
        slot.fence_pending = false;
        slot.state = FrameSlotState::Acquiring;
    }

    /// Acquire failed; the slot is released without advancing.
    pub fn abandon(&mut self) {
        self.slots[self.current].state = FrameSlotState::Idle;
    }

    /// Rejects reuse of a slot whose previous submission was never waited on.
    pub fn begin_recording(&mut self) -> Result<(), RendererError> {
        let slot = &mut self.slots[self.current];
        if slot.fence_pending || slot.state != FrameSlotState::Acquiring {
            return Err(RendererError::FrameSlotInUse { slot: self.current });
        }
        slot.state = FrameSlotState::Recording;
        Ok(())
    }

    pub fn submitted(&mut self) {
        let slot = &mut self.slots[self.current];
        slot.state = FrameSlotState::Submitted;
        slot.fence_pending = true;
    }

    pub fn presenting(&mut self) {
        self.slots[self.current].state = FrameSlotState::Presenting;
    }

    /// Finishes the current slot and moves on to the next one.
    pub fn advance(&mut self) {
        self.slots[self.current].state = FrameSlotState::Idle;
        self.current = (self.current + 1) % self.slots.len();
    }
}
