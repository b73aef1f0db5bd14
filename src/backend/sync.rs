// Synchronization primitives
//
// Serialized cadence (one frame in flight): a single fence + acquire
// semaphore pair reused every frame; the host waits for the submission
// before presenting.
//
// Pipelined cadence (N > 1 frames in flight): a ring of N slots, each with
// its own acquire semaphore, render-finished semaphore and fence. Slot
// fences start signaled and are waited on before the slot is reused.
// `images_in_flight` remembers which fence last covered each swapchain
// image so its uniform buffer is not rewritten while still being read.
//
// A frame that fails after vkAcquireNextImageKHR but before its submit
// leaves the acquire semaphore signaled and the image owned by the
// application. `acquired` carries that image into the next frame, which
// submits it instead of acquiring again, so the semaphore is waited on
// exactly once and the image always goes back to the presentation engine.

use ash::vk;

use crate::backend::gpu::Gpu;
use crate::error::{GpuError, GpuResult};

/// Bound on every host-side fence wait (frames and texture uploads)
pub const FENCE_TIMEOUT_NS: u64 = 10_000_000_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    /// Null in the serialized cadence
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

#[derive(Debug, Default)]
pub struct FrameSync {
    pub slots: Vec<FrameSlot>,
    pub images_in_flight: Vec<vk::Fence>,
    pub pipelined: bool,
    /// Image acquired on the current slot but not yet submitted
    pub acquired: Option<u32>,
    current: usize,
}

impl FrameSync {
    pub fn new<G: Gpu>(gpu: &mut G, frames_in_flight: usize, image_count: usize) -> GpuResult<Self> {
        let mut sync = Self {
            pipelined: frames_in_flight > 1,
            images_in_flight: vec![vk::Fence::null(); image_count],
            ..Default::default()
        };
        match sync.create(gpu, frames_in_flight.max(1)) {
            Ok(()) => Ok(sync),
            Err(e) => {
                sync.destroy(gpu);
                Err(e)
            }
        }
    }

    fn create<G: Gpu>(&mut self, gpu: &mut G, count: usize) -> GpuResult<()> {
        for _ in 0..count {
            let mut slot = FrameSlot::default();
            let result = Self::create_slot(gpu, self.pipelined, &mut slot);
            // Kept even when partial so destroy() sees it
            self.slots.push(slot);
            result?;
        }
        Ok(())
    }

    fn create_slot<G: Gpu>(gpu: &mut G, pipelined: bool, slot: &mut FrameSlot) -> GpuResult<()> {
        slot.image_available = gpu
            .create_semaphore()
            .map_err(GpuError::call("vkCreateSemaphore"))?;
        if pipelined {
            slot.render_finished = gpu
                .create_semaphore()
                .map_err(GpuError::call("vkCreateSemaphore"))?;
        }
        slot.in_flight = gpu
            .create_fence(pipelined)
            .map_err(GpuError::call("vkCreateFence"))?;
        Ok(())
    }

    pub fn current(&self) -> FrameSlot {
        self.slots[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }

    /// Swap a slot's fence for a fresh signaled one. Used when a submission
    /// failed after the fence was reset, which would otherwise leave the slot
    /// waiting forever.
    pub fn replace_fence<G: Gpu>(&mut self, gpu: &mut G, slot: usize) -> GpuResult<()> {
        let old = self.slots[slot].in_flight;
        let fresh = gpu
            .create_fence(true)
            .map_err(GpuError::call("vkCreateFence"))?;

        for fence in self.images_in_flight.iter_mut().filter(|f| **f == old) {
            *fence = vk::Fence::null();
        }
        gpu.destroy_fence(old);
        self.slots[slot].in_flight = fresh;
        Ok(())
    }

    pub fn destroy<G: Gpu>(&mut self, gpu: &mut G) {
        for slot in self.slots.drain(..) {
            if slot.image_available != vk::Semaphore::null() {
                gpu.destroy_semaphore(slot.image_available);
            }
            if slot.render_finished != vk::Semaphore::null() {
                gpu.destroy_semaphore(slot.render_finished);
            }
            if slot.in_flight != vk::Fence::null() {
                gpu.destroy_fence(slot.in_flight);
            }
        }
        self.images_in_flight.clear();
        self.acquired = None;
        self.current = 0;
    }
}
