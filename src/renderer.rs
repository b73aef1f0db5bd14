// =============================================================================
// RENDERER - Setup sequence, draw protocol, teardown sequencer, tick driver
// =============================================================================
//
// The renderer is the one context object threaded through setup, every
// frame, and teardown. It owns every handle above the device context and
// is generic over nothing: the `Gpu` it talks to is passed into each call.
//
// FRAME FLOW (one frame in flight):
// 1. Acquire the next image, signalling the acquire semaphore
// 2. Write the transform into that image's uniform buffer
// 3. Reset the fence, submit the image's pre-recorded commands
// 4. Wait on the fence (10 s)
// 5. Present
//
// With more frames in flight the fence wait moves to the front of the
// frame and each slot carries its own semaphores (see backend/sync.rs).
//
// Any step failing skips the frame. A frame that acquired an image but
// never submitted it hands that image to the next tick; otherwise the next
// tick starts over at Acquire.

use ash::prelude::VkResult;
use ash::vk;

use crate::assets::{decode_texture, Assets};
use crate::backend::buffer::{DeviceBuffer, Texture};
use crate::backend::device::{DeviceContext, DeviceOptions};
use crate::backend::gpu::{DrawRecording, Gpu, Submission};
use crate::backend::pipeline::GraphicsPipeline;
use crate::backend::swapchain::Swapchain;
use crate::backend::sync::{FrameSlot, FrameSync, FENCE_TIMEOUT_NS};
use crate::config::Config;
use crate::error::{GpuError, GpuResult};
use crate::scene::Sample;

/// Everything setup needs beyond the sample itself
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub window: vk::Extent2D,
    /// Projection aspect ratio, fixed for the life of the window
    pub aspect: f32,
    pub present_mode: vk::PresentModeKHR,
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    /// Asset name of the texture source (texture sample only)
    pub texture: String,
}

impl RenderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window: vk::Extent2D {
                width: config.window.width,
                height: config.window.height,
            },
            aspect: config.aspect_ratio(),
            present_mode: config.get_present_mode(),
            clear_color: config.graphics.clear_color,
            frames_in_flight: config.graphics.frames_in_flight.max(1),
            texture: config.sample.texture.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStep {
    Acquire,
    Update,
    Submit,
    Wait,
    Present,
}

#[derive(Debug)]
pub enum FrameOutcome {
    Presented { image_index: u32 },
    Skipped { step: FrameStep, error: GpuError },
}

impl FrameOutcome {
    pub fn is_presented(&self) -> bool {
        matches!(self, FrameOutcome::Presented { .. })
    }
}

type StepResult<T> = Result<T, (FrameStep, GpuError)>;

fn failed(step: FrameStep, call: &'static str) -> impl FnOnce(vk::Result) -> (FrameStep, GpuError) {
    move |result| (step, GpuError::Call { call, result })
}

#[derive(Debug)]
pub struct Renderer {
    sample: Sample,
    clear_color: [f32; 4],
    aspect: f32,
    queue: vk::Queue,

    // Declared in creation order; `teardown` walks them backwards
    context: Option<DeviceContext>,
    textures: Vec<Texture>,
    swapchain: Swapchain,
    render_pass: vk::RenderPass,
    command_pool: vk::CommandPool,
    vertex_buffer: DeviceBuffer,
    index_buffer: DeviceBuffer,
    pipeline: GraphicsPipeline,
    command_buffers: Vec<vk::CommandBuffer>,
    sync: FrameSync,
}

impl Renderer {
    // =========================================================================
    // SETUP
    // =========================================================================

    /// Bring up the device context and every per-sample resource.
    /// On failure whatever was created is torn down before returning.
    pub fn new<G: Gpu>(
        gpu: &mut G,
        device_options: &DeviceOptions,
        create_surface: impl FnOnce(&mut G, vk::Instance) -> VkResult<vk::SurfaceKHR>,
        sample: Sample,
        assets: &Assets,
        settings: &RenderSettings,
    ) -> GpuResult<Self> {
        let context = DeviceContext::new(gpu, device_options, create_surface)?;

        let mut renderer = Self {
            sample,
            clear_color: settings.clear_color,
            aspect: 1.0,
            queue: context.queue,
            context: None,
            textures: Vec::new(),
            swapchain: Swapchain::default(),
            render_pass: vk::RenderPass::null(),
            command_pool: vk::CommandPool::null(),
            vertex_buffer: DeviceBuffer::default(),
            index_buffer: DeviceBuffer::default(),
            pipeline: GraphicsPipeline::default(),
            command_buffers: Vec::new(),
            sync: FrameSync::default(),
        };

        let result = renderer.build(gpu, &context, assets, settings);
        renderer.context = Some(context);

        match result {
            Ok(()) => {
                log::info!(
                    "Renderer ready: {:?} sample, {} images, {} frame(s) in flight",
                    renderer.sample.kind,
                    renderer.swapchain.image_count(),
                    renderer.sync.slots.len()
                );
                Ok(renderer)
            }
            Err(e) => {
                log::error!("Renderer setup failed: {}", e);
                renderer.teardown(gpu);
                Err(e)
            }
        }
    }

    fn build<G: Gpu>(
        &mut self,
        gpu: &mut G,
        context: &DeviceContext,
        assets: &Assets,
        settings: &RenderSettings,
    ) -> GpuResult<()> {
        // Step 1: Textures
        if self.sample.uses_texture() {
            let data = decode_texture(assets.get(&settings.texture)?)?;
            let texture = Texture::new(
                gpu,
                &context.memory_properties,
                context.queue,
                context.queue_family,
                &data,
            )?;
            self.textures.push(texture);
        }
        let texture_count = self.textures.len() as u32;

        // Step 2: Swapchain, images, per-image uniform buffers
        self.aspect = settings.aspect;
        let initial = self.sample.transform(0.0, self.aspect);
        self.swapchain = Swapchain::new(
            gpu,
            context,
            settings.window,
            settings.present_mode,
            bytemuck::bytes_of(&initial),
            texture_count,
        )?;

        // Step 3: Render pass + command pool
        self.render_pass = gpu
            .create_render_pass(self.swapchain.format.format)
            .map_err(GpuError::call("vkCreateRenderPass"))?;
        self.command_pool = gpu
            .create_command_pool(context.queue_family)
            .map_err(GpuError::call("vkCreateCommandPool"))?;

        // Step 4: Descriptors, framebuffers
        self.swapchain.create_descriptor_pool(gpu, texture_count)?;
        self.swapchain.create_descriptor_sets(gpu, &self.textures)?;
        self.swapchain.create_framebuffers(gpu, self.render_pass)?;

        // Step 5: Static geometry
        self.vertex_buffer = DeviceBuffer::with_data(
            gpu,
            &context.memory_properties,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &self.sample.mesh.vertices,
        )?;
        self.index_buffer = DeviceBuffer::with_data(
            gpu,
            &context.memory_properties,
            vk::BufferUsageFlags::INDEX_BUFFER,
            self.sample.mesh.index_bytes(),
        )?;

        // Step 6: Pipeline
        self.pipeline = GraphicsPipeline::new(
            gpu,
            assets,
            self.sample.shaders,
            self.render_pass,
            self.swapchain.descriptor_set_layout,
            self.swapchain.extent,
            &self.sample.mesh.layout,
        )?;

        // Step 7: One pre-recorded command buffer per image
        self.command_buffers = gpu
            .allocate_command_buffers(self.command_pool, self.swapchain.image_count())
            .map_err(GpuError::call("vkAllocateCommandBuffers"))?;
        self.record_command_buffers(gpu)?;

        // Step 8: Sync objects
        self.sync = FrameSync::new(gpu, settings.frames_in_flight, self.swapchain.images.len())?;

        Ok(())
    }

    fn record_command_buffers<G: Gpu>(&self, gpu: &mut G) -> GpuResult<()> {
        for (i, &cmd) in self.command_buffers.iter().enumerate() {
            let draw = DrawRecording {
                render_pass: self.render_pass,
                framebuffer: self.swapchain.framebuffers[i],
                extent: self.swapchain.extent,
                clear_color: self.clear_color,
                pipeline: self.pipeline.pipeline,
                pipeline_layout: self.pipeline.layout,
                descriptor_set: self.swapchain.descriptor_sets[i],
                vertex_buffer: self.vertex_buffer.buffer,
                index_buffer: self.index_buffer.buffer,
                index_count: self.sample.mesh.index_count(),
            };
            gpu.record_draw(cmd, &draw)
                .map_err(GpuError::call("vkBeginCommandBuffer"))?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    #[cfg(test)]
    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        &self.command_buffers
    }

    // =========================================================================
    // DRAW
    // =========================================================================

    /// Draw one frame. Never fails: a failed step is logged and reported
    /// as a skipped frame.
    pub fn draw_frame<G: Gpu>(&mut self, gpu: &mut G, spin: f32) -> FrameOutcome {
        let result = if self.sync.pipelined {
            self.draw_pipelined(gpu, spin)
        } else {
            self.draw_serialized(gpu, spin)
        };

        match result {
            Ok(image_index) => FrameOutcome::Presented { image_index },
            Err((step, error)) => {
                log::warn!("Frame skipped at {:?}: {}", step, error);
                FrameOutcome::Skipped { step, error }
            }
        }
    }

    fn draw_serialized<G: Gpu>(&mut self, gpu: &mut G, spin: f32) -> StepResult<u32> {
        let slot = self.sync.current();
        let image_index = self.acquire(gpu, slot)?;

        let submitted = self
            .update_uniform(gpu, image_index, spin)
            .and_then(|()| self.submit(gpu, image_index, slot));
        self.hold_if_unsubmitted(image_index, submitted)?;

        gpu.wait_for_fence(slot.in_flight, FENCE_TIMEOUT_NS)
            .map_err(failed(FrameStep::Wait, "vkWaitForFences"))?;

        gpu.queue_present(self.queue, self.swapchain.swapchain, image_index, None)
            .map_err(failed(FrameStep::Present, "vkQueuePresentKHR"))?;

        Ok(image_index)
    }

    fn draw_pipelined<G: Gpu>(&mut self, gpu: &mut G, spin: f32) -> StepResult<u32> {
        let slot_index = self.sync.current_index();
        let slot = self.sync.current();

        // The slot's previous submission must be done before it is reused
        gpu.wait_for_fence(slot.in_flight, FENCE_TIMEOUT_NS)
            .map_err(failed(FrameStep::Wait, "vkWaitForFences"))?;

        let image_index = self.acquire(gpu, slot)?;

        let submitted = self
            .wait_for_image(gpu, image_index, slot.in_flight)
            .and_then(|()| self.update_uniform(gpu, image_index, spin))
            .and_then(|()| self.submit(gpu, image_index, slot));
        if matches!(submitted, Err((FrameStep::Submit, _))) {
            // The reset fence would never signal again
            if let Err(e) = self.sync.replace_fence(gpu, slot_index) {
                log::error!("Failed to replace fence of frame slot {}: {}", slot_index, e);
            }
        }
        self.hold_if_unsubmitted(image_index, submitted)?;

        self.sync.images_in_flight[image_index as usize] = slot.in_flight;
        self.sync.advance();

        gpu.queue_present(
            self.queue,
            self.swapchain.swapchain,
            image_index,
            Some(slot.render_finished),
        )
        .map_err(failed(FrameStep::Present, "vkQueuePresentKHR"))?;

        Ok(image_index)
    }

    /// The image left over from a frame that never submitted, else a fresh one
    fn acquire<G: Gpu>(&mut self, gpu: &mut G, slot: FrameSlot) -> StepResult<u32> {
        if let Some(image_index) = self.sync.acquired.take() {
            log::debug!("Reusing image {} acquired by a skipped frame", image_index);
            return Ok(image_index);
        }
        gpu.acquire_next_image(self.swapchain.swapchain, u64::MAX, slot.image_available)
            .map_err(failed(FrameStep::Acquire, "vkAcquireNextImageKHR"))
    }

    /// Until the submit goes through, the acquire semaphore stays signaled
    /// and the image stays ours; keep both for the next frame.
    fn hold_if_unsubmitted(&mut self, image_index: u32, submitted: StepResult<()>) -> StepResult<()> {
        if submitted.is_err() {
            self.sync.acquired = Some(image_index);
        }
        submitted
    }

    /// Another slot may still be reading this image's uniform buffer
    fn wait_for_image<G: Gpu>(&self, gpu: &mut G, image_index: u32, own: vk::Fence) -> StepResult<()> {
        let image_fence = self.sync.images_in_flight[image_index as usize];
        if image_fence == vk::Fence::null() || image_fence == own {
            return Ok(());
        }
        gpu.wait_for_fence(image_fence, FENCE_TIMEOUT_NS)
            .map_err(failed(FrameStep::Wait, "vkWaitForFences"))
    }

    /// Reset the slot fence and submit the image's pre-recorded commands
    fn submit<G: Gpu>(&self, gpu: &mut G, image_index: u32, slot: FrameSlot) -> StepResult<()> {
        gpu.reset_fence(slot.in_flight)
            .map_err(failed(FrameStep::Submit, "vkResetFences"))?;
        let signal = (slot.render_finished != vk::Semaphore::null()).then_some(slot.render_finished);
        let submission = Submission {
            command_buffer: self.command_buffers[image_index as usize],
            wait: Some((slot.image_available, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)),
            signal,
        };
        gpu.queue_submit(self.queue, &submission, slot.in_flight)
            .map_err(failed(FrameStep::Submit, "vkQueueSubmit"))
    }

    fn update_uniform<G: Gpu>(&self, gpu: &mut G, image_index: u32, spin: f32) -> StepResult<()> {
        let transform = self.sample.transform(spin, self.aspect);
        self.swapchain.uniform_buffers[image_index as usize]
            .write(gpu, bytemuck::bytes_of(&transform))
            .map_err(|e| (FrameStep::Update, e))
    }

    // =========================================================================
    // TEARDOWN
    // =========================================================================

    /// Destroy everything in reverse dependency order. Safe on a partially
    /// built renderer; a second call finds nothing left to destroy.
    pub fn teardown<G: Gpu>(&mut self, gpu: &mut G) {
        let Some(context) = self.context.take() else {
            return;
        };
        log::info!("Cleaning up Vulkan resources...");

        // Wait for GPU to finish before destroying anything
        if let Err(e) = gpu.device_wait_idle() {
            log::warn!("vkDeviceWaitIdle failed during teardown: {}", e);
        }

        // 1. Sync objects
        self.sync.destroy(gpu);

        // 2. Command buffers, then their pool
        if !self.command_buffers.is_empty() {
            gpu.free_command_buffers(self.command_pool, &self.command_buffers);
            self.command_buffers.clear();
        }
        if self.command_pool != vk::CommandPool::null() {
            gpu.destroy_command_pool(self.command_pool);
            self.command_pool = vk::CommandPool::null();
        }

        // 3. Render pass
        if self.render_pass != vk::RenderPass::null() {
            gpu.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }

        // 4. Swapchain-owned objects
        self.swapchain.destroy(gpu);

        // 5. Pipeline
        self.pipeline.destroy(gpu);
        self.pipeline = GraphicsPipeline::default();

        // 6. Static buffers and textures
        self.vertex_buffer.destroy(gpu);
        self.vertex_buffer = DeviceBuffer::default();
        self.index_buffer.destroy(gpu);
        self.index_buffer = DeviceBuffer::default();
        for texture in self.textures.drain(..) {
            texture.destroy(gpu);
        }

        // 7. Device, debug messenger, surface, instance
        context.destroy(gpu);

        log::info!("Cleanup complete");
    }
}

// =============================================================================
// TICK DRIVER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    Tick,
    Shutdown,
}

/// Owns the GPU and the renderer for the life of the process. Ticks draw
/// frames until shutdown, which tears the renderer down exactly once.
pub struct FrameLoop<G: Gpu> {
    gpu: G,
    renderer: Option<Renderer>,
    spin: f32,
    presented: u64,
    skipped: u64,
}

impl<G: Gpu> FrameLoop<G> {
    pub fn new(gpu: G, renderer: Renderer) -> Self {
        Self {
            gpu,
            renderer: Some(renderer),
            spin: 1.0,
            presented: 0,
            skipped: 0,
        }
    }

    /// Draw one frame and advance the spin angle. `None` once shut down.
    pub fn tick(&mut self) -> Option<FrameOutcome> {
        let renderer = self.renderer.as_mut()?;
        let outcome = renderer.draw_frame(&mut self.gpu, self.spin);
        self.spin += 1.0;

        if outcome.is_presented() {
            self.presented += 1;
        } else {
            self.skipped += 1;
        }
        Some(outcome)
    }

    /// Stop ticking and tear down. Returns false if already shut down.
    pub fn shutdown(&mut self) -> bool {
        let Some(mut renderer) = self.renderer.take() else {
            return false;
        };
        log::info!("Shutting down after {} frames ({} skipped)", self.presented, self.skipped);
        renderer.teardown(&mut self.gpu);
        true
    }

    /// Consume events until a shutdown; anything after it is ignored.
    /// Returns whether the loop is still running.
    pub fn drive(&mut self, events: impl IntoIterator<Item = LoopEvent>) -> bool {
        for event in events {
            if !self.is_running() {
                break;
            }
            match event {
                LoopEvent::Tick => {
                    self.tick();
                }
                LoopEvent::Shutdown => {
                    self.shutdown();
                }
            }
        }
        self.is_running()
    }

    pub fn is_running(&self) -> bool {
        self.renderer.is_some()
    }

    #[cfg(test)]
    pub fn spin(&self) -> f32 {
        self.spin
    }

    #[cfg(test)]
    pub fn presented(&self) -> u64 {
        self.presented
    }

    #[cfg(test)]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    #[cfg(test)]
    pub fn gpu(&self) -> &G {
        &self.gpu
    }
}

impl<G: Gpu> Drop for FrameLoop<G> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
