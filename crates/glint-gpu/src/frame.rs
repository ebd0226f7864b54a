//! Frame sequencing: acquire, record, submit, present.
//!
//! The frame manager owns the swapchain, the window render pass and its
//! render targets, one command buffer per swapchain image, and the
//! per-slot synchronization objects. CPU-ahead-of-GPU drift is bounded by
//! the number of frames in flight; the fence waits here are the only
//! suspension points in the system.

use ash::vk;
use glint_core::RenderPassConfig;

use crate::command::{begin_command_buffer, end_command_buffer, submit_command_buffers, CommandPool};
use crate::context::GpuContext;
use crate::convert::format_from_vk;
use crate::error::{GpuError, Result};
use crate::render_pass::{RenderPass, RenderTarget};
use crate::surface::SurfaceContext;
use crate::swapchain::Swapchain;
use crate::sync::FrameSync;

/// Pure frame-slot and image-ownership bookkeeping.
///
/// Tracks which frame slot is current and which slot's fence owns each
/// swapchain image, so an image acquired again before its previous frame
/// drained forces a wait on that frame's fence first.
pub struct FlightTracker {
    max_frames_in_flight: usize,
    current_slot: usize,
    images_in_flight: Vec<Option<usize>>,
}

impl FlightTracker {
    /// Create a tracker for the given slot and image counts.
    pub fn new(max_frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            max_frames_in_flight,
            current_slot: 0,
            images_in_flight: vec![None; image_count],
        }
    }

    /// The current frame slot, always in `[0, max_frames_in_flight)`.
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    /// The slot whose fence still owns `image`, if any.
    pub fn image_owner(&self, image: usize) -> Option<usize> {
        self.images_in_flight.get(image).copied().flatten()
    }

    /// Mark `image` as owned by the current slot's fence.
    pub fn claim_image(&mut self, image: usize) {
        if let Some(entry) = self.images_in_flight.get_mut(image) {
            *entry = Some(self.current_slot);
        }
    }

    /// Forget all ownership (the fences were recreated).
    pub fn release_all(&mut self) {
        for entry in &mut self.images_in_flight {
            *entry = None;
        }
    }

    /// Advance to the next frame slot.
    pub fn advance(&mut self) {
        self.current_slot = (self.current_slot + 1) % self.max_frames_in_flight;
    }
}

/// Where the frame manager is within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramePhase {
    /// Between frames; ready to acquire.
    Ready,
    /// Recording commands for the acquired image.
    Recording { image_index: u32 },
}

/// Owns the presentable image chain and sequences every frame.
pub struct FrameManager {
    swapchain: Swapchain,
    window_pass: RenderPass,
    targets: Vec<RenderTarget>,
    command_pool: CommandPool,
    /// One command buffer per swapchain image, indexed by the *acquired
    /// image index*, not the frame slot: the image count and the number of
    /// frames in flight can differ.
    command_buffers: Vec<vk::CommandBuffer>,
    /// Per-slot synchronization, indexed by frame slot.
    frames: Vec<FrameSync>,
    tracker: FlightTracker,
    phase: FramePhase,
    fence_timeout_ns: u64,
    vsync: bool,
    width: u32,
    height: u32,
}

impl FrameManager {
    /// Create the swapchain, window pass, render targets and per-frame
    /// resources.
    ///
    /// # Safety
    /// The context and surface must be valid.
    pub unsafe fn new(
        gpu: &GpuContext,
        surface: &SurfaceContext,
        width: u32,
        height: u32,
        vsync: bool,
        fence_timeout_ns: u64,
    ) -> Result<Self> {
        let swapchain = surface.create_swapchain(gpu, width, height, vsync, None)?;

        tracing::info!(
            "Swapchain created: {}x{} ({} images, {} frames in flight)",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.image_count(),
            swapchain.max_frames_in_flight(),
        );

        let window_pass = create_window_pass(gpu, &swapchain)?;
        let targets = create_window_targets(gpu, &window_pass, &swapchain)?;

        let command_pool = CommandPool::new(
            gpu.device(),
            gpu.graphics_queue_family(),
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let command_buffers = command_pool.allocate_command_buffers(
            gpu.device(),
            vk::CommandBufferLevel::PRIMARY,
            swapchain.image_count() as u32,
        )?;

        let max_frames = swapchain.max_frames_in_flight();
        let mut frames = Vec::with_capacity(max_frames);
        for _ in 0..max_frames {
            frames.push(FrameSync::new(gpu.device())?);
        }

        let tracker = FlightTracker::new(max_frames, swapchain.image_count());

        Ok(Self {
            swapchain,
            window_pass,
            targets,
            command_pool,
            command_buffers,
            frames,
            tracker,
            phase: FramePhase::Ready,
            fence_timeout_ns,
            vsync,
            width,
            height,
        })
    }

    /// The render pass drawing into the window surface.
    pub fn window_pass(&self) -> &RenderPass {
        &self.window_pass
    }

    /// Mutable access for render-area updates.
    pub fn window_pass_mut(&mut self) -> &mut RenderPass {
        &mut self.window_pass
    }

    /// The render target for the currently acquired image, if a frame is
    /// being recorded.
    pub fn current_target(&self) -> Option<&RenderTarget> {
        match self.phase {
            FramePhase::Recording { image_index } => self.targets.get(image_index as usize),
            FramePhase::Ready => None,
        }
    }

    /// The command buffer being recorded, if any.
    pub fn current_command_buffer(&self) -> Option<vk::CommandBuffer> {
        match self.phase {
            FramePhase::Recording { image_index } => {
                self.command_buffers.get(image_index as usize).copied()
            }
            FramePhase::Ready => None,
        }
    }

    /// Current surface extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Number of frames that may be in flight.
    pub fn max_frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Begin a frame: wait for the current slot, acquire an image, start
    /// recording on that image's command buffer.
    ///
    /// Returns `Ok(None)` when the surface was out of date and the
    /// swapchain was recreated; the caller retries next loop iteration.
    ///
    /// # Safety
    /// The context and surface must be valid.
    pub unsafe fn begin_frame(
        &mut self,
        gpu: &GpuContext,
        surface: &SurfaceContext,
    ) -> Result<Option<vk::CommandBuffer>> {
        if let FramePhase::Recording { .. } = self.phase {
            return Err(GpuError::InvalidState(
                "begin_frame called while a frame is recording".to_string(),
            ));
        }

        let slot = self.tracker.current_slot();
        let frame = &self.frames[slot];

        // The only CPU-side wait bounding how far we run ahead of the GPU.
        frame.wait(gpu.device(), self.fence_timeout_ns)?;

        let acquired = self.swapchain.acquire_next_image(
            &surface.swapchain_loader,
            frame.image_available,
            u64::MAX,
        );

        let image_index = match acquired {
            Ok((index, _suboptimal)) => index,
            Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)) => {
                tracing::debug!("acquire reported out-of-date; recreating swapchain");
                self.recreate(gpu, surface, self.width, self.height)?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let cmd = self.command_buffers[image_index as usize];
        gpu.device()
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
        begin_command_buffer(gpu.device(), cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

        self.phase = FramePhase::Recording { image_index };
        Ok(Some(cmd))
    }

    /// End the frame: stop recording, resolve image reuse, submit and
    /// present, then advance the frame slot.
    ///
    /// # Safety
    /// The context and surface must be valid.
    pub unsafe fn end_frame(&mut self, gpu: &GpuContext, surface: &SurfaceContext) -> Result<()> {
        let FramePhase::Recording { image_index } = self.phase else {
            return Err(GpuError::InvalidState(
                "end_frame called with no frame recording".to_string(),
            ));
        };

        let device = gpu.device();
        let slot = self.tracker.current_slot();
        let cmd = self.command_buffers[image_index as usize];

        end_command_buffer(device, cmd)?;

        // If an older frame still renders into this image, drain it before
        // submitting new work against the same image.
        if let Some(owner) = self.tracker.image_owner(image_index as usize) {
            if owner != slot {
                self.frames[owner].wait(device, self.fence_timeout_ns)?;
            }
        }
        self.tracker.claim_image(image_index as usize);

        let frame = &self.frames[slot];
        frame.reset(device)?;

        let wait_semaphores = [frame.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [frame.queue_complete];
        let command_buffers = [cmd];

        if let Err(e) = submit_command_buffers(
            device,
            gpu.graphics_queue(),
            &command_buffers,
            &wait_semaphores,
            &wait_stages,
            &signal_semaphores,
            frame.in_flight,
        ) {
            // A failed submit is a failed frame; the caller decides whether
            // to abort or run another loop iteration.
            tracing::error!("queue submit failed: {e}");
            self.phase = FramePhase::Ready;
            return Err(e);
        }

        let needs_recreate = self.swapchain.present(
            &surface.swapchain_loader,
            gpu.graphics_queue(),
            image_index,
            &[frame.queue_complete],
        )?;

        self.phase = FramePhase::Ready;
        self.tracker.advance();

        if needs_recreate {
            tracing::debug!("present reported suboptimal/out-of-date; recreating swapchain");
            self.recreate(gpu, surface, self.width, self.height)?;
        }

        Ok(())
    }

    /// Handle a window resize: drain the device and rebuild the swapchain,
    /// targets and per-frame synchronization at the new extent.
    ///
    /// # Safety
    /// The context and surface must be valid.
    pub unsafe fn resize(
        &mut self,
        gpu: &GpuContext,
        surface: &SurfaceContext,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.recreate(gpu, surface, width, height)?;
        tracing::info!("Resized to {}x{}", width, height);
        Ok(())
    }

    /// Tear down the swapchain and all per-frame resources.
    ///
    /// # Safety
    /// The context and surface must be valid; the device should be idle.
    pub unsafe fn destroy(&mut self, gpu: &GpuContext, surface: &SurfaceContext) {
        let device = gpu.device();
        // Framebuffers must go before the views they reference.
        self.targets.clear();
        for frame in &self.frames {
            frame.destroy(device);
        }
        self.frames.clear();
        self.command_pool.destroy(device);
        self.swapchain.destroy(device, &surface.swapchain_loader);
    }

    /// Destroy and rebuild everything tied to the swapchain. Per-frame
    /// fences are recreated signaled; their waited-on image set is stale.
    unsafe fn recreate(
        &mut self,
        gpu: &GpuContext,
        surface: &SurfaceContext,
        width: u32,
        height: u32,
    ) -> Result<()> {
        gpu.wait_idle()?;

        let device = gpu.device();
        self.width = width;
        self.height = height;

        self.targets.clear();
        self.swapchain.destroy(device, &surface.swapchain_loader);

        // The old swapchain handle was just destroyed, so no handoff.
        let swapchain = surface.create_swapchain(gpu, width, height, self.vsync, None)?;

        // The window pass format never changes with extent, but the render
        // area does.
        self.window_pass
            .set_render_area(swapchain.extent.width, swapchain.extent.height);
        self.targets = create_window_targets(gpu, &self.window_pass, &swapchain)?;

        // Image count can change across recreation; keep one command
        // buffer per image.
        if swapchain.image_count() != self.command_buffers.len() {
            device.free_command_buffers(self.command_pool.handle(), &self.command_buffers);
            self.command_buffers = self.command_pool.allocate_command_buffers(
                device,
                vk::CommandBufferLevel::PRIMARY,
                swapchain.image_count() as u32,
            )?;
        }

        // All fences are stale; recreate them signaled.
        for frame in &self.frames {
            frame.destroy(device);
        }
        self.frames.clear();
        let max_frames = swapchain.max_frames_in_flight();
        for _ in 0..max_frames {
            self.frames.push(FrameSync::new(device)?);
        }

        self.tracker = FlightTracker::new(max_frames, swapchain.image_count());
        self.swapchain = swapchain;
        self.phase = FramePhase::Ready;

        Ok(())
    }
}

/// Build the window render pass matching the swapchain's color format.
unsafe fn create_window_pass(gpu: &GpuContext, swapchain: &Swapchain) -> Result<RenderPass> {
    let color_format = format_from_vk(swapchain.format).ok_or_else(|| {
        GpuError::SwapchainCreation(format!(
            "surface format {:?} is not expressible in the frontend",
            swapchain.format
        ))
    })?;
    let config = RenderPassConfig::standard(
        swapchain.extent.width,
        swapchain.extent.height,
        color_format,
    );
    RenderPass::new(gpu.device(), config)
}

/// One framebuffer per swapchain image, sharing the depth attachment.
unsafe fn create_window_targets(
    gpu: &GpuContext,
    pass: &RenderPass,
    swapchain: &Swapchain,
) -> Result<Vec<RenderTarget>> {
    swapchain
        .image_views
        .iter()
        .map(|&view| {
            RenderTarget::new(
                gpu.device(),
                pass,
                &[view, swapchain.depth_view],
                swapchain.extent.width,
                swapchain.extent.height,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_index_stays_in_bounds() {
        let mut tracker = FlightTracker::new(2, 3);
        for _ in 0..100 {
            assert!(tracker.current_slot() < 2);
            tracker.advance();
        }
    }

    #[test]
    fn slots_cycle_round_robin() {
        // minImageCount=2 gives 3 images and 2 frames in flight; the slot
        // sequence over imageCount+1 frames cycles 0,1,0,1.
        let mut tracker = FlightTracker::new(2, 3);
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(tracker.current_slot());
            tracker.advance();
        }
        assert_eq!(seen, [0, 1, 0, 1]);
    }

    #[test]
    fn image_reuse_reports_prior_owner() {
        let mut tracker = FlightTracker::new(2, 2);

        // Frame 0 takes image 1
        tracker.claim_image(1);
        tracker.advance();

        // Frame 1 acquires the same image: the tracker names slot 0 so the
        // manager can wait on its fence before reuse.
        assert_eq!(tracker.image_owner(1), Some(0));
        tracker.claim_image(1);
        assert_eq!(tracker.image_owner(1), Some(1));
    }

    #[test]
    fn unclaimed_image_has_no_owner() {
        let tracker = FlightTracker::new(2, 3);
        assert_eq!(tracker.image_owner(0), None);
        assert_eq!(tracker.image_owner(2), None);
    }

    #[test]
    fn release_all_clears_ownership() {
        let mut tracker = FlightTracker::new(2, 2);
        tracker.claim_image(0);
        tracker.claim_image(1);
        tracker.release_all();
        assert_eq!(tracker.image_owner(0), None);
        assert_eq!(tracker.image_owner(1), None);
    }
}
