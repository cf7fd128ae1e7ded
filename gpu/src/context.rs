//! Frame lifecycle on a window surface.
//!
//! [`RenderContext`] ties a [`Swapchain`] to per-frame synchronization and
//! command buffers:
//!
//! 1. [`prepare_frame`](RenderContext::prepare_frame) waits for the frame
//!    slot's fence, releases what aged out of deferred destruction, acquires
//!    an image and begins the frame's command buffer.
//! 2. [`begin`](RenderContext::begin) / [`end`](RenderContext::end) scope a
//!    render pass on a render target, or on the swapchain image with
//!    [`begin_swapchain`](RenderContext::begin_swapchain).
//! 3. [`swap_buffers`](RenderContext::swap_buffers) submits and presents.
//!
//! Acquire and present report a [`PresentStatus`]; `OutOfDate` asks for
//! [`update_surface`](RenderContext::update_surface).
//!
//! ```ignore
//! loop {
//!     if context.prepare_frame()? == PresentStatus::OutOfDate {
//!         context.update_surface(window_extent)?;
//!         continue;
//!     }
//!     context.begin_swapchain(&[ClearValue::color(0.1, 0.1, 0.1, 1.0)])?;
//!     // draw...
//!     context.end()?;
//!     if context.swap_buffers()?.needs_recreate() {
//!         context.update_surface(window_extent)?;
//!     }
//! }
//! ```

use std::sync::Arc;

use crate::backend::{FramebufferHandle, RenderPassHandle};
use crate::command::{
    CommandBuffer, CommandBufferLevel, CommandBufferUsage, CommandPool, RenderPassBegin,
    ResetMode, Submission,
};
use crate::config::SwapchainConfig;
use crate::device::{GraphicsDevice, QueueRole};
use crate::error::{GraphicsError, GraphicsResult};
use crate::instance::Surface;
use crate::pipeline::{ImageBarrier, PassInfo};
use crate::render_target::{LoadOp, RenderPassLayout, RenderTarget};
use crate::swapchain::{PresentStatus, Swapchain};
use crate::sync::FrameSync;
use crate::types::{ClearValue, Extent2d, PipelineStages, ScissorRect, TextureLayout, Viewport};

/// Per-window frame loop.
pub struct RenderContext {
    device: Arc<GraphicsDevice>,
    surface: Option<Surface>,
    swapchain: Option<Swapchain>,
    frame_sync: FrameSync,
    pool: CommandPool,
    /// Command buffer last submitted from each frame slot.
    submitted: Vec<Option<CommandBuffer>>,
    current: Option<CommandBuffer>,
    image_index: Option<u32>,
    slot_retired: bool,
    in_pass: bool,
    presented_through_pass: bool,
    present_pass: RenderPassHandle,
    framebuffers: Vec<FramebufferHandle>,
}

impl RenderContext {
    /// Take ownership of `surface` and build a swapchain for it.
    pub fn new(device: &Arc<GraphicsDevice>, surface: Surface, config: SwapchainConfig) -> GraphicsResult<Self> {
        let frames = device.parameters().frames_in_flight;
        let swapchain = Swapchain::new(device, surface.handle(), config)?;
        let frame_sync = FrameSync::new(device.backend().clone(), frames)?;
        let pool = device.create_command_pool(QueueRole::Graphics, ResetMode::ResetIndividually)?;
        let present_pass = Self::create_present_pass(device, &swapchain)?;
        let framebuffers = Self::create_framebuffers(device, &swapchain, present_pass)?;

        log::info!(
            "Created render context: {} frames in flight, {} swapchain images",
            frames,
            swapchain.image_count()
        );
        Ok(Self {
            device: device.clone(),
            surface: Some(surface),
            swapchain: Some(swapchain),
            frame_sync,
            pool,
            submitted: (0..frames).map(|_| None).collect(),
            current: None,
            image_index: None,
            slot_retired: false,
            in_pass: false,
            presented_through_pass: false,
            present_pass,
            framebuffers,
        })
    }

    fn create_present_pass(device: &GraphicsDevice, swapchain: &Swapchain) -> GraphicsResult<RenderPassHandle> {
        let layout = RenderPassLayout {
            color_formats: vec![swapchain.surface_format().format],
            depth_format: None,
            final_color_layout: TextureLayout::PresentSrc,
            load_op: LoadOp::Clear,
        };
        device.checked(
            "create_render_pass",
            device.backend().create_render_pass(&layout),
        )
    }

    fn create_framebuffers(
        device: &GraphicsDevice,
        swapchain: &Swapchain,
        present_pass: RenderPassHandle,
    ) -> GraphicsResult<Vec<FramebufferHandle>> {
        let mut framebuffers = Vec::with_capacity(swapchain.views().len());
        for view in swapchain.views() {
            let framebuffer = device.backend().create_framebuffer(
                present_pass,
                std::slice::from_ref(view),
                swapchain.extent(),
            );
            match device.checked("create_framebuffer", framebuffer) {
                Ok(framebuffer) => framebuffers.push(framebuffer),
                Err(e) => {
                    for framebuffer in framebuffers {
                        device.backend().destroy_framebuffer(framebuffer);
                    }
                    return Err(e);
                }
            }
        }
        Ok(framebuffers)
    }

    fn swapchain(&self) -> GraphicsResult<&Swapchain> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| GraphicsError::Internal("render context has no swapchain".to_string()))
    }

    /// Start a frame.
    ///
    /// Waits for the frame slot's previous submission, advances deferred
    /// destruction, acquires the next image and begins recording. Returns
    /// `OutOfDate` without beginning anything when the swapchain must be
    /// recreated first.
    pub fn prepare_frame(&mut self) -> GraphicsResult<PresentStatus> {
        crate::profile_scope!("prepare_frame");
        if self.current.is_some() {
            log::warn!("prepare_frame called twice without swap_buffers");
            return Err(GraphicsError::NotReady(
                "frame already prepared".to_string(),
            ));
        }

        if !self.slot_retired {
            if !self
                .frame_sync
                .wait_current(self.device.parameters().fence_timeout)?
            {
                log::error!("Frame {} fence timed out", self.frame_sync.index());
                return Err(GraphicsError::Timeout);
            }
            self.device.advance_frame();
            if let Some(previous) = self.submitted[self.frame_sync.index()].take() {
                self.pool.discard(previous)?;
            }
            self.slot_retired = true;
        }

        let sync = self.frame_sync.current();
        let (index, status) = self
            .swapchain()?
            .acquire_next_image(sync.image_acquired, u64::MAX)?;
        if status == PresentStatus::OutOfDate {
            log::debug!("Swapchain out of date on acquire");
            return Ok(status);
        }

        self.frame_sync.reset_current()?;
        let mut cmd = self.pool.request(CommandBufferLevel::Primary)?;
        cmd.begin(CommandBufferUsage::OneTimeSubmit)?;
        self.current = Some(cmd);
        self.image_index = Some(index);
        self.presented_through_pass = false;
        log::trace!(
            "Prepared frame slot {} on image {}",
            self.frame_sync.index(),
            index
        );
        Ok(status)
    }

    fn begin_pass(&mut self, begin: RenderPassBegin) -> GraphicsResult<()> {
        if self.in_pass {
            return Err(GraphicsError::NotReady(
                "a render pass is already open".to_string(),
            ));
        }
        let cmd = self
            .current
            .as_mut()
            .ok_or_else(|| GraphicsError::NotReady("no frame prepared".to_string()))?;
        cmd.begin_render_pass(&begin);
        cmd.set_viewport(&Viewport::from_extent(begin.extent));
        cmd.set_scissor(&ScissorRect::from_extent(begin.extent));
        self.in_pass = true;
        Ok(())
    }

    /// Begin a render pass on `target`.
    pub fn begin(&mut self, target: &RenderTarget, clears: &[ClearValue]) -> GraphicsResult<()> {
        self.begin_pass(target.begin_info(clears))
    }

    /// Begin the present pass on the acquired swapchain image.
    pub fn begin_swapchain(&mut self, clears: &[ClearValue]) -> GraphicsResult<()> {
        let index = self
            .image_index
            .ok_or_else(|| GraphicsError::NotReady("no image acquired".to_string()))?;
        let clear = clears
            .first()
            .copied()
            .unwrap_or(ClearValue::color(0.0, 0.0, 0.0, 1.0));
        let begin = RenderPassBegin {
            render_pass: self.present_pass,
            framebuffer: self.framebuffers[index as usize],
            extent: self.swapchain()?.extent(),
            clear_values: vec![clear],
        };
        self.begin_pass(begin)?;
        self.presented_through_pass = true;
        Ok(())
    }

    /// End the open render pass.
    pub fn end(&mut self) -> GraphicsResult<()> {
        if !self.in_pass {
            return Err(GraphicsError::NotReady("no render pass open".to_string()));
        }
        if let Some(cmd) = self.current.as_mut() {
            cmd.end_render_pass();
        }
        self.in_pass = false;
        Ok(())
    }

    /// The frame's command buffer, between `prepare_frame` and `swap_buffers`.
    pub fn command_buffer(&mut self) -> Option<&mut CommandBuffer> {
        self.current.as_mut()
    }

    /// Submit the frame and present the acquired image.
    pub fn swap_buffers(&mut self) -> GraphicsResult<PresentStatus> {
        crate::profile_scope!("swap_buffers");
        let (Some(mut cmd), Some(index)) = (self.current.take(), self.image_index.take()) else {
            return Err(GraphicsError::NotReady("no frame prepared".to_string()));
        };
        if self.in_pass {
            log::warn!("swap_buffers with an open render pass; ending it");
            cmd.end_render_pass();
            self.in_pass = false;
        }
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| GraphicsError::Internal("render context has no swapchain".to_string()))?;
        if !self.presented_through_pass {
            cmd.pipeline_barrier(&[ImageBarrier::transition(
                swapchain.images()[index as usize],
                swapchain.surface_format().format,
                TextureLayout::Undefined,
                TextureLayout::PresentSrc,
            )]);
        }
        cmd.end()?;

        let sync = self.frame_sync.current();
        let mut submission = Submission::new()
            .wait(sync.image_acquired, PipelineStages::COLOR_ATTACHMENT_OUTPUT)
            .signal(sync.render_complete);
        submission.push(&mut cmd)?;
        let submitted = self
            .device
            .submit(QueueRole::Graphics, &submission, Some(sync.in_flight));
        let slot = self.frame_sync.index();
        self.submitted[slot] = Some(cmd);
        submitted?;

        let status = swapchain.present(index, &[sync.render_complete])?;
        self.frame_sync.advance();
        self.slot_retired = false;
        crate::frame_mark!();
        Ok(status)
    }

    /// Recreate the swapchain at `extent` after an out-of-date or suboptimal status.
    pub fn update_surface(&mut self, extent: Extent2d) -> GraphicsResult<()> {
        if self.current.is_some() {
            return Err(GraphicsError::NotReady(
                "cannot recreate the swapchain mid-frame".to_string(),
            ));
        }
        let swapchain = self
            .swapchain
            .as_mut()
            .ok_or_else(|| GraphicsError::Internal("render context has no swapchain".to_string()))?;
        let format = swapchain.surface_format();
        swapchain.recreate(extent)?;

        if swapchain.surface_format() != format {
            log::warn!(
                "Surface format changed from {:?} to {:?}, rebuilding present pass",
                format,
                swapchain.surface_format()
            );
            let pass = Self::create_present_pass(&self.device, swapchain)?;
            let old = std::mem::replace(&mut self.present_pass, pass);
            self.device.destroy_async(old);
        }
        let framebuffers = Self::create_framebuffers(&self.device, swapchain, self.present_pass)?;
        for framebuffer in std::mem::replace(&mut self.framebuffers, framebuffers) {
            self.device.destroy_async(framebuffer);
        }
        Ok(())
    }

    /// The device.
    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    /// Current frame slot.
    pub fn frame_index(&self) -> usize {
        self.frame_sync.index()
    }

    /// Image acquired for the current frame.
    pub fn image_index(&self) -> Option<u32> {
        self.image_index
    }

    /// Current swapchain extent.
    pub fn extent(&self) -> Extent2d {
        self.swapchain
            .as_ref()
            .map(Swapchain::extent)
            .unwrap_or_default()
    }

    /// The swapchain being presented to.
    pub fn current_swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    /// Pass shape of the present pass, for pipelines drawing to the window.
    pub fn present_pass_info(&self) -> PassInfo {
        PassInfo {
            render_pass: self.present_pass,
            color_attachment_count: 1,
            has_depth: false,
        }
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to idle device while dropping render context: {}", e);
        }
        let leases = self.submitted.iter_mut().filter_map(Option::take).chain(self.current.take());
        for cmd in leases.collect::<Vec<_>>() {
            if let Err(e) = self.pool.discard(cmd) {
                log::warn!("Failed to return frame command buffer: {}", e);
            }
        }
        for framebuffer in self.framebuffers.drain(..) {
            self.device.destroy_async(framebuffer);
        }
        self.device.destroy_async(self.present_pass);
        drop(self.swapchain.take());
        if let Some(surface) = self.surface.take() {
            self.device.defer(move || drop(surface));
        }
    }
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("frame_index", &self.frame_sync.index())
            .field("image_index", &self.image_index)
            .field("extent", &self.extent())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendType, DummyBackend};
    use crate::config::{DeviceParameters, InstanceParameters};
    use crate::error::CheckPolicy;
    use crate::instance::GraphicsInstance;
    use raw_window_handle::{
        DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, RawDisplayHandle,
        RawWindowHandle, WebDisplayHandle, WebWindowHandle, WindowHandle,
    };

    struct FakeWindow;

    impl HasWindowHandle for FakeWindow {
        fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
            let raw = RawWindowHandle::Web(WebWindowHandle::new(1));
            // SAFETY: the dummy backend never dereferences window handles.
            Ok(unsafe { WindowHandle::borrow_raw(raw) })
        }
    }

    impl HasDisplayHandle for FakeWindow {
        fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
            let raw = RawDisplayHandle::Web(WebDisplayHandle::new());
            // SAFETY: as above.
            Ok(unsafe { DisplayHandle::borrow_raw(raw) })
        }
    }

    fn context() -> (Arc<DummyBackend>, RenderContext) {
        let backend = Arc::new(DummyBackend::new());
        let instance = GraphicsInstance::with_backend(
            backend.clone(),
            InstanceParameters::new().with_backend(BackendType::Dummy),
        );
        let device = instance
            .create_device(
                DeviceParameters::new()
                    .with_frames_in_flight(2)
                    .with_check_policy(CheckPolicy::Propagate),
            )
            .unwrap();
        let surface = instance.create_surface(&FakeWindow).unwrap();
        let context = RenderContext::new(&device, surface, SwapchainConfig::new()).unwrap();
        (backend, context)
    }

    #[test]
    fn test_frame_loop_cycles_slots() {
        let (_backend, mut context) = context();
        for frame in 0..5 {
            assert_eq!(context.frame_index(), frame % 2);
            assert_eq!(context.prepare_frame().unwrap(), PresentStatus::Optimal);
            context
                .begin_swapchain(&[ClearValue::color(0.0, 0.0, 1.0, 1.0)])
                .unwrap();
            context.command_buffer().unwrap().draw(3, 1, 0, 0);
            context.end().unwrap();
            assert_eq!(context.swap_buffers().unwrap(), PresentStatus::Optimal);
        }
        assert_eq!(context.device().frame_index(), 5);
        assert_eq!(context.pool.allocated_count(CommandBufferLevel::Primary), 2);
    }

    #[test]
    fn test_unused_image_is_transitioned_for_present() {
        let (backend, mut context) = context();
        context.prepare_frame().unwrap();
        let index = context.image_index().unwrap() as usize;
        let image = context.current_swapchain().unwrap().images()[index];
        context.swap_buffers().unwrap();
        assert_eq!(
            backend.image_transitions(image),
            vec![(TextureLayout::Undefined, TextureLayout::PresentSrc)]
        );
    }

    #[test]
    fn test_out_of_date_then_update_surface() {
        let (backend, mut context) = context();
        let format = context.current_swapchain().unwrap().surface_format();
        backend.set_out_of_date(true);
        assert_eq!(context.prepare_frame().unwrap(), PresentStatus::OutOfDate);
        assert!(context.command_buffer().is_none());

        context.update_surface(Extent2d::new(1280, 720)).unwrap();
        assert_eq!(context.extent(), Extent2d::new(1280, 720));
        assert_eq!(context.current_swapchain().unwrap().surface_format(), format);

        assert_eq!(context.prepare_frame().unwrap(), PresentStatus::Optimal);
        assert_eq!(context.device().frame_index(), 1);
        context.swap_buffers().unwrap();
    }

    #[test]
    fn test_pass_scoping_errors() {
        let (_backend, mut context) = context();
        assert!(context.begin_swapchain(&[]).is_err());
        context.prepare_frame().unwrap();
        assert!(context.end().is_err());
        context.begin_swapchain(&[]).unwrap();
        assert!(context.begin_swapchain(&[]).is_err());
        context.end().unwrap();
        assert!(context.prepare_frame().is_err());
        context.swap_buffers().unwrap();
    }

    #[test]
    fn test_drop_releases_everything() {
        let (backend, context) = context();
        let device = context.device().clone();
        drop(context);
        drop(device);
        assert_eq!(backend.live_object_count(), 0);
    }
}
